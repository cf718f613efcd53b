//! Inbound classification for direct user activation.
//!
//! The traffic layer exposes inbounds by tag only. The protocol of an inbound
//! is inferred from its tag by an ordered rule table; the first matching
//! substring wins and unmatched tags default to VLESS.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Flow used by reality TCP inbounds.
const VISION_FLOW: &str = "xtls-rprx-vision";

/// Tag fragment that selects [`VISION_FLOW`].
const VISION_TAG: &str = "realityin_tcp";

/// Mail domain used for activation client emails.
const EMAIL_DOMAIN: &str = "hiddify.com";

/// Ordered `(substring, protocol)` rules.
const RULES: &[(&str, InboundProtocol)] = &[
    ("vless", InboundProtocol::Vless),
    ("realityin", InboundProtocol::Vless),
    ("xtls", InboundProtocol::Vless),
    ("quic", InboundProtocol::Vless),
    ("reality", InboundProtocol::Vless),
    ("kcp", InboundProtocol::Vless),
    ("trojan", InboundProtocol::Trojan),
    ("dispatcher", InboundProtocol::Trojan),
    ("vmess", InboundProtocol::Vmess),
    ("ss", InboundProtocol::Shadowsocks),
    ("v2ray", InboundProtocol::Shadowsocks),
];

/// Protocol spoken by an inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundProtocol {
    /// VLESS.
    Vless,
    /// Trojan.
    Trojan,
    /// VMess.
    Vmess,
    /// Shadowsocks.
    Shadowsocks,
}

impl InboundProtocol {
    /// Returns true if clients of this protocol carry a flow parameter.
    pub fn accepts_flow(&self) -> bool {
        matches!(self, InboundProtocol::Vless)
    }
}

/// Protocol and flow selected for one inbound tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundTarget {
    /// Protocol of the inbound.
    pub protocol: InboundProtocol,
    /// Flow, only ever set when the protocol accepts one.
    pub flow: Option<&'static str>,
}

/// Classifies an inbound tag (case-insensitive).
pub fn classify_tag(tag: &str) -> InboundTarget {
    let tag = tag.to_ascii_lowercase();
    let protocol = RULES
        .iter()
        .find(|(needle, _)| tag.contains(needle))
        .map(|(_, protocol)| *protocol)
        .unwrap_or(InboundProtocol::Vless);

    let flow = if protocol.accepts_flow() && tag.contains(VISION_TAG) {
        Some(VISION_FLOW)
    } else {
        None
    };

    InboundTarget { protocol, flow }
}

/// Email identifying an activated client in the traffic layer.
pub fn activation_email(uuid: &Uuid) -> String {
    format!("{uuid}@{EMAIL_DOMAIN}")
}

/// One client to add to one inbound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationEntry {
    /// Inbound tag.
    pub tag: String,
    /// User identity.
    pub uuid: Uuid,
    /// Client email.
    pub email: String,
    /// Inbound protocol.
    pub protocol: InboundProtocol,
    /// Flow, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

impl ActivationEntry {
    /// Builds the entry for `uuid` on inbound `tag`.
    pub fn new(tag: &str, uuid: Uuid) -> Self {
        let target = classify_tag(tag);
        Self {
            tag: tag.to_string(),
            uuid,
            email: activation_email(&uuid),
            protocol: target.protocol,
            flow: target.flow.map(str::to_string),
        }
    }
}
