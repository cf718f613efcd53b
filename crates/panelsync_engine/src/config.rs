//! Configuration for the sync engine.
//!
//! [`SyncConfig`] is the explicit object the engine is built from. The
//! binary produces it from a TOML file via [`load_config`]:
//!
//! ```toml
//! [parent]
//! url = "https://panel.example.com/secret-proxy-path"
//! api_key = "00000000-0000-0000-0000-000000000000"
//!
//! [sync]
//! state_dir = "/var/lib/panelsync"
//!
//! [store]
//! path = "/var/lib/panelsync/users.cbor"
//!
//! [activation]
//! command = "/usr/local/bin/xray-add-clients"
//! inbound_tags = ["realityin_tcp", "trojan_ws"]
//! timeout_secs = 60
//! ```

use crate::activation::DEFAULT_ACTIVATION_TIMEOUT;
use panelsync_protocol::{AdminId, DEFAULT_MAX_IPS};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file used when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/panelsync/config.toml";

const DEFAULT_API_PATH: &str = "api/v2/admin/user";
const DEFAULT_STATE_DIR: &str = "/var/lib/panelsync";
const DEFAULT_STORE_PATH: &str = "/var/lib/panelsync/users.cbor";

const LEASE_FILE: &str = "panelsync.lock";
const LEDGER_FILE: &str = "confirmed.cbor";
const STATUS_FILE: &str = "status.json";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the parent panel, including any proxy path.
    pub parent_url: String,
    /// Static API key sent as `Hiddify-API-Key`.
    pub api_key: String,
    /// Path of the admin user collection below `parent_url`.
    pub api_path: String,
    /// Timeout of each per-user request.
    pub user_timeout: Duration,
    /// Timeout of the bulk user enumeration.
    pub list_timeout: Duration,
    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
    /// Users at or below this many bytes are not reported.
    pub usage_threshold: u64,
    /// Deltas at or below this many GB are not reported.
    pub min_delta_gb: f64,
    /// Local admin new users are attributed to.
    pub owner: AdminId,
    /// Concurrent IP limit for new users.
    pub default_max_ips: u32,
    /// Directory for the lease, confirmation ledger and status file.
    pub state_dir: PathBuf,
}

impl SyncConfig {
    /// Creates a new sync configuration with default tuning.
    pub fn new(parent_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            parent_url: parent_url.into(),
            api_key: api_key.into(),
            api_path: DEFAULT_API_PATH.into(),
            user_timeout: Duration::from_secs(30),
            list_timeout: Duration::from_secs(60),
            accept_invalid_certs: true,
            usage_threshold: 1_000_000,
            min_delta_gb: 0.001,
            owner: AdminId::default(),
            default_max_ips: DEFAULT_MAX_IPS,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }

    /// Sets the API path below the parent URL.
    pub fn with_api_path(mut self, path: impl Into<String>) -> Self {
        self.api_path = path.into();
        self
    }

    /// Sets the per-user request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.user_timeout = timeout;
        self
    }

    /// Sets the bulk enumeration timeout.
    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    /// Sets whether invalid TLS certificates are accepted.
    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Sets the byte threshold for reporting.
    pub fn with_usage_threshold(mut self, bytes: u64) -> Self {
        self.usage_threshold = bytes;
        self
    }

    /// Sets the minimum reportable delta in GB.
    pub fn with_min_delta_gb(mut self, gb: f64) -> Self {
        self.min_delta_gb = gb;
        self
    }

    /// Sets the owning local admin.
    pub fn with_owner(mut self, owner: AdminId) -> Self {
        self.owner = owner;
        self
    }

    /// Sets the IP limit for new users.
    pub fn with_default_max_ips(mut self, max_ips: u32) -> Self {
        self.default_max_ips = max_ips;
        self
    }

    /// Sets the state directory.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// URL of the user collection, without a trailing slash.
    pub fn users_url(&self) -> String {
        format!(
            "{}/{}",
            self.parent_url.trim_end_matches('/'),
            self.api_path.trim_matches('/')
        )
    }

    /// Path of the cycle lease file.
    pub fn lease_path(&self) -> PathBuf {
        self.state_dir.join(LEASE_FILE)
    }

    /// Path of the confirmation ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join(LEDGER_FILE)
    }

    /// Path of the status file.
    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join(STATUS_FILE)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

/// Errors raised while loading the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for this schema.
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("validation: {0}")]
    Validation(String),
}

/// The on-disk configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Parent panel connection.
    pub parent: ParentSection,
    /// Sync tuning.
    #[serde(default)]
    pub sync: SyncSection,
    /// Local user store.
    #[serde(default)]
    pub store: StoreSection,
    /// Proxy activation.
    #[serde(default)]
    pub activation: ActivationSection,
}

/// `[parent]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParentSection {
    /// Base URL including any proxy path.
    pub url: String,
    /// API key.
    pub api_key: String,
    /// User collection path below `url`.
    #[serde(default = "default_api_path")]
    pub api_path: String,
    /// Skip TLS verification.
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
}

/// `[sync]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSection {
    /// Per-user request timeout in seconds.
    pub user_timeout_secs: u64,
    /// Bulk enumeration timeout in seconds.
    pub list_timeout_secs: u64,
    /// Reporting threshold in bytes.
    pub usage_threshold: u64,
    /// Minimum delta in GB.
    pub min_delta_gb: f64,
    /// Owning local admin id.
    pub owner_admin: u32,
    /// IP limit for new users.
    pub default_max_ips: u32,
    /// State directory.
    pub state_dir: PathBuf,
}

impl Default for SyncSection {
    fn default() -> Self {
        let defaults = SyncConfig::default();
        Self {
            user_timeout_secs: defaults.user_timeout.as_secs(),
            list_timeout_secs: defaults.list_timeout.as_secs(),
            usage_threshold: defaults.usage_threshold,
            min_delta_gb: defaults.min_delta_gb,
            owner_admin: defaults.owner.0,
            default_max_ips: defaults.default_max_ips,
            state_dir: defaults.state_dir,
        }
    }
}

/// `[store]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    /// Snapshot file of the user store.
    pub path: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

/// `[activation]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivationSection {
    /// Program that adds clients to the live proxy. Activation is skipped
    /// when unset.
    pub command: Option<PathBuf>,
    /// Extra arguments placed before the uuids.
    pub args: Vec<String>,
    /// Inbound tags every new user is added to.
    pub inbound_tags: Vec<String>,
    /// Seconds the program may run before it is killed.
    pub timeout_secs: u64,
}

impl Default for ActivationSection {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            inbound_tags: Vec::new(),
            timeout_secs: DEFAULT_ACTIVATION_TIMEOUT.as_secs(),
        }
    }
}

impl ActivationSection {
    /// Time limit for one activation run.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_api_path() -> String {
    DEFAULT_API_PATH.into()
}

fn default_true() -> bool {
    true
}

impl ConfigFile {
    /// Builds the engine configuration.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig::new(&self.parent.url, &self.parent.api_key)
            .with_api_path(&self.parent.api_path)
            .with_accept_invalid_certs(self.parent.accept_invalid_certs)
            .with_timeout(Duration::from_secs(self.sync.user_timeout_secs))
            .with_list_timeout(Duration::from_secs(self.sync.list_timeout_secs))
            .with_usage_threshold(self.sync.usage_threshold)
            .with_min_delta_gb(self.sync.min_delta_gb)
            .with_owner(AdminId(self.sync.owner_admin))
            .with_default_max_ips(self.sync.default_max_ips)
            .with_state_dir(&self.sync.state_dir)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let url = self.parent.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "parent.url must be an http(s) URL, got {url:?}"
            )));
        }
        if self.parent.api_key.trim().is_empty() {
            return Err(ConfigError::Validation("parent.api_key is empty".into()));
        }
        if self.sync.user_timeout_secs == 0
            || self.sync.list_timeout_secs == 0
            || self.activation.timeout_secs == 0
        {
            return Err(ConfigError::Validation("timeouts must be positive".into()));
        }
        if !self.sync.min_delta_gb.is_finite() || self.sync.min_delta_gb < 0.0 {
            return Err(ConfigError::Validation(format!(
                "sync.min_delta_gb must be a non-negative number, got {}",
                self.sync.min_delta_gb
            )));
        }
        if self.activation.command.is_some() && self.activation.inbound_tags.is_empty() {
            return Err(ConfigError::Validation(
                "activation.command is set but activation.inbound_tags is empty".into(),
            ));
        }
        Ok(())
    }
}

/// Loads and validates a TOML config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ConfigFile, ConfigError> {
    let data = fs::read_to_string(path.as_ref())?;
    parse_config(&data)
}

/// Parses and validates config text.
pub fn parse_config(data: &str) -> Result<ConfigFile, ConfigError> {
    let config: ConfigFile = toml::from_str(data)?;
    config.validate()?;
    Ok(config)
}
