//! Test fixtures and engine helpers.
//!
//! Provides ready-made users and a sync engine wired to in-memory doubles
//! with a temporary state directory.

use panelsync_engine::{
    CycleReport, MockParentApi, RecordingActivator, SyncConfig, SyncEngine,
};
use panelsync_protocol::{AdminId, ParentFields, ParentUser, UserMode, UserRecord};
use panelsync_store::MemoryUserStore;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Engine type used by the harness.
pub type TestEngine = SyncEngine<MemoryUserStore, MockParentApi, RecordingActivator>;

/// A parent user with a fresh uuid and typical values.
pub fn parent_user(name: &str) -> ParentUser {
    ParentUser {
        uuid: Uuid::new_v4(),
        name: name.into(),
        usage_limit_gb: 30.0,
        package_days: 30,
        mode: UserMode::NoReset,
        enable: true,
        comment: None,
        start_date: None,
        last_reset_time: None,
        telegram_id: None,
        ed25519_private_key: None,
        ed25519_public_key: None,
        wg_pk: None,
        wg_psk: None,
        wg_pub: None,
    }
}

/// Parent-owned fields with typical values.
pub fn parent_fields(name: &str) -> ParentFields {
    ParentFields {
        name: name.into(),
        usage_limit: 0,
        package_days: 30,
        mode: UserMode::NoReset,
        enable: true,
        comment: String::new(),
        start_date: None,
        last_reset_time: None,
        telegram_id: None,
        ed25519_private_key: String::new(),
        ed25519_public_key: String::new(),
        wg_pk: String::new(),
        wg_psk: String::new(),
        wg_pub: String::new(),
        added_by: AdminId::default(),
    }
}

/// An enabled local user with `usage` unreported bytes.
pub fn local_user(name: &str, usage: u64) -> UserRecord {
    let mut record = UserRecord::from_parent(Uuid::new_v4(), parent_fields(name));
    record.current_usage = usage;
    record
}

/// A sync engine over in-memory doubles.
///
/// The store, the parent and the state directory are shared, so
/// [`TestNode::restart`] yields a fresh engine that sees everything the
/// previous one left behind, as a new process would.
pub struct TestNode {
    /// The engine instance.
    pub engine: TestEngine,
    store: Arc<MemoryUserStore>,
    parent: Arc<MockParentApi>,
    activator: Arc<RecordingActivator>,
    config: SyncConfig,
    /// The temporary directory (kept alive to prevent cleanup).
    state_dir: Arc<TempDir>,
}

impl TestNode {
    /// Creates a node with default settings.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// Creates a node after letting `f` adjust the configuration.
    ///
    /// The state directory is always overridden with a temporary one.
    pub fn with_config(f: impl FnOnce(SyncConfig) -> SyncConfig) -> Self {
        let state_dir = Arc::new(TempDir::new().expect("Failed to create temp directory"));
        let config = f(SyncConfig::new("https://parent.test", "test-key"))
            .with_state_dir(state_dir.path());
        let store = Arc::new(MemoryUserStore::new());
        let parent = Arc::new(MockParentApi::new());
        let activator = Arc::new(RecordingActivator::new());
        let engine = SyncEngine::with_shared(
            config.clone(),
            Arc::clone(&store),
            Arc::clone(&parent),
            Arc::clone(&activator),
        );
        Self {
            engine,
            store,
            parent,
            activator,
            config,
            state_dir,
        }
    }

    /// Returns a new engine over the same store, parent and state.
    pub fn restart(&self) -> Self {
        let engine = SyncEngine::with_shared(
            self.config.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.parent),
            Arc::clone(&self.activator),
        );
        Self {
            engine,
            store: Arc::clone(&self.store),
            parent: Arc::clone(&self.parent),
            activator: Arc::clone(&self.activator),
            config: self.config.clone(),
            state_dir: Arc::clone(&self.state_dir),
        }
    }

    /// Runs one cycle, panicking if it cannot start.
    pub fn cycle(&self) -> CycleReport {
        self.engine.run_cycle().expect("Cycle failed to start")
    }

    /// The local store.
    pub fn store(&self) -> &MemoryUserStore {
        &self.store
    }

    /// The parent double.
    pub fn parent(&self) -> &MockParentApi {
        &self.parent
    }

    /// The activation double.
    pub fn activator(&self) -> &RecordingActivator {
        &self.activator
    }

    /// The configuration the engine runs with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The state directory (lease, ledger, status file).
    pub fn state_dir(&self) -> &Path {
        self.state_dir.path()
    }

    /// Current usage of a local user, panicking if it does not exist.
    pub fn local_usage(&self, uuid: &Uuid) -> u64 {
        self.store
            .get(uuid)
            .expect("User should exist locally")
            .current_usage
    }

    /// Accumulated usage the parent holds for `uuid`, zero if unknown.
    pub fn parent_usage(&self, uuid: &Uuid) -> f64 {
        self.parent.usage(uuid).unwrap_or(0.0)
    }
}

impl Default for TestNode {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestNode {
    type Target = TestEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A node whose users are mirrored on the parent and carry `usage`
    /// unreported bytes each. Returns the node and the uuids.
    pub fn metered_node(usages: &[u64]) -> (TestNode, Vec<Uuid>) {
        let node = TestNode::new();
        let mut uuids = Vec::with_capacity(usages.len());
        for (i, usage) in usages.iter().enumerate() {
            let record = local_user(&format!("user_{i}"), *usage);
            let mut upstream = parent_user(&format!("user_{i}"));
            upstream.uuid = record.uuid;
            node.parent().upsert_user(upstream);
            uuids.push(record.uuid);
            node.store().put(record);
        }
        (node, uuids)
    }
}
