//! Wiring the engine from the config file and running one cycle.

use panelsync_engine::{
    load_config, ActivationSection, Activator, CommandActivator, CycleReport, HttpParentApi,
    NoopActivator, ReqwestClient, SyncEngine, SyncError, SyncResult,
};
use panelsync_store::FileUserStore;
use std::path::Path;

/// How the invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every phase succeeded.
    Success,
    /// The cycle ran but something failed.
    Failed,
    /// Another cycle holds the lease.
    Busy,
    /// The config file could not be loaded.
    BadConfig,
}

impl Outcome {
    /// Process exit code (sysexits values for busy and config errors).
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Failed => 1,
            Outcome::Busy => 75,
            Outcome::BadConfig => 78,
        }
    }

    fn from_cycle(result: SyncResult<CycleReport>) -> Self {
        match result {
            Ok(report) if report.success => Outcome::Success,
            Ok(_) => Outcome::Failed,
            Err(SyncError::CycleInProgress(path)) => {
                tracing::warn!(lease = %path.display(), "another sync cycle is running, skipping");
                Outcome::Busy
            }
            Err(e) => {
                tracing::error!(error = %e, "sync cycle could not start");
                Outcome::Failed
            }
        }
    }
}

/// Loads the config at `config_path` and runs one cycle.
pub fn run(config_path: &Path) -> Outcome {
    let file = match load_config(config_path) {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(path = %config_path.display(), error = %e, "failed to load config");
            return Outcome::BadConfig;
        }
    };
    let config = file.sync_config();

    let store = match FileUserStore::open(&file.store.path) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(path = %file.store.path.display(), error = %e, "failed to open user store");
            return Outcome::Failed;
        }
    };
    let client = match ReqwestClient::new(config.accept_invalid_certs) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to build HTTP client");
            return Outcome::Failed;
        }
    };
    let parent = HttpParentApi::new(&config, client);
    tracing::debug!(url = parent.users_url(), "parent API configured");

    let engine = SyncEngine::new(config, store, parent, activator(&file.activation));
    Outcome::from_cycle(engine.run_cycle())
}

fn activator(section: &ActivationSection) -> Box<dyn Activator> {
    match &section.command {
        Some(program) => Box::new(
            CommandActivator::new(
                program,
                section.args.clone(),
                section.inbound_tags.clone(),
            )
            .with_timeout(section.timeout()),
        ),
        None => Box::new(NoopActivator),
    }
}
