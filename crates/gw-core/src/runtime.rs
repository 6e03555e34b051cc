//! Wiring of the subsystem from one configuration.

use std::path::PathBuf;
use std::sync::Arc;

use gw_config::{Config, LiveConfig};

use crate::alert::{AlertSink, HttpAlertSink, LogAlertSink};
use crate::backup::BackupManager;
use crate::budget::ServiceRestartBudget;
use crate::controllers::Collaborators;
use crate::recovery::RecoveryEscalator;
use crate::update::{HttpUpdateSource, NoUpdateServer, UpdateManager, UpdateSource};

/// Every long-lived component, sharing one live config, one restart budget
/// and one alert sink.
pub struct Runtime {
    pub live: Arc<LiveConfig>,
    pub collaborators: Collaborators,
    pub budget: Arc<ServiceRestartBudget>,
    pub alerts: Arc<dyn AlertSink>,
    pub backups: Arc<BackupManager>,
    pub updater: Arc<UpdateManager>,
    pub escalator: Arc<RecoveryEscalator>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("generation", &self.live.generation())
            .field("budget", &self.budget.usage())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Real collaborators, HTTP update server and alert sink.
    pub fn system(config: Config, config_path: Option<PathBuf>) -> Result<Self, gw_common::Error> {
        let collaborators = Collaborators::system(&config);
        let source: Arc<dyn UpdateSource> = match HttpUpdateSource::from_config(&config) {
            Some(source) => Arc::new(source),
            None => Arc::new(NoUpdateServer),
        };
        let http = HttpAlertSink::from_config(&config);
        let alerts: Arc<dyn AlertSink> = if http.is_enabled() {
            Arc::new(http)
        } else {
            Arc::new(LogAlertSink)
        };
        Self::assemble(config, config_path, collaborators, source, alerts)
    }

    pub fn assemble(
        config: Config,
        config_path: Option<PathBuf>,
        collaborators: Collaborators,
        source: Arc<dyn UpdateSource>,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self, gw_common::Error> {
        let state_dir = config.state_dir();
        std::fs::create_dir_all(&state_dir)?;

        let budget = Arc::new(ServiceRestartBudget::new(
            config.recovery.max_service_restarts,
        ));
        let backups = Arc::new(BackupManager::open(&config, collaborators.service.clone())?);
        let live = Arc::new(LiveConfig::new(config));

        let mut updater = UpdateManager::new(
            live.clone(),
            backups.clone(),
            source,
            collaborators.service.clone(),
            budget.clone(),
            alerts.clone(),
        );
        if let Some(path) = config_path {
            updater = updater.with_config_path(path);
        }

        let escalator = RecoveryEscalator::new(
            live.clone(),
            collaborators.clone(),
            budget.clone(),
            alerts.clone(),
        )
        .with_state_dir(state_dir);

        Ok(Self {
            live,
            collaborators,
            budget,
            alerts,
            backups,
            updater: Arc::new(updater),
            escalator: Arc::new(escalator),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::RecordingAlertSink;
    use crate::controllers::mock::MockSet;
    use tempfile::TempDir;

    #[test]
    fn test_components_share_one_budget() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.device.data_dir = temp.path().join("data");
        config.device.install_dir = temp.path().join("install");
        config.backup.backup_dir = temp.path().join("backups");

        let mocks = MockSet::new();
        let runtime = Runtime::assemble(
            config,
            None,
            mocks.collaborators(),
            Arc::new(NoUpdateServer),
            Arc::new(RecordingAlertSink::default()),
        )
        .unwrap();

        runtime.budget.reserve("test").unwrap().commit();
        assert_eq!(runtime.escalator.status().service_restarts.used, 1);
        assert_eq!(runtime.updater.status().update_result, None);
    }
}
