//! Progressive failure recovery.
//!
//! Every tick probes each [`Domain`]. A failing domain goes through the same
//! algorithm:
//!
//! 1. Inside `recovery_interval` of the previous attempt: debounced, no
//!    counter change.
//! 2. Otherwise the counter goes up and the ladder step for that count runs.
//! 3. A step that heals the domain resets the counter.
//! 4. Past `max_retries` the domain is critical: its feature is switched off
//!    in the live config, an alert goes out, and it is left alone until an
//!    external reset.
//!
//! Whole-service restarts on any ladder draw from the [`ServiceRestartBudget`]
//! shared with the updater.

pub mod disk;
pub mod domain;
pub mod ladder;

pub use domain::{Domain, Feature, FailureDomainState, UnknownDomain};
pub use ladder::{step_for, Step};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

use gw_config::{Config, LiveConfig};

use crate::alert::{Alert, AlertSink};
use crate::budget::{BudgetUsage, ServiceRestartBudget};
use crate::controllers::Collaborators;
use crate::logging::event_names;

/// Result of handling one domain in one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Healthy,
    /// Critical and waiting for an external reset.
    Suppressed,
    Debounced,
    Recovered { attempt: u32, step: Step },
    StillFailing { attempt: u32, step: Step },
    /// Retries just ran out.
    Critical { failures: u32 },
}

/// Health of one domain at probe time.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Probe {
    Healthy,
    /// Degraded but below the action threshold; logged only.
    Warning(f64),
    Failing,
}

/// What `recovery status` prints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryStatus {
    pub generated_at: Option<DateTime<Utc>>,
    pub domains: BTreeMap<Domain, FailureDomainState>,
    pub service_restarts: BudgetUsage,
    pub disabled_features: Vec<String>,
}

impl RecoveryStatus {
    pub fn load(path: &Path) -> Option<Self> {
        let text = fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, json)?;
        fs::rename(&temp, path)
    }
}

/// Ask a running escalator to clear `domain` on its next tick.
///
/// The request is a file under `state/resets/`; the escalator consumes it.
pub fn request_reset(state_dir: &Path, domain: Domain) -> io::Result<PathBuf> {
    let dir = resets_dir(state_dir);
    fs::create_dir_all(&dir)?;
    let path = dir.join(domain.as_str());
    fs::write(&path, Utc::now().to_rfc3339())?;
    Ok(path)
}

fn resets_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("resets")
}

pub fn status_path(state_dir: &Path) -> PathBuf {
    state_dir.join("recovery.json")
}

pub struct RecoveryEscalator {
    live: Arc<LiveConfig>,
    collab: Collaborators,
    budget: Arc<ServiceRestartBudget>,
    alerts: Arc<dyn AlertSink>,
    state: Mutex<BTreeMap<Domain, FailureDomainState>>,
    state_dir: Option<PathBuf>,
}

impl std::fmt::Debug for RecoveryEscalator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryEscalator")
            .field("state", &*self.lock_state())
            .finish_non_exhaustive()
    }
}

impl RecoveryEscalator {
    pub fn new(
        live: Arc<LiveConfig>,
        collab: Collaborators,
        budget: Arc<ServiceRestartBudget>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            live,
            collab,
            budget,
            alerts,
            state: Mutex::new(BTreeMap::new()),
            state_dir: None,
        }
    }

    /// Persist status to and take reset requests from `state_dir`.
    ///
    /// Counters left by a previous run are picked up, so a critical domain
    /// stays critical across daemon restarts and its feature stays off. The
    /// `service` domain starts over, as the restart budget does.
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        let state_dir = state_dir.into();
        if let Some(previous) = RecoveryStatus::load(&status_path(&state_dir)) {
            let mut domains = previous.domains;
            domains.remove(&Domain::Service);
            for (domain, state) in &domains {
                let Some(feature) = domain.feature().filter(|_| state.critical) else {
                    continue;
                };
                self.live.update(|cfg| feature.set(&mut cfg.features, false));
                warn!(
                    target: event_names::CONFIG_FEATURE_DISABLED,
                    feature = feature.as_str(),
                    domain = %domain,
                    "Feature kept disabled for critical domain"
                );
            }
            *self.state.get_mut().unwrap_or_else(PoisonError::into_inner) = domains;
        }
        self.state_dir = Some(state_dir);
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, BTreeMap<Domain, FailureDomainState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn domain_state(&self, domain: Domain) -> FailureDomainState {
        self.lock_state().get(&domain).cloned().unwrap_or_default()
    }

    pub fn status(&self) -> RecoveryStatus {
        let config = self.live.load();
        let disabled_features = [Feature::EntranceDetection, Feature::ExitDetection]
            .into_iter()
            .filter(|f| !f.is_enabled(&config.features))
            .map(|f| f.as_str().to_string())
            .collect();
        RecoveryStatus {
            generated_at: Some(Utc::now()),
            domains: self.lock_state().clone(),
            service_restarts: self.budget.usage(),
            disabled_features,
        }
    }

    /// One full pass: pending resets, every domain, stale-state pruning.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<(Domain, Outcome)> {
        self.consume_resets();

        let outcomes: Vec<_> = Domain::ALL
            .into_iter()
            .map(|domain| (domain, self.check(domain, now)))
            .collect();

        let config = self.live.load();
        self.prune_stale(now, config.recovery.state_horizon_secs);
        self.persist();
        outcomes
    }

    /// Probe one domain and escalate if it is failing.
    pub fn check(&self, domain: Domain, now: DateTime<Utc>) -> Outcome {
        if self.domain_state(domain).critical {
            debug!(domain = %domain, "Domain critical, awaiting reset");
            return Outcome::Suppressed;
        }
        let config = self.live.load();
        match self.probe(&config, domain) {
            Probe::Healthy => {
                self.report_healthy(domain);
                Outcome::Healthy
            }
            Probe::Warning(pct) => {
                warn!(domain = %domain, percent = pct, "Usage above warning threshold");
                Outcome::Healthy
            }
            Probe::Failing => self.report_failure(domain, now),
        }
    }

    fn probe(&self, config: &Config, domain: Domain) -> Probe {
        let r = &config.recovery;
        match domain {
            Domain::CameraEntrance | Domain::CameraExit => {
                let camera = domain.camera();
                let enabled = domain
                    .feature()
                    .map_or(true, |f| f.is_enabled(&config.features));
                match camera {
                    Some(camera) if enabled && !self.collab.cameras.is_healthy(camera) => {
                        Probe::Failing
                    }
                    _ => Probe::Healthy,
                }
            }
            Domain::Network => {
                if config.server.url.is_empty() || self.collab.connectivity.is_reachable() {
                    Probe::Healthy
                } else {
                    Probe::Failing
                }
            }
            Domain::Memory => match self.collab.resources.memory_percent() {
                Ok(pct) if pct >= r.memory.cleanup => Probe::Failing,
                Ok(pct) if pct >= r.memory.warning => Probe::Warning(pct),
                Ok(_) => Probe::Healthy,
                Err(e) => {
                    warn!(error = %e, "Memory probe failed");
                    Probe::Healthy
                }
            },
            Domain::Disk => match self.collab.resources.disk_percent(&r.disk_path) {
                Ok(pct) if pct > r.disk_threshold => Probe::Failing,
                Ok(_) => Probe::Healthy,
                Err(e) => {
                    warn!(error = %e, path = %r.disk_path.display(), "Disk probe failed");
                    Probe::Healthy
                }
            },
            Domain::Service => {
                if self.collab.service.is_active() {
                    Probe::Healthy
                } else {
                    Probe::Failing
                }
            }
        }
    }

    /// A successful health check clears the counter.
    pub fn report_healthy(&self, domain: Domain) {
        let mut state = self.lock_state();
        if let Some(entry) = state.get_mut(&domain) {
            if entry.failure_count > 0 && !entry.critical {
                debug!(domain = %domain, "Domain healthy, counter cleared");
                entry.failure_count = 0;
            }
        }
    }

    /// The shared escalation algorithm for one observed failure.
    pub fn report_failure(&self, domain: Domain, now: DateTime<Utc>) -> Outcome {
        let config = self.live.load();
        let max = domain.max_retries(&config);

        let attempt = {
            let mut state = self.lock_state();
            let entry = state.entry(domain).or_default();
            if entry.critical {
                return Outcome::Suppressed;
            }
            if entry.debounced(now, config.recovery.recovery_interval_secs) {
                debug!(
                    target: event_names::RECOVERY_DEBOUNCED,
                    domain = %domain,
                    failures = entry.failure_count,
                    "Recovery debounced"
                );
                return Outcome::Debounced;
            }
            entry.failure_count += 1;
            entry.last_attempt_at = Some(now);

            if entry.failure_count > max {
                entry.critical = true;
                entry.critical_since = Some(now);
            }
            entry.failure_count
        };

        if attempt > max {
            self.go_critical(&config, domain, attempt);
            return Outcome::Critical { failures: attempt };
        }

        let step = step_for(domain, attempt, config.recovery.network_backoff_secs);
        warn!(
            target: event_names::RECOVERY_ATTEMPT,
            domain = %domain,
            attempt,
            max,
            step = step.name(),
            "Recovery attempt"
        );

        if self.run_step(&config, domain, step) {
            if let Some(entry) = self.lock_state().get_mut(&domain) {
                entry.failure_count = 0;
            }
            info!(
                target: event_names::RECOVERY_RECOVERED,
                domain = %domain,
                attempt,
                step = step.name(),
                "Domain recovered"
            );
            Outcome::Recovered { attempt, step }
        } else {
            warn!(
                target: event_names::RECOVERY_STILL_FAILING,
                domain = %domain,
                attempt,
                step = step.name(),
                "Domain still failing"
            );
            Outcome::StillFailing { attempt, step }
        }
    }

    /// Run `step`, then report whether the domain looks healthy again.
    fn run_step(&self, config: &Config, domain: Domain, step: Step) -> bool {
        let c = &self.collab;
        let acted = match step {
            Step::RestartCamera { camera } => c.cameras.restart_one(camera),
            Step::RestartAllCameras => c.cameras.restart_all(),
            Step::ReinitializeCameras => c.cameras.reinitialize(),
            Step::ResetCameraModule => c
                .module
                .reset_module()
                .and_then(|()| c.cameras.reinitialize()),
            Step::Backoff { secs } => {
                c.sleeper.sleep(std::time::Duration::from_secs(secs));
                Ok(())
            }
            Step::BounceInterface => c.network.bounce_interface(),
            Step::RestartNetworking => c.network.restart_networking(),
            Step::ReclaimMemory => return self.reclaim_memory(config),
            Step::FreeDisk => {
                let freed = disk::free_space(&config.recovery, SystemTime::now());
                info!(files = freed.files, bytes = freed.bytes, "Disk cleanup finished");
                Ok(())
            }
            Step::RestartService => {
                if !self.restart_service(domain.as_str()) {
                    return false;
                }
                Ok(())
            }
        };

        if let Err(e) = acted {
            warn!(domain = %domain, step = step.name(), error = %e, "Recovery step failed");
            return false;
        }
        matches!(self.probe(config, domain), Probe::Healthy | Probe::Warning(_))
    }

    fn reclaim_memory(&self, config: &Config) -> bool {
        let thresholds = &config.recovery.memory;
        if let Err(e) = self.collab.memory.reclaim() {
            warn!(error = %e, "Memory reclaim failed");
        }
        let after = match self.collab.resources.memory_percent() {
            Ok(pct) => pct,
            Err(e) => {
                warn!(error = %e, "Memory probe failed after reclaim");
                return false;
            }
        };
        if after > thresholds.critical {
            warn!(percent = after, "Memory still critical after reclaim, restarting service");
            return self.restart_service(Domain::Memory.as_str());
        }
        after < thresholds.cleanup
    }

    /// Budget-gated restart of the host service.
    fn restart_service(&self, holder: &str) -> bool {
        let permit = match self.budget.reserve(holder) {
            Ok(permit) => permit,
            Err(e) => {
                error!(holder, error = %e, "Service restart refused, manual intervention required");
                return false;
            }
        };
        match self.collab.service.restart() {
            Ok(()) => {
                permit.commit();
                let usage = self.budget.usage();
                warn!(holder, used = usage.used, max = usage.max, "Service restarted");
                true
            }
            Err(e) => {
                error!(holder, error = %e, "Service restart failed");
                false
            }
        }
    }

    fn go_critical(&self, config: &Config, domain: Domain, failures: u32) {
        error!(
            target: event_names::RECOVERY_CRITICAL,
            domain = %domain,
            failures,
            "Retries exhausted, domain marked critical"
        );

        if let Some(feature) = domain.feature() {
            self.live.update(|cfg| feature.set(&mut cfg.features, false));
            warn!(
                target: event_names::CONFIG_FEATURE_DISABLED,
                feature = feature.as_str(),
                domain = %domain,
                "Feature disabled"
            );
        }

        let mut data = serde_json::json!({
            "domain": domain.as_str(),
            "failure_count": failures,
            "service_restarts": self.budget.usage(),
        });
        if let Some(camera) = domain.camera() {
            data["camera_type"] = serde_json::Value::from(camera.as_str());
        }
        let alert_type = match domain {
            Domain::CameraEntrance | Domain::CameraExit => "camera_failure",
            Domain::Network => "network_failure",
            Domain::Memory => "memory_critical",
            Domain::Disk => "disk_full",
            Domain::Service => "service_restarts_exhausted",
        };
        self.alerts
            .push(&Alert::critical(&config.device.id, alert_type, data));
    }

    /// Clear a domain's counter and critical flag and re-enable its feature.
    /// Resetting `service` also refills the restart budget.
    pub fn reset(&self, domain: Domain) {
        let previous = self.lock_state().remove(&domain);
        if let Some(feature) = domain.feature() {
            let config = self.live.load();
            if !feature.is_enabled(&config.features) {
                self.live.update(|cfg| feature.set(&mut cfg.features, true));
                info!(
                    target: event_names::CONFIG_FEATURE_ENABLED,
                    feature = feature.as_str(),
                    "Feature re-enabled"
                );
            }
        }
        if domain == Domain::Service {
            self.budget.reset();
        }
        info!(
            target: event_names::RECOVERY_RESET,
            domain = %domain,
            was_critical = previous.is_some_and(|s| s.critical),
            "Domain reset"
        );
    }

    fn consume_resets(&self) {
        let Some(state_dir) = &self.state_dir else {
            return;
        };
        let dir = resets_dir(state_dir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            match name.parse::<Domain>() {
                Ok(domain) => self.reset(domain),
                Err(e) => warn!(file = %path.display(), error = %e, "Ignoring reset request"),
            }
            if let Err(e) = fs::remove_file(&path) {
                warn!(file = %path.display(), error = %e, "Could not remove reset request");
            }
        }
    }

    /// Drop idle entries older than `horizon_secs`; critical ones stay.
    pub fn prune_stale(&self, now: DateTime<Utc>, horizon_secs: u64) -> Vec<Domain> {
        let mut state = self.lock_state();
        let stale: Vec<Domain> = state
            .iter()
            .filter(|(_, s)| s.is_stale(now, horizon_secs))
            .map(|(d, _)| *d)
            .collect();
        for domain in &stale {
            state.remove(domain);
            debug!(
                target: event_names::RECOVERY_PRUNED,
                domain = %domain,
                "Stale recovery state dropped"
            );
        }
        stale
    }

    fn persist(&self) {
        let Some(state_dir) = &self.state_dir else {
            return;
        };
        let path = status_path(state_dir);
        if let Err(e) = self.status().save(&path) {
            warn!(path = %path.display(), error = %e, "Could not persist recovery status");
        }
    }
}
