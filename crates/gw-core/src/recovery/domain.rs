//! Failure domains and their per-domain bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use gw_config::{Config, FeatureFlags};

use crate::controllers::Camera;

/// Something the escalator watches and tries to heal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Domain {
    CameraEntrance,
    CameraExit,
    Network,
    Memory,
    Disk,
    Service,
}

impl Domain {
    /// Check order within one tick.
    pub const ALL: [Domain; 6] = [
        Domain::CameraEntrance,
        Domain::CameraExit,
        Domain::Network,
        Domain::Memory,
        Domain::Disk,
        Domain::Service,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::CameraEntrance => "camera-entrance",
            Domain::CameraExit => "camera-exit",
            Domain::Network => "network",
            Domain::Memory => "memory",
            Domain::Disk => "disk",
            Domain::Service => "service",
        }
    }

    pub fn camera(self) -> Option<Camera> {
        match self {
            Domain::CameraEntrance => Some(Camera::Entrance),
            Domain::CameraExit => Some(Camera::Exit),
            _ => None,
        }
    }

    pub fn max_retries(self, config: &Config) -> u32 {
        let r = &config.recovery;
        match self {
            Domain::CameraEntrance | Domain::CameraExit => r.max_camera_retries,
            Domain::Network => r.max_network_retries,
            Domain::Memory => r.max_memory_retries,
            Domain::Disk => r.max_disk_retries,
            Domain::Service => r.max_service_restarts,
        }
    }

    /// Feature switched off when this domain goes critical.
    pub fn feature(self) -> Option<Feature> {
        match self {
            Domain::CameraEntrance => Some(Feature::EntranceDetection),
            Domain::CameraExit => Some(Feature::ExitDetection),
            _ => None,
        }
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown recovery domain '{0}' (expected one of camera-entrance, camera-exit, network, memory, disk, service)")]
pub struct UnknownDomain(pub String);

impl FromStr for Domain {
    type Err = UnknownDomain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Domain::ALL
            .into_iter()
            .find(|d| d.as_str() == s.trim())
            .ok_or_else(|| UnknownDomain(s.to_string()))
    }
}

/// Runtime-switchable features in the live config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    EntranceDetection,
    ExitDetection,
}

impl Feature {
    pub fn as_str(self) -> &'static str {
        match self {
            Feature::EntranceDetection => "entrance_detection",
            Feature::ExitDetection => "exit_detection",
        }
    }

    pub fn is_enabled(self, flags: &FeatureFlags) -> bool {
        match self {
            Feature::EntranceDetection => flags.entrance_detection,
            Feature::ExitDetection => flags.exit_detection,
        }
    }

    pub fn set(self, flags: &mut FeatureFlags, enabled: bool) {
        match self {
            Feature::EntranceDetection => flags.entrance_detection = enabled,
            Feature::ExitDetection => flags.exit_detection = enabled,
        }
    }
}

/// Counter and timestamps for one domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureDomainState {
    pub failure_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Set once retries are exhausted; cleared only by an external reset.
    pub critical: bool,
    pub critical_since: Option<DateTime<Utc>>,
}

impl FailureDomainState {
    /// True while `now` is within `interval_secs` of the last attempt.
    pub fn debounced(&self, now: DateTime<Utc>, interval_secs: u64) -> bool {
        match self.last_attempt_at {
            Some(last) => (now - last).num_seconds() < interval_secs as i64,
            None => false,
        }
    }

    /// Idle for longer than `horizon_secs`. Critical entries never go stale.
    pub fn is_stale(&self, now: DateTime<Utc>, horizon_secs: u64) -> bool {
        if self.critical {
            return false;
        }
        match self.last_attempt_at {
            Some(last) => (now - last).num_seconds() > horizon_secs as i64,
            None => self.failure_count == 0,
        }
    }
}
