//! Escalation ladders: which remedial step runs at which attempt.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::controllers::Camera;

use super::domain::Domain;

/// One remedial action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    RestartCamera { camera: Camera },
    RestartAllCameras,
    ReinitializeCameras,
    ResetCameraModule,
    /// Wait, then probe again.
    Backoff { secs: u64 },
    BounceInterface,
    RestartNetworking,
    /// Force collection and drop caches; restart the service if memory
    /// stays above the critical threshold.
    ReclaimMemory,
    /// Prune media by age, then trim logs.
    FreeDisk,
    /// Whole-service restart, drawn from the shared restart budget.
    RestartService,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::RestartCamera { .. } => "restart_camera",
            Step::RestartAllCameras => "restart_all_cameras",
            Step::ReinitializeCameras => "reinitialize_cameras",
            Step::ResetCameraModule => "reset_camera_module",
            Step::Backoff { .. } => "backoff",
            Step::BounceInterface => "bounce_interface",
            Step::RestartNetworking => "restart_networking",
            Step::ReclaimMemory => "reclaim_memory",
            Step::FreeDisk => "free_disk",
            Step::RestartService => "restart_service",
        }
    }

    pub fn backoff(&self) -> Option<Duration> {
        match self {
            Step::Backoff { secs } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Number of network attempts that only wait.
pub const NETWORK_BACKOFF_ATTEMPTS: u32 = 3;

/// Step for the `attempt`-th consecutive failure (1-based) of `domain`.
pub fn step_for(domain: Domain, attempt: u32, network_backoff_secs: u64) -> Step {
    match domain {
        Domain::CameraEntrance | Domain::CameraExit => {
            let camera = domain.camera().unwrap_or(Camera::Entrance);
            match attempt {
                0 | 1 => Step::RestartCamera { camera },
                2 => Step::RestartAllCameras,
                3 => Step::ReinitializeCameras,
                4 => Step::ResetCameraModule,
                _ => Step::RestartService,
            }
        }
        Domain::Network => match attempt {
            n if n <= NETWORK_BACKOFF_ATTEMPTS => Step::Backoff {
                secs: u64::from(n.max(1)) * network_backoff_secs,
            },
            4 => Step::BounceInterface,
            5 => Step::RestartNetworking,
            _ => Step::RestartService,
        },
        Domain::Memory => Step::ReclaimMemory,
        Domain::Disk => Step::FreeDisk,
        Domain::Service => Step::RestartService,
    }
}
