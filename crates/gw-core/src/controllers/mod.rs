//! Narrow interfaces to everything outside the subsystem.
//!
//! The backup manager, updater and escalator never shell out directly; they
//! call these traits. [`system`] holds the real implementations (systemctl,
//! ip, modprobe, /proc) and [`mock`] holds recording fakes for tests.

pub mod command;
pub mod system;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use gw_config::Config;

/// Failure of a collaborator call.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("command '{command}' failed: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("command '{command}' timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(String),
}

impl From<ControlError> for gw_common::Error {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::CommandFailed { command, detail } => {
                gw_common::Error::CommandFailed { command, detail }
            }
            ControlError::Timeout { command, seconds } => gw_common::Error::Timeout {
                operation: command,
                seconds,
            },
            ControlError::NotConfigured(what) => gw_common::Error::NotConfigured(what),
            ControlError::Io(e) => gw_common::Error::Io(e),
            ControlError::Network(msg) => gw_common::Error::Network(msg),
        }
    }
}

pub type ControlResult<T> = Result<T, ControlError>;

/// The two capture cameras.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Camera {
    Entrance,
    Exit,
}

impl Camera {
    pub const ALL: [Camera; 2] = [Camera::Entrance, Camera::Exit];

    /// Video device index (`/dev/video<N>`).
    pub fn index(self) -> u32 {
        match self {
            Camera::Entrance => 0,
            Camera::Exit => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Camera::Entrance => "entrance",
            Camera::Exit => "exit",
        }
    }
}

impl std::fmt::Display for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The host service running capture and detection.
pub trait ServiceController: Send + Sync {
    fn stop(&self) -> ControlResult<()>;
    fn start(&self) -> ControlResult<()>;
    fn restart(&self) -> ControlResult<()>;
    fn is_active(&self) -> bool;
}

pub trait CameraManager: Send + Sync {
    fn restart_one(&self, camera: Camera) -> ControlResult<()>;
    fn restart_all(&self) -> ControlResult<()>;
    /// Tear down and rebuild the camera manager.
    fn reinitialize(&self) -> ControlResult<()>;
    fn is_healthy(&self, camera: Camera) -> bool;
}

pub trait NetworkController: Send + Sync {
    fn bounce_interface(&self) -> ControlResult<()>;
    fn restart_networking(&self) -> ControlResult<()>;
}

/// OS-level reset of the camera kernel module.
pub trait DeviceModuleController: Send + Sync {
    fn reset_module(&self) -> ControlResult<()>;
}

/// Frees reclaimable memory (page cache and friends).
pub trait MemoryReclaimer: Send + Sync {
    fn reclaim(&self) -> ControlResult<()>;
}

pub trait ResourceProbe: Send + Sync {
    /// Used memory in percent of total.
    fn memory_percent(&self) -> ControlResult<f64>;
    /// Used space in percent of the filesystem holding `path`.
    fn disk_percent(&self, path: &Path) -> ControlResult<f64>;
}

/// Remote health endpoint.
pub trait ConnectivityProbe: Send + Sync {
    fn is_reachable(&self) -> bool;
}

/// Waits between network recovery attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Blocks the calling thread.
#[derive(Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Every collaborator the subsystem consumes, behind shared handles.
#[derive(Clone)]
pub struct Collaborators {
    pub service: Arc<dyn ServiceController>,
    pub cameras: Arc<dyn CameraManager>,
    pub network: Arc<dyn NetworkController>,
    pub module: Arc<dyn DeviceModuleController>,
    pub memory: Arc<dyn MemoryReclaimer>,
    pub resources: Arc<dyn ResourceProbe>,
    pub connectivity: Arc<dyn ConnectivityProbe>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Collaborators {
    /// Real implementations driven by the host OS.
    pub fn system(config: &Config) -> Self {
        let timeout = Duration::from_secs(config.recovery.command_timeout_secs);
        Self {
            service: Arc::new(system::SystemdService::new(
                &config.device.service_name,
                timeout,
            )),
            cameras: Arc::new(system::ShellCameraManager::new(
                config.recovery.camera.clone(),
                timeout,
            )),
            network: Arc::new(system::IpNetworkController::new(
                &config.recovery.network_interface,
                timeout,
            )),
            module: Arc::new(system::ModprobeController::new(
                &config.recovery.camera_module,
                timeout,
            )),
            memory: Arc::new(system::PageCacheReclaimer),
            resources: Arc::new(system::ProcResourceProbe),
            connectivity: Arc::new(system::HttpHealthProbe::new(&config.server)),
            sleeper: Arc::new(ThreadSleeper),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
