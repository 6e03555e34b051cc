//! Recording fakes for every collaborator.
//!
//! Each fake records the calls it receives and lets the test script its
//! answers. [`MockSet`] wires a full set into [`Collaborators`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{
    Camera, CameraManager, Collaborators, ConnectivityProbe, ControlError, ControlResult,
    DeviceModuleController, MemoryReclaimer, NetworkController, ResourceProbe, ServiceController,
    Sleeper,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn scripted_failure(what: &str) -> ControlError {
    ControlError::CommandFailed {
        command: what.to_string(),
        detail: "scripted failure".to_string(),
    }
}

#[derive(Debug, Default)]
struct CallLog(Mutex<Vec<String>>);

impl CallLog {
    fn push(&self, call: impl Into<String>) {
        lock(&self.0).push(call.into());
    }

    fn all(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    fn count(&self, call: &str) -> usize {
        lock(&self.0).iter().filter(|c| c.as_str() == call).count()
    }
}

#[derive(Debug)]
pub struct MockService {
    calls: CallLog,
    active: AtomicBool,
    fail_stop: AtomicBool,
    fail_restart: AtomicBool,
}

impl Default for MockService {
    fn default() -> Self {
        Self {
            calls: CallLog::default(),
            active: AtomicBool::new(true),
            fail_stop: AtomicBool::new(false),
            fail_restart: AtomicBool::new(false),
        }
    }
}

impl MockService {
    pub fn calls(&self) -> Vec<String> {
        self.calls.all()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.count(call)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn fail_restart(&self, fail: bool) {
        self.fail_restart.store(fail, Ordering::SeqCst);
    }
}

impl ServiceController for MockService {
    fn stop(&self) -> ControlResult<()> {
        self.calls.push("stop");
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(scripted_failure("stop"));
        }
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn start(&self) -> ControlResult<()> {
        self.calls.push("start");
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn restart(&self) -> ControlResult<()> {
        self.calls.push("restart");
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(scripted_failure("restart"));
        }
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct MockCameras {
    calls: CallLog,
    unhealthy: Mutex<HashMap<Camera, bool>>,
    fail_actions: AtomicBool,
}

impl MockCameras {
    pub fn calls(&self) -> Vec<String> {
        self.calls.all()
    }

    pub fn set_healthy(&self, camera: Camera, healthy: bool) {
        lock(&self.unhealthy).insert(camera, !healthy);
    }

    pub fn fail_actions(&self, fail: bool) {
        self.fail_actions.store(fail, Ordering::SeqCst);
    }

    fn act(&self, call: String) -> ControlResult<()> {
        let failing = self.fail_actions.load(Ordering::SeqCst);
        self.calls.push(call.clone());
        if failing {
            Err(scripted_failure(&call))
        } else {
            Ok(())
        }
    }
}

impl CameraManager for MockCameras {
    fn restart_one(&self, camera: Camera) -> ControlResult<()> {
        self.act(format!("restart_one:{camera}"))
    }

    fn restart_all(&self) -> ControlResult<()> {
        self.act("restart_all".into())
    }

    fn reinitialize(&self) -> ControlResult<()> {
        self.act("reinitialize".into())
    }

    fn is_healthy(&self, camera: Camera) -> bool {
        !lock(&self.unhealthy).get(&camera).copied().unwrap_or(false)
    }
}

#[derive(Debug, Default)]
pub struct MockNetwork {
    calls: CallLog,
}

impl MockNetwork {
    pub fn calls(&self) -> Vec<String> {
        self.calls.all()
    }
}

impl NetworkController for MockNetwork {
    fn bounce_interface(&self) -> ControlResult<()> {
        self.calls.push("bounce_interface");
        Ok(())
    }

    fn restart_networking(&self) -> ControlResult<()> {
        self.calls.push("restart_networking");
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockModule {
    calls: CallLog,
}

impl MockModule {
    pub fn resets(&self) -> usize {
        self.calls.count("reset_module")
    }
}

impl DeviceModuleController for MockModule {
    fn reset_module(&self) -> ControlResult<()> {
        self.calls.push("reset_module");
        Ok(())
    }
}

/// Memory and disk readings set by the test.
#[derive(Debug)]
pub struct MockResources {
    memory: Mutex<f64>,
    disk: Mutex<f64>,
}

impl Default for MockResources {
    fn default() -> Self {
        Self {
            memory: Mutex::new(40.0),
            disk: Mutex::new(40.0),
        }
    }
}

impl MockResources {
    pub fn set_memory(&self, pct: f64) {
        *lock(&self.memory) = pct;
    }

    pub fn set_disk(&self, pct: f64) {
        *lock(&self.disk) = pct;
    }
}

impl ResourceProbe for MockResources {
    fn memory_percent(&self) -> ControlResult<f64> {
        Ok(*lock(&self.memory))
    }

    fn disk_percent(&self, _path: &Path) -> ControlResult<f64> {
        Ok(*lock(&self.disk))
    }
}

/// Reclaimer that optionally lowers the mocked memory reading.
#[derive(Debug)]
pub struct MockReclaimer {
    calls: CallLog,
    resources: Arc<MockResources>,
    reclaim_to: Mutex<Option<f64>>,
}

impl MockReclaimer {
    pub fn new(resources: Arc<MockResources>) -> Self {
        Self {
            calls: CallLog::default(),
            resources,
            reclaim_to: Mutex::new(None),
        }
    }

    /// After each reclaim, memory reads `pct`.
    pub fn reclaim_to(&self, pct: Option<f64>) {
        *lock(&self.reclaim_to) = pct;
    }

    pub fn count(&self) -> usize {
        self.calls.count("reclaim")
    }
}

impl MemoryReclaimer for MockReclaimer {
    fn reclaim(&self) -> ControlResult<()> {
        self.calls.push("reclaim");
        if let Some(pct) = *lock(&self.reclaim_to) {
            self.resources.set_memory(pct);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockConnectivity {
    reachable: AtomicBool,
}

impl Default for MockConnectivity {
    fn default() -> Self {
        Self {
            reachable: AtomicBool::new(true),
        }
    }
}

impl MockConnectivity {
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

impl ConnectivityProbe for MockConnectivity {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Records requested sleeps instead of blocking.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        lock(&self.slept).clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        lock(&self.slept).push(duration);
    }
}

/// One of every fake, with typed handles kept for assertions.
#[derive(Debug, Clone)]
pub struct MockSet {
    pub service: Arc<MockService>,
    pub cameras: Arc<MockCameras>,
    pub network: Arc<MockNetwork>,
    pub module: Arc<MockModule>,
    pub reclaimer: Arc<MockReclaimer>,
    pub resources: Arc<MockResources>,
    pub connectivity: Arc<MockConnectivity>,
    pub sleeper: Arc<RecordingSleeper>,
}

impl Default for MockSet {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSet {
    pub fn new() -> Self {
        let resources = Arc::new(MockResources::default());
        Self {
            service: Arc::new(MockService::default()),
            cameras: Arc::new(MockCameras::default()),
            network: Arc::new(MockNetwork::default()),
            module: Arc::new(MockModule::default()),
            reclaimer: Arc::new(MockReclaimer::new(resources.clone())),
            resources,
            connectivity: Arc::new(MockConnectivity::default()),
            sleeper: Arc::new(RecordingSleeper::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            service: self.service.clone(),
            cameras: self.cameras.clone(),
            network: self.network.clone(),
            module: self.module.clone(),
            memory: self.reclaimer.clone(),
            resources: self.resources.clone(),
            connectivity: self.connectivity.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}
