//! Collaborators backed by the host OS.

use std::ffi::CString;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use gw_config::{CameraCommands, ServerSettings};

use super::command::{run_checked, run_shell};
use super::{
    Camera, CameraManager, ConnectivityProbe, ControlError, ControlResult,
    DeviceModuleController, MemoryReclaimer, NetworkController, ResourceProbe, ServiceController,
};

/// `systemctl` against one unit.
#[derive(Debug, Clone)]
pub struct SystemdService {
    unit: String,
    timeout: Duration,
}

impl SystemdService {
    pub fn new(unit: &str, timeout: Duration) -> Self {
        Self {
            unit: unit.to_string(),
            timeout,
        }
    }

    fn systemctl(&self, verb: &str) -> ControlResult<()> {
        info!(unit = %self.unit, verb, "systemctl");
        run_checked("systemctl", &[verb, &self.unit], None, self.timeout).map(|_| ())
    }
}

impl ServiceController for SystemdService {
    fn stop(&self) -> ControlResult<()> {
        self.systemctl("stop")
    }

    fn start(&self) -> ControlResult<()> {
        self.systemctl("start")
    }

    fn restart(&self) -> ControlResult<()> {
        self.systemctl("restart")
    }

    fn is_active(&self) -> bool {
        run_checked(
            "systemctl",
            &["is-active", "--quiet", &self.unit],
            None,
            self.timeout,
        )
        .is_ok()
    }
}

/// Camera operations from configured shell templates.
///
/// `{camera}` expands to the camera name and `{index}` to its video index.
#[derive(Debug, Clone)]
pub struct ShellCameraManager {
    commands: CameraCommands,
    timeout: Duration,
}

impl ShellCameraManager {
    pub fn new(commands: CameraCommands, timeout: Duration) -> Self {
        Self { commands, timeout }
    }

    fn expand(template: &str, camera: Option<Camera>) -> String {
        match camera {
            Some(c) => template
                .replace("{camera}", c.as_str())
                .replace("{index}", &c.index().to_string()),
            None => template.to_string(),
        }
    }

    fn run(&self, what: &str, template: Option<&String>, camera: Option<Camera>) -> ControlResult<()> {
        let template = template.ok_or_else(|| ControlError::NotConfigured(format!("camera {what}")))?;
        run_shell(&Self::expand(template, camera), self.timeout).map(|_| ())
    }
}

impl CameraManager for ShellCameraManager {
    fn restart_one(&self, camera: Camera) -> ControlResult<()> {
        self.run("restart_one", self.commands.restart_one.as_ref(), Some(camera))
    }

    fn restart_all(&self) -> ControlResult<()> {
        self.run("restart_all", self.commands.restart_all.as_ref(), None)
    }

    fn reinitialize(&self) -> ControlResult<()> {
        self.run("reinitialize", self.commands.reinitialize.as_ref(), None)
    }

    fn is_healthy(&self, camera: Camera) -> bool {
        match &self.commands.health_check {
            Some(template) => run_shell(&Self::expand(template, Some(camera)), self.timeout).is_ok(),
            None => Path::new(&format!("/dev/video{}", camera.index())).exists(),
        }
    }
}

/// Interface bounce via `ip link` and networking restart via systemd.
#[derive(Debug, Clone)]
pub struct IpNetworkController {
    interface: String,
    timeout: Duration,
}

impl IpNetworkController {
    pub fn new(interface: &str, timeout: Duration) -> Self {
        Self {
            interface: interface.to_string(),
            timeout,
        }
    }
}

impl NetworkController for IpNetworkController {
    fn bounce_interface(&self) -> ControlResult<()> {
        info!(interface = %self.interface, "Bouncing network interface");
        run_checked(
            "ip",
            &["link", "set", &self.interface, "down"],
            None,
            self.timeout,
        )?;
        std::thread::sleep(Duration::from_secs(5));
        run_checked("ip", &["link", "set", &self.interface, "up"], None, self.timeout)?;
        std::thread::sleep(Duration::from_secs(10));
        Ok(())
    }

    fn restart_networking(&self) -> ControlResult<()> {
        info!("Restarting networking service");
        run_checked("systemctl", &["restart", "networking"], None, self.timeout)?;
        std::thread::sleep(Duration::from_secs(15));
        Ok(())
    }
}

/// `modprobe -r` then `modprobe` of the camera driver.
#[derive(Debug, Clone)]
pub struct ModprobeController {
    module: String,
    timeout: Duration,
}

impl ModprobeController {
    pub fn new(module: &str, timeout: Duration) -> Self {
        Self {
            module: module.to_string(),
            timeout,
        }
    }
}

impl DeviceModuleController for ModprobeController {
    fn reset_module(&self) -> ControlResult<()> {
        warn!(module = %self.module, "Resetting camera kernel module");
        run_checked("modprobe", &["-r", &self.module], None, self.timeout)?;
        std::thread::sleep(Duration::from_secs(2));
        run_checked("modprobe", &[&self.module], None, self.timeout)?;
        std::thread::sleep(Duration::from_secs(3));
        Ok(())
    }
}

/// Flushes dirty pages and drops the page cache.
#[derive(Debug, Default)]
pub struct PageCacheReclaimer;

impl MemoryReclaimer for PageCacheReclaimer {
    fn reclaim(&self) -> ControlResult<()> {
        // SAFETY: sync(2) takes no arguments and cannot fail.
        unsafe { libc::sync() };
        match fs::write("/proc/sys/vm/drop_caches", "3") {
            Ok(()) => {
                debug!("Page cache dropped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Could not drop page cache");
                Err(e.into())
            }
        }
    }
}

/// Reads `/proc/meminfo` and `statvfs(3)`.
#[derive(Debug, Default)]
pub struct ProcResourceProbe;

/// Used memory percent from `/proc/meminfo` content.
pub fn parse_meminfo(content: &str) -> Option<f64> {
    let mut total = None;
    let mut available = None;
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next().and_then(|v| v.parse::<f64>().ok())) {
            (Some("MemTotal:"), Some(v)) => total = Some(v),
            (Some("MemAvailable:"), Some(v)) => available = Some(v),
            _ => {}
        }
    }
    let (total, available) = (total?, available?);
    if total <= 0.0 {
        return None;
    }
    Some((total - available) / total * 100.0)
}

impl ResourceProbe for ProcResourceProbe {
    fn memory_percent(&self) -> ControlResult<f64> {
        let content = fs::read_to_string("/proc/meminfo")?;
        parse_meminfo(&content).ok_or_else(|| ControlError::CommandFailed {
            command: "read /proc/meminfo".into(),
            detail: "MemTotal/MemAvailable missing".into(),
        })
    }

    fn disk_percent(&self, path: &Path) -> ControlResult<f64> {
        statvfs_used_percent(path)
    }
}

fn statvfs_used_percent(path: &Path) -> ControlResult<f64> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| ControlError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and stat is a valid out pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let total = stat.f_blocks as f64 * stat.f_frsize as f64;
    let free = stat.f_bfree as f64 * stat.f_frsize as f64;
    if total <= 0.0 {
        return Ok(0.0);
    }
    Ok((total - free) / total * 100.0)
}

/// GET on the server health endpoint.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    url: Option<String>,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(server: &ServerSettings) -> Self {
        Self {
            url: server.endpoint(&server.health_path),
            timeout: Duration::from_secs(server.health_timeout_secs),
        }
    }
}

impl ConnectivityProbe for HttpHealthProbe {
    fn is_reachable(&self) -> bool {
        let Some(url) = &self.url else {
            // No server configured: nothing to probe, nothing to recover.
            return true;
        };
        let agent = ureq::AgentBuilder::new().timeout(self.timeout).build();
        match agent.get(url).call() {
            Ok(resp) => resp.status() == 200,
            Err(e) => {
                debug!(url = %url, error = %e, "Health probe failed");
                false
            }
        }
    }
}
