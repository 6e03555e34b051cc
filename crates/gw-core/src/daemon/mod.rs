//! Background polling loops.
//!
//! Each component runs on its own named thread with a fixed interval. A stop
//! request only prevents the next iteration; the running one is allowed to
//! finish, and `shutdown` waits for it up to a bounded timeout.

pub mod signals;

use chrono::{Local, Utc};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::backup::{BackupSchedule, ScheduledJob};
use crate::logging::event_names;
use crate::recovery::Outcome;
use crate::runtime::Runtime;
use crate::update::{UpdateError, UpdateOutcome};

/// Default wait for in-flight iterations on shutdown.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// A thread running `body` every `interval` until stopped.
#[derive(Debug)]
pub struct PollingLoop {
    name: String,
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PollingLoop {
    /// Spawn the loop. The first iteration runs immediately.
    pub fn spawn<F>(name: &str, interval: Duration, mut body: F) -> io::Result<Self>
    where
        F: FnMut() -> Result<(), gw_common::Error> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        let loop_name = name.to_string();
        let thread = thread::Builder::new()
            .name(format!("gw-{name}"))
            .spawn(move || {
                debug!(loop_name = %loop_name, interval_secs = interval.as_secs(), "Loop started");
                loop {
                    match panic::catch_unwind(AssertUnwindSafe(&mut body)) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(
                            target: event_names::LOOP_ITERATION_FAILED,
                            loop_name = %loop_name,
                            code = e.code(),
                            error = %e,
                            "Loop iteration failed"
                        ),
                        Err(payload) => error!(
                            target: event_names::LOOP_ITERATION_FAILED,
                            loop_name = %loop_name,
                            panic = panic_message(payload.as_ref()),
                            "Loop iteration panicked"
                        ),
                    }
                    match rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(loop_name = %loop_name, "Loop exited");
            })?;

        Ok(Self {
            name: name.to_string(),
            stop: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the loop to stop after the current iteration.
    pub fn request_stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }

    /// Stop and wait up to `timeout`. Returns false if the thread was still
    /// busy when the timeout ran out; it is then left detached.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        self.request_stop();
        let Some(thread) = self.thread.take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                error!(
                    target: event_names::LOOP_JOIN_TIMEOUT,
                    loop_name = %self.name,
                    timeout_secs = timeout.as_secs(),
                    "Loop did not stop in time"
                );
                return false;
            }
            thread::sleep(Duration::from_millis(50));
        }
        if thread.join().is_err() {
            error!(loop_name = %self.name, "Loop thread panicked");
        }
        true
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl Drop for PollingLoop {
    fn drop(&mut self) {
        self.request_stop();
    }
}

/// The three subsystem loops.
#[derive(Debug)]
pub struct Daemon {
    loops: Vec<PollingLoop>,
}

impl Daemon {
    pub fn start(runtime: &Runtime) -> io::Result<Self> {
        let config = runtime.live.load();
        let mut loops = Vec::new();

        let backups = runtime.backups.clone();
        let mut schedule = match BackupSchedule::new(&config.backup, Local::now().naive_local()) {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                error!(error = %e, "Backup schedule invalid, scheduled backups disabled");
                None
            }
        };
        loops.push(PollingLoop::spawn(
            "backup",
            Duration::from_secs(config.backup.schedule_check_secs),
            move || {
                let Some(schedule) = schedule.as_mut() else {
                    return Ok(());
                };
                let job = schedule.due(Local::now().naive_local());
                let result = match job {
                    Some(ScheduledJob::Daily) => backups.create_daily(),
                    Some(ScheduledJob::Weekly) => backups.create_weekly(),
                    None => return Ok(()),
                };
                info!(target: event_names::BACKUP_SCHEDULED, job = ?job, "Scheduled backup ran");
                result.map(|_| ()).map_err(Into::into)
            },
        )?);

        let updater = runtime.updater.clone();
        loops.push(PollingLoop::spawn(
            "update",
            Duration::from_secs(config.update.check_interval_secs),
            move || match updater.poll() {
                Ok(UpdateOutcome::Failed { reason, .. }) => {
                    debug!(reason = %reason, "Scheduled update failed");
                    Ok(())
                }
                Ok(_) => Ok(()),
                Err(UpdateError::AlreadyInProgress) => Ok(()),
                Err(e) => Err(e.into()),
            },
        )?);

        let escalator = Arc::clone(&runtime.escalator);
        loops.push(PollingLoop::spawn(
            "recovery",
            Duration::from_secs(config.recovery.check_interval_secs),
            move || {
                for (domain, outcome) in escalator.tick(Utc::now()) {
                    if !matches!(outcome, Outcome::Healthy | Outcome::Debounced) {
                        debug!(domain = %domain, outcome = ?outcome, "Recovery tick");
                    }
                }
                Ok(())
            },
        )?);

        info!(
            target: event_names::DAEMON_STARTED,
            device = %config.device.id,
            loops = loops.len(),
            "Daemon started"
        );
        Ok(Self { loops })
    }

    /// Stop every loop, waiting up to `timeout` for each in-flight iteration.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        info!(target: event_names::DAEMON_STOPPING, "Daemon stopping");
        for l in &mut self.loops {
            l.request_stop();
        }
        let mut clean = true;
        for l in self.loops.drain(..) {
            clean &= l.shutdown(timeout);
        }
        info!(target: event_names::DAEMON_STOPPED, clean, "Daemon stopped");
        clean
    }
}

/// Run the daemon in the foreground until SIGINT or SIGTERM.
pub fn run_until_signal(runtime: &Runtime) -> io::Result<bool> {
    signals::install();
    let daemon = Daemon::start(runtime)?;
    while !signals::stop_requested() {
        thread::sleep(Duration::from_millis(250));
    }
    Ok(daemon.shutdown(DEFAULT_JOIN_TIMEOUT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_loop_runs_and_stops() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let l = PollingLoop::spawn("test", Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(l.shutdown(Duration::from_secs(5)));
        let after = ticks.load(Ordering::SeqCst);
        assert!(after >= 3);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_failing_iteration_does_not_end_loop() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let l = PollingLoop::spawn("failing", Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(gw_common::Error::Network("unreachable".into()))
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(ticks.load(Ordering::SeqCst) >= 2);
        assert!(l.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn test_panicking_iteration_does_not_end_loop() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let l = PollingLoop::spawn("panicking", Duration::from_millis(5), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("camera handle vanished");
            }
            Ok(())
        })
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(ticks.load(Ordering::SeqCst) >= 3);
        assert!(l.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn test_shutdown_is_bounded() {
        let l = PollingLoop::spawn("slow", Duration::from_secs(60), || {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!l.shutdown(Duration::from_millis(50)));
    }
}
