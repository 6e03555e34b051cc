//! Subprocess execution with a hard deadline.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::ControlError;

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut p| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = p.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

/// Run `program args...`, killing it once `timeout` elapses.
///
/// Pipes are drained on helper threads so a chatty child cannot block on a
/// full pipe while we poll it.
pub fn run_with_timeout(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> io::Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let mut child: Child = cmd.spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let start = Instant::now();
    loop {
        match child.try_wait()? {
            Some(status) => {
                return Ok(CommandOutput {
                    status,
                    stdout: collect(stdout),
                    stderr: collect(stderr),
                });
            }
            None => {
                if start.elapsed() > timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("command timed out after {:?}", timeout),
                    ));
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

/// Run a command and map every non-success into a [`ControlError`].
pub fn run_checked(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, ControlError> {
    let display = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");

    let output = run_with_timeout(program, args, cwd, timeout).map_err(|e| {
        if e.kind() == io::ErrorKind::TimedOut {
            ControlError::Timeout {
                command: display.clone(),
                seconds: timeout.as_secs(),
            }
        } else {
            ControlError::CommandFailed {
                command: display.clone(),
                detail: e.to_string(),
            }
        }
    })?;

    if !output.success() {
        let detail = match output.stderr.trim() {
            "" => format!("exit status {}", output.status),
            s => s.to_string(),
        };
        return Err(ControlError::CommandFailed {
            command: display,
            detail,
        });
    }
    Ok(output)
}

/// Run a shell snippet through `sh -c`.
pub fn run_shell(script: &str, timeout: Duration) -> Result<CommandOutput, ControlError> {
    run_checked("sh", &["-c", script], None, timeout)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_output() {
        let out = run_with_timeout("sh", &["-c", "echo hi; echo err >&2"], None, Duration::from_secs(5))
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn test_timeout_kills_child() {
        let err = run_with_timeout("sleep", &["5"], None, Duration::from_millis(200)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_checked_reports_stderr() {
        let err = run_shell("echo broken >&2; exit 3", Duration::from_secs(5)).unwrap_err();
        match err {
            ControlError::CommandFailed { detail, .. } => assert_eq!(detail, "broken"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_checked_timeout_maps() {
        let err = run_checked("sleep", &["5"], None, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, ControlError::Timeout { .. }));
    }
}
