//! Manual recovery notes left behind when a rollback fails.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

pub const RECOVERY_FILE_NAME: &str = "RECOVERY.md";

/// What went wrong, for the operator.
#[derive(Debug, Clone)]
pub struct RollbackFailure<'a> {
    pub from_version: &'a str,
    pub target_version: &'a str,
    pub update_error: &'a str,
    pub rollback_error: &'a str,
    pub snapshot: Option<&'a Path>,
    pub install_dir: &'a Path,
    pub service_name: &'a str,
}

pub fn write_recovery_instructions(path: &Path, failure: &RollbackFailure<'_>) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = File::create(path)?;
    writeln!(file, "# Gatewarden Recovery Instructions")?;
    writeln!(file)?;
    writeln!(
        file,
        "The update from {} to {} failed and the automatic rollback failed too.",
        failure.from_version, failure.target_version
    )?;
    writeln!(file, "The device may be running a mix of both versions.")?;
    writeln!(file)?;
    writeln!(file, "## Details")?;
    writeln!(file, "- update error: {}", failure.update_error)?;
    writeln!(file, "- rollback error: {}", failure.rollback_error)?;
    writeln!(file, "- install dir: {}", failure.install_dir.display())?;
    match failure.snapshot {
        Some(snapshot) => writeln!(file, "- pre-update snapshot: {}", snapshot.display())?,
        None => writeln!(file, "- pre-update snapshot: none was taken")?,
    }
    writeln!(file)?;
    writeln!(file, "## Manual Recovery Steps")?;
    writeln!(file)?;
    writeln!(file, "1. Stop the service:")?;
    writeln!(file, "   sudo systemctl stop {}", failure.service_name)?;
    writeln!(file)?;
    if let Some(snapshot) = failure.snapshot {
        writeln!(file, "2. Check the snapshot and restore it:")?;
        writeln!(file, "   gatewarden backup verify {}", snapshot.display())?;
        writeln!(file, "   gatewarden backup restore {}", snapshot.display())?;
    } else {
        writeln!(file, "2. Restore the most recent good backup:")?;
        writeln!(file, "   gatewarden backup list")?;
        writeln!(file, "   gatewarden backup restore <id>")?;
    }
    writeln!(file)?;
    writeln!(file, "3. Start the service and confirm the version:")?;
    writeln!(file, "   sudo systemctl start {}", failure.service_name)?;
    writeln!(file, "   gatewarden update status")?;
    writeln!(file)?;
    writeln!(file, "Delete this file once the device is healthy.")?;
    Ok(())
}
