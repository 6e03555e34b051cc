//! Installed software version marker.

use gw_common::DEFAULT_SOFTWARE_VERSION;
use std::fs;
use std::io;
use std::path::Path;

/// Read the version marker, falling back to the default when it is absent
/// or blank.
pub fn read_version(path: &Path) -> String {
    match fs::read_to_string(path) {
        Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => DEFAULT_SOFTWARE_VERSION.to_string(),
    }
}

pub fn write_version(path: &Path, version: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", version.trim()))
}
