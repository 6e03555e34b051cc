//! Update package extraction.
//!
//! Packages are plain archives whose entries are paths relative to the
//! install tree. The reader is picked from the file name; anything that is
//! not `.zip`, `.tar.gz` or `.tgz` is refused.

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::paths::safe_relative;
use crate::{BundleError, Result};

/// Supported package container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Zip,
    TarGz,
}

impl PackageFormat {
    /// Pick the format from a file name or URL path.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(PackageFormat::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(PackageFormat::TarGz)
        } else {
            None
        }
    }

    /// Format of the file at `path`, or an error naming it.
    pub fn detect(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_name(&name).ok_or(BundleError::UnsupportedPackage(name))
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PackageFormat::Zip => ".zip",
            PackageFormat::TarGz => ".tar.gz",
        }
    }
}

impl std::fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageFormat::Zip => write!(f, "zip"),
            PackageFormat::TarGz => write!(f, "tar.gz"),
        }
    }
}

/// Result of unpacking a package.
#[derive(Debug, Clone)]
pub struct ExtractedPackage {
    pub format: PackageFormat,
    pub root: PathBuf,
    /// Regular files, relative to `root`, in archive order.
    pub files: Vec<PathBuf>,
}

impl ExtractedPackage {
    pub fn contains(&self, rel: &str) -> bool {
        self.files.iter().any(|f| f == Path::new(rel))
    }
}

/// Unpack `package` into `dest`.
///
/// Entries that would escape `dest` abort the extraction. A package with no
/// regular files is rejected.
pub fn extract_package(package: &Path, dest: &Path) -> Result<ExtractedPackage> {
    let format = PackageFormat::detect(package)?;
    fs::create_dir_all(dest)?;

    let files = match format {
        PackageFormat::Zip => extract_zip(package, dest)?,
        PackageFormat::TarGz => extract_tar_gz(package, dest)?,
    };

    if files.is_empty() {
        return Err(BundleError::Empty(package.display().to_string()));
    }

    info!(
        package = %package.display(),
        format = %format,
        files = files.len(),
        "Package extracted"
    );
    Ok(ExtractedPackage {
        format,
        root: dest.to_path_buf(),
        files,
    })
}

fn extract_zip(package: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(package)?;
    let mut archive = ZipArchive::new(file).map_err(|e| BundleError::Unreadable {
        path: package.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut files = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let rel = entry
            .enclosed_name()
            .ok_or_else(|| BundleError::UnsafePath(entry.name().to_string()))?;
        let target = dest.join(&rel);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))?;
            }
        }

        debug!(path = %rel.display(), "Extracted");
        files.push(rel);
    }
    Ok(files)
}

fn extract_tar_gz(package: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let file = File::open(package)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));

    let mut files = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let rel = safe_relative(&name)?;
        let target = dest.join(&rel);
        let kind = entry.header().entry_type();

        if kind.is_dir() {
            fs::create_dir_all(&target)?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&target)?;
            debug!(path = %rel.display(), "Extracted");
            files.push(rel);
        } else {
            warn!(path = %name, "Skipping non-regular package entry");
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
        let enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(enc);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_format_from_name() {
        assert_eq!(PackageFormat::from_name("update_1.2.0.zip"), Some(PackageFormat::Zip));
        assert_eq!(
            PackageFormat::from_name("UPDATE_1.2.0.TAR.GZ"),
            Some(PackageFormat::TarGz)
        );
        assert_eq!(PackageFormat::from_name("u.tgz"), Some(PackageFormat::TarGz));
        assert_eq!(PackageFormat::from_name("update_1.2.0.rar"), None);
    }

    #[test]
    fn test_unknown_extension_is_hard_failure() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("update_1.2.0.rar");
        fs::write(&pkg, b"whatever").unwrap();

        assert!(matches!(
            extract_package(&pkg, &temp.path().join("out")),
            Err(BundleError::UnsupportedPackage(_))
        ));
    }

    #[test]
    fn test_extract_tar_gz() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("update_1.2.0.tar.gz");
        tar_gz(
            &pkg,
            &[
                ("pi_camera_client.py", b"print('v1.2.0')\n"),
                ("lib/helpers.py", b"X = 1\n"),
            ],
        );

        let out = temp.path().join("extracted");
        let extracted = extract_package(&pkg, &out).unwrap();

        assert_eq!(extracted.format, PackageFormat::TarGz);
        assert!(extracted.contains("lib/helpers.py"));
        assert_eq!(fs::read(out.join("lib/helpers.py")).unwrap(), b"X = 1\n");
    }

    #[test]
    fn test_extract_zip() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("update_1.2.0.zip");
        let mut zip = zip::ZipWriter::new(File::create(&pkg).unwrap());
        let options: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
        zip.start_file("post_update.sh", options).unwrap();
        zip.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
        zip.finish().unwrap();

        let extracted = extract_package(&pkg, &temp.path().join("x")).unwrap();
        assert_eq!(extracted.files, vec![PathBuf::from("post_update.sh")]);
    }

    #[test]
    fn test_traversal_rejected() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("evil.zip");
        let mut zip = zip::ZipWriter::new(File::create(&pkg).unwrap());
        let options: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
        zip.start_file("../escape.txt", options).unwrap();
        zip.write_all(b"nope").unwrap();
        zip.finish().unwrap();

        assert!(matches!(
            extract_package(&pkg, &temp.path().join("x")),
            Err(BundleError::UnsafePath(_))
        ));
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[test]
    fn test_empty_package_rejected() {
        let temp = TempDir::new().unwrap();
        let pkg = temp.path().join("empty.tar.gz");
        tar_gz(&pkg, &[]);

        assert!(matches!(
            extract_package(&pkg, &temp.path().join("x")),
            Err(BundleError::Empty(_))
        ));
    }
}
