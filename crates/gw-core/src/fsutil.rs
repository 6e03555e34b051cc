//! Filesystem helpers shared by restore and apply.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Copy `src` over `dest` through a temp file in the destination directory
/// and a rename, so readers never see a half-written file.
pub fn atomic_replace(src: &Path, dest: &Path, executable: bool) -> io::Result<()> {
    let dir = dest.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent directory")
    })?;
    fs::create_dir_all(dir)?;

    let temp_path = dir.join(format!(
        ".{}.new.{}",
        dest.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id()
    ));
    fs::copy(src, &temp_path)?;

    #[cfg(unix)]
    if executable {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&temp_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&temp_path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = executable;

    let result = fs::rename(&temp_path, dest);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Whether any execute bit is set on `path`. False when it does not exist.
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        false
    }
}

/// Recursively copy a directory. Symlinks are skipped.
pub fn copy_tree(src: &Path, dest: &Path) -> io::Result<u64> {
    fs::create_dir_all(dest)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dest.join(entry.file_name());
        if file_type.is_dir() {
            copied += copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Remove a file or directory tree; a missing path is not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// `<path>.backup`, keeping the existing extension (`config.json.backup`).
pub fn safety_copy_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".backup");
    path.with_file_name(name)
}

/// Copy whatever sits at `path` to its `.backup` sibling, replacing any
/// previous safety copy. Returns `None` when there was nothing to copy.
pub fn make_safety_copy(path: &Path) -> io::Result<Option<PathBuf>> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let backup = safety_copy_path(path);
    remove_path(&backup)?;
    if meta.is_dir() {
        copy_tree(path, &backup)?;
    } else {
        fs::copy(path, &backup)?;
    }
    Ok(Some(backup))
}

/// Regular files beneath `root`, relative to it, sorted.
pub fn relative_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                walk(root, &path, out)?;
            } else if file_type.is_file() {
                if let Ok(rel) = path.strip_prefix(root) {
                    out.push(rel.to_path_buf());
                }
            }
        }
        Ok(())
    }

    let mut out = Vec::new();
    walk(root, root, &mut out)?;
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_replace_sets_mode() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src.sh");
        fs::write(&src, b"#!/bin/sh\n").unwrap();
        let dest = temp.path().join("install").join("run.sh");

        atomic_replace(&src, &dest, true).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"#!/bin/sh\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&dest).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_safety_copy_of_dir_replaces_old_copy() {
        let temp = TempDir::new().unwrap();
        let certs = temp.path().join("certs");
        fs::create_dir_all(&certs).unwrap();
        fs::write(certs.join("a.pem"), b"new").unwrap();
        let old = temp.path().join("certs.backup");
        fs::create_dir_all(&old).unwrap();
        fs::write(old.join("stale.pem"), b"old").unwrap();

        let backup = make_safety_copy(&certs).unwrap().unwrap();
        assert_eq!(backup, old);
        assert!(old.join("a.pem").exists());
        assert!(!old.join("stale.pem").exists());
    }

    #[test]
    fn test_safety_copy_missing_is_none() {
        let temp = TempDir::new().unwrap();
        assert!(make_safety_copy(&temp.path().join("nope")).unwrap().is_none());
    }

    #[test]
    fn test_safety_copy_path_keeps_extension() {
        assert_eq!(
            safety_copy_path(Path::new("/opt/app/config.json")),
            PathBuf::from("/opt/app/config.json.backup")
        );
    }

    #[test]
    fn test_relative_files_sorted() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("lib")).unwrap();
        fs::write(temp.path().join("z.py"), b"").unwrap();
        fs::write(temp.path().join("lib").join("a.py"), b"").unwrap();

        assert_eq!(
            relative_files(temp.path()).unwrap(),
            vec![PathBuf::from("lib/a.py"), PathBuf::from("z.py")]
        );
    }
}
