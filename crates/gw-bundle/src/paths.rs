//! Archive entry path handling.

use std::path::{Component, Path, PathBuf};

use crate::{BundleError, Result};

/// Turn an archive entry name into a relative path that cannot escape the
/// extraction root.
///
/// Rejects absolute paths, drive prefixes and any `..` component. `.`
/// components are dropped.
pub fn safe_relative(name: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(BundleError::UnsafePath(name.to_string()));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(BundleError::UnsafePath(name.to_string()));
    }
    Ok(out)
}

/// `/`-joined form of a relative path, as stored in manifests.
pub fn to_archive_string(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
