use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::BundleError;

/// A regular file found under the bundle root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    /// Forward-slash path relative to the root.
    pub relative: String,
    pub path: PathBuf,
}

/// Lists every regular file under `root` in lexicographic order of its
/// relative path. Symlinks are neither followed nor listed; unreadable
/// subdirectories are skipped.
pub fn walk(root: &Path) -> Result<Vec<WalkedFile>, BundleError> {
    let metadata = fs::metadata(root).map_err(|source| BundleError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(BundleError::NotADirectory(root.to_path_buf()));
    }
    fs::read_dir(root).map_err(|source| BundleError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        files.push(WalkedFile {
            relative: normalize(relative),
            path: entry.path().to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(files)
}

fn normalize(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
