//! Tile container path construction and removal.
//!
//! Every source file owned by a collection maps to exactly one container
//! directory below the tile root:
//!
//! ```text
//! <tile_root>/<owner_id>/<dir>/<dir>/<file name>.pyramid/
//!     imageinfo.json
//!     <level>/<row>/<col>.jpg
//! ```
//!
//! The mapping is a pure function of its inputs so it is stable across
//! process restarts and between hosts sharing the same tile store.
//!
//! While a container is rebuilt it has two siblings, `<name>.pyramid.partial`
//! (the new pyramid being written) and `<name>.pyramid.old` (the previous one
//! during the swap). Keys whose directories would use any of these names are
//! rejected, so no key's tiles can live inside another key's container or
//! its siblings.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Suffix appended to a source file name to form its container directory.
pub const CONTAINER_SUFFIX: &str = ".pyramid";

/// Suffix of the staging directory a build writes into before it is swapped in.
pub const STAGING_SUFFIX: &str = ".partial";

/// Suffix the previous container is renamed to while a rebuild is swapped in.
pub const RETIRED_SUFFIX: &str = ".old";

/// Name of the descriptor file inside a container.
pub const DESCRIPTOR_FILE: &str = "imageinfo.json";

/// Errors produced while mapping keys to paths or removing containers.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The owner id cannot be used as a directory name
    #[error("Invalid owner id '{0}'")]
    InvalidOwner(String),

    /// The relative path is empty or escapes its owner
    #[error("Invalid relative path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Filesystem error while removing a container
    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Split a relative path into its components.
///
/// Both `/` and `\` are accepted as separators so paths reported by hosts
/// with a different separator convention resolve identically. Leading
/// separators and empty components are ignored.
///
/// # Example
///
/// ```
/// use tileforge::layout::path_components;
///
/// let parts = path_components("\\img\\page1.tif").unwrap();
/// assert_eq!(parts, vec!["img", "page1.tif"]);
/// ```
pub fn path_components(relative_path: &str) -> Result<Vec<&str>, LayoutError> {
    let parts: Vec<&str> = relative_path
        .split(['/', '\\'])
        .filter(|p| !p.is_empty())
        .collect();

    if parts.is_empty() {
        return Err(LayoutError::InvalidPath {
            path: relative_path.to_string(),
            reason: "no file name".to_string(),
        });
    }
    if parts.iter().any(|p| *p == "." || *p == "..") {
        return Err(LayoutError::InvalidPath {
            path: relative_path.to_string(),
            reason: "'.' and '..' components are not allowed".to_string(),
        });
    }
    Ok(parts)
}

/// Components of a relative path usable as a job key.
///
/// Like [`path_components`], but also rejects directories that would clash
/// with a container or its staging or retired sibling.
pub fn key_components(relative_path: &str) -> Result<Vec<&str>, LayoutError> {
    let parts = path_components(relative_path)?;
    let dirs = &parts[..parts.len() - 1];
    if let Some(dir) = dirs.iter().find(|dir| is_reserved_dir(dir)) {
        return Err(LayoutError::InvalidPath {
            path: relative_path.to_string(),
            reason: format!("directory '{}' uses a reserved suffix", dir),
        });
    }
    Ok(parts)
}

/// Resolve a source file below `file_store` using local separators.
pub fn source_path(
    file_store: &Path,
    owner_id: &str,
    relative_path: &str,
) -> Result<PathBuf, LayoutError> {
    validate_owner(owner_id)?;
    let mut path = file_store.join(owner_id);
    for part in path_components(relative_path)? {
        path.push(part);
    }
    Ok(path)
}

pub(crate) fn validate_owner(owner_id: &str) -> Result<(), LayoutError> {
    let invalid = owner_id.is_empty()
        || owner_id == "."
        || owner_id == ".."
        || owner_id.contains(['/', '\\'])
        || owner_id.ends_with(CONTAINER_SUFFIX);
    if invalid {
        return Err(LayoutError::InvalidOwner(owner_id.to_string()));
    }
    Ok(())
}

/// Deterministic mapping from `(owner_id, relative_path)` to tile containers.
#[derive(Debug, Clone)]
pub struct TileFileLayout {
    root: PathBuf,
}

impl TileFileLayout {
    /// Create a layout rooted at `root`. The directory is not touched.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The tile root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every container of one owner.
    pub fn owner_directory(&self, owner_id: &str) -> Result<PathBuf, LayoutError> {
        validate_owner(owner_id)?;
        Ok(self.root.join(owner_id))
    }

    /// Container directory for a source file.
    ///
    /// Intermediate directories named like a container, or like its staging
    /// or retired sibling, are rejected so that no key can ever resolve
    /// inside a directory the builder creates, swaps or deletes.
    ///
    /// # Example
    ///
    /// ```
    /// use std::path::PathBuf;
    /// use tileforge::layout::TileFileLayout;
    ///
    /// let layout = TileFileLayout::new("/tiles");
    /// let path = layout.container_path_for("deriv1", "/img/page1.tif").unwrap();
    ///
    /// assert_eq!(path, PathBuf::from("/tiles/deriv1/img/page1.tif.pyramid"));
    /// ```
    pub fn container_path_for(
        &self,
        owner_id: &str,
        relative_path: &str,
    ) -> Result<PathBuf, LayoutError> {
        let mut path = self.owner_directory(owner_id)?;
        let parts = key_components(relative_path)?;
        let (file_name, dirs) = parts
            .split_last()
            .ok_or_else(|| LayoutError::InvalidPath {
                path: relative_path.to_string(),
                reason: "no file name".to_string(),
            })?;

        for dir in dirs {
            path.push(dir);
        }
        path.push(format!("{}{}", file_name, CONTAINER_SUFFIX));
        Ok(path)
    }

    /// Path of the descriptor file for a key.
    pub fn descriptor_path_for(
        &self,
        owner_id: &str,
        relative_path: &str,
    ) -> Result<PathBuf, LayoutError> {
        Ok(self
            .container_path_for(owner_id, relative_path)?
            .join(DESCRIPTOR_FILE))
    }

    /// Whether a finished pyramid (container with descriptor) exists.
    pub fn exists(&self, owner_id: &str, relative_path: &str) -> bool {
        self.descriptor_path_for(owner_id, relative_path)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Remove the container for a key along with now-empty parents.
    ///
    /// Returns `true` if a container was removed. A missing container is
    /// not an error; parent cleanup still runs in that case so leftovers of
    /// earlier deletions are swept up.
    pub fn delete(&self, owner_id: &str, relative_path: &str) -> Result<bool, LayoutError> {
        let container = self.container_path_for(owner_id, relative_path)?;

        let removed = remove_tree(&container)?;
        remove_tree(&staging_path(&container))?;
        remove_tree(&retired_path(&container))?;

        if let Some(parent) = container.parent() {
            self.prune_empty_ancestors(parent);
        }
        Ok(removed)
    }

    /// Remove every container of an owner.
    pub fn delete_owner(&self, owner_id: &str) -> Result<bool, LayoutError> {
        let dir = self.owner_directory(owner_id)?;
        remove_tree(&dir)
    }

    /// Walk upward from `start`, removing empty directories below the root.
    fn prune_empty_ancestors(&self, start: &Path) {
        let mut current = Some(start);
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            // remove_dir only succeeds on empty directories
            match fs::remove_dir(dir) {
                Ok(()) => debug!(path = %dir.display(), "Removed empty tile directory"),
                Err(_) => break,
            }
            current = dir.parent();
        }
    }
}

/// Whether a directory name is taken by a container or one of its siblings.
fn is_reserved_dir(name: &str) -> bool {
    let base = name
        .strip_suffix(STAGING_SUFFIX)
        .or_else(|| name.strip_suffix(RETIRED_SUFFIX))
        .unwrap_or(name);
    base.ends_with(CONTAINER_SUFFIX)
}

/// Staging directory used while a container is being (re)built.
pub fn staging_path(container: &Path) -> PathBuf {
    sibling_path(container, STAGING_SUFFIX)
}

/// Where the previous container is parked while a rebuild is swapped in.
pub fn retired_path(container: &Path) -> PathBuf {
    sibling_path(container, RETIRED_SUFFIX)
}

fn sibling_path(container: &Path, suffix: &str) -> PathBuf {
    let mut name = container
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    container.with_file_name(name)
}

fn remove_tree(path: &Path) -> Result<bool, LayoutError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(LayoutError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}
