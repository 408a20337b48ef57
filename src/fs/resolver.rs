//! Virtual path to mirror path resolution

use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Absolute path of an entry inside the mirror directory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MirrorPath(PathBuf);

impl MirrorPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for MirrorPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Maps virtual paths onto the mirror root
#[derive(Debug, Clone)]
pub struct MirrorResolver {
    root: PathBuf,
}

impl MirrorResolver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get the root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a virtual path to its mirror path.
    ///
    /// `.` segments are dropped and `..` segments pop the previous one. A
    /// `..` with nothing left to pop would leave the mirror root and is
    /// rejected.
    pub fn resolve(&self, virtual_path: &Path) -> Result<MirrorPath> {
        let mut parts: Vec<&OsStr> = Vec::new();
        for component in virtual_path.components() {
            match component {
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if parts.pop().is_none() {
                        return Err(Error::PathEscape(
                            virtual_path.to_string_lossy().to_string(),
                        ));
                    }
                }
                Component::Normal(part) => parts.push(part),
            }
        }

        let mut resolved = self.root.clone();
        resolved.extend(parts);
        Ok(MirrorPath(resolved))
    }
}

/// Virtual path of `name` inside the virtual directory `parent`.
///
/// `name` must be a single, ordinary path component.
pub fn child_path(parent: &Path, name: &OsStr) -> Result<PathBuf> {
    let bytes = name.as_encoded_bytes();
    if bytes.is_empty() || name == "." || name == ".." || bytes.contains(&b'/') {
        return Err(Error::InvalidName(name.to_string_lossy().to_string()));
    }
    Ok(parent.join(name))
}
