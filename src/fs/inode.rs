//! Inode number to virtual path mapping
//!
//! The kernel addresses entries by inode number while the mirror is
//! addressed by path. Numbers are handed out on first lookup and stay
//! attached to the path until it is unlinked, renamed over or forgotten.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Inode of the mount root
pub const ROOT_INO: u64 = 1;

#[derive(Default)]
struct Maps {
    paths: HashMap<u64, PathBuf>,
    inos: HashMap<PathBuf, u64>,
}

/// Manages inode allocation and mapping
pub struct InodeTable {
    /// Next inode number
    next_ino: AtomicU64,
    maps: RwLock<Maps>,
}

impl InodeTable {
    pub fn new() -> Self {
        let table = Self {
            next_ino: AtomicU64::new(ROOT_INO + 1),
            maps: RwLock::new(Maps::default()),
        };
        {
            let mut maps = table.maps.write();
            maps.paths.insert(ROOT_INO, PathBuf::from("/"));
            maps.inos.insert(PathBuf::from("/"), ROOT_INO);
        }
        table
    }

    /// Virtual path of an inode
    pub fn path(&self, ino: u64) -> Option<PathBuf> {
        self.maps.read().paths.get(&ino).cloned()
    }

    /// Inode for a path, allocating one if the path is new
    pub fn ino_for(&self, path: &Path) -> u64 {
        if let Some(ino) = self.maps.read().inos.get(path) {
            return *ino;
        }

        let mut maps = self.maps.write();
        if let Some(ino) = maps.inos.get(path) {
            return *ino;
        }
        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        maps.paths.insert(ino, path.to_path_buf());
        maps.inos.insert(path.to_path_buf(), ino);
        ino
    }

    /// Drop the mapping for a path (after unlink/rmdir)
    pub fn remove_path(&self, path: &Path) {
        let mut maps = self.maps.write();
        if let Some(ino) = maps.inos.remove(path) {
            maps.paths.remove(&ino);
        }
    }

    /// Kernel no longer references `ino`
    pub fn forget(&self, ino: u64) {
        if ino == ROOT_INO {
            return;
        }
        let mut maps = self.maps.write();
        if let Some(path) = maps.paths.remove(&ino) {
            maps.inos.remove(&path);
        }
    }

    /// Move `from` and everything below it to `to`
    pub fn rename(&self, from: &Path, to: &Path) {
        let mut maps = self.maps.write();

        // Whatever lived at the destination is gone now.
        let replaced: Vec<PathBuf> = maps
            .inos
            .keys()
            .filter(|p| p.starts_with(to))
            .cloned()
            .collect();
        for path in replaced {
            if let Some(ino) = maps.inos.remove(&path) {
                maps.paths.remove(&ino);
            }
        }

        let moved: Vec<(PathBuf, u64)> = maps
            .inos
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, ino)| (p.clone(), *ino))
            .collect();
        for (old, ino) in moved {
            let new = match old.strip_prefix(from) {
                Ok(rest) if rest.as_os_str().is_empty() => to.to_path_buf(),
                Ok(rest) => to.join(rest),
                Err(_) => continue,
            };
            maps.inos.remove(&old);
            maps.inos.insert(new.clone(), ino);
            maps.paths.insert(ino, new);
        }
    }

    /// Number of known inodes, root included
    pub fn len(&self) -> usize {
        self.maps.read().paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
