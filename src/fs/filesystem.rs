//! FUSE filesystem implementation
//!
//! Translates inode-addressed kernel requests into path-based calls on
//! [`CryptMirror`]. File handles are not used: open only validates, and
//! every read and write resolves the path again.

use fuser::{
    FileAttr, Filesystem, MountOption, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use libc::{EINVAL, ERANGE};
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info};

use super::inode::InodeTable;
use super::mirror::{CryptMirror, FileKind, TimeUpdate};
use super::resolver::child_path;
use crate::config::MountConfig;
use crate::error::{Error, Result};

/// Build fuser mount options from configuration
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![MountOption::FSName(config.fs_name.clone())];
    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    options
}

fn errno(op: &str, err: &Error) -> i32 {
    let code = err.to_errno();
    if code == libc::EIO {
        error!("{} failed: {}", op, err);
    } else {
        debug!("{} failed: {}", op, err);
    }
    code
}

fn time_update(time: Option<TimeOrNow>) -> TimeUpdate {
    match time {
        None => TimeUpdate::Omit,
        Some(TimeOrNow::Now) => TimeUpdate::Now,
        Some(TimeOrNow::SpecificTime(t)) => TimeUpdate::At(t),
    }
}

/// FUSE front end of the encrypting mirror
pub struct CryptMirrorFs {
    mirror: CryptMirror,
    inodes: InodeTable,
    ttl: Duration,
}

impl CryptMirrorFs {
    pub fn new(mirror: CryptMirror) -> Self {
        let ttl = mirror.context().attr_ttl();
        Self {
            mirror,
            inodes: InodeTable::new(),
            ttl,
        }
    }

    fn path_of(&self, ino: u64) -> Result<PathBuf> {
        self.inodes.path(ino).ok_or(Error::NotFound(ino))
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<PathBuf> {
        child_path(&self.path_of(parent)?, name)
    }

    fn attr_for(&self, path: &Path) -> Result<FileAttr> {
        let attrs = self.mirror.getattr(path)?;
        let ino = self.inodes.ino_for(path);
        Ok(attrs.to_fuser_attr(ino))
    }

    fn do_setattr(
        &self,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Result<FileAttr> {
        let path = self.path_of(ino)?;
        if let Some(mode) = mode {
            self.mirror.chmod(&path, mode)?;
        }
        if uid.is_some() || gid.is_some() {
            self.mirror.chown(&path, uid, gid)?;
        }
        if let Some(size) = size {
            self.mirror.truncate(&path, size)?;
        }
        if atime.is_some() || mtime.is_some() {
            self.mirror
                .utimens(&path, time_update(atime), time_update(mtime))?;
        }
        self.attr_for(&path)
    }

    /// Listing of a directory with host inode numbers.
    ///
    /// Nothing is added to the inode table; the kernel assigns entries a
    /// table inode when it looks them up.
    fn do_readdir(&self, ino: u64) -> Result<Vec<(u64, FileKind, OsString)>> {
        let path = self.path_of(ino)?;
        let entries = self.mirror.readdir(&path)?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.ino, entry.kind, entry.name))
            .collect())
    }
}

impl Filesystem for CryptMirrorFs {
    fn destroy(&mut self) {
        info!(
            "Unmounting mirror {:?}",
            self.mirror.context().mirror_root()
        );
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", parent, name);

        match self.child_of(parent, name).and_then(|p| self.attr_for(&p)) {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("lookup", &e)),
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, _nlookup: u64) {
        self.inodes.forget(ino);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        match self.path_of(ino).and_then(|p| self.attr_for(&p)) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(errno("getattr", &e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        match self.do_setattr(ino, mode, uid, gid, size, atime, mtime) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(errno("setattr", &e)),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        match self.path_of(ino).and_then(|p| self.mirror.readlink(&p)) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(errno("readlink", &e)),
        }
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let result = self.child_of(parent, name).and_then(|path| {
            self.mirror
                .mknod(&path, mode & !(umask & 0o7777), rdev as u64)?;
            self.attr_for(&path)
        });
        match result {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("mknod", &e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let result = self.child_of(parent, name).and_then(|path| {
            self.mirror.mkdir(&path, mode & !umask)?;
            self.attr_for(&path)
        });
        match result {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("mkdir", &e)),
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_of(parent, name).and_then(|path| {
            self.mirror.unlink(&path)?;
            self.inodes.remove_path(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("unlink", &e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_of(parent, name).and_then(|path| {
            self.mirror.rmdir(&path)?;
            self.inodes.remove_path(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("rmdir", &e)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let result = self.child_of(parent, link_name).and_then(|path| {
            self.mirror.symlink(target, &path)?;
            self.attr_for(&path)
        });
        match result {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("symlink", &e)),
        }
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        if flags != 0 {
            // RENAME_EXCHANGE / RENAME_NOREPLACE have no portable host call
            reply.error(EINVAL);
            return;
        }

        let result = self.child_of(parent, name).and_then(|from| {
            let to = self.child_of(newparent, newname)?;
            self.mirror.rename(&from, &to)?;
            self.inodes.rename(&from, &to);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("rename", &e)),
        }
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let result = self.path_of(ino).and_then(|from| {
            let to = self.child_of(newparent, newname)?;
            self.mirror.link(&from, &to)?;
            self.attr_for(&to)
        });
        match result {
            Ok(attr) => reply.entry(&self.ttl, &attr, 0),
            Err(e) => reply.error(errno("link", &e)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.path_of(ino).and_then(|p| self.mirror.open(&p, flags)) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(errno("open", &e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        match self
            .path_of(ino)
            .and_then(|p| self.mirror.read(&p, offset as u64, size))
        {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno("read", &e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(EINVAL);
            return;
        }
        match self
            .path_of(ino)
            .and_then(|p| self.mirror.write(&p, offset as u64, data))
        {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(errno("write", &e)),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        match self.path_of(ino).and_then(|p| self.mirror.release(&p)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("release", &e)),
        }
    }

    fn fsync(&mut self, _req: &Request, ino: u64, _fh: u64, datasync: bool, reply: ReplyEmpty) {
        match self.path_of(ino).and_then(|p| self.mirror.fsync(&p, datasync)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("fsync", &e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let entries = match self.do_readdir(ino) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno("readdir", &e));
                return;
            }
        };

        for (i, (child_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            let buffer_full = reply.add(*child_ino, (i + 1) as i64, kind.to_fuser_type(), name);
            if buffer_full {
                break;
            }
        }

        reply.ok();
    }

    fn statfs(&mut self, _req: &Request, ino: u64, reply: ReplyStatfs) {
        match self.path_of(ino).and_then(|p| self.mirror.statfs(&p)) {
            Ok(s) => reply.statfs(
                s.blocks, s.bfree, s.bavail, s.files, s.ffree, s.bsize, s.namelen, s.frsize,
            ),
            Err(e) => reply.error(errno("statfs", &e)),
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        match self
            .path_of(ino)
            .and_then(|p| self.mirror.setxattr(&p, name, value, flags))
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("setxattr", &e)),
        }
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
        match self.path_of(ino).and_then(|p| self.mirror.getxattr(&p, name)) {
            Ok(value) => {
                if size == 0 {
                    reply.size(value.len() as u32);
                } else if value.len() > size as usize {
                    reply.error(ERANGE);
                } else {
                    reply.data(&value);
                }
            }
            Err(e) => reply.error(errno("getxattr", &e)),
        }
    }

    fn listxattr(&mut self, _req: &Request, ino: u64, size: u32, reply: ReplyXattr) {
        match self.path_of(ino).and_then(|p| self.mirror.listxattr(&p)) {
            Ok(names) => {
                let mut list = Vec::new();
                for name in names {
                    list.extend_from_slice(name.as_bytes());
                    list.push(0);
                }
                if size == 0 {
                    reply.size(list.len() as u32);
                } else if list.len() > size as usize {
                    reply.error(ERANGE);
                } else {
                    reply.data(&list);
                }
            }
            Err(e) => reply.error(errno("listxattr", &e)),
        }
    }

    fn removexattr(&mut self, _req: &Request, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        match self
            .path_of(ino)
            .and_then(|p| self.mirror.removexattr(&p, name))
        {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("removexattr", &e)),
        }
    }

    fn access(&mut self, _req: &Request, ino: u64, mask: i32, reply: ReplyEmpty) {
        match self.path_of(ino).and_then(|p| self.mirror.access(&p, mask)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno("access", &e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let result = self.child_of(parent, name).and_then(|path| {
            self.mirror.create(&path, mode & !umask)?;
            self.attr_for(&path)
        });
        match result {
            Ok(attr) => reply.created(&self.ttl, &attr, 0, 0, 0),
            Err(e) => reply.error(errno("create", &e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, EncryptionConfig};
    use crate::fs::inode::ROOT_INO;
    use crate::mount::MountContext;
    use std::os::unix::fs::MetadataExt;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_mount_options() {
        let options = mount_options(&MountConfig::default());
        assert!(options.contains(&MountOption::FSName("cryptmirror".to_string())));
        assert!(options.contains(&MountOption::AutoUnmount));
        assert!(!options.contains(&MountOption::AllowOther));

        let config = MountConfig {
            allow_other: true,
            auto_unmount: false,
            ..MountConfig::default()
        };
        let options = mount_options(&config);
        assert!(options.contains(&MountOption::AllowOther));
        assert!(!options.contains(&MountOption::AutoUnmount));
    }

    #[test]
    fn test_time_update_mapping() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(5);
        assert_eq!(time_update(None), TimeUpdate::Omit);
        assert_eq!(time_update(Some(TimeOrNow::Now)), TimeUpdate::Now);
        assert_eq!(time_update(Some(TimeOrNow::SpecificTime(t))), TimeUpdate::At(t));
    }

    #[test]
    fn test_readdir_reports_host_inodes() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let config = Config {
            encryption: EncryptionConfig {
                argon2_memory_kib: 1024,
                argon2_iterations: 1,
                argon2_parallelism: 1,
                ..EncryptionConfig::default()
            },
            ..Config::default()
        };
        let ctx = Arc::new(MountContext::new(b"pw", dir.path(), &config).unwrap());
        let fs = CryptMirrorFs::new(CryptMirror::new(ctx));

        let known = fs.inodes.len();
        let entries = fs.do_readdir(ROOT_INO).unwrap();
        assert_eq!(fs.inodes.len(), known);

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].2, OsString::from("."));
        assert_eq!(entries[1].2, OsString::from(".."));

        let sub = entries.iter().find(|(_, _, n)| n == "sub").unwrap();
        assert_eq!(sub.1, FileKind::Directory);
        assert_eq!(sub.0, std::fs::metadata(dir.path().join("sub")).unwrap().ino());
    }

    #[test]
    fn test_unknown_inode() {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.encryption.argon2_memory_kib = 1024;
        config.encryption.argon2_iterations = 1;
        let ctx = Arc::new(MountContext::new(b"pw", dir.path(), &config).unwrap());
        let fs = CryptMirrorFs::new(CryptMirror::new(ctx));

        assert!(matches!(fs.path_of(999), Err(Error::NotFound(999))));
    }
}
