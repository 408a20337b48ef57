//! Path-based filesystem operations over the mirror directory
//!
//! Each operation resolves its virtual path(s) to mirror paths and then
//! calls the matching host primitive. Only create, read, write and
//! truncate touch file contents, and they go through the transcoding
//! pipeline. No state survives between calls apart from the mirror itself.

use super::marker;
use super::pipeline::TranscodingPipeline;
use super::resolver::{MirrorPath, MirrorResolver};
use super::xattr;
use crate::crypto::plaintext_len;
use crate::error::{Error, Result};
use crate::mount::MountContext;
use nix::sys::stat::{utimensat, Mode, SFlag, UtimensatFlags};
use nix::sys::time::TimeSpec;
use nix::unistd::AccessFlags;
use std::ffi::{OsStr, OsString};
use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, DirEntryExt, FileTypeExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Kind of a filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    RegularFile,
    Directory,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
}

impl From<fs::FileType> for FileKind {
    fn from(ft: fs::FileType) -> Self {
        if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_block_device() {
            FileKind::BlockDevice
        } else if ft.is_char_device() {
            FileKind::CharDevice
        } else if ft.is_fifo() {
            FileKind::Fifo
        } else if ft.is_socket() {
            FileKind::Socket
        } else {
            FileKind::RegularFile
        }
    }
}

impl FileKind {
    pub fn to_fuser_type(&self) -> fuser::FileType {
        match self {
            FileKind::RegularFile => fuser::FileType::RegularFile,
            FileKind::Directory => fuser::FileType::Directory,
            FileKind::Symlink => fuser::FileType::Symlink,
            FileKind::BlockDevice => fuser::FileType::BlockDevice,
            FileKind::CharDevice => fuser::FileType::CharDevice,
            FileKind::Fifo => fuser::FileType::NamedPipe,
            FileKind::Socket => fuser::FileType::Socket,
        }
    }
}

/// Attributes of an entry as seen through the mount
#[derive(Debug, Clone)]
pub struct FileAttributes {
    /// Host inode number
    pub ino: u64,
    /// Plaintext size
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    pub kind: FileKind,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub blksize: u32,
}

fn unix_time(secs: i64, nsecs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs as u64, nsecs as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(secs.unsigned_abs())
    }
}

impl FileAttributes {
    fn from_metadata(meta: &fs::Metadata) -> Self {
        Self {
            ino: meta.ino(),
            size: meta.len(),
            blocks: meta.blocks(),
            atime: unix_time(meta.atime(), meta.atime_nsec()),
            mtime: unix_time(meta.mtime(), meta.mtime_nsec()),
            ctime: unix_time(meta.ctime(), meta.ctime_nsec()),
            crtime: meta.created().unwrap_or(UNIX_EPOCH),
            kind: FileKind::from(meta.file_type()),
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: meta.blksize() as u32,
        }
    }

    /// Convert to fuser FileAttr under the mount's inode number
    pub fn to_fuser_attr(&self, ino: u64) -> fuser::FileAttr {
        fuser::FileAttr {
            ino,
            size: self.size,
            blocks: self.blocks,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            crtime: self.crtime,
            kind: self.kind.to_fuser_type(),
            perm: self.perm,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: self.rdev,
            blksize: self.blksize,
            flags: 0,
        }
    }
}

/// Directory entry with host inode and type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    pub ino: u64,
    pub kind: FileKind,
}

/// Filesystem statistics of the mirror's host filesystem
#[derive(Debug, Clone, Copy)]
pub struct FsStats {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// Timestamp change requested by utimens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUpdate {
    Omit,
    Now,
    At(SystemTime),
}

impl TimeUpdate {
    fn to_timespec(self) -> Result<TimeSpec> {
        match self {
            TimeUpdate::Omit => Ok(TimeSpec::UTIME_OMIT),
            TimeUpdate::Now => Ok(TimeSpec::UTIME_NOW),
            TimeUpdate::At(time) => {
                let since = time.duration_since(UNIX_EPOCH).map_err(|_| {
                    Error::InvalidTime(format!("{:?} is before the epoch", time))
                })?;
                Ok(TimeSpec::from(since))
            }
        }
    }
}

/// The encrypting mirror filesystem, addressed by virtual path
pub struct CryptMirror {
    ctx: Arc<MountContext>,
    resolver: MirrorResolver,
    pipeline: TranscodingPipeline,
}

impl CryptMirror {
    pub fn new(ctx: Arc<MountContext>) -> Self {
        let resolver = MirrorResolver::new(ctx.mirror_root().to_path_buf());
        let pipeline = TranscodingPipeline::new(ctx.clone());
        Self {
            ctx,
            resolver,
            pipeline,
        }
    }

    pub fn context(&self) -> &MountContext {
        &self.ctx
    }

    fn resolve(&self, path: &Path) -> Result<MirrorPath> {
        self.resolver.resolve(path)
    }

    pub fn getattr(&self, path: &Path) -> Result<FileAttributes> {
        debug!("getattr(path={:?})", path);
        let mirror = self.resolve(path)?;
        let meta = fs::symlink_metadata(&mirror)?;
        let mut attrs = FileAttributes::from_metadata(&meta);
        if attrs.kind == FileKind::RegularFile && attrs.size > 0 && marker::is_encrypted(&mirror) {
            attrs.size = plaintext_len(attrs.size);
        }
        Ok(attrs)
    }

    pub fn access(&self, path: &Path, mask: i32) -> Result<()> {
        debug!("access(path={:?}, mask={})", path, mask);
        let mirror = self.resolve(path)?;
        nix::unistd::access(mirror.as_path(), AccessFlags::from_bits_truncate(mask))?;
        Ok(())
    }

    pub fn readlink(&self, path: &Path) -> Result<PathBuf> {
        debug!("readlink(path={:?})", path);
        let mirror = self.resolve(path)?;
        Ok(fs::read_link(&mirror)?)
    }

    /// Directory entries including synthesized `.` and `..`
    pub fn readdir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        debug!("readdir(path={:?})", path);
        let mirror = self.resolve(path)?;

        let this = fs::metadata(&mirror)?;
        let parent_ino = if mirror.as_path() == self.resolver.root() {
            this.ino()
        } else {
            match mirror.as_path().parent() {
                Some(parent) => fs::metadata(parent)?.ino(),
                None => this.ino(),
            }
        };

        let mut entries = vec![
            DirEntry {
                name: OsString::from("."),
                ino: this.ino(),
                kind: FileKind::Directory,
            },
            DirEntry {
                name: OsString::from(".."),
                ino: parent_ino,
                kind: FileKind::Directory,
            },
        ];

        for entry in fs::read_dir(&mirror)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name(),
                ino: entry.ino(),
                kind: FileKind::from(entry.file_type()?),
            });
        }

        Ok(entries)
    }

    /// Create a filesystem node. Regular files are created encrypted.
    pub fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> Result<()> {
        debug!("mknod(path={:?}, mode={:o}, rdev={})", path, mode, rdev);
        let mirror = self.resolve(path)?;
        let kind = mode & libc::S_IFMT;
        let perm = Mode::from_bits_truncate(mode & 0o7777);

        if kind == libc::S_IFREG || kind == 0 {
            if fs::symlink_metadata(&mirror).is_ok() {
                return Err(io::Error::from_raw_os_error(libc::EEXIST).into());
            }
            self.pipeline.create(&mirror, mode & 0o7777)
        } else if kind == libc::S_IFIFO {
            nix::unistd::mkfifo(mirror.as_path(), perm)?;
            Ok(())
        } else {
            nix::sys::stat::mknod(
                mirror.as_path(),
                SFlag::from_bits_truncate(kind),
                perm,
                rdev as libc::dev_t,
            )?;
            Ok(())
        }
    }

    pub fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        debug!("mkdir(path={:?}, mode={:o})", path, mode);
        let mirror = self.resolve(path)?;
        DirBuilder::new().mode(mode & 0o7777).create(&mirror)?;
        Ok(())
    }

    /// Create symlink `link` pointing at `target`; the target is stored verbatim
    pub fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        debug!("symlink(target={:?}, link={:?})", target, link);
        let mirror = self.resolve(link)?;
        std::os::unix::fs::symlink(target, &mirror)?;
        Ok(())
    }

    pub fn unlink(&self, path: &Path) -> Result<()> {
        debug!("unlink(path={:?})", path);
        let mirror = self.resolve(path)?;
        fs::remove_file(&mirror)?;
        Ok(())
    }

    pub fn rmdir(&self, path: &Path) -> Result<()> {
        debug!("rmdir(path={:?})", path);
        let mirror = self.resolve(path)?;
        fs::remove_dir(&mirror)?;
        Ok(())
    }

    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        debug!("rename(from={:?}, to={:?})", from, to);
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        fs::rename(&src, &dst)?;
        Ok(())
    }

    pub fn link(&self, from: &Path, to: &Path) -> Result<()> {
        debug!("link(from={:?}, to={:?})", from, to);
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        fs::hard_link(&src, &dst)?;
        Ok(())
    }

    pub fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        debug!("chmod(path={:?}, mode={:o})", path, mode);
        let mirror = self.resolve(path)?;
        fs::set_permissions(&mirror, Permissions::from_mode(mode & 0o7777))?;
        Ok(())
    }

    pub fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        debug!("chown(path={:?}, uid={:?}, gid={:?})", path, uid, gid);
        let mirror = self.resolve(path)?;
        std::os::unix::fs::lchown(&mirror, uid, gid)?;
        Ok(())
    }

    /// Set the plaintext length of a file
    pub fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        debug!("truncate(path={:?}, size={})", path, size);
        let mirror = self.resolve(path)?;
        self.pipeline.truncate(&mirror, size)
    }

    pub fn utimens(&self, path: &Path, atime: TimeUpdate, mtime: TimeUpdate) -> Result<()> {
        debug!("utimens(path={:?}, atime={:?}, mtime={:?})", path, atime, mtime);
        let mirror = self.resolve(path)?;
        let atime = atime.to_timespec()?;
        let mtime = mtime.to_timespec()?;
        utimensat(
            None,
            mirror.as_path(),
            &atime,
            &mtime,
            UtimensatFlags::NoFollowSymlink,
        )?;
        Ok(())
    }

    /// Check that the file can be opened with `flags`; nothing is kept open
    pub fn open(&self, path: &Path, flags: i32) -> Result<()> {
        debug!("open(path={:?}, flags={:#x})", path, flags);
        let mirror = self.resolve(path)?;

        let accmode = flags & libc::O_ACCMODE;
        let extra = flags & !(libc::O_ACCMODE | libc::O_CREAT | libc::O_EXCL);
        let file = OpenOptions::new()
            .read(accmode == libc::O_RDONLY || accmode == libc::O_RDWR)
            .write(accmode == libc::O_WRONLY || accmode == libc::O_RDWR)
            .custom_flags(extra)
            .open(&mirror)?;
        drop(file);
        Ok(())
    }

    pub fn read(&self, path: &Path, offset: u64, size: u32) -> Result<Vec<u8>> {
        debug!("read(path={:?}, offset={}, size={})", path, offset, size);
        let mirror = self.resolve(path)?;
        self.pipeline.read(&mirror, offset, size)
    }

    pub fn write(&self, path: &Path, offset: u64, data: &[u8]) -> Result<usize> {
        debug!("write(path={:?}, offset={}, len={})", path, offset, data.len());
        let mirror = self.resolve(path)?;
        self.pipeline.write(&mirror, offset, data)
    }

    pub fn statfs(&self, path: &Path) -> Result<FsStats> {
        debug!("statfs(path={:?})", path);
        let mirror = self.resolve(path)?;
        let stats = nix::sys::statvfs::statvfs(mirror.as_path())?;
        Ok(FsStats {
            blocks: stats.blocks() as u64,
            bfree: stats.blocks_free() as u64,
            bavail: stats.blocks_available() as u64,
            files: stats.files() as u64,
            ffree: stats.files_free() as u64,
            bsize: stats.block_size() as u32,
            namelen: stats.name_max() as u32,
            frsize: stats.fragment_size() as u32,
        })
    }

    /// Create an encrypted, empty regular file
    pub fn create(&self, path: &Path, mode: u32) -> Result<()> {
        debug!("create(path={:?}, mode={:o})", path, mode);
        let mirror = self.resolve(path)?;
        self.pipeline.create(&mirror, mode & 0o7777)
    }

    pub fn release(&self, path: &Path) -> Result<()> {
        debug!("release(path={:?})", path);
        Ok(())
    }

    pub fn fsync(&self, path: &Path, datasync: bool) -> Result<()> {
        debug!("fsync(path={:?}, datasync={})", path, datasync);
        let mirror = self.resolve(path)?;
        let file = File::open(&mirror)?;
        if datasync {
            file.sync_data()?;
        } else {
            file.sync_all()?;
        }
        Ok(())
    }

    pub fn setxattr(&self, path: &Path, name: &OsStr, value: &[u8], flags: i32) -> Result<()> {
        debug!("setxattr(path={:?}, name={:?}, len={})", path, name, value.len());
        if marker::is_marker_name(name) {
            return Err(Error::ReservedAttribute(name.to_string_lossy().to_string()));
        }
        let mirror = self.resolve(path)?;
        xattr::set(mirror.as_path(), name, value, flags)?;
        Ok(())
    }

    pub fn getxattr(&self, path: &Path, name: &OsStr) -> Result<Vec<u8>> {
        debug!("getxattr(path={:?}, name={:?})", path, name);
        let mirror = self.resolve(path)?;
        if marker::is_marker_name(name) {
            return Err(xattr::no_attribute().into());
        }
        Ok(xattr::get(mirror.as_path(), name)?)
    }

    /// Attribute names, without the encryption marker
    pub fn listxattr(&self, path: &Path) -> Result<Vec<OsString>> {
        debug!("listxattr(path={:?})", path);
        let mirror = self.resolve(path)?;
        let names = xattr::list(mirror.as_path())?;
        Ok(names
            .into_iter()
            .filter(|name| !marker::is_marker_name(name))
            .collect())
    }

    pub fn removexattr(&self, path: &Path, name: &OsStr) -> Result<()> {
        debug!("removexattr(path={:?}, name={:?})", path, name);
        if marker::is_marker_name(name) {
            return Err(Error::ReservedAttribute(name.to_string_lossy().to_string()));
        }
        let mirror = self.resolve(path)?;
        xattr::remove(mirror.as_path(), name)?;
        Ok(())
    }
}
