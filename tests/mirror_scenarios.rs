//! End-to-end behaviour of the mirror filesystem through its path API

#![cfg(target_os = "linux")]

use cryptmirror::config::{Config, EncryptionConfig};
use cryptmirror::crypto::{derive_key, transcode, TranscodeMode, OVERHEAD};
use cryptmirror::fs::marker::{self, MARKER_NAME};
use cryptmirror::fs::{CryptMirror, FileKind, MirrorResolver, TimeUpdate};
use cryptmirror::{Error, MountContext};
use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io::Cursor;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::{tempdir, TempDir};

fn test_config() -> Config {
    Config {
        encryption: EncryptionConfig {
            argon2_memory_kib: 1024,
            argon2_iterations: 1,
            argon2_parallelism: 1,
            ..EncryptionConfig::default()
        },
        ..Config::default()
    }
}

fn mount(passphrase: &[u8]) -> (TempDir, CryptMirror) {
    let dir = tempdir().unwrap();
    let ctx = MountContext::new(passphrase, dir.path(), &test_config()).unwrap();
    (dir, CryptMirror::new(Arc::new(ctx)))
}

fn remount(dir: &TempDir, passphrase: &[u8]) -> CryptMirror {
    let ctx = MountContext::new(passphrase, dir.path(), &test_config()).unwrap();
    CryptMirror::new(Arc::new(ctx))
}

fn mirror_path(dir: &TempDir, virtual_path: &str) -> cryptmirror::fs::MirrorPath {
    MirrorResolver::new(fs::canonicalize(dir.path()).unwrap())
        .resolve(Path::new(virtual_path))
        .unwrap()
}

#[test]
fn create_write_read_scenario() {
    let (dir, fs_) = mount(b"pw");

    fs_.create(Path::new("/a.txt"), 0o644).unwrap();
    assert_eq!(fs_.write(Path::new("/a.txt"), 0, b"hello").unwrap(), 5);
    assert_eq!(fs_.read(Path::new("/a.txt"), 0, 5).unwrap(), b"hello");

    let on_disk = fs::read(dir.path().join("a.txt")).unwrap();
    assert_ne!(on_disk, b"hello");
    assert!(marker::is_encrypted(&mirror_path(&dir, "/a.txt")));
}

#[test]
fn preexisting_plain_file_reads_unchanged() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("plain.txt"), b"world").unwrap();

    let fs_ = remount(&dir, b"pw");
    assert_eq!(fs_.read(Path::new("/plain.txt"), 0, 5).unwrap(), b"world");
    assert_eq!(fs_.getattr(Path::new("/plain.txt")).unwrap().size, 5);
}

#[test]
fn plain_file_writes_stay_plain() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("plain.txt"), b"world").unwrap();
    let fs_ = remount(&dir, b"pw");

    fs_.write(Path::new("/plain.txt"), 0, b"W").unwrap();
    assert_eq!(fs::read(dir.path().join("plain.txt")).unwrap(), b"World");
    assert!(!marker::is_encrypted(&mirror_path(&dir, "/plain.txt")));
}

#[test]
fn created_file_is_encrypted_empty() {
    let (dir, fs_) = mount(b"pw");
    fs_.create(Path::new("/new"), 0o600).unwrap();

    let path = mirror_path(&dir, "/new");
    assert!(marker::is_encrypted(&path));

    let stored = fs::read(&path).unwrap();
    assert_eq!(stored.len(), OVERHEAD);

    let key = derive_key(b"pw", &test_config().encryption).unwrap();
    let mut plain = Vec::new();
    transcode(&mut Cursor::new(stored), &mut plain, TranscodeMode::Decrypt, &key).unwrap();
    assert!(plain.is_empty());

    let meta = fs::metadata(&path).unwrap();
    assert_eq!(meta.mode() & 0o777, 0o600);
}

#[test]
fn write_read_idempotence_with_holes() {
    let (_dir, fs_) = mount(b"pw");
    let p = Path::new("/sparse.bin");
    fs_.create(p, 0o644).unwrap();

    fs_.write(p, 10, b"tail").unwrap();
    assert_eq!(fs_.read(p, 10, 4).unwrap(), b"tail");
    assert_eq!(fs_.read(p, 0, 10).unwrap(), vec![0u8; 10]);
    assert_eq!(fs_.getattr(p).unwrap().size, 14);

    fs_.write(p, 2, b"mid").unwrap();
    assert_eq!(fs_.read(p, 2, 3).unwrap(), b"mid");
    assert_eq!(fs_.read(p, 0, 100).unwrap(), b"\0\0mid\0\0\0\0\0tail");
}

#[test]
fn contents_survive_remount() {
    let (dir, fs_) = mount(b"pw");
    fs_.create(Path::new("/keep"), 0o644).unwrap();
    fs_.write(Path::new("/keep"), 0, b"persisted").unwrap();
    drop(fs_);

    let again = remount(&dir, b"pw");
    assert_eq!(again.read(Path::new("/keep"), 0, 64).unwrap(), b"persisted");
}

#[test]
fn wrong_passphrase_cannot_read() {
    let (dir, fs_) = mount(b"pw");
    fs_.create(Path::new("/secret"), 0o644).unwrap();
    fs_.write(Path::new("/secret"), 0, b"classified").unwrap();

    let other = remount(&dir, b"not-pw");
    let err = other.read(Path::new("/secret"), 0, 64).unwrap_err();
    assert!(matches!(err, Error::Crypto(_)));
    assert_eq!(err.to_errno(), libc::EIO);
}

#[test]
fn readdir_lists_mirror_entries_only() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("one"), b"1").unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub").join("inner"), b"2").unwrap();
    let fs_ = remount(&dir, b"pw");

    let names: BTreeSet<OsString> = fs_
        .readdir(Path::new("/"))
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    let expected: BTreeSet<OsString> = [".", "..", "one", "sub"]
        .iter()
        .map(OsString::from)
        .collect();
    assert_eq!(names, expected);

    let sub = fs_.readdir(Path::new("/sub")).unwrap();
    assert_eq!(sub.len(), 3);
    let inner = sub.iter().find(|e| e.name == "inner").unwrap();
    assert_eq!(inner.kind, FileKind::RegularFile);
    assert_eq!(
        inner.ino,
        fs::metadata(dir.path().join("sub").join("inner")).unwrap().ino()
    );
}

#[test]
fn traversal_outside_mirror_is_rejected() {
    let outer = tempdir().unwrap();
    fs::create_dir(outer.path().join("mirror")).unwrap();
    fs::write(outer.path().join("outside.txt"), b"nope").unwrap();

    let ctx = MountContext::new(b"pw", &outer.path().join("mirror"), &test_config()).unwrap();
    let fs_ = CryptMirror::new(Arc::new(ctx));

    let err = fs_.read(Path::new("/../outside.txt"), 0, 4).unwrap_err();
    assert!(matches!(err, Error::PathEscape(_)));
    assert_eq!(err.to_errno(), libc::EACCES);
    assert!(fs_.readdir(Path::new("/..")).is_err());
}

#[test]
fn getattr_reports_plaintext_size() {
    let (dir, fs_) = mount(b"pw");
    fs_.create(Path::new("/f"), 0o644).unwrap();
    fs_.write(Path::new("/f"), 0, b"0123456789").unwrap();

    let attrs = fs_.getattr(Path::new("/f")).unwrap();
    assert_eq!(attrs.size, 10);
    assert_eq!(attrs.kind, FileKind::RegularFile);
    assert_eq!(
        fs::metadata(dir.path().join("f")).unwrap().len(),
        (10 + OVERHEAD) as u64
    );
}

#[test]
fn truncate_encrypted_file() {
    let (_dir, fs_) = mount(b"pw");
    let p = Path::new("/t");
    fs_.create(p, 0o644).unwrap();
    fs_.write(p, 0, b"abcdefgh").unwrap();

    fs_.truncate(p, 3).unwrap();
    assert_eq!(fs_.read(p, 0, 100).unwrap(), b"abc");
    assert_eq!(fs_.getattr(p).unwrap().size, 3);
}

#[test]
fn open_with_truncate_keeps_file_consistent() {
    let (_dir, fs_) = mount(b"pw");
    let p = Path::new("/o");
    fs_.create(p, 0o644).unwrap();
    fs_.write(p, 0, b"old contents").unwrap();

    fs_.open(p, libc::O_WRONLY | libc::O_TRUNC).unwrap();
    assert!(fs_.read(p, 0, 100).unwrap().is_empty());
    fs_.write(p, 0, b"new").unwrap();
    assert_eq!(fs_.read(p, 0, 100).unwrap(), b"new");
    fs_.release(p).unwrap();
}

#[test]
fn open_missing_file_fails() {
    let (_dir, fs_) = mount(b"pw");
    let err = fs_.open(Path::new("/missing"), libc::O_RDONLY).unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOENT);
}

#[test]
fn structural_operations() {
    let (dir, fs_) = mount(b"pw");

    fs_.mkdir(Path::new("/d"), 0o755).unwrap();
    assert_eq!(fs_.getattr(Path::new("/d")).unwrap().kind, FileKind::Directory);

    fs_.create(Path::new("/d/f"), 0o644).unwrap();
    fs_.write(Path::new("/d/f"), 0, b"data").unwrap();

    fs_.rename(Path::new("/d/f"), Path::new("/d/g")).unwrap();
    assert_eq!(fs_.read(Path::new("/d/g"), 0, 4).unwrap(), b"data");
    assert!(marker::is_encrypted(&mirror_path(&dir, "/d/g")));

    fs_.link(Path::new("/d/g"), Path::new("/h")).unwrap();
    assert_eq!(fs_.read(Path::new("/h"), 0, 4).unwrap(), b"data");
    assert_eq!(fs_.getattr(Path::new("/h")).unwrap().nlink, 2);

    fs_.symlink(Path::new("d/g"), Path::new("/s")).unwrap();
    assert_eq!(fs_.readlink(Path::new("/s")).unwrap(), Path::new("d/g"));
    assert_eq!(fs_.getattr(Path::new("/s")).unwrap().kind, FileKind::Symlink);

    let err = fs_.rmdir(Path::new("/d")).unwrap_err();
    assert_eq!(err.to_errno(), libc::ENOTEMPTY);

    fs_.unlink(Path::new("/d/g")).unwrap();
    fs_.rmdir(Path::new("/d")).unwrap();
    assert_eq!(
        fs_.getattr(Path::new("/d")).unwrap_err().to_errno(),
        libc::ENOENT
    );
}

#[test]
fn mknod_variants() {
    let (dir, fs_) = mount(b"pw");

    fs_.mknod(Path::new("/reg"), libc::S_IFREG | 0o640, 0).unwrap();
    assert!(marker::is_encrypted(&mirror_path(&dir, "/reg")));
    assert!(fs_.read(Path::new("/reg"), 0, 10).unwrap().is_empty());

    let err = fs_.mknod(Path::new("/reg"), libc::S_IFREG | 0o640, 0).unwrap_err();
    assert_eq!(err.to_errno(), libc::EEXIST);

    fs_.mknod(Path::new("/pipe"), libc::S_IFIFO | 0o600, 0).unwrap();
    assert_eq!(fs_.getattr(Path::new("/pipe")).unwrap().kind, FileKind::Fifo);
}

#[test]
fn permission_and_time_changes() {
    let (dir, fs_) = mount(b"pw");
    let p = Path::new("/m");
    fs_.create(p, 0o644).unwrap();

    fs_.chmod(p, 0o600).unwrap();
    assert_eq!(fs_.getattr(p).unwrap().perm, 0o600);

    let uid = fs::metadata(dir.path().join("m")).unwrap().uid();
    fs_.chown(p, Some(uid), None).unwrap();

    let when = UNIX_EPOCH + Duration::from_secs(1_000_000);
    fs_.utimens(p, TimeUpdate::Omit, TimeUpdate::At(when)).unwrap();
    assert_eq!(fs_.getattr(p).unwrap().mtime, when);

    fs_.utimens(p, TimeUpdate::Now, TimeUpdate::Now).unwrap();
    let mtime = fs_.getattr(p).unwrap().mtime;
    assert!(mtime > when);
    assert!(mtime <= SystemTime::now());

    let before_epoch = UNIX_EPOCH - Duration::from_secs(60);
    let err = fs_
        .utimens(p, TimeUpdate::At(before_epoch), TimeUpdate::Omit)
        .unwrap_err();
    assert_eq!(err.to_errno(), libc::EINVAL);
    assert_eq!(fs_.getattr(p).unwrap().mtime, mtime);

    fs_.access(p, libc::R_OK).unwrap();
    fs_.fsync(p, false).unwrap();
    fs_.fsync(p, true).unwrap();
}

#[test]
fn statfs_reports_host_filesystem() {
    let (_dir, fs_) = mount(b"pw");
    let stats = fs_.statfs(Path::new("/")).unwrap();
    assert!(stats.blocks > 0);
    assert!(stats.bsize > 0);
    assert!(stats.namelen > 0);
}

#[test]
fn xattr_operations_hide_marker() {
    let (_dir, fs_) = mount(b"pw");
    let p = Path::new("/x");
    fs_.create(p, 0o644).unwrap();

    fs_.setxattr(p, OsStr::new("user.tag"), b"blue", 0).unwrap();
    assert_eq!(fs_.getxattr(p, OsStr::new("user.tag")).unwrap(), b"blue");

    let names = fs_.listxattr(p).unwrap();
    assert!(names.contains(&OsString::from("user.tag")));
    assert!(!names.contains(&OsString::from(MARKER_NAME)));

    fs_.removexattr(p, OsStr::new("user.tag")).unwrap();
    assert!(fs_.getxattr(p, OsStr::new("user.tag")).is_err());
}

#[test]
fn marker_cannot_be_changed_through_mount() {
    let (dir, fs_) = mount(b"pw");
    let p = Path::new("/locked");
    fs_.create(p, 0o644).unwrap();

    let err = fs_
        .setxattr(p, OsStr::new(MARKER_NAME), b"false", 0)
        .unwrap_err();
    assert_eq!(err.to_errno(), libc::EPERM);

    let err = fs_.removexattr(p, OsStr::new(MARKER_NAME)).unwrap_err();
    assert_eq!(err.to_errno(), libc::EPERM);

    let err = fs_.getxattr(p, OsStr::new(MARKER_NAME)).unwrap_err();
    assert_eq!(err.to_errno(), libc::ENODATA);

    assert!(marker::is_encrypted(&mirror_path(&dir, "/locked")));
}

#[test]
fn concurrent_writers_to_distinct_ranges() {
    let (_dir, fs_) = mount(b"pw");
    let fs_ = Arc::new(fs_);
    let p = Path::new("/shared");
    fs_.create(p, 0o644).unwrap();

    let workers: Vec<_> = (0..4u8)
        .map(|i| {
            let fs_ = fs_.clone();
            std::thread::spawn(move || {
                let chunk = vec![b'a' + i; 8];
                fs_.write(Path::new("/shared"), i as u64 * 8, &chunk).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let data = fs_.read(p, 0, 64).unwrap();
    assert_eq!(data.len(), 32);
    for i in 0..4u8 {
        let start = i as usize * 8;
        assert_eq!(&data[start..start + 8], &[b'a' + i; 8][..]);
    }
}
