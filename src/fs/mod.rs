//! FUSE filesystem implementation
//!
//! Exposes the mirror directory through FUSE, transcoding file contents
//! between caller plaintext and the ciphertext stored on the mirror.

mod filesystem;
mod inode;
mod locks;
pub mod marker;
mod mirror;
mod pipeline;
mod resolver;
mod xattr;

pub use filesystem::{mount_options, CryptMirrorFs};
pub use inode::{InodeTable, ROOT_INO};
pub use locks::PathLocks;
pub use mirror::{CryptMirror, DirEntry, FileAttributes, FileKind, FsStats, TimeUpdate};
pub use pipeline::TranscodingPipeline;
pub use resolver::{child_path, MirrorPath, MirrorResolver};
