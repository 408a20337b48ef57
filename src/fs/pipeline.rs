//! Transcoding I/O pipeline
//!
//! Callers see byte-range reads and writes, but the cipher works on whole
//! files. Every call therefore decodes the complete mirror file into a
//! private scratch copy, works on the plaintext there and, for writes,
//! encodes the whole scratch copy back onto the mirror file.
//!
//! Scratch copies are unnamed temporary files owned by a single call. They
//! and the mirror handle are dropped on every return path.

use super::locks::PathLocks;
use super::marker;
use super::resolver::MirrorPath;
use crate::crypto::{transcode, TranscodeMode};
use crate::error::Result;
use crate::mount::MountContext;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::sync::Arc;
use tracing::trace;

/// Moves file contents between mirror encoding and caller plaintext
pub struct TranscodingPipeline {
    ctx: Arc<MountContext>,
    /// Serializes reads and read-modify-write cycles per mirror path
    writers: PathLocks,
}

impl TranscodingPipeline {
    pub fn new(ctx: Arc<MountContext>) -> Self {
        Self {
            ctx,
            writers: PathLocks::new(),
        }
    }

    fn scratch(&self) -> Result<File> {
        let file = match self.ctx.scratch_dir() {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        Ok(file)
    }

    /// Decode the mirror file into `scratch`.
    ///
    /// An empty mirror file is empty plaintext whatever its marker says.
    fn load_plaintext(&self, mirror: &mut File, scratch: &mut File, encrypted: bool) -> Result<()> {
        if mirror.metadata()?.len() == 0 {
            return Ok(());
        }
        mirror.seek(SeekFrom::Start(0))?;
        transcode(
            mirror,
            scratch,
            TranscodeMode::for_reading(encrypted),
            self.ctx.key(),
        )?;
        Ok(())
    }

    /// Encode all of `scratch` over the mirror file from offset 0
    fn store(&self, scratch: &mut File, mirror: &mut File, encrypted: bool) -> Result<()> {
        scratch.seek(SeekFrom::Start(0))?;
        mirror.seek(SeekFrom::Start(0))?;
        transcode(
            scratch,
            mirror,
            TranscodeMode::for_writing(encrypted),
            self.ctx.key(),
        )?;
        let end = mirror.stream_position()?;
        mirror.set_len(end)?;
        Ok(())
    }

    /// Read up to `size` plaintext bytes at `offset`.
    ///
    /// Holds the path lock so a concurrent write is seen whole or not at all.
    pub fn read(&self, path: &MirrorPath, offset: u64, size: u32) -> Result<Vec<u8>> {
        self.writers.with_lock(path.as_path(), || {
            let encrypted = marker::is_encrypted(path);
            let mut mirror = File::open(path)?;
            let mut scratch = self.scratch()?;

            self.load_plaintext(&mut mirror, &mut scratch, encrypted)?;

            scratch.seek(SeekFrom::Start(offset))?;
            let mut data = Vec::with_capacity(size as usize);
            (&mut scratch).take(size as u64).read_to_end(&mut data)?;

            trace!(
                "pipeline read {:?} offset={} got={} encrypted={}",
                path,
                offset,
                data.len(),
                encrypted
            );
            Ok(data)
        })
    }

    /// Write `data` at `offset`, re-encoding the whole file
    pub fn write(&self, path: &MirrorPath, offset: u64, data: &[u8]) -> Result<usize> {
        self.writers.with_lock(path.as_path(), || {
            let encrypted = marker::is_encrypted(path);
            let mut mirror = OpenOptions::new().read(true).write(true).open(path)?;
            let mut scratch = self.scratch()?;

            self.load_plaintext(&mut mirror, &mut scratch, encrypted)?;
            scratch.write_all_at(data, offset)?;
            self.store(&mut scratch, &mut mirror, encrypted)?;

            trace!(
                "pipeline write {:?} offset={} len={} encrypted={}",
                path,
                offset,
                data.len(),
                encrypted
            );
            Ok(data.len())
        })
    }

    /// Create (or truncate) a file and make it an encrypted empty file.
    ///
    /// The marker is set before the baseline ciphertext is written, so an
    /// interruption in between leaves an empty marked file, which reads as
    /// empty plaintext.
    pub fn create(&self, path: &MirrorPath, mode: u32) -> Result<()> {
        self.writers.with_lock(path.as_path(), || {
            let mut mirror = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode)
                .open(path)?;

            marker::mark_encrypted(path)?;

            let mut scratch = self.scratch()?;
            self.load_plaintext(&mut mirror, &mut scratch, true)?;
            self.store(&mut scratch, &mut mirror, true)?;
            Ok(())
        })
    }

    /// Change the plaintext length of a file to `size`
    pub fn truncate(&self, path: &MirrorPath, size: u64) -> Result<()> {
        self.writers.with_lock(path.as_path(), || {
            let encrypted = marker::is_encrypted(path);
            if !encrypted {
                OpenOptions::new().write(true).open(path)?.set_len(size)?;
                return Ok(());
            }

            let mut mirror = OpenOptions::new().read(true).write(true).open(path)?;
            let mut scratch = self.scratch()?;
            if size > 0 {
                self.load_plaintext(&mut mirror, &mut scratch, encrypted)?;
            }
            scratch.set_len(size)?;
            self.store(&mut scratch, &mut mirror, encrypted)?;
            Ok(())
        })
    }
}
