//! Whole-file stream transcoding
//!
//! Encrypted file format:
//!
//! ```text
//! [magic:4 "CMF1"][nonce:12][ciphertext][tag:16]
//! ```
//!
//! The magic doubles as AAD, so a header from another format version
//! fails authentication rather than decrypting to garbage.

use super::{FileKey, NONCE_SIZE, OVERHEAD};
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use std::io::{self, Read, Write};
use thiserror::Error;
use zeroize::Zeroizing;

/// File format magic, version 1
pub const MAGIC: &[u8; 4] = b"CMF1";

/// Errors produced while transcoding a stream
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Reading the source or writing the destination failed
    #[error("stream I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Input is shorter than the fixed header and tag
    #[error("ciphertext truncated: {0} bytes")]
    Truncated(usize),

    /// Input does not start with the expected magic
    #[error("ciphertext has an unknown header")]
    BadMagic,

    /// Wrong key or tampered data
    #[error("ciphertext failed authentication")]
    Authentication,

    /// Passphrase could not be turned into a key
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Direction of a transcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeMode {
    Encrypt,
    Decrypt,
    Passthrough,
}

impl TranscodeMode {
    /// Mode used to turn stored bytes into plaintext
    pub fn for_reading(encrypted: bool) -> Self {
        if encrypted {
            TranscodeMode::Decrypt
        } else {
            TranscodeMode::Passthrough
        }
    }

    /// Mode used to turn plaintext back into stored bytes
    pub fn for_writing(encrypted: bool) -> Self {
        Self::for_reading(encrypted).inverse()
    }

    /// The opposite direction; passthrough is its own inverse
    pub fn inverse(self) -> Self {
        match self {
            TranscodeMode::Encrypt => TranscodeMode::Decrypt,
            TranscodeMode::Decrypt => TranscodeMode::Encrypt,
            TranscodeMode::Passthrough => TranscodeMode::Passthrough,
        }
    }
}

/// Plaintext length of an encrypted file whose stored size is `cipher_len`
pub fn plaintext_len(cipher_len: u64) -> u64 {
    cipher_len.saturating_sub(OVERHEAD as u64)
}

/// Transform everything in `source` into `dest`.
///
/// Both streams are left positioned at the end of the data they saw;
/// callers seek as needed.
pub fn transcode<R, W>(
    source: &mut R,
    dest: &mut W,
    mode: TranscodeMode,
    key: &FileKey,
) -> Result<(), CryptoError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    match mode {
        TranscodeMode::Passthrough => {
            io::copy(source, dest)?;
        }
        TranscodeMode::Encrypt => {
            let mut buffer = Zeroizing::new(Vec::new());
            source.read_to_end(&mut buffer)?;
            let sealed = seal(key, &mut buffer)?;
            dest.write_all(&sealed)?;
        }
        TranscodeMode::Decrypt => {
            let mut buffer = Zeroizing::new(Vec::new());
            source.read_to_end(&mut buffer)?;
            let plaintext = open(key, &mut buffer)?;
            dest.write_all(plaintext)?;
        }
    }
    dest.flush()?;
    Ok(())
}

fn cipher_key(key: &FileKey) -> Result<LessSafeKey, CryptoError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map_err(|_| CryptoError::KeyDerivation("invalid AES-256 key length".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Seal `plaintext` in place and frame it with magic and nonce
fn seal(key: &FileKey, plaintext: &mut Vec<u8>) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_key(key)?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    cipher
        .seal_in_place_append_tag(nonce, Aad::from(MAGIC), plaintext)
        .map_err(|_| CryptoError::Authentication)?;

    let mut framed = Vec::with_capacity(OVERHEAD + plaintext.len());
    framed.extend_from_slice(MAGIC);
    framed.extend_from_slice(&nonce_bytes);
    framed.extend_from_slice(plaintext);
    Ok(framed)
}

/// Validate framing and open in place, returning the plaintext slice
fn open<'a>(key: &FileKey, data: &'a mut [u8]) -> Result<&'a mut [u8], CryptoError> {
    if data.len() < OVERHEAD {
        return Err(CryptoError::Truncated(data.len()));
    }
    if &data[..MAGIC.len()] != MAGIC {
        return Err(CryptoError::BadMagic);
    }

    let (header, body) = data.split_at_mut(MAGIC.len() + NONCE_SIZE);
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&header[MAGIC.len()..]);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    cipher_key(key)?
        .open_in_place(nonce, Aad::from(MAGIC), body)
        .map_err(|_| CryptoError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn key(byte: u8) -> FileKey {
        FileKey::from_bytes([byte; 32])
    }

    fn run(input: &[u8], mode: TranscodeMode, key: &FileKey) -> Result<Vec<u8>, CryptoError> {
        let mut source = Cursor::new(input.to_vec());
        let mut dest = Vec::new();
        transcode(&mut source, &mut dest, mode, key)?;
        Ok(dest)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let k = key(1);
        for input in [&b""[..], &b"hello"[..], &[0u8; 4096][..]] {
            let sealed = run(input, TranscodeMode::Encrypt, &k).unwrap();
            assert_eq!(sealed.len(), input.len() + OVERHEAD);
            assert_eq!(plaintext_len(sealed.len() as u64), input.len() as u64);
            assert_eq!(run(&sealed, TranscodeMode::Decrypt, &k).unwrap(), input);
        }
    }

    #[test]
    fn test_ciphertext_differs_from_plaintext() {
        let sealed = run(b"hello", TranscodeMode::Encrypt, &key(1)).unwrap();
        assert!(!sealed.windows(5).any(|w| w == b"hello"));
        assert_eq!(&sealed[..4], MAGIC);
    }

    #[test]
    fn test_nonce_is_fresh() {
        let k = key(1);
        let a = run(b"same", TranscodeMode::Encrypt, &k).unwrap();
        let b = run(b"same", TranscodeMode::Encrypt, &k).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = run(b"secret", TranscodeMode::Encrypt, &key(1)).unwrap();
        assert!(matches!(
            run(&sealed, TranscodeMode::Decrypt, &key(2)),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn test_malformed_input_does_not_panic() {
        let k = key(1);
        assert!(matches!(
            run(b"", TranscodeMode::Decrypt, &k),
            Err(CryptoError::Truncated(0))
        ));
        assert!(matches!(
            run(b"short", TranscodeMode::Decrypt, &k),
            Err(CryptoError::Truncated(5))
        ));
        assert!(matches!(
            run(&[0u8; 64], TranscodeMode::Decrypt, &k),
            Err(CryptoError::BadMagic)
        ));

        let mut sealed = run(b"tamper me", TranscodeMode::Encrypt, &k).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(
            run(&sealed, TranscodeMode::Decrypt, &k),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn test_passthrough_is_identity() {
        let data = b"plain bytes \x00\x01\x02";
        assert_eq!(run(data, TranscodeMode::Passthrough, &key(1)).unwrap(), data);
    }

    #[test]
    fn test_streams_left_at_end() {
        let k = key(3);
        let mut source = Cursor::new(b"abcdef".to_vec());
        let mut dest = Cursor::new(Vec::new());
        transcode(&mut source, &mut dest, TranscodeMode::Encrypt, &k).unwrap();
        assert_eq!(source.position(), 6);
        assert_eq!(dest.position(), (6 + OVERHEAD) as u64);
    }

    #[test]
    fn test_mode_inverse() {
        assert_eq!(TranscodeMode::for_reading(true), TranscodeMode::Decrypt);
        assert_eq!(TranscodeMode::for_writing(true), TranscodeMode::Encrypt);
        assert_eq!(TranscodeMode::for_writing(false), TranscodeMode::Passthrough);
        assert_eq!(TranscodeMode::Encrypt.inverse().inverse(), TranscodeMode::Encrypt);
    }
}
