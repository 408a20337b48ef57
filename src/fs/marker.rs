//! Per-file encryption marker
//!
//! Whether a mirror file holds ciphertext is recorded in an extended
//! attribute rather than guessed from its content. The marker is written
//! once, when the file is created through the filesystem, and never
//! changed afterwards.

use super::resolver::MirrorPath;
use super::xattr;
use crate::error::Result;
use std::ffi::OsStr;

/// Attribute holding the marker
pub const MARKER_NAME: &str = "user.cryptmirror.encrypted";

/// Marker token, NUL padded
pub const MARKER_VALUE: &[u8] = b"true\0";

const MARKER_TOKEN: &[u8] = b"true";

/// True iff the marker exists and starts with the `true` token.
///
/// A missing or unreadable attribute means the file is plaintext.
pub fn is_encrypted(path: &MirrorPath) -> bool {
    match xattr::get(path.as_path(), OsStr::new(MARKER_NAME)) {
        Ok(value) => value.starts_with(MARKER_TOKEN),
        Err(_) => false,
    }
}

/// Mark a mirror file as holding ciphertext
pub fn mark_encrypted(path: &MirrorPath) -> Result<()> {
    xattr::set(path.as_path(), OsStr::new(MARKER_NAME), MARKER_VALUE, 0)?;
    Ok(())
}

/// Whether `name` is the reserved marker attribute
pub fn is_marker_name(name: &OsStr) -> bool {
    name == MARKER_NAME
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use crate::fs::resolver::MirrorResolver;
    use std::path::Path;
    use tempfile::tempdir;

    #[test]
    fn test_unmarked_is_plaintext() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("plain"), b"x").unwrap();
        let resolver = MirrorResolver::new(dir.path().to_path_buf());

        let path = resolver.resolve(Path::new("/plain")).unwrap();
        assert!(!is_encrypted(&path));

        let missing = resolver.resolve(Path::new("/missing")).unwrap();
        assert!(!is_encrypted(&missing));
    }

    #[test]
    fn test_mark_then_query() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"").unwrap();
        let path = MirrorResolver::new(dir.path().to_path_buf())
            .resolve(Path::new("/f"))
            .unwrap();

        mark_encrypted(&path).unwrap();
        assert!(is_encrypted(&path));
        assert_eq!(
            xattr::get(path.as_path(), OsStr::new(MARKER_NAME)).unwrap(),
            MARKER_VALUE
        );
    }

    #[test]
    fn test_other_values_are_plaintext() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f"), b"").unwrap();
        let path = MirrorResolver::new(dir.path().to_path_buf())
            .resolve(Path::new("/f"))
            .unwrap();

        xattr::set(path.as_path(), OsStr::new(MARKER_NAME), b"false", 0).unwrap();
        assert!(!is_encrypted(&path));

        // Only the prefix matters
        xattr::set(path.as_path(), OsStr::new(MARKER_NAME), b"true-ish", 0).unwrap();
        assert!(is_encrypted(&path));
    }

    #[test]
    fn test_marker_name() {
        assert!(is_marker_name(OsStr::new(MARKER_NAME)));
        assert!(!is_marker_name(OsStr::new("user.other")));
    }
}
