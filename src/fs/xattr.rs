//! Extended attribute primitives on host paths
//!
//! Built on the `xattr` crate, whose calls never follow symlinks. A missing
//! attribute is reported as `ENODATA` (`ENOATTR` on macOS) so it reaches the
//! kernel as the usual errno.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::Path;

/// Error for an attribute that is not set
pub fn no_attribute() -> io::Error {
    #[cfg(target_os = "macos")]
    let code = libc::ENOATTR;
    #[cfg(not(target_os = "macos"))]
    let code = libc::ENODATA;
    io::Error::from_raw_os_error(code)
}

/// Read the value of attribute `name`
pub fn get(path: &Path, name: &OsStr) -> io::Result<Vec<u8>> {
    xattr::get(path, name)?.ok_or_else(no_attribute)
}

/// Set attribute `name`.
///
/// `XATTR_CREATE` and `XATTR_REPLACE` in `flags` are checked against the
/// current attribute before it is written.
pub fn set(path: &Path, name: &OsStr, value: &[u8], flags: i32) -> io::Result<()> {
    if flags & (libc::XATTR_CREATE | libc::XATTR_REPLACE) != 0 {
        let exists = xattr::get(path, name)?.is_some();
        if flags & libc::XATTR_CREATE != 0 && exists {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }
        if flags & libc::XATTR_REPLACE != 0 && !exists {
            return Err(no_attribute());
        }
    }
    xattr::set(path, name, value)
}

/// Remove attribute `name`
pub fn remove(path: &Path, name: &OsStr) -> io::Result<()> {
    xattr::remove(path, name)
}

/// Attribute names set on `path`
pub fn list(path: &Path) -> io::Result<Vec<OsString>> {
    Ok(xattr::list(path)?.collect())
}
