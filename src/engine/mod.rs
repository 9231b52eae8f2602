//! The native engine contract.
//!
//! Everything that touches hive storage goes through [`Engine`]. The core
//! never persists or parses hives itself; it drives an engine through the
//! calls below and interprets their status codes.
//!
//! ## Variable-length output
//!
//! Calls that produce names, class strings or value data take an [`OutBuf`]:
//! an optional caller slice plus an in/out length.
//!
//! ```text
//! buf = None             -> Ok(()), len = required size
//! buf = Some(too small)  -> Err(Status::MORE_DATA), len = required size
//! buf = Some(enough)     -> Ok(()), len = size written
//! ```
//!
//! Names are measured in UTF-16 code units without the terminator; value
//! data in bytes. A name buffer must hold the terminator as well, so it
//! needs at least `len + 1` units.

pub mod memory;

#[cfg(all(windows, feature = "offreg"))]
pub mod offreg;

use crate::types::{Disposition, FileTime, KeyOptions};
use std::fmt;
use std::path::Path;

pub use memory::{EngineLimits, MemoryEngine};

#[cfg(all(windows, feature = "offreg"))]
pub use self::offreg::OffregEngine;

/// Result of a raw engine call.
pub type EngineResult<T> = std::result::Result<T, Status>;

/// OS error code returned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u32);

impl Status {
    /// The call succeeded.
    pub const SUCCESS: Status = Status(0);
    /// The named key, value or file does not exist.
    pub const FILE_NOT_FOUND: Status = Status(2);
    /// A path segment does not exist.
    pub const PATH_NOT_FOUND: Status = Status(3);
    /// The operation is not permitted on this object.
    pub const ACCESS_DENIED: Status = Status(5);
    /// The handle is unknown or already closed.
    pub const INVALID_HANDLE: Status = Status(6);
    /// Target file already exists.
    pub const FILE_EXISTS: Status = Status(80);
    /// A parameter is out of range (name too long, path too deep, ...).
    pub const INVALID_PARAMETER: Status = Status(87);
    /// Object already exists.
    pub const ALREADY_EXISTS: Status = Status(183);
    /// Output buffer too small; the in/out length holds the requirement.
    pub const MORE_DATA: Status = Status(234);
    /// Enumeration index past the end.
    pub const NO_MORE_ITEMS: Status = Status(259);
    /// Hive storage is corrupt or unreadable.
    pub const BADDB: Status = Status(1009);
    /// Hive storage could not be written.
    pub const CANTWRITE: Status = Status(1013);
    /// The key behind this handle has been deleted.
    pub const KEY_DELETED: Status = Status(1018);
    /// Delete refused because the key has subkeys.
    pub const KEY_HAS_CHILDREN: Status = Status(1020);

    /// Wraps a raw code.
    pub const fn new(code: u32) -> Self {
        Self(code)
    }

    /// Returns the raw code.
    pub const fn code(self) -> u32 {
        self.0
    }

    /// Converts a raw code to a call result.
    pub fn into_result(self) -> EngineResult<()> {
        if self == Self::SUCCESS {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#x})", self.0, self.0)
    }
}

/// Opaque engine handle for a hive or key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle(pub u64);

/// Caller-supplied output buffer with an in/out length.
#[derive(Debug)]
pub struct OutBuf<'b, T> {
    /// Destination slice, or `None` to only ask for the size.
    pub buf: Option<&'b mut [T]>,
    /// On input: capacity of `buf`. On output: required or written size.
    pub len: u32,
}

impl<'b, T> OutBuf<'b, T> {
    /// A size-only request.
    pub fn probe() -> Self {
        Self { buf: None, len: 0 }
    }

    /// A request that fills `buf`.
    pub fn new(buf: &'b mut [T]) -> Self {
        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        Self {
            buf: Some(buf),
            len,
        }
    }

    /// Capacity of the attached slice, zero for probes.
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.len())
    }
}

/// Counts and maximum sizes reported by [`Engine::query_info_key`].
///
/// Name lengths are in characters without a terminator, data length in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyInfo {
    /// Number of direct subkeys.
    pub sub_key_count: u32,
    /// Longest subkey name.
    pub max_sub_key_len: u32,
    /// Longest subkey class name.
    pub max_class_len: u32,
    /// Number of values.
    pub value_count: u32,
    /// Longest value name.
    pub max_value_name_len: u32,
    /// Largest value data, in bytes.
    pub max_value_len: u32,
    /// Size of the key's security descriptor, in bytes.
    pub security_descriptor_len: u32,
    /// Last modification of the key.
    pub last_write_time: FileTime,
}

/// Native offline-registry engine.
///
/// Implementations are single-threaded; every call blocks until the engine
/// has finished. All name arguments may be `\`-separated paths where the
/// engine resolves them.
pub trait Engine {
    /// Creates a new, empty hive and returns its root handle.
    fn create_hive(&self) -> EngineResult<RawHandle>;

    /// Loads a hive from `path` and returns its root handle.
    fn open_hive(&self, path: &Path) -> EngineResult<RawHandle>;

    /// Releases a hive and every key handle still open inside it.
    fn close_hive(&self, hive: RawHandle) -> EngineResult<()>;

    /// Writes the hive to a new file for the given OS compatibility version.
    fn save_hive(&self, hive: RawHandle, path: &Path, major: u32, minor: u32) -> EngineResult<()>;

    /// Opens an existing subkey.
    fn open_key(&self, parent: RawHandle, sub_key: &str) -> EngineResult<RawHandle>;

    /// Creates a subkey, or opens it if it already exists.
    fn create_key(
        &self,
        parent: RawHandle,
        sub_key: &str,
        class: Option<&str>,
        options: KeyOptions,
    ) -> EngineResult<(RawHandle, Disposition)>;

    /// Deletes `sub_key`, or the key itself when `sub_key` is `None`.
    fn delete_key(&self, key: RawHandle, sub_key: Option<&str>) -> EngineResult<()>;

    /// Releases a key handle.
    fn close_key(&self, key: RawHandle) -> EngineResult<()>;

    /// Reports counts and maximum sizes; the class name goes through `class`.
    ///
    /// `info` is filled even when the class buffer is too small.
    fn query_info_key(
        &self,
        key: RawHandle,
        class: &mut OutBuf<'_, u16>,
        info: &mut KeyInfo,
    ) -> EngineResult<()>;

    /// Reads the subkey at `index`.
    fn enum_key(
        &self,
        key: RawHandle,
        index: u32,
        name: &mut OutBuf<'_, u16>,
        class: Option<&mut OutBuf<'_, u16>>,
        last_write_time: Option<&mut FileTime>,
    ) -> EngineResult<()>;

    /// Reads the value at `index`.
    fn enum_value(
        &self,
        key: RawHandle,
        index: u32,
        name: &mut OutBuf<'_, u16>,
        value_type: Option<&mut u32>,
        data: Option<&mut OutBuf<'_, u8>>,
    ) -> EngineResult<()>;

    /// Reads a value by name, optionally below `sub_key`.
    fn get_value(
        &self,
        key: RawHandle,
        sub_key: Option<&str>,
        value: &str,
        value_type: Option<&mut u32>,
        data: &mut OutBuf<'_, u8>,
    ) -> EngineResult<()>;

    /// Writes a value, replacing any existing value of the same name.
    fn set_value(&self, key: RawHandle, value: &str, value_type: u32, data: &[u8]) -> EngineResult<()>;

    /// Deletes a value.
    fn delete_value(&self, key: RawHandle, value: &str) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_into_result() {
        assert!(Status::SUCCESS.into_result().is_ok());
        assert_eq!(Status::new(234).into_result(), Err(Status::MORE_DATA));
    }

    #[test]
    fn test_out_buf_capacity() {
        let mut scratch = [0u16; 8];
        let out = OutBuf::new(&mut scratch);
        assert_eq!(out.len, 8);
        assert_eq!(out.capacity(), 8);
        assert_eq!(OutBuf::<u8>::probe().capacity(), 0);
    }
}
