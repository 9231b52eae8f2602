//! Cached structural metadata of a key.
//!
//! Enumeration sizes its buffers from these numbers instead of probing the
//! engine for every entry. The cache is refreshed by the key itself after
//! each mutation it performs; changes made through another handle on the
//! same node are not observed until the next refresh.

use crate::buffer::{fetch, SizeUnit};
use crate::engine::{Engine, KeyInfo, RawHandle};
use crate::error::{RegistryError, Result};
use crate::types::FileTime;
use crate::utils::{name_capacity, units_to_string};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Snapshot of a key's counts and buffer sizes.
///
/// Name fields are buffer capacities in UTF-16 units (already widened with
/// [`name_capacity`]); `max_value_len` is an exact byte count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMetadata {
    /// Number of subkeys.
    pub sub_key_count: u32,

    /// Buffer capacity for the longest subkey name.
    pub max_sub_key_len: u32,

    /// Buffer capacity for the longest subkey class name.
    pub max_class_len: u32,

    /// Number of values.
    pub value_count: u32,

    /// Buffer capacity for the longest value name.
    pub max_value_name_len: u32,

    /// Size of the largest value data, in bytes.
    pub max_value_len: u32,

    /// Size of the security descriptor, in bytes.
    pub security_descriptor_len: u32,

    /// Last modification of the key.
    pub last_write_time: FileTime,

    /// Class name of the key.
    pub class_name: String,
}

impl KeyMetadata {
    /// Queries the engine for a fresh snapshot.
    ///
    /// The class name follows the size query protocol; counts and lengths
    /// come back from every call.
    ///
    /// # Errors
    ///
    /// Any engine failure is returned; there is no stale fallback.
    pub fn query(engine: &dyn Engine, handle: RawHandle, name: &str) -> Result<Self> {
        let mut info = KeyInfo::default();
        let class = fetch(SizeUnit::Chars, None, |out| {
            engine.query_info_key(handle, out, &mut info)
        })
        .map_err(|status| RegistryError::from_status(status, "query key info", name))?;

        let metadata = Self::from_info(&info, units_to_string(&class));
        debug!(
            key = name,
            sub_keys = metadata.sub_key_count,
            values = metadata.value_count,
            "Refreshed key metadata"
        );
        Ok(metadata)
    }

    /// Converts raw engine lengths into buffer capacities.
    fn from_info(info: &KeyInfo, class_name: String) -> Self {
        Self {
            sub_key_count: info.sub_key_count,
            max_sub_key_len: name_capacity(info.max_sub_key_len),
            max_class_len: name_capacity(info.max_class_len),
            value_count: info.value_count,
            max_value_name_len: name_capacity(info.max_value_name_len),
            max_value_len: info.max_value_len,
            security_descriptor_len: info.security_descriptor_len,
            last_write_time: info.last_write_time,
            class_name,
        }
    }

    /// Returns true if the key has subkeys.
    pub fn has_sub_keys(&self) -> bool {
        self.sub_key_count > 0
    }

    /// Returns true if the key has values.
    pub fn has_values(&self) -> bool {
        self.value_count > 0
    }

    /// Last modification as a UTC date-time.
    pub fn last_write_datetime(&self) -> Option<DateTime<Utc>> {
        self.last_write_time.to_datetime()
    }
}
