//! Registry value types, key creation options and timestamps.

use crate::error::{RegistryError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Registry value data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ValueType {
    /// No value type.
    None,

    /// String (null-terminated).
    String,

    /// String with environment variables.
    ExpandString,

    /// Binary data.
    Binary,

    /// 32-bit little-endian integer.
    Dword,

    /// 32-bit big-endian integer.
    DwordBigEndian,

    /// Symbolic link (Unicode).
    Link,

    /// Multiple strings.
    MultiString,

    /// Resource list.
    ResourceList,

    /// Full resource descriptor.
    FullResourceDescriptor,

    /// Resource requirements list.
    ResourceRequirementsList,

    /// 64-bit little-endian integer.
    Qword,
}

impl ValueType {
    /// Parses a value type from its raw engine tag.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidValueType`] for tags outside 0..=11.
    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0 => Ok(ValueType::None),
            1 => Ok(ValueType::String),
            2 => Ok(ValueType::ExpandString),
            3 => Ok(ValueType::Binary),
            4 => Ok(ValueType::Dword),
            5 => Ok(ValueType::DwordBigEndian),
            6 => Ok(ValueType::Link),
            7 => Ok(ValueType::MultiString),
            8 => Ok(ValueType::ResourceList),
            9 => Ok(ValueType::FullResourceDescriptor),
            10 => Ok(ValueType::ResourceRequirementsList),
            11 => Ok(ValueType::Qword),
            _ => Err(RegistryError::InvalidValueType(value)),
        }
    }

    /// Returns the raw engine tag.
    pub fn as_u32(self) -> u32 {
        match self {
            ValueType::None => 0,
            ValueType::String => 1,
            ValueType::ExpandString => 2,
            ValueType::Binary => 3,
            ValueType::Dword => 4,
            ValueType::DwordBigEndian => 5,
            ValueType::Link => 6,
            ValueType::MultiString => 7,
            ValueType::ResourceList => 8,
            ValueType::FullResourceDescriptor => 9,
            ValueType::ResourceRequirementsList => 10,
            ValueType::Qword => 11,
        }
    }

    /// Returns the REG_* name of this value type.
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::None => "REG_NONE",
            ValueType::String => "REG_SZ",
            ValueType::ExpandString => "REG_EXPAND_SZ",
            ValueType::Binary => "REG_BINARY",
            ValueType::Dword => "REG_DWORD",
            ValueType::DwordBigEndian => "REG_DWORD_BIG_ENDIAN",
            ValueType::Link => "REG_LINK",
            ValueType::MultiString => "REG_MULTI_SZ",
            ValueType::ResourceList => "REG_RESOURCE_LIST",
            ValueType::FullResourceDescriptor => "REG_FULL_RESOURCE_DESCRIPTOR",
            ValueType::ResourceRequirementsList => "REG_RESOURCE_REQUIREMENTS_LIST",
            ValueType::Qword => "REG_QWORD",
        }
    }

    /// Returns true for the single-string types (SZ, EXPAND_SZ, LINK).
    pub fn is_text(&self) -> bool {
        matches!(
            self,
            ValueType::String | ValueType::ExpandString | ValueType::Link
        )
    }

    /// Returns true for the reserved resource types.
    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            ValueType::ResourceList
                | ValueType::FullResourceDescriptor
                | ValueType::ResourceRequirementsList
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Options passed when creating a key (REG_OPTION_* bits).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyOptions(pub u32);

impl KeyOptions {
    /// Key is preserved when the hive is saved.
    pub const NON_VOLATILE: u32 = 0x0000_0000;

    /// Key is not preserved when the hive is saved.
    pub const VOLATILE: u32 = 0x0000_0001;

    /// Key is a symbolic link.
    pub const CREATE_LINK: u32 = 0x0000_0002;

    /// Open for backup or restore.
    pub const BACKUP_RESTORE: u32 = 0x0000_0004;

    /// Open the link itself rather than its target.
    pub const OPEN_LINK: u32 = 0x0000_0008;

    /// Creates options from raw bits.
    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns true if the specified option is set.
    pub fn has_option(&self, option: u32) -> bool {
        (self.0 & option) != 0
    }

    /// Returns true if the key should not be persisted.
    pub fn is_volatile(&self) -> bool {
        self.has_option(Self::VOLATILE)
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }
}

/// Outcome of a create-or-open call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The key did not exist and was created.
    CreatedNewKey,

    /// The key already existed and was opened.
    OpenedExistingKey,
}

/// Windows FILETIME: 100-nanosecond intervals since 1601-01-01 UTC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FileTime(pub u64);

impl FileTime {
    /// Seconds between 1601-01-01 and the Unix epoch.
    const UNIX_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

    /// Ticks per second.
    const TICKS_PER_SEC: u64 = 10_000_000;

    /// Converts the timestamp to a UTC date-time.
    ///
    /// Returns `None` if the timestamp is outside chrono's representable range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        let seconds = (self.0 / Self::TICKS_PER_SEC) as i64 - Self::UNIX_EPOCH_OFFSET_SECS;
        let nanos = ((self.0 % Self::TICKS_PER_SEC) * 100) as u32;
        DateTime::from_timestamp(seconds, nanos)
    }

    /// Builds a FILETIME from a UTC date-time. Instants before 1601 clamp to zero.
    pub fn from_datetime(when: DateTime<Utc>) -> Self {
        let seconds = when.timestamp() + Self::UNIX_EPOCH_OFFSET_SECS;
        if seconds < 0 {
            return Self(0);
        }
        let ticks = (seconds as u64)
            .saturating_mul(Self::TICKS_PER_SEC)
            .saturating_add(u64::from(when.timestamp_subsec_nanos()) / 100);
        Self(ticks)
    }

    /// Returns the current time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_tags() {
        for tag in 0..=11 {
            assert_eq!(ValueType::from_u32(tag).unwrap().as_u32(), tag);
        }
        assert!(matches!(
            ValueType::from_u32(12),
            Err(RegistryError::InvalidValueType(12))
        ));
    }

    #[test]
    fn test_value_type_names() {
        assert_eq!(ValueType::String.name(), "REG_SZ");
        assert_eq!(ValueType::DwordBigEndian.to_string(), "REG_DWORD_BIG_ENDIAN");
        assert!(ValueType::Link.is_text());
        assert!(ValueType::FullResourceDescriptor.is_resource());
        assert!(!ValueType::Binary.is_resource());
    }

    #[test]
    fn test_key_options() {
        let options = KeyOptions::new(KeyOptions::VOLATILE | KeyOptions::OPEN_LINK);
        assert!(options.is_volatile());
        assert!(options.has_option(KeyOptions::OPEN_LINK));
        assert!(!KeyOptions::default().is_volatile());
    }

    #[test]
    fn test_filetime_unix_epoch() {
        let epoch = FileTime(116_444_736_000_000_000);
        let dt = epoch.to_datetime().unwrap();
        assert_eq!(dt.timestamp(), 0);
        assert_eq!(FileTime::from_datetime(dt), epoch);
    }

    #[test]
    fn test_filetime_now_is_after_2020() {
        let now = FileTime::now().to_datetime().unwrap();
        assert!(now.timestamp() > 1_577_836_800);
    }
}
