//! Conversion between typed registry values and raw data bytes.
//!
//! Decoding never fails on malformed bytes: data that does not fit its
//! declared type comes back as [`Decoded::Unparsed`] so the caller can still
//! use the bytes. Only the reserved resource types are refused outright.

use crate::error::{RegistryError, Result};
use crate::types::ValueType;
use crate::utils::{decode_utf16le, encode_utf16le_into};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::fmt;
use std::io::Cursor;

/// A decoded registry value.
///
/// Variants describe the shape of the data, not its type tag: SZ, EXPAND_SZ
/// and LINK all decode to [`ValueData::String`], and both DWORD forms to
/// [`ValueData::Dword`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ValueData {
    /// Single string.
    String(String),

    /// Ordered list of strings.
    MultiString(Vec<String>),

    /// 32-bit integer.
    Dword(i32),

    /// 64-bit integer.
    Qword(i64),

    /// Raw bytes.
    Binary(Vec<u8>),
}

impl ValueData {
    /// Type tag used when the caller does not choose one.
    pub fn default_type(&self) -> ValueType {
        match self {
            ValueData::String(_) => ValueType::String,
            ValueData::MultiString(_) => ValueType::MultiString,
            ValueData::Dword(_) => ValueType::Dword,
            ValueData::Qword(_) => ValueType::Qword,
            ValueData::Binary(_) => ValueType::Binary,
        }
    }

    /// Returns the string, if this is a single string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ValueData::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the 32-bit integer, if this is one.
    pub fn as_dword(&self) -> Option<i32> {
        match self {
            ValueData::Dword(d) => Some(*d),
            _ => None,
        }
    }

    /// Returns the 64-bit integer, if this is one.
    pub fn as_qword(&self) -> Option<i64> {
        match self {
            ValueData::Qword(q) => Some(*q),
            _ => None,
        }
    }

    /// Returns the strings, if this is a string list.
    pub fn as_multi_string(&self) -> Option<&[String]> {
        match self {
            ValueData::MultiString(list) => Some(list),
            _ => None,
        }
    }

    /// Returns the bytes, if this is raw data.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ValueData::Binary(b) => Some(b),
            _ => None,
        }
    }

    /// Encodes this value for storage under `value_type`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidInput`] if a string list contains an
    /// empty element.
    pub fn encode(&self, value_type: ValueType) -> Result<Vec<u8>> {
        encode(self, value_type)
    }
}

impl fmt::Display for ValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueData::String(s) => f.write_str(s),
            ValueData::MultiString(list) => f.write_str(&list.join(", ")),
            ValueData::Dword(d) => write!(f, "{} (0x{:08X})", d, d),
            ValueData::Qword(q) => write!(f, "{} (0x{:016X})", q, q),
            ValueData::Binary(b) => f.write_str(&hex::encode(b)),
        }
    }
}

impl From<&str> for ValueData {
    fn from(value: &str) -> Self {
        ValueData::String(value.to_string())
    }
}

impl From<String> for ValueData {
    fn from(value: String) -> Self {
        ValueData::String(value)
    }
}

impl From<Vec<String>> for ValueData {
    fn from(value: Vec<String>) -> Self {
        ValueData::MultiString(value)
    }
}

impl From<&[&str]> for ValueData {
    fn from(value: &[&str]) -> Self {
        ValueData::MultiString(value.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ValueData {
    fn from(value: [&str; N]) -> Self {
        ValueData::MultiString(value.iter().map(|s| s.to_string()).collect())
    }
}

impl From<i32> for ValueData {
    fn from(value: i32) -> Self {
        ValueData::Dword(value)
    }
}

impl From<i64> for ValueData {
    fn from(value: i64) -> Self {
        ValueData::Qword(value)
    }
}

impl From<Vec<u8>> for ValueData {
    fn from(value: Vec<u8>) -> Self {
        ValueData::Binary(value)
    }
}

impl From<&[u8]> for ValueData {
    fn from(value: &[u8]) -> Self {
        ValueData::Binary(value.to_vec())
    }
}

/// Outcome of decoding raw value data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The bytes were well-formed for their type.
    Parsed(ValueData),

    /// The bytes could not be interpreted as their type; here they are.
    Unparsed(Vec<u8>),
}

impl Decoded {
    /// Returns the parsed value, or the raw bytes as [`ValueData::Binary`].
    pub fn into_value(self) -> ValueData {
        match self {
            Decoded::Parsed(value) => value,
            Decoded::Unparsed(raw) => ValueData::Binary(raw),
        }
    }

    /// Returns the parsed value, or `None` if decoding failed.
    pub fn parsed(self) -> Option<ValueData> {
        match self {
            Decoded::Parsed(value) => Some(value),
            Decoded::Unparsed(_) => None,
        }
    }

    /// Returns true if decoding succeeded.
    pub fn is_parsed(&self) -> bool {
        matches!(self, Decoded::Parsed(_))
    }
}

/// Decodes raw value data according to its type tag.
///
/// # Arguments
///
/// * `value_type` - Declared type of the value
/// * `data` - Raw value bytes, handed back untouched if they do not decode
///
/// # Errors
///
/// Returns [`RegistryError::Unsupported`] for the resource types. Malformed
/// data is never an error.
pub fn decode(value_type: ValueType, data: Vec<u8>) -> Result<Decoded> {
    let decoded = match value_type {
        ValueType::None => Decoded::Unparsed(data),

        ValueType::String | ValueType::ExpandString | ValueType::Link => {
            if data.len() % 2 != 0 {
                return Ok(Decoded::Unparsed(data));
            }
            let mut text = decode_utf16le(&data);
            if text.ends_with('\0') {
                text.pop();
            }
            Decoded::Parsed(ValueData::String(text))
        }

        ValueType::Binary => Decoded::Parsed(ValueData::Binary(data)),

        ValueType::Dword => {
            let value = read_i32(&data);
            match value {
                Some(value) => Decoded::Parsed(ValueData::Dword(value)),
                None => Decoded::Unparsed(data),
            }
        }

        ValueType::DwordBigEndian => {
            let mut reversed = data.clone();
            reversed.reverse();
            match read_i32(&reversed) {
                Some(value) => Decoded::Parsed(ValueData::Dword(value)),
                None => Decoded::Unparsed(data),
            }
        }

        ValueType::Qword => {
            if data.len() != 8 {
                return Ok(Decoded::Unparsed(data));
            }
            let value = Cursor::new(data.as_slice()).read_i64::<LittleEndian>();
            match value {
                Ok(value) => Decoded::Parsed(ValueData::Qword(value)),
                Err(_) => Decoded::Unparsed(data),
            }
        }

        ValueType::MultiString => match decode_multi_string(&data) {
            Some(list) => Decoded::Parsed(ValueData::MultiString(list)),
            None => Decoded::Unparsed(data),
        },

        ValueType::ResourceList
        | ValueType::FullResourceDescriptor
        | ValueType::ResourceRequirementsList => {
            return Err(RegistryError::Unsupported(value_type));
        }
    };

    Ok(decoded)
}

/// Reads exactly four bytes as a little-endian signed integer.
fn read_i32(data: &[u8]) -> Option<i32> {
    if data.len() != 4 {
        return None;
    }
    Cursor::new(data).read_i32::<LittleEndian>().ok()
}

/// Splits REG_MULTI_SZ data into its strings.
///
/// The list is terminated by an extra NUL, so well-formed data ends in two
/// NUL characters. The lone-NUL buffer is the empty list.
fn decode_multi_string(data: &[u8]) -> Option<Vec<String>> {
    if data.len() % 2 != 0 || data.is_empty() {
        return None;
    }

    if data == [0, 0] {
        return Some(Vec::new());
    }

    if data.len() < 4 || data[data.len() - 4..].iter().any(|&b| b != 0) {
        return None;
    }

    let body = decode_utf16le(&data[..data.len() - 4]);
    Some(body.split('\0').map(str::to_string).collect())
}

/// Encodes a value for storage under `value_type`.
///
/// The bytes follow the value's shape; the type tag only matters for
/// [`ValueType::DwordBigEndian`], which stores a 32-bit integer reversed.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidInput`] if a string list contains an
/// empty element.
pub fn encode(value: &ValueData, value_type: ValueType) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    match value {
        ValueData::String(text) => {
            encode_utf16le_into(text, &mut out);
            out.extend_from_slice(&[0, 0]);
        }

        ValueData::MultiString(list) => {
            if list.iter().any(String::is_empty) {
                return Err(RegistryError::InvalidInput(
                    "string lists cannot contain empty strings".to_string(),
                ));
            }
            for item in list {
                encode_utf16le_into(item, &mut out);
                out.extend_from_slice(&[0, 0]);
            }
            out.extend_from_slice(&[0, 0]);
        }

        ValueData::Dword(number) => {
            // Writing into a Vec cannot fail.
            let _ = out.write_i32::<LittleEndian>(*number);
            if value_type == ValueType::DwordBigEndian {
                out.reverse();
            }
        }

        ValueData::Qword(number) => {
            let _ = out.write_i64::<LittleEndian>(*number);
        }

        ValueData::Binary(bytes) => out.extend_from_slice(bytes),
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(text: &str) -> Vec<u8> {
        let mut out = Vec::new();
        encode_utf16le_into(text, &mut out);
        out
    }

    #[test]
    fn test_string_strips_one_terminator() {
        let mut data = utf16("test");
        data.extend_from_slice(&[0, 0, 0, 0]);
        let decoded = decode(ValueType::String, data).unwrap();
        assert_eq!(decoded, Decoded::Parsed(ValueData::String("test\0".into())));
    }

    #[test]
    fn test_string_without_terminator() {
        let decoded = decode(ValueType::ExpandString, utf16("%PATH%")).unwrap();
        assert_eq!(decoded.parsed(), Some(ValueData::String("%PATH%".into())));
    }

    #[test]
    fn test_odd_length_string_is_unparsed() {
        let decoded = decode(ValueType::Link, vec![b'a', 0, b'b']).unwrap();
        assert_eq!(decoded, Decoded::Unparsed(vec![b'a', 0, b'b']));
    }

    #[test]
    fn test_dword_forms() {
        let decoded = decode(ValueType::Dword, vec![0x2A, 0, 0, 0]).unwrap();
        assert_eq!(decoded.parsed(), Some(ValueData::Dword(42)));

        let decoded = decode(ValueType::DwordBigEndian, vec![0, 0, 0, 0x2A]).unwrap();
        assert_eq!(decoded.parsed(), Some(ValueData::Dword(42)));

        let decoded = decode(ValueType::Dword, vec![0xFF; 4]).unwrap();
        assert_eq!(decoded.parsed(), Some(ValueData::Dword(-1)));
    }

    #[test]
    fn test_dword_wrong_length() {
        assert!(!decode(ValueType::Dword, vec![0; 3]).unwrap().is_parsed());
        assert!(!decode(ValueType::Dword, vec![0; 5]).unwrap().is_parsed());
        assert!(!decode(ValueType::DwordBigEndian, vec![0; 8]).unwrap().is_parsed());
    }

    #[test]
    fn test_qword() {
        let data = (-1337i64).to_le_bytes().to_vec();
        let decoded = decode(ValueType::Qword, data).unwrap();
        assert_eq!(decoded.parsed(), Some(ValueData::Qword(-1337)));
        assert!(!decode(ValueType::Qword, vec![0; 4]).unwrap().is_parsed());
    }

    #[test]
    fn test_none_is_never_parsed() {
        let decoded = decode(ValueType::None, vec![1, 2, 3]).unwrap();
        assert_eq!(decoded.into_value(), ValueData::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn test_resource_types_unsupported() {
        for ty in [
            ValueType::ResourceList,
            ValueType::FullResourceDescriptor,
            ValueType::ResourceRequirementsList,
        ] {
            assert!(matches!(decode(ty, vec![0; 8]), Err(RegistryError::Unsupported(t)) if t == ty));
        }
    }

    #[test]
    fn test_multi_string_edge_cases() {
        assert_eq!(decode_multi_string(&[0, 0]), Some(Vec::new()));
        assert_eq!(decode_multi_string(&[0, 0, 0, 0]), Some(vec![String::new()]));
        assert_eq!(decode_multi_string(&[]), None);
        assert_eq!(decode_multi_string(&[0, 0, 0]), None);
        assert_eq!(decode_multi_string(&[20, 40, 60, 80]), None);
    }

    #[test]
    fn test_multi_string_keeps_inner_empty_elements() {
        let mut data = utf16("a");
        data.extend_from_slice(&[0, 0, 0, 0]);
        data.extend_from_slice(&utf16("b"));
        data.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(
            decode_multi_string(&data),
            Some(vec!["a".to_string(), String::new(), "b".to_string()])
        );
    }

    #[test]
    fn test_encode_string_appends_terminator() {
        let bytes = encode(&"test".into(), ValueType::String).unwrap();
        let mut expected = utf16("test");
        expected.extend_from_slice(&[0, 0]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_encode_multi_string() {
        let bytes = encode(&["Hello", "World"].into(), ValueType::MultiString).unwrap();
        let mut expected = utf16("Hello");
        expected.extend_from_slice(&[0, 0]);
        expected.extend_from_slice(&utf16("World"));
        expected.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(bytes, expected);

        let empty = encode(&ValueData::MultiString(Vec::new()), ValueType::MultiString).unwrap();
        assert_eq!(empty, vec![0, 0]);
    }

    #[test]
    fn test_encode_multi_string_rejects_empty_element() {
        let result = encode(&["a", ""].into(), ValueType::MultiString);
        assert!(matches!(result, Err(RegistryError::InvalidInput(_))));
    }

    #[test]
    fn test_encode_dword_big_endian() {
        assert_eq!(encode(&ValueData::Dword(1), ValueType::Dword).unwrap(), vec![1, 0, 0, 0]);
        assert_eq!(encode(&ValueData::Dword(1), ValueType::DwordBigEndian).unwrap(), vec![0, 0, 0, 1]);
    }

    #[test]
    fn test_encode_raw_under_any_tag() {
        let raw = ValueData::Binary(vec![9, 8, 7]);
        assert_eq!(encode(&raw, ValueType::ResourceList).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_display() {
        assert_eq!(ValueData::Dword(42).to_string(), "42 (0x0000002A)");
        assert_eq!(ValueData::Binary(vec![0xde, 0xad]).to_string(), "dead");
        assert_eq!(ValueData::from(["a", "b"]).to_string(), "a, b");
    }
}
