//! Utility functions for UTF-16 conversion and key paths.

use byteorder::{LittleEndian, WriteBytesExt};
use encoding_rs::UTF_16LE;

/// Separator between segments of a key path.
pub const PATH_SEPARATOR: char = '\\';

/// Decodes UTF-16LE bytes to a string.
///
/// The caller guarantees an even length. A leading byte-order mark is kept
/// as data, and unpaired surrogates decode to U+FFFD.
pub fn decode_utf16le(data: &[u8]) -> String {
    let (decoded, _had_errors) = UTF_16LE.decode_without_bom_handling(data);
    decoded.into_owned()
}

/// Appends the UTF-16LE encoding of `text` to `out`, without a terminator.
pub fn encode_utf16le_into(text: &str, out: &mut Vec<u8>) {
    out.reserve(text.len() * 2);
    for unit in text.encode_utf16() {
        // Writing into a Vec cannot fail.
        let _ = out.write_u16::<LittleEndian>(unit);
    }
}

/// Converts engine name units (UTF-16, no terminator) to a string.
pub fn units_to_string(units: &[u16]) -> String {
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    String::from_utf16_lossy(&units[..end])
}

/// Number of UTF-16 code units in `text`.
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Converts a length reported in characters to a safe name-buffer capacity.
///
/// Doubles the count and adds one unit of slack so a terminator always fits
/// regardless of the engine's character width.
#[inline]
pub fn name_capacity(reported_chars: u32) -> u32 {
    reported_chars.saturating_mul(2).saturating_add(1)
}

/// Joins a parent's full path and a child name.
///
/// The root has an empty path, so its children are named without a leading
/// separator.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}{}{}", parent, PATH_SEPARATOR, name)
    }
}

/// Splits a key path into its segments.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split(PATH_SEPARATOR)
}

/// Returns the last segment of a key path.
pub fn leaf_name(path: &str) -> &str {
    path.rsplit(PATH_SEPARATOR).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf16le() {
        assert_eq!(decode_utf16le(&[b'h', 0, b'i', 0]), "hi");
        assert_eq!(decode_utf16le(&[]), "");
    }

    #[test]
    fn test_decode_keeps_bom_and_nulls() {
        assert_eq!(decode_utf16le(&[0xFF, 0xFE, b'a', 0]), "\u{FEFF}a");
        assert_eq!(decode_utf16le(&[b'a', 0, 0, 0]), "a\0");
    }

    #[test]
    fn test_encode_utf16le() {
        let mut out = Vec::new();
        encode_utf16le_into("hé", &mut out);
        assert_eq!(out, vec![b'h', 0, 0xE9, 0]);
    }

    #[test]
    fn test_units_to_string_stops_at_terminator() {
        let units: Vec<u16> = "key\0junk".encode_utf16().collect();
        assert_eq!(units_to_string(&units), "key");
    }

    #[test]
    fn test_name_capacity() {
        assert_eq!(name_capacity(0), 1);
        assert_eq!(name_capacity(255), 511);
        assert_eq!(name_capacity(u32::MAX), u32::MAX);
    }

    #[test]
    fn test_paths() {
        assert_eq!(join_path("", "A"), "A");
        assert_eq!(join_path("A", "B"), "A\\B");
        assert_eq!(split_path("A\\B\\C").collect::<Vec<_>>(), vec!["A", "B", "C"]);
        assert_eq!(leaf_name("A\\B\\C"), "C");
        assert_eq!(leaf_name("C"), "C");
    }
}
