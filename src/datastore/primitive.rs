//! Leaf typed views: opaque bytes, big-endian integers, NUL-terminated
//! strings, booleans, and enumerations.
//!
//! Leaves read through their parent region; the only behavior of their
//! own is the self-described extent (`CString`) and the human-oriented
//! description.

use std::sync::Arc;

use crate::error::Result;
use crate::range::{ByteRange, End};
use crate::schema::{bytes_to_uint_be, EnumValue, Shape};

use super::{DataStore, TypedState};

/// Scan chunk size for NUL searches and description probes.
const SCAN_CHUNK: u64 = 256;

/// Extent of a NUL-terminated string: one past the first zero byte, open
/// when no terminator is readable.
pub(super) fn cstring_end(ds: &Arc<DataStore>) -> Result<End> {
    let mut offset: u64 = 0;
    loop {
        let chunk = ds.read_all(ByteRange::to(offset, offset + SCAN_CHUNK))?;
        if chunk.is_empty() {
            return Ok(End::Open);
        }
        if let Some(pos) = chunk.iter().position(|&b| b == 0) {
            return Ok(End::At(offset + pos as u64 + 1));
        }
        offset += chunk.len() as u64;
    }
}

/// Printable rendering of raw bytes: ASCII as-is, the rest escaped.
pub(crate) fn display_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..=0x7e).contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{b:02x}"));
        }
    }
    out
}

fn enum_lookup(values: &[EnumValue], bytes: &[u8]) -> String {
    for value in values {
        if value.value == bytes {
            return value.name.to_string();
        }
    }
    format!("unknown (0x{})", hex(bytes))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// One-line description of a typed view.
pub(super) fn describe(ds: &Arc<DataStore>, state: &TypedState) -> String {
    if let Some((probe, render)) = state.def.describe {
        if let Ok(prefix) = ds.read_all(ByteRange::to(0, probe)) {
            if let Some(text) = render(&prefix) {
                return text;
            }
        }
    }

    match &state.def.shape {
        Shape::Bytes => match ds.get_size() {
            Ok(size) => format!("{size} bytes"),
            Err(_) => "bytes".into(),
        },
        Shape::UIntBE => match ds.read_all(ByteRange::to(0, 8)) {
            Ok(bytes) if !bytes.is_empty() => bytes_to_uint_be(&bytes).to_string(),
            _ => "empty integer".into(),
        },
        Shape::CString => match cstring_end(ds) {
            Ok(End::At(end)) => match ds.read_all(ByteRange::to(0, end.saturating_sub(1))) {
                Ok(bytes) => format!("\"{}\"", display_bytes(&bytes)),
                Err(_) => "unreadable string".into(),
            },
            _ => "unterminated string".into(),
        },
        Shape::Boolean => match ds.read_all(ByteRange::to(0, 1)) {
            Ok(bytes) if bytes.first().copied().unwrap_or(0) != 0 => "true".into(),
            Ok(_) => "false".into(),
            Err(_) => "unreadable boolean".into(),
        },
        Shape::Enum(values) => {
            let width = values.iter().map(|v| v.value.len()).max().unwrap_or(1) as u64;
            match ds.read_all(ByteRange::to(0, width)) {
                Ok(bytes) => enum_lookup(values, &bytes),
                Err(_) => "unreadable enumeration".into(),
            }
        }
        Shape::Structure(schema) => format!("structure ({} fields)", schema.fields.len()),
        Shape::Array(def) => format!("array of {}", def.item.name),
        Shape::ChunkStream(_) => format!("{} stream", state.def.name),
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_bytes_escapes_unprintables() {
        assert_eq!(display_bytes(b"IHDR"), "IHDR");
        assert_eq!(display_bytes(b"\x89PNG"), "\\x89PNG");
    }

    #[test]
    fn test_enum_lookup() {
        static VALUES: &[EnumValue] = &[
            EnumValue {
                name: "Grayscale",
                value: &[0],
            },
            EnumValue {
                name: "RGB",
                value: &[2],
            },
        ];
        assert_eq!(enum_lookup(VALUES, &[2]), "RGB");
        assert_eq!(enum_lookup(VALUES, &[9]), "unknown (0x09)");
    }
}
