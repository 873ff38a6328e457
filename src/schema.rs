//! Declarative type and schema tables.
//!
//! A `TypeDef` names a concrete datastore class and carries its `Shape`:
//! either a primitive byte view (opaque bytes, big-endian integer,
//! NUL-terminated string, boolean, enumeration) or a composite driven by a
//! table (`SchemaDef` for structures, `ArrayDef` for heterogeneous arrays,
//! `ChunkStreamDef` for magic-prefixed chunk streams).
//!
//! Tables are `&'static` data: format modules declare them as statics and
//! register them with the session's type registry at construction. No
//! table here performs I/O; evaluation lives in `datastore/`.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Description hook: `(probe_len, render)` — render a one-line
/// description from the first `probe_len` bytes of the region.
pub type PrefixDescribe = (u64, fn(&[u8]) -> Option<String>);

/// A concrete datastore class: a name plus the shape of its decoding.
#[derive(Debug)]
pub struct TypeDef {
    /// Canonical name, resolved case-insensitively (`?Png`, `?UIntBE`).
    pub name: &'static str,
    pub shape: Shape,
    /// Optional type-specific description override.
    pub describe: Option<PrefixDescribe>,
}

impl TypeDef {
    pub const fn new(name: &'static str, shape: Shape) -> Self {
        TypeDef {
            name,
            shape,
            describe: None,
        }
    }
}

/// How a typed view decodes the bytes of its parent region.
#[derive(Debug)]
pub enum Shape {
    /// Opaque byte run (`Data`).
    Bytes,
    /// Big-endian unsigned integer of the field's width.
    UIntBE,
    /// NUL-terminated string; extent is one past the first NUL.
    CString,
    /// Single byte, zero = false.
    Boolean,
    /// Byte pattern mapped to a symbolic name.
    Enum(&'static [EnumValue]),
    /// Named fields laid out by schema evaluation.
    Structure(&'static SchemaDef),
    /// Repeated typed items, each sized by its own `locate_end`.
    Array(&'static ArrayDef),
    /// Magic-prefixed stream of self-describing chunks, enumerated as
    /// synthetic `ChunkAt<N>` names.
    ChunkStream(&'static ChunkStreamDef),
}

/// One `(name, value)` pair of an enumeration.
#[derive(Debug)]
pub struct EnumValue {
    pub name: &'static str,
    pub value: &'static [u8],
}

/// Ordered field table of a structure.
#[derive(Debug)]
pub struct SchemaDef {
    pub fields: &'static [FieldDef],
}

/// One schema field: name, type, and layout settings.
#[derive(Debug)]
pub struct FieldDef {
    pub name: &'static str,
    pub ty: &'static TypeDef,
    pub settings: &'static [Setting],
}

/// Layout settings recognised by schema evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    /// Field is exactly this many bytes from its start.
    Size(u64),
    /// Field length is the named earlier field's bytes read as a
    /// big-endian unsigned integer.
    SizeIs(&'static str),
    /// Suppress the missing-field warning.
    Optional,
    /// Skip the field unless the named field's bytes equal the value.
    IfEqual(&'static str, &'static [u8]),
    /// Override this field's start to the named field's start.
    StartsWith(&'static str),
    /// Override this field's end to the named field's end.
    EndsWith(&'static str),
    /// Truncate the field one past the first zero byte, if any.
    StopAtNul,
}

impl FieldDef {
    pub fn size(&self) -> Option<u64> {
        self.settings.iter().find_map(|s| match s {
            Setting::Size(n) => Some(*n),
            _ => None,
        })
    }

    pub fn size_is(&self) -> Option<&'static str> {
        self.settings.iter().find_map(|s| match s {
            Setting::SizeIs(f) => Some(*f),
            _ => None,
        })
    }

    pub fn is_optional(&self) -> bool {
        self.settings.contains(&Setting::Optional)
    }

    pub fn ifequal(&self) -> Option<(&'static str, &'static [u8])> {
        self.settings.iter().find_map(|s| match s {
            Setting::IfEqual(f, v) => Some((*f, *v)),
            _ => None,
        })
    }

    pub fn starts_with(&self) -> Option<&'static str> {
        self.settings.iter().find_map(|s| match s {
            Setting::StartsWith(f) => Some(*f),
            _ => None,
        })
    }

    pub fn ends_with(&self) -> Option<&'static str> {
        self.settings.iter().find_map(|s| match s {
            Setting::EndsWith(f) => Some(*f),
            _ => None,
        })
    }

    pub fn stop_at_nul(&self) -> bool {
        self.settings.contains(&Setting::StopAtNul)
    }
}

/// Heterogeneous array: repeated items of one type, walked front to back.
#[derive(Debug)]
pub struct ArrayDef {
    pub item: &'static TypeDef,
    /// Bytes of an item made available to `is_last_item`.
    pub probe_len: u64,
    /// Class-supplied terminator predicate over an item's probe bytes.
    pub is_last_item: Option<fn(&[u8]) -> bool>,
}

/// Parsed chunk header: payload length plus a printable tag for messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    pub payload_len: u64,
    pub tag: String,
}

/// Magic-prefixed chunk stream (the `Png`-like shape): a fixed signature,
/// then back-to-back chunks whose headers self-describe their length.
#[derive(Debug)]
pub struct ChunkStreamDef {
    pub magic: &'static [u8],
    /// Bytes needed to parse one chunk header.
    pub header_len: u64,
    /// Total chunk size is `payload_len + overhead`.
    pub overhead: u64,
    /// Parse a header; `None` means the bytes are not a valid chunk.
    pub parse_header: fn(&[u8]) -> Option<ChunkHeader>,
    /// Type of a single chunk (`ChunkAt<N>` children).
    pub chunk: &'static TypeDef,
    /// Array type covering the whole run of chunks (`Chunks` child).
    pub chunks: &'static TypeDef,
}

/// Comparable, hashable handle to a registered type; identity is the
/// canonical name, so markers survive re-registration across sessions.
#[derive(Debug, Clone, Copy)]
pub struct TypeMarker(pub &'static TypeDef);

impl TypeMarker {
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    pub fn def(&self) -> &'static TypeDef {
        self.0
    }
}

impl PartialEq for TypeMarker {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name
    }
}

impl Eq for TypeMarker {}

impl Hash for TypeMarker {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl fmt::Display for TypeMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0.name)
    }
}

// ── Core primitive types ────────────────────────────────────────────

pub static DATA: TypeDef = TypeDef::new("Data", Shape::Bytes);

pub static UINT_BE: TypeDef = TypeDef::new("UIntBE", Shape::UIntBE);

pub static CSTRING: TypeDef = TypeDef::new("CString", Shape::CString);

pub static BOOLEAN: TypeDef = TypeDef::new("Boolean", Shape::Boolean);

/// Decode bytes as a big-endian unsigned integer of arbitrary width.
/// Widths beyond eight bytes saturate (the editor reports, it never traps).
pub fn bytes_to_uint_be(bytes: &[u8]) -> u64 {
    let mut value: u64 = 0;
    for &b in bytes.iter().take(8) {
        value = (value << 8) | b as u64;
    }
    if bytes.len() > 8 {
        u64::MAX
    } else {
        value
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_uint_be() {
        assert_eq!(bytes_to_uint_be(&[]), 0);
        assert_eq!(bytes_to_uint_be(&[0x0d]), 13);
        assert_eq!(bytes_to_uint_be(&[0x01, 0x00]), 256);
        assert_eq!(bytes_to_uint_be(&[0, 0, 0, 13]), 13);
        assert_eq!(bytes_to_uint_be(&[0xff; 9]), u64::MAX);
    }

    #[test]
    fn test_marker_identity_is_name() {
        static OTHER_DATA: TypeDef = TypeDef::new("Data", Shape::Bytes);
        assert_eq!(TypeMarker(&DATA), TypeMarker(&OTHER_DATA));
        assert_ne!(TypeMarker(&DATA), TypeMarker(&UINT_BE));
    }

    #[test]
    fn test_field_setting_lookups() {
        static F: FieldDef = FieldDef {
            name: "RawData",
            ty: &DATA,
            settings: &[Setting::SizeIs("Length"), Setting::Optional],
        };
        assert_eq!(F.size(), None);
        assert_eq!(F.size_is(), Some("Length"));
        assert!(F.is_optional());
        assert_eq!(F.ifequal(), None);
        assert!(!F.stop_at_nul());
    }
}
