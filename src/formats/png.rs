//! PNG schema tables.
//!
//! One concrete instance of the schema mechanism: the `Png` chunk
//! stream, the `PngChunk` structure with conditional re-interpretation
//! fields anchored to the raw payload, and the chunk sub-structures and
//! enumerations they reference.

use crate::schema::{
    ArrayDef, ChunkHeader, ChunkStreamDef, EnumValue, FieldDef, SchemaDef, Setting, Shape,
    TypeDef, BOOLEAN, CSTRING, DATA, UINT_BE,
};

/// The eight-byte PNG signature.
pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

// ── Enumerations ────────────────────────────────────────────────────

pub static PNG_COLOR_TYPE: TypeDef = TypeDef::new(
    "PngColorType",
    Shape::Enum(&[
        EnumValue { name: "Grayscale", value: b"\x00" },
        EnumValue { name: "RGB", value: b"\x02" },
        EnumValue { name: "Palette", value: b"\x03" },
        EnumValue { name: "Grayscale+Alpha", value: b"\x04" },
        EnumValue { name: "RGBA", value: b"\x06" },
    ]),
);

pub static PNG_COMPRESSION_METHOD: TypeDef = TypeDef::new(
    "PngCompressionMethod",
    Shape::Enum(&[EnumValue { name: "Deflate", value: b"\x00" }]),
);

pub static PNG_FILTER_METHOD: TypeDef = TypeDef::new(
    "PngFilterMethod",
    Shape::Enum(&[EnumValue { name: "Adaptive", value: b"\x00" }]),
);

pub static PNG_INTERLACE_METHOD: TypeDef = TypeDef::new(
    "PngInterlaceMethod",
    Shape::Enum(&[
        EnumValue { name: "None", value: b"\x00" },
        EnumValue { name: "Adam7", value: b"\x01" },
    ]),
);

pub static PNG_PHYS_UNIT: TypeDef = TypeDef::new(
    "PngPhysUnit",
    Shape::Enum(&[
        EnumValue { name: "Unknown", value: b"\x00" },
        EnumValue { name: "Meter", value: b"\x01" },
    ]),
);

pub static PNG_RENDERING_INTENT: TypeDef = TypeDef::new(
    "PngRenderingIntent",
    Shape::Enum(&[
        EnumValue { name: "Perceptual", value: b"\x00" },
        EnumValue { name: "RelativeColorimetric", value: b"\x01" },
        EnumValue { name: "Saturation", value: b"\x02" },
        EnumValue { name: "AbsoluteColorimetric", value: b"\x03" },
    ]),
);

// ── Chunk payload structures ────────────────────────────────────────

pub static PNG_HEADER: TypeDef = TypeDef::new(
    "PngHeader",
    Shape::Structure(&SchemaDef {
        fields: &[
            FieldDef { name: "Width", ty: &UINT_BE, settings: &[Setting::Size(4)] },
            FieldDef { name: "Height", ty: &UINT_BE, settings: &[Setting::Size(4)] },
            FieldDef { name: "BitDepth", ty: &UINT_BE, settings: &[Setting::Size(1)] },
            FieldDef { name: "ColorType", ty: &PNG_COLOR_TYPE, settings: &[Setting::Size(1)] },
            FieldDef {
                name: "CompressionMethod",
                ty: &PNG_COMPRESSION_METHOD,
                settings: &[Setting::Size(1)],
            },
            FieldDef { name: "FilterMethod", ty: &PNG_FILTER_METHOD, settings: &[Setting::Size(1)] },
            FieldDef {
                name: "InterlaceMethod",
                ty: &PNG_INTERLACE_METHOD,
                settings: &[Setting::Size(1)],
            },
        ],
    }),
);

pub static PNG_CHROMATICITIES: TypeDef = TypeDef::new(
    "PngChromaticities",
    Shape::Structure(&SchemaDef {
        fields: &[
            FieldDef { name: "WhitePointX", ty: &UINT_BE, settings: &[Setting::Size(4)] },
            FieldDef { name: "WhitePointY", ty: &UINT_BE, settings: &[Setting::Size(4)] },
            FieldDef { name: "RedX", ty: &UINT_BE, settings: &[Setting::Size(4)] },
            FieldDef { name: "RedY", ty: &UINT_BE, settings: &[Setting::Size(4)] },
            FieldDef { name: "GreenX", ty: &UINT_BE, settings: &[Setting::Size(4)] },
            FieldDef { name: "GreenY", ty: &UINT_BE, settings: &[Setting::Size(4)] },
            FieldDef { name: "BlueX", ty: &UINT_BE, settings: &[Setting::Size(4)] },
            FieldDef { name: "BlueY", ty: &UINT_BE, settings: &[Setting::Size(4)] },
        ],
    }),
);

pub static PNG_TEXT: TypeDef = TypeDef::new(
    "PngText",
    Shape::Structure(&SchemaDef {
        fields: &[
            FieldDef { name: "Keyword", ty: &CSTRING, settings: &[] },
            FieldDef { name: "Text", ty: &DATA, settings: &[] },
        ],
    }),
);

pub static PNG_TEXT_I: TypeDef = TypeDef::new(
    "PngTextI",
    Shape::Structure(&SchemaDef {
        fields: &[
            FieldDef { name: "Keyword", ty: &CSTRING, settings: &[] },
            FieldDef { name: "CompressionFlag", ty: &BOOLEAN, settings: &[Setting::Size(1)] },
            FieldDef {
                name: "CompressionMethod",
                ty: &PNG_COMPRESSION_METHOD,
                settings: &[Setting::Size(1)],
            },
            FieldDef { name: "LanguageTag", ty: &CSTRING, settings: &[] },
            FieldDef { name: "TranslatedKeyword", ty: &CSTRING, settings: &[] },
            FieldDef { name: "RawText", ty: &DATA, settings: &[] },
        ],
    }),
);

pub static PNG_PHYS: TypeDef = TypeDef::new(
    "PngPhys",
    Shape::Structure(&SchemaDef {
        fields: &[
            FieldDef { name: "XPixelsPerUnit", ty: &UINT_BE, settings: &[Setting::Size(4)] },
            FieldDef { name: "YPixelsPerUnit", ty: &UINT_BE, settings: &[Setting::Size(4)] },
            FieldDef { name: "Unit", ty: &PNG_PHYS_UNIT, settings: &[Setting::Size(1)] },
        ],
    }),
);

pub static PNG_TIME: TypeDef = TypeDef::new(
    "PngTime",
    Shape::Structure(&SchemaDef {
        fields: &[
            FieldDef { name: "Year", ty: &UINT_BE, settings: &[Setting::Size(2)] },
            FieldDef { name: "Month", ty: &UINT_BE, settings: &[Setting::Size(1)] },
            FieldDef { name: "Day", ty: &UINT_BE, settings: &[Setting::Size(1)] },
            FieldDef { name: "Hour", ty: &UINT_BE, settings: &[Setting::Size(1)] },
            FieldDef { name: "Minute", ty: &UINT_BE, settings: &[Setting::Size(1)] },
            FieldDef { name: "Second", ty: &UINT_BE, settings: &[Setting::Size(1)] },
        ],
    }),
);

pub static PNG_CHUNK_CRC: TypeDef = TypeDef::new("PngChunkCrc", Shape::UIntBE);

// ── Chunks ──────────────────────────────────────────────────────────

pub static PNG_CHUNK: TypeDef = TypeDef {
    name: "PngChunk",
    shape: Shape::Structure(&SchemaDef {
        fields: &[
            FieldDef { name: "Length", ty: &UINT_BE, settings: &[Setting::Size(4)] },
            FieldDef { name: "Type", ty: &DATA, settings: &[Setting::Size(4)] },
            FieldDef { name: "RawData", ty: &DATA, settings: &[Setting::SizeIs("Length")] },
            FieldDef { name: "CRC", ty: &PNG_CHUNK_CRC, settings: &[Setting::Size(4)] },
            FieldDef {
                name: "Header",
                ty: &PNG_HEADER,
                settings: &[
                    Setting::IfEqual("Type", b"IHDR"),
                    Setting::StartsWith("RawData"),
                    Setting::EndsWith("RawData"),
                ],
            },
            FieldDef {
                name: "Gamma",
                ty: &UINT_BE,
                settings: &[
                    Setting::IfEqual("Type", b"gAMA"),
                    Setting::StartsWith("RawData"),
                    Setting::Size(4),
                ],
            },
            FieldDef {
                name: "Chromaticities",
                ty: &PNG_CHROMATICITIES,
                settings: &[
                    Setting::IfEqual("Type", b"cHRM"),
                    Setting::StartsWith("RawData"),
                    Setting::EndsWith("RawData"),
                ],
            },
            FieldDef {
                name: "Text",
                ty: &PNG_TEXT,
                settings: &[
                    Setting::IfEqual("Type", b"tEXt"),
                    Setting::StartsWith("RawData"),
                    Setting::EndsWith("RawData"),
                ],
            },
            FieldDef {
                name: "TextI",
                ty: &PNG_TEXT_I,
                settings: &[
                    Setting::IfEqual("Type", b"iTXt"),
                    Setting::StartsWith("RawData"),
                    Setting::EndsWith("RawData"),
                ],
            },
            FieldDef {
                name: "PhysicalDimensions",
                ty: &PNG_PHYS,
                settings: &[
                    Setting::IfEqual("Type", b"pHYs"),
                    Setting::StartsWith("RawData"),
                    Setting::EndsWith("RawData"),
                ],
            },
            FieldDef {
                name: "MTime",
                ty: &PNG_TIME,
                settings: &[
                    Setting::IfEqual("Type", b"tIME"),
                    Setting::StartsWith("RawData"),
                    Setting::EndsWith("RawData"),
                ],
            },
        ],
    }),
    describe: Some((8, describe_chunk)),
};

pub static PNG_CHUNKS: TypeDef = TypeDef::new(
    "PngChunks",
    Shape::Array(&ArrayDef {
        item: &PNG_CHUNK,
        probe_len: 8,
        is_last_item: Some(is_iend),
    }),
);

pub static PNG: TypeDef = TypeDef::new(
    "Png",
    Shape::ChunkStream(&ChunkStreamDef {
        magic: PNG_MAGIC,
        header_len: 8,
        overhead: 12,
        parse_header: parse_chunk_header,
        chunk: &PNG_CHUNK,
        chunks: &PNG_CHUNKS,
    }),
);

/// All PNG types, in registration order.
pub(crate) static TYPES: &[&TypeDef] = &[
    &PNG,
    &PNG_CHUNK,
    &PNG_CHUNKS,
    &PNG_CHUNK_CRC,
    &PNG_HEADER,
    &PNG_CHROMATICITIES,
    &PNG_TEXT,
    &PNG_TEXT_I,
    &PNG_PHYS,
    &PNG_TIME,
    &PNG_COLOR_TYPE,
    &PNG_COMPRESSION_METHOD,
    &PNG_FILTER_METHOD,
    &PNG_INTERLACE_METHOD,
    &PNG_PHYS_UNIT,
    &PNG_RENDERING_INTENT,
];

/// Length (big-endian) plus a four-byte alphanumeric type tag.
fn parse_chunk_header(bytes: &[u8]) -> Option<ChunkHeader> {
    if bytes.len() < 8 {
        return None;
    }
    let tag = &bytes[4..8];
    if !tag.iter().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ChunkHeader {
        payload_len: u32::from_be_bytes(bytes[0..4].try_into().ok()?) as u64,
        tag: String::from_utf8_lossy(tag).into_owned(),
    })
}

fn is_iend(probe: &[u8]) -> bool {
    probe.len() >= 8 && &probe[4..8] == b"IEND"
}

fn describe_chunk(prefix: &[u8]) -> Option<String> {
    if prefix.len() < 8 {
        return Some("invalid PNG chunk".into());
    }
    let length = u32::from_be_bytes(prefix[0..4].try_into().ok()?);
    let tag = String::from_utf8_lossy(&prefix[4..8]).into_owned();
    Some(format!("{tag} chunk of size {length}"))
}

// -- Tests --------------------------------------------------------------------
