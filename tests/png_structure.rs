//! Integration test: PNG decomposition through the schema mechanism.
//!
//! Validates that:
//! - A typed `?Png` view resolves `MagicNumber` to the file's first
//!   eight bytes
//! - Chunk enumeration yields synthetic `ChunkAt<N>` names with in-band
//!   warnings for truncation and bad magic
//! - Schema settings (size, size_is, ifequal, starts_with, ends_with)
//!   lay out chunk fields, including conditional re-interpretations
//! - The `Chunks` heterogeneous array terminates on `IEND`

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use bytetree::formats::png;
use bytetree::resource::TuningProfile;
use bytetree::schema::bytes_to_uint_be;
use bytetree::{ByteRange, DataStore, Dsid, End, Key, RefTag, Session};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

fn chunk(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(tag);
    out.extend_from_slice(payload);
    // The editor never validates CRCs; any value will do.
    out.extend_from_slice(&0xdead_beefu32.to_be_bytes());
    out
}

fn ihdr_payload(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(13);
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&[8, 2, 0, 0, 0]); // depth, RGB, deflate, adaptive, none
    out
}

fn simple_png() -> Vec<u8> {
    let mut out = MAGIC.to_vec();
    out.extend_from_slice(&chunk(b"IHDR", &ihdr_payload(64, 32))); // at 8, 25 bytes
    out.extend_from_slice(&chunk(b"IDAT", b"xxxx")); // at 33, 16 bytes
    out.extend_from_slice(&chunk(b"IEND", b"")); // at 49, 12 bytes
    out
}

fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
    path
}

fn session() -> Session {
    Session::with_tuning(TuningProfile::default()).unwrap()
}

fn open(session: &Session, path: &Path, tail: &str) -> Arc<DataStore> {
    let text = format!("/FileSystem/\"{}\"{tail}", path.display());
    session
        .open_text(&text, RefTag::label("test"))
        .unwrap_or_else(|err| panic!("cannot open {text}: {err}"))
}

fn keys_of(ds: &Arc<DataStore>) -> Vec<Key> {
    ds.enum_keys().unwrap().map(|key| key.unwrap()).collect()
}

fn names_of(keys: &[Key]) -> Vec<String> {
    keys.iter()
        .filter_map(|key| key.as_name_str().map(str::to_owned))
        .collect()
}

fn warnings_of(keys: &[Key]) -> Vec<String> {
    keys.iter()
        .filter_map(|key| match key {
            Key::Broken(warning) => Some(warning.description().to_owned()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests: Magic Number And Chunk Scan
// ---------------------------------------------------------------------------

#[test]
fn magic_number_reads_first_eight_bytes() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "a.bin", &simple_png());
    let session = session();

    let magic = open(&session, &path, "/?Png/MagicNumber");
    assert_eq!(magic.read_all(bytetree::ALL).unwrap(), MAGIC);
    assert_eq!(magic.get_size().unwrap(), 8);
}

#[test]
fn listing_yields_chunk_names() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "a.png", &simple_png());
    let session = session();

    let view = open(&session, &path, "/?Png");
    let keys = keys_of(&view);
    assert_eq!(
        names_of(&keys),
        ["MagicNumber", "ChunkAt8", "ChunkAt33", "ChunkAt49"]
    );
    assert!(warnings_of(&keys).is_empty());
}

#[test]
fn truncated_chunk_reports_broken_data() {
    // Magic plus an IHDR header claiming 13 payload bytes, with only 10
    // present and no CRC.
    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&[0u8; 10]);

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "cut.png", &bytes);
    let session = session();

    let view = open(&session, &path, "/?Png");
    let keys = keys_of(&view);
    assert_eq!(names_of(&keys), ["MagicNumber", "ChunkAt8"]);
    assert_eq!(
        warnings_of(&keys),
        ["Chunk at 8 (length 13, type IHDR) is truncated"]
    );
}

#[test]
fn wrong_magic_reports_broken_data() {
    let mut bytes = b"NOTAPNG!".to_vec();
    bytes.extend_from_slice(&chunk(b"IEND", b""));

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "bad.png", &bytes);
    let session = session();

    let view = open(&session, &path, "/?Png");
    let keys = keys_of(&view);
    let warnings = warnings_of(&keys);
    assert_eq!(warnings.len(), 1);
    assert!(
        warnings[0].starts_with("Incorrect magic number"),
        "unexpected warning: {}",
        warnings[0]
    );
}

#[test]
fn trailing_garbage_becomes_data_at() {
    let mut bytes = simple_png();
    bytes.extend_from_slice(b"JUNK");

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "junk.png", &bytes);
    let session = session();

    let view = open(&session, &path, "/?Png");
    let names = names_of(&keys_of(&view));
    assert_eq!(names.last().map(String::as_str), Some("DataAt61"));
}

#[test]
fn file_listing_sniffs_the_png_magic() {
    let dir = TempDir::new().unwrap();
    let png = write_file(&dir, "a.png", &simple_png());
    let other = write_file(&dir, "plain.txt", b"just text");
    let session = session();

    let keys = keys_of(&open(&session, &png, ""));
    assert!(keys.contains(&Key::Stat));
    assert!(keys.contains(&Key::Range(bytetree::ALL)));
    assert!(keys.contains(&Key::marker(&png::PNG)));

    let keys = keys_of(&open(&session, &other, ""));
    assert!(!keys.contains(&Key::marker(&png::PNG)));
}

// ---------------------------------------------------------------------------
// Tests: Chunk Structure Fields
// ---------------------------------------------------------------------------

#[test]
fn ihdr_chunk_decodes_conditional_header() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "a.png", &simple_png());
    let session = session();

    let chunk_view = open(&session, &path, "/?Png/ChunkAt8");
    assert_eq!(
        names_of(&keys_of(&chunk_view)),
        ["Length", "Type", "RawData", "CRC", "Header"]
    );
    assert_eq!(chunk_view.locate_end().unwrap(), End::At(25));
    assert_eq!(chunk_view.describe(), "IHDR chunk of size 13");

    let width = open(&session, &path, "/?Png/ChunkAt8/Header/Width");
    let bytes = width.read_all(bytetree::ALL).unwrap();
    assert_eq!(bytes_to_uint_be(&bytes), 64);
    assert_eq!(width.describe(), "64");
}

#[test]
fn non_ihdr_chunk_skips_the_header_field() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "a.png", &simple_png());
    let session = session();

    let chunk_view = open(&session, &path, "/?Png/ChunkAt33");
    let names = names_of(&keys_of(&chunk_view));
    assert_eq!(names, ["Length", "Type", "RawData", "CRC"]);
}

#[test]
fn gamma_field_uses_starts_with_and_size() {
    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(&chunk(b"IHDR", &ihdr_payload(1, 1)));
    bytes.extend_from_slice(&chunk(b"gAMA", &45455u32.to_be_bytes()));
    bytes.extend_from_slice(&chunk(b"IEND", b""));

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "gamma.png", &bytes);
    let session = session();

    let gamma = open(&session, &path, "/?Png/ChunkAt33/Gamma");
    let value = gamma.read_all(bytetree::ALL).unwrap();
    assert_eq!(bytes_to_uint_be(&value), 45455);
    assert_eq!(gamma.describe(), "45455");
}

#[test]
fn text_chunk_keyword_is_nul_terminated() {
    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(&chunk(b"IHDR", &ihdr_payload(1, 1)));
    bytes.extend_from_slice(&chunk(b"tEXt", b"Comment\0hello png"));
    bytes.extend_from_slice(&chunk(b"IEND", b""));

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "text.png", &bytes);
    let session = session();

    let keyword = open(&session, &path, "/?Png/ChunkAt33/Text/Keyword");
    assert_eq!(keyword.read_all(bytetree::ALL).unwrap(), b"Comment\0");
    assert_eq!(keyword.describe(), "\"Comment\"");

    let text = open(&session, &path, "/?Png/ChunkAt33/Text/Text");
    assert_eq!(text.read_all(bytetree::ALL).unwrap(), b"hello png");
}

#[test]
fn truncated_payload_yields_field_warnings() {
    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&[0u8; 10]);

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "cut.png", &bytes);
    let session = session();

    let chunk_view = open(&session, &path, "/?Png/ChunkAt8");
    let keys = keys_of(&chunk_view);
    let warnings = warnings_of(&keys);
    assert!(warnings.contains(&"Truncated field RawData".to_string()));
    assert!(warnings.contains(&"Missing field CRC".to_string()));
    // The raw data is still navigable despite the truncation.
    assert!(names_of(&keys).contains(&"RawData".to_string()));
}

// ---------------------------------------------------------------------------
// Tests: Heterogeneous Array
// ---------------------------------------------------------------------------

#[test]
fn chunks_array_terminates_on_iend() {
    let mut bytes = simple_png();
    bytes.extend_from_slice(b"GARBAGE AFTER IEND");

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "a.png", &bytes);
    let session = session();

    let chunks = open(&session, &path, "/?Png/Chunks");
    let keys = keys_of(&chunks);
    assert_eq!(keys, [Key::Index(0), Key::Index(1), Key::Index(2)]);
    assert_eq!(chunks.locate_end().unwrap(), End::At(53));
}

#[test]
fn array_items_resolve_to_typed_chunks() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "a.png", &simple_png());
    let session = session();

    let item = open(&session, &path, "/?Png/Chunks/1");
    assert_eq!(item.describe(), "IDAT chunk of size 4");
    assert_eq!(
        item.read_all(ByteRange::to(8, 12)).unwrap(),
        b"xxxx"
    );
}

#[test]
fn dsid_text_round_trips_through_the_session() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "a.png", &simple_png());
    let session = session();

    // Type names are case-insensitive on the wire.
    let text = format!("/FileSystem/\"{}\"/?png/chunkat8", path.display());
    let ds = session.open_text(&text, RefTag::label("test")).unwrap();

    let parsed = session.parse_dsid(&ds.dsid().to_string()).unwrap();
    assert_eq!(Dsid::new(parsed.keys), *ds.dsid());
}
