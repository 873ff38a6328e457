//! Integration test: copy-on-write splices over real files, plus
//! property round-trips for the overlay log and range algebra.
//!
//! Validates that:
//! - Splices change logical size and contents without touching the
//!   backing file until commit
//! - Write-then-read returns exactly the spliced payload
//! - An identity splice leaves size and every read unchanged
//! - Range translation composes

use std::io::Write;
use std::path::PathBuf;

use proptest::prelude::*;
use tempfile::TempDir;

use bytetree::overlay::OverlayLog;
use bytetree::progress;
use bytetree::resource::TuningProfile;
use bytetree::{ByteRange, Dsid, End, Key, RefTag, Session, ALL};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_file(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(bytes).unwrap();
    path
}

fn fs_dsid(path: &std::path::Path) -> Dsid {
    Dsid::new(vec![
        Key::name(&b"FileSystem"[..]),
        Key::name(path.as_os_str().as_encoded_bytes()),
    ])
}

/// Fresh log plus an in-memory backing for the property tests.
fn mem_read(
    log: &OverlayLog,
    backing: &[u8],
    r: ByteRange,
) -> Vec<u8> {
    let mut reader = |offset: u64, buf: &mut [u8]| -> bytetree::Result<usize> {
        let offset = (offset as usize).min(backing.len());
        let n = buf.len().min(backing.len() - offset);
        buf[..n].copy_from_slice(&backing[offset..offset + n]);
        Ok(n)
    };
    log.read(r, backing.len() as u64, &mut reader, &mut progress::sink)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests: Splices Through The Session
// ---------------------------------------------------------------------------

#[test]
fn same_width_splice_keeps_size() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "f", b"0123456789ABCDEF");
    let session = Session::with_tuning(TuningProfile::default()).unwrap();

    let file = session.open(&fs_dsid(&path), RefTag::label("t")).unwrap();
    file.write_bytes(ByteRange::to(4, 6), b"XY", &RefTag::label("test"))
        .unwrap();

    assert_eq!(file.get_size().unwrap(), 16);
    assert_eq!(file.read_all(ALL).unwrap(), b"0123XY6789ABCDEF");
    file.release(&RefTag::label("t"));
}

#[test]
fn widening_splice_grows_size() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "f", b"0123456789ABCDEF");
    let session = Session::with_tuning(TuningProfile::default()).unwrap();

    let file = session.open(&fs_dsid(&path), RefTag::label("t")).unwrap();
    file.write_bytes(ByteRange::to(4, 6), b"LONG", &RefTag::label("test"))
        .unwrap();

    assert_eq!(file.get_size().unwrap(), 18);
    assert_eq!(file.read_all(ALL).unwrap(), b"0123LONG6789ABCDEF");
    // The backing is untouched until commit.
    assert_eq!(std::fs::read(&path).unwrap(), b"0123456789ABCDEF");

    file.commit().unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"0123LONG6789ABCDEF");
    file.release(&RefTag::label("t"));
}

#[test]
fn open_ended_splice_truncates() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "f", b"0123456789ABCDEF");
    let session = Session::with_tuning(TuningProfile::default()).unwrap();

    let file = session.open(&fs_dsid(&path), RefTag::label("t")).unwrap();
    file.write_bytes(ByteRange::from(4), b"!", &RefTag::label("test"))
        .unwrap();

    assert_eq!(file.get_size().unwrap(), 5);
    assert_eq!(file.read_all(ALL).unwrap(), b"0123!");
    file.release(&RefTag::label("t"));
}

#[test]
fn commit_preserves_permissions_and_resets_the_overlay() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "f", b"0123456789ABCDEF");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

    let session = Session::with_tuning(TuningProfile::default()).unwrap();
    let file = session.open(&fs_dsid(&path), RefTag::label("t")).unwrap();
    file.write_bytes(ByteRange::to(0, 1), b"#", &RefTag::label("test"))
        .unwrap();
    file.commit().unwrap();

    assert_eq!(std::fs::read(&path).unwrap()[..1], *b"#");
    let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
    assert_eq!(mode, 0o640);

    // A second commit with no pending edits is a no-op.
    file.commit().unwrap();
    file.release(&RefTag::label("t"));
}

// ---------------------------------------------------------------------------
// Tests: Property Round-Trips
// ---------------------------------------------------------------------------

fn backing_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

proptest! {
    #[test]
    fn write_then_read_returns_the_payload(
        backing in backing_strategy(),
        start in 0u64..64,
        width in 0u64..32,
        payload in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let start = start.min(backing.len() as u64);
        let mut log = OverlayLog::new(1 << 16, 4096);
        log.write(&payload, ByteRange::to(start, start + width), backing.len() as u64)
            .unwrap();

        let got = mem_read(&log, &backing, ByteRange::to(start, start + payload.len() as u64));
        prop_assert_eq!(got, payload);
    }

    #[test]
    fn identity_splice_changes_nothing(
        backing in backing_strategy(),
        start in 0u64..64,
        width in 0u64..32,
    ) {
        let len = backing.len() as u64;
        let start = start.min(len);
        let end = (start + width).min(len);

        let mut log = OverlayLog::new(1 << 16, 4096);
        let current = mem_read(&log, &backing, ByteRange::to(start, end));
        log.write(&current, ByteRange::to(start, end), len).unwrap();

        prop_assert_eq!(log.size(len), len);
        prop_assert_eq!(log.pending_size_delta(), 0);
        prop_assert_eq!(mem_read(&log, &backing, ALL), backing);
    }

    #[test]
    fn splices_agree_with_a_vec_model(
        backing in backing_strategy(),
        edits in prop::collection::vec(
            (0u64..80, 0u64..32, prop::collection::vec(any::<u8>(), 0..16)),
            1..6,
        ),
    ) {
        let mut log = OverlayLog::new(1 << 16, 4096);
        let mut model = backing.clone();

        for (start, width, payload) in edits {
            let size = log.size(backing.len() as u64);
            let start = start.min(size);
            let end = (start + width).min(size);
            log.write(&payload, ByteRange::to(start, end), backing.len() as u64)
                .unwrap();
            model.splice(start as usize..end as usize, payload);
        }

        prop_assert_eq!(log.size(backing.len() as u64), model.len() as u64);
        prop_assert_eq!(mem_read(&log, &backing, ALL), model);
    }

    #[test]
    fn range_translation_composes(
        a_start in 0u64..64, a_width in prop::option::of(0u64..64),
        b_start in 0u64..64, b_width in prop::option::of(0u64..64),
        r_start in 0u64..64, r_width in prop::option::of(0u64..64),
    ) {
        let range = |start: u64, width: Option<u64>| match width {
            Some(width) => ByteRange::to(start, start + width),
            None => ByteRange::from(start),
        };
        let a = range(a_start, a_width);
        let b = range(b_start, b_width);
        let r = range(r_start, r_width);

        prop_assert_eq!(a.translate(b.translate(r)), a.translate(b).translate(r));
    }

    #[test]
    fn intersection_is_commutative_and_within_both(
        a_start in 0u64..64, a_width in prop::option::of(1u64..64),
        b_start in 0u64..64, b_width in prop::option::of(1u64..64),
    ) {
        let range = |start: u64, width: Option<u64>| match width {
            Some(width) => ByteRange::to(start, start + width),
            None => ByteRange::from(start),
        };
        let a = range(a_start, a_width);
        let b = range(b_start, b_width);

        prop_assert_eq!(a.intersect(b), b.intersect(a));
        if let Some(overlap) = a.intersect(b) {
            prop_assert!(overlap.start >= a.start && overlap.start >= b.start);
            match (overlap.end, a.end, b.end) {
                (End::Open, End::Open, End::Open) => {}
                (End::Open, _, _) => prop_assert!(false, "open overlap from finite inputs"),
                (End::At(end), a_end, b_end) => {
                    prop_assert!(end > overlap.start);
                    if let End::At(limit) = a_end { prop_assert!(end <= limit); }
                    if let End::At(limit) = b_end { prop_assert!(end <= limit); }
                }
            }
        }
    }
}
