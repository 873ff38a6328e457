//! Filesystem-backed datastores.
//!
//! A `FileSystemObject` names one normalised path. Directories enumerate
//! their entries; regular files expose their bytes through a
//! copy-on-write overlay log, so reads see pending edits and writes land
//! in scratch storage until an explicit commit.
//!
//! The file descriptor is opened lazily and verified by inode/device
//! against the preceding lstat, retrying when the path was replaced
//! between the two calls. Concurrent reads serialise through the
//! object's file lock.

use std::fs::File;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::{FileExt, MetadataExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::dsid::{BrokenData, Dsid, Key};
use crate::error::{EditError, Result};
use crate::overlay::OverlayLog;
use crate::progress::Progress;
use crate::range::{ByteRange, ALL};
use crate::resource::TuningProfile;
use crate::session::RefTag;

use super::{DataStore, DsClass, Kind};

// ── Path arithmetic ─────────────────────────────────────────────────

/// Lexically normalise an absolute path: collapse `//`, drop `.`, and
/// resolve `..` without touching the filesystem.
fn normalize_path(bytes: &[u8]) -> Vec<u8> {
    let mut parts: Vec<&[u8]> = Vec::new();
    for part in bytes.split(|&b| b == b'/') {
        match part {
            b"" | b"." => {}
            b".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return b"/".to_vec();
    }
    let mut out = Vec::with_capacity(bytes.len());
    for part in parts {
        out.push(b'/');
        out.extend_from_slice(part);
    }
    out
}

fn join_path(base: &Path, name: &[u8]) -> Vec<u8> {
    if name.starts_with(b"/") {
        return name.to_vec();
    }
    let mut out = base.as_os_str().as_bytes().to_vec();
    if !out.ends_with(b"/") {
        out.push(b'/');
    }
    out.extend_from_slice(name);
    out
}

/// Canonical dsid for a normalised path.
fn fs_dsid(normalized: &[u8]) -> (Dsid, DsClass) {
    if normalized == b"/" {
        (
            Dsid::new(vec![Key::name(&b"FileSystem"[..])]),
            DsClass::FileSystem,
        )
    } else {
        (
            Dsid::new(vec![
                Key::name(&b"FileSystem"[..]),
                Key::Name(normalized.to_vec()),
            ]),
            DsClass::FileSystem,
        )
    }
}

// ── State ───────────────────────────────────────────────────────────

#[derive(Default)]
struct FdState {
    file: Option<File>,
    ino: u64,
    dev: u64,
}

pub(crate) struct FsState {
    pub(crate) path: PathBuf,
    file: Mutex<FdState>,
    overlay: Mutex<OverlayLog>,
}

impl FsState {
    pub(super) fn new(dsid: &Dsid, tuning: &TuningProfile) -> Result<Self> {
        let path = match dsid.keys() {
            [Key::Name(_)] => PathBuf::from("/"),
            [Key::Name(_), Key::Name(path)] => {
                let normalized = normalize_path(path);
                PathBuf::from(std::ffi::OsString::from_vec(normalized))
            }
            _ => {
                return Err(EditError::InvalidDsid(format!(
                    "{dsid} is not a filesystem dsid"
                )))
            }
        };
        Ok(FsState {
            path,
            file: Mutex::new(FdState::default()),
            overlay: Mutex::new(OverlayLog::new(tuning.spool_threshold, tuning.read_chunk)),
        })
    }
}

/// lstat, then open and verify inode/device, retrying when the path was
/// replaced in between. Returns the file lock plus the fstat size.
fn lock_file(state: &FsState) -> Result<(MutexGuard<'_, FdState>, u64)> {
    loop {
        let st = std::fs::symlink_metadata(&state.path)?;
        let mut guard = state.file.lock().unwrap();

        if let Some(file) = &guard.file {
            if st.ino() == guard.ino && st.dev() == guard.dev {
                let size = file.metadata()?.len();
                return Ok((guard, size));
            }
            tracing::warn!(path = %state.path.display(), "file replaced under open descriptor, reopening");
            guard.file = None;
        }

        if !st.file_type().is_file() {
            return Err(EditError::NotAFile(state.path.display().to_string()));
        }

        let file = File::open(&state.path)?;
        let fst = file.metadata()?;
        if fst.ino() != st.ino() || fst.dev() != st.dev() {
            // Changed between lstat and open; try again.
            drop(guard);
            continue;
        }
        guard.ino = fst.ino();
        guard.dev = fst.dev();
        let size = fst.len();
        guard.file = Some(file);
        return Ok((guard, size));
    }
}

impl FdState {
    fn file(&self) -> &File {
        self.file.as_ref().expect("lock_file leaves a file in place")
    }
}

// ── Capability implementations ──────────────────────────────────────

pub(super) fn child_dsid(
    ds: &DataStore,
    state: &FsState,
    key: &Key,
) -> Result<Option<(Dsid, DsClass)>> {
    match key {
        Key::Name(name) => {
            let joined = join_path(&state.path, name);
            Ok(Some(fs_dsid(&normalize_path(&joined))))
        }
        Key::Parent => {
            if state.path == Path::new("/") {
                return Ok(Some((Dsid::root(), DsClass::Root)));
            }
            let joined = join_path(&state.path, b"..");
            Ok(Some(fs_dsid(&normalize_path(&joined))))
        }
        Key::Stat => Ok(Some((ds.dsid().child(Key::Stat), DsClass::Stat))),
        _ => Ok(None),
    }
}

pub(super) fn keys(ds: &Arc<DataStore>, state: &FsState) -> Result<Vec<Key>> {
    let mut keys = vec![Key::Stat];
    let st = std::fs::symlink_metadata(&state.path)?;

    if st.is_dir() {
        let mut names: Vec<Vec<u8>> = Vec::new();
        for entry in std::fs::read_dir(&state.path)? {
            names.push(entry?.file_name().as_bytes().to_vec());
        }
        names.sort();
        keys.extend(names.into_iter().map(Key::Name));
    } else if st.file_type().is_file() {
        keys.push(Key::Range(ALL));
        // Sniff registered magics against the logical prefix, so pending
        // edits count.
        let prefix = ds.read_all(ByteRange::to(0, 16))?;
        for def in ds.session().registry.magic_matches(&prefix) {
            keys.push(Key::marker(def));
        }
    } else {
        keys.push(Key::Broken(BrokenData::new(format!(
            "unsupported file type: {}",
            state.path.display()
        ))));
    }

    Ok(keys)
}

pub(super) fn read(state: &FsState, r: ByteRange, progress: Progress<'_>) -> Result<Vec<u8>> {
    let overlay = state.overlay.lock().unwrap();
    let (guard, size) = lock_file(state)?;
    let file = guard.file();

    if r.end.is_open() {
        // Streaming to the end of the file; hint sequential access.
        unsafe {
            libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL);
        }
    }

    let mut backing = |offset: u64, buf: &mut [u8]| -> Result<usize> {
        Ok(file.read_at(buf, offset)?)
    };
    overlay.read(r, size, &mut backing, progress)
}

pub(super) fn write(
    ds: &Arc<DataStore>,
    state: &FsState,
    r: ByteRange,
    src: &[u8],
    requestor: &RefTag,
) -> Result<()> {
    {
        let mut overlay = state.overlay.lock().unwrap();
        let (guard, size) = lock_file(state)?;
        drop(guard);
        let notify = overlay.write(src, r, size)?;
        // Notify while still serialised by the overlay lock, so changes
        // are delivered in splice order.
        ds.session().notify_change(ds, &Key::Range(notify), requestor);
    }
    ds.session().mark_modified(ds);
    Ok(())
}

pub(super) fn size(state: &FsState) -> Result<u64> {
    let overlay = state.overlay.lock().unwrap();
    let (guard, size) = lock_file(state)?;
    drop(guard);
    Ok(overlay.size(size))
}

pub(super) fn describe(ds: &Arc<DataStore>, state: &FsState) -> String {
    let modified = ds
        .session()
        .modified
        .lock()
        .unwrap()
        .contains(ds.dsid());
    let suffix = if modified { ", modified" } else { "" };
    match std::fs::symlink_metadata(&state.path) {
        Ok(st) if st.is_dir() => format!("directory {}", state.path.display()),
        Ok(st) if st.file_type().is_file() => {
            let logical = size(state).unwrap_or(st.len());
            format!("file {} ({logical} bytes{suffix})", state.path.display())
        }
        Ok(_) => format!("special file {}", state.path.display()),
        Err(_) => format!("{} (unreadable)", state.path.display()),
    }
}

/// Materialise the overlay's contents next to the backing file, rename
/// over it, and reset the overlay to the identity. Releases the
/// session's `<modified>` pin and notifies an open-ended change.
pub(super) fn commit(ds: &Arc<DataStore>, state: &FsState) -> Result<()> {
    let mut overlay = state.overlay.lock().unwrap();
    if overlay.is_identity() {
        drop(overlay);
        ds.session().clear_modified(ds);
        return Ok(());
    }

    let dir = state.path.parent().unwrap_or_else(|| Path::new("/"));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;

    {
        let (guard, size) = lock_file(state)?;
        let file = guard.file();
        let mut backing =
            |offset: u64, buf: &mut [u8]| -> Result<usize> { Ok(file.read_at(buf, offset)?) };
        let mut to_tmp = |_done: u64, _total: u64, chunk: &[u8]| -> Result<bool> {
            use std::io::Write;
            tmp.as_file_mut().write_all(chunk)?;
            Ok(true)
        };
        overlay.read(ALL, size, &mut backing, &mut to_tmp)?;
    }

    // Keep the original permissions across the rename.
    let perms = std::fs::metadata(&state.path)?.permissions();
    std::fs::set_permissions(tmp.path(), perms)?;
    tmp.persist(&state.path)
        .map_err(|err| EditError::BrokenBacking(err.error))?;

    overlay.reset();
    // The rename changed the inode; reopen on next access.
    state.file.lock().unwrap().file = None;
    drop(overlay);

    ds.session().clear_modified(ds);
    ds.session()
        .notify_change(ds, &Key::Range(ByteRange::from(0)), &RefTag::label("<commit>"));
    tracing::debug!(path = %state.path.display(), "committed pending edits");
    Ok(())
}

// ── Stat records ────────────────────────────────────────────────────

/// Read-only leaf rendering the parent path's lstat record as text.
pub(crate) struct StatState {
    pub(crate) parent: Arc<DataStore>,
}

pub(super) fn render_stat(state: &StatState) -> Result<Vec<u8>> {
    let path = match state.parent.kind() {
        Kind::FileSystem(fs) => fs.path.clone(),
        _ => {
            return Err(EditError::InvalidDsid(
                "stat record without a filesystem parent".into(),
            ))
        }
    };
    let st = std::fs::symlink_metadata(&path)?;
    let file_type = st.file_type();
    let kind = if file_type.is_dir() {
        "directory"
    } else if file_type.is_file() {
        "regular file"
    } else if file_type.is_symlink() {
        "symbolic link"
    } else {
        "special file"
    };
    let text = format!(
        "path: {}\ntype: {}\nsize: {}\nmode: {:o}\nmodified: {}\n",
        path.display(),
        kind,
        st.len(),
        st.mode() & 0o7777,
        st.mtime(),
    );
    Ok(text.into_bytes())
}

pub(super) fn read_stat(state: &StatState, r: ByteRange) -> Result<Vec<u8>> {
    let bytes = render_stat(state)?;
    let (start, end) = r.resolve(bytes.len() as u64);
    let start = (start as usize).min(bytes.len());
    let end = (end as usize).min(bytes.len()).max(start);
    Ok(bytes[start..end].to_vec())
}

// -- Tests --------------------------------------------------------------------
