//! Scratch stores for uncommitted edits.
//!
//! Each write splice lands its payload in a `ScratchFile`: spooled in
//! memory up to a threshold, spilled to an anonymous temp file beyond it.
//! Scratch stores are shared by reference counting (`Arc`); an overlay
//! segment holding a handle keeps the bytes alive, and the backing temp
//! file disappears when the last segment naming it is dropped.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use tempfile::SpooledTempFile;

use crate::error::Result;

/// One spooled scratch store. Concurrent readers serialise on the inner
/// lock; the seek position is not part of the public contract.
pub struct ScratchFile {
    inner: Mutex<SpooledTempFile>,
    len: u64,
}

impl std::fmt::Debug for ScratchFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchFile").field("len", &self.len).finish()
    }
}

impl ScratchFile {
    /// Spill-to-disk threshold used when no tuning profile is supplied.
    pub const DEFAULT_SPOOL_THRESHOLD: usize = 1 << 20;

    /// Create a scratch store holding exactly `bytes`.
    pub fn from_bytes(bytes: &[u8], spool_threshold: usize) -> Result<Self> {
        let mut file = SpooledTempFile::new(spool_threshold);
        file.write_all(bytes)?;
        Ok(ScratchFile {
            inner: Mutex::new(file),
            len: bytes.len() as u64,
        })
    }

    /// Total bytes held.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read `buf.len()` bytes starting at `offset`.
    ///
    /// Callers never read past `len`; segments referencing a scratch
    /// store are constructed within its bounds.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.inner.lock().expect("scratch lock poisoned");
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }
}

// -- Tests --------------------------------------------------------------------
