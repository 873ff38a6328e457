//! Progress reporting for long-running byte operations.
//!
//! A callback receives `(bytes_done, bytes_total, chunk)` per streamed
//! chunk. Returning `Ok(true)` means the callback consumed the chunk and
//! the operation should not accumulate it; `Ok(false)` keeps the bytes.
//! Returning `Err(EditError::Cancelled)` unwinds the operation cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EditError, Result};

/// Borrowed progress callback, threaded through read paths.
pub type Progress<'a> = &'a mut dyn FnMut(u64, u64, &[u8]) -> Result<bool>;

/// No-op callback: keep every chunk, never cancel.
pub fn sink(_done: u64, _total: u64, _chunk: &[u8]) -> Result<bool> {
    Ok(false)
}

/// Callback that keeps every chunk but unwinds with `Cancelled` once the
/// shared flag is raised (a SIGINT handler typically owns the flag).
pub fn cancellable(flag: Arc<AtomicBool>) -> impl FnMut(u64, u64, &[u8]) -> Result<bool> {
    move |_done, _total, _chunk| {
        if flag.load(Ordering::Relaxed) {
            Err(EditError::Cancelled)
        } else {
            Ok(false)
        }
    }
}

// -- Tests --------------------------------------------------------------------
