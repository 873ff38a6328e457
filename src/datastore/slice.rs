//! Slice: a half-open byte window of its parent.
//!
//! Reads and writes translate through the window; sub-ranges redirect
//! into the parent's coordinate space so slices never stack, and change
//! notifications from the parent are rewritten into local coordinates.

use std::sync::Arc;

use crate::dsid::{Dsid, Key};
use crate::error::Result;
use crate::range::{ByteRange, End};

use super::{DataStore, DsClass};

pub(crate) struct SliceState {
    pub(crate) parent: Arc<DataStore>,
    /// Window in the parent's coordinates.
    pub(crate) range: ByteRange,
}

impl SliceState {
    /// The window expressed in local coordinates: `[0, width)`.
    pub(super) fn local_extent(&self) -> ByteRange {
        ByteRange::new(
            0,
            match self.range.end {
                End::At(end) => End::At(end - self.range.start),
                End::Open => End::Open,
            },
        )
    }
}

pub(super) fn child_dsid(
    _ds: &DataStore,
    state: &SliceState,
    key: &Key,
) -> Result<Option<(Dsid, DsClass)>> {
    match key {
        // A sub-range collapses into the parent's coordinate space
        // rather than nesting slices.
        Key::Range(range) if !range.is_all() => {
            let translated = state.range.translate(*range);
            Ok(Some((
                state.parent.dsid().child(Key::Range(translated)),
                DsClass::Slice,
            )))
        }
        _ => Ok(None),
    }
}
