//! Heterogeneous arrays: repeated typed items, each sized by its own
//! self-described extent.
//!
//! The item range table extends lazily up to the requested index. The
//! walk stops when the region runs out of bytes, an item reports a
//! zero-byte extent, the class terminator predicate fires, or an item
//! turns out to be open-ended.

use std::sync::Arc;

use crate::dsid::{Dsid, Key};
use crate::error::{EditError, Result};
use crate::range::{ByteRange, End};
use crate::schema::{ArrayDef, Shape, TypeMarker};

use super::{DataStore, DsClass, Kind, TypedState};

/// Lazily extended table of item ranges, in local coordinates.
#[derive(Debug, Default)]
pub(crate) struct ArrayTable {
    pub(crate) ranges: Vec<ByteRange>,
    pub(crate) complete: bool,
}

/// Append one item range; `false` means the walk terminated instead.
fn step(ds: &Arc<DataStore>, def: &'static ArrayDef, table: &mut ArrayTable) -> Result<bool> {
    let cursor = match table.ranges.last() {
        Some(range) => match range.end {
            End::At(end) => end,
            // An open-ended item has no successor.
            End::Open => return Ok(false),
        },
        None => 0,
    };

    if ds.read_all(ByteRange::to(cursor, cursor + 1))?.is_empty() {
        return Ok(false);
    }

    match ds.probe_typed_end(cursor, def.item)? {
        End::At(end) if end == cursor => Ok(false),
        End::At(end) => {
            table.ranges.push(ByteRange::to(cursor, end));
            if let Some(is_last) = def.is_last_item {
                let probe = ds.read_all(ByteRange::to(cursor, cursor + def.probe_len))?;
                if is_last(&probe) {
                    table.complete = true;
                }
            }
            Ok(true)
        }
        End::Open => {
            table.ranges.push(ByteRange::from(cursor));
            table.complete = true;
            Ok(true)
        }
    }
}

/// Extend the table up to `index` and return that item's range.
pub(super) fn ensure_index(
    ds: &Arc<DataStore>,
    state: &TypedState,
    def: &'static ArrayDef,
    index: u64,
) -> Result<Option<ByteRange>> {
    let mut table = state.items.lock().unwrap();
    while !table.complete && (table.ranges.len() as u64) <= index {
        if !step(ds, def, &mut table)? {
            table.complete = true;
        }
    }
    Ok(table.ranges.get(index as usize).copied())
}

pub(super) fn child_dsid(
    ds: &Arc<DataStore>,
    state: &TypedState,
    def: &'static ArrayDef,
    key: &Key,
) -> Result<Option<(Dsid, DsClass)>> {
    match key {
        Key::Index(index) => match ensure_index(ds, state, def, *index)? {
            Some(range) => Ok(Some((
                ds.dsid()
                    .child(Key::Range(range))
                    .child(Key::marker(def.item)),
                DsClass::Typed(TypeMarker(def.item)),
            ))),
            None => Err(EditError::InvalidDsid(format!(
                "{} has no item {index}",
                ds.dsid()
            ))),
        },
        _ => Ok(None),
    }
}

pub(super) fn locate_end(
    ds: &Arc<DataStore>,
    state: &TypedState,
    def: &'static ArrayDef,
) -> Result<End> {
    loop {
        let next = {
            let table = state.items.lock().unwrap();
            if table.complete {
                return Ok(match table.ranges.last() {
                    Some(range) => range.end,
                    None => End::At(0),
                });
            }
            table.ranges.len() as u64
        };
        ensure_index(ds, state, def, next)?;
    }
}

/// Drop every cached item range starting at or after the change, and
/// re-probe the tail on the next walk.
pub(super) fn invalidate(state: &TypedState, change: ByteRange) {
    let mut table = state.items.lock().unwrap();
    table.ranges.retain(|range| range.start < change.start);
    table.complete = false;
}

/// Lazy index enumerator.
pub struct ArrayKeys {
    ds: Arc<DataStore>,
    def: &'static ArrayDef,
    next: u64,
    done: bool,
}

impl ArrayKeys {
    pub(super) fn new(ds: Arc<DataStore>, def: &'static ArrayDef) -> Self {
        ArrayKeys {
            ds,
            def,
            next: 0,
            done: false,
        }
    }
}

impl Iterator for ArrayKeys {
    type Item = Result<Key>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let state = match self.ds.kind() {
            Kind::Typed(state) if matches!(state.def.shape, Shape::Array(_)) => state,
            _ => {
                self.done = true;
                return None;
            }
        };
        match ensure_index(&self.ds, state, self.def, self.next) {
            Ok(Some(_)) => {
                let index = self.next;
                self.next += 1;
                Some(Ok(Key::Index(index)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
