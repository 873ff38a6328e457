//! Magic-prefixed chunk streams: a fixed signature followed by
//! back-to-back chunks whose headers self-describe their length.
//!
//! Enumeration is a pull-based scan yielding synthetic `ChunkAt<N>`
//! names, a `DataAt<N>` name for trailing unparseable bytes, and
//! in-band warnings for a wrong magic number or a truncated chunk.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::dsid::{BrokenData, Dsid, Key};
use crate::error::{EditError, Result};
use crate::range::ByteRange;
use crate::schema::{ChunkStreamDef, TypeMarker};

use super::primitive::display_bytes;
use super::{DataStore, DsClass, TypedState};

pub(super) fn child_dsid(
    ds: &Arc<DataStore>,
    state: &TypedState,
    def: &'static ChunkStreamDef,
    key: &Key,
) -> Result<Option<(Dsid, DsClass)>> {
    let name = match key {
        Key::Name(bytes) => match std::str::from_utf8(bytes) {
            Ok(name) => name.to_ascii_lowercase(),
            Err(_) => return Ok(None),
        },
        _ => return Ok(None),
    };
    let parent = &state.parent;

    if name == "magicnumber" {
        let magic = ByteRange::to(0, def.magic.len() as u64);
        return parent.child_dsid(&Key::Range(magic)).map(Some);
    }
    if name == "chunks" {
        let dsid = parent
            .dsid()
            .child(Key::Range(ByteRange::from(def.magic.len() as u64)))
            .child(Key::marker(def.chunks));
        return Ok(Some((dsid, DsClass::Typed(TypeMarker(def.chunks)))));
    }
    if let Some(rest) = name.strip_prefix("chunkat") {
        if let Ok(ofs) = rest.parse::<u64>() {
            let dsid = parent
                .dsid()
                .child(Key::Range(ByteRange::from(ofs)))
                .child(Key::marker(def.chunk));
            return Ok(Some((dsid, DsClass::Typed(TypeMarker(def.chunk)))));
        }
    }
    if let Some(rest) = name.strip_prefix("dataat") {
        if let Ok(ofs) = rest.parse::<u64>() {
            return parent
                .child_dsid(&Key::Range(ByteRange::from(ofs)))
                .map(Some);
        }
    }

    Err(EditError::InvalidDsid(format!(
        "{} has no child named {name}",
        ds.dsid()
    )))
}

enum ScanState {
    Start,
    Chunks(u64),
    Tail(u64),
    Done,
}

/// Lazy chunk scanner.
pub struct ChunkKeys {
    ds: Arc<DataStore>,
    def: &'static ChunkStreamDef,
    state: ScanState,
    queued: VecDeque<Key>,
}

impl ChunkKeys {
    pub(super) fn new(ds: Arc<DataStore>, def: &'static ChunkStreamDef) -> Self {
        ChunkKeys {
            ds,
            def,
            state: ScanState::Start,
            queued: VecDeque::new(),
        }
    }

    fn scan_magic(&mut self) -> Result<()> {
        self.queued.push_back(Key::name(&b"MagicNumber"[..]));
        let magic = self
            .ds
            .read_all(ByteRange::to(0, self.def.magic.len() as u64))?;
        if magic != self.def.magic {
            self.queued.push_back(Key::Broken(BrokenData::new(format!(
                "Incorrect magic number {}",
                display_bytes(&magic)
            ))));
        }
        self.state = ScanState::Chunks(self.def.magic.len() as u64);
        Ok(())
    }

    fn scan_chunk(&mut self, ofs: u64) -> Result<()> {
        let header = self
            .ds
            .read_all(ByteRange::to(ofs, ofs + self.def.header_len))?;
        if header.is_empty() {
            // Clean end of data.
            self.state = ScanState::Done;
            return Ok(());
        }
        if (header.len() as u64) < self.def.header_len {
            self.state = ScanState::Tail(ofs);
            return Ok(());
        }
        let parsed = match (self.def.parse_header)(&header) {
            Some(parsed) => parsed,
            None => {
                self.state = ScanState::Tail(ofs);
                return Ok(());
            }
        };

        self.queued
            .push_back(Key::name(format!("ChunkAt{ofs}").into_bytes()));

        // Probe the chunk's final byte; a short read means truncation.
        let last = ofs + parsed.payload_len + self.def.overhead - 1;
        if self.ds.read_all(ByteRange::to(last, last + 1))?.is_empty() {
            self.queued.push_back(Key::Broken(BrokenData::new(format!(
                "Chunk at {ofs} (length {}, type {}) is truncated",
                parsed.payload_len, parsed.tag
            ))));
        }

        self.state = ScanState::Chunks(ofs + self.def.overhead + parsed.payload_len);
        Ok(())
    }

    fn scan_tail(&mut self, ofs: u64) -> Result<()> {
        if !self.ds.read_all(ByteRange::to(ofs, ofs + 1))?.is_empty() {
            self.queued
                .push_back(Key::name(format!("DataAt{ofs}").into_bytes()));
        }
        self.state = ScanState::Done;
        Ok(())
    }
}

impl Iterator for ChunkKeys {
    type Item = Result<Key>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(key) = self.queued.pop_front() {
                return Some(Ok(key));
            }
            let step = match self.state {
                ScanState::Done => return None,
                ScanState::Start => self.scan_magic(),
                ScanState::Chunks(ofs) => self.scan_chunk(ofs),
                ScanState::Tail(ofs) => self.scan_tail(ofs),
            };
            if let Err(err) = step {
                self.state = ScanState::Done;
                return Some(Err(err));
            }
        }
    }
}
