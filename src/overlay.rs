//! Copy-on-write overlay log over a backing byte source.
//!
//! Uncommitted edits are an ordered list of segments covering the logical
//! byte space `[0, size)`. Each segment sources its bytes either from the
//! backing store (read-through) or from a reference-counted scratch file
//! holding spliced-in payload. A freshly constructed log is the identity:
//! one open-ended tail segment reading the backing from offset zero.
//!
//! Invariants:
//! - Segment lengths (with the open tail resolved against the backing
//!   size) partition `[0, size)` with no gaps or overlaps.
//! - `pending_size_delta` equals the algebraic sum of segment-length
//!   changes since construction.
//! - Scratch handles live exactly as long as segments naming them.
//! - A splice is atomic: readers observe either the old or the new
//!   segment list, never a torn intermediate.

use std::sync::Arc;

use crate::error::Result;
use crate::progress::Progress;
use crate::range::ByteRange;
use crate::scratch::ScratchFile;

/// Where a segment's bytes come from.
#[derive(Debug, Clone)]
enum Source {
    /// Read through to the backing store.
    Backing,
    /// Read from a shared scratch store.
    Scratch(Arc<ScratchFile>),
}

/// One contiguous run of logical bytes.
#[derive(Debug, Clone)]
struct Segment {
    /// `None` only for the distinguished tail: "remainder of the backing
    /// from `source_offset` onward".
    len: Option<u64>,
    source: Source,
    source_offset: u64,
}

impl Segment {
    fn tail(source_offset: u64) -> Self {
        Segment {
            len: None,
            source: Source::Backing,
            source_offset,
        }
    }

    /// Length in logical bytes, with the open tail resolved against the
    /// current backing size.
    fn visible_len(&self, backing_size: u64) -> u64 {
        match self.len {
            Some(len) => len,
            None => backing_size.saturating_sub(self.source_offset),
        }
    }
}

/// Read-only description of one segment, for diagnostics and invariant
/// checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub len: Option<u64>,
    pub is_scratch: bool,
    pub source_offset: u64,
}

/// Reader for the backing store: fill `buf` from `offset`, returning the
/// byte count actually available (short at the physical end).
pub type BackingRead<'a> = &'a mut dyn FnMut(u64, &mut [u8]) -> Result<usize>;

/// Copy-on-write segment list over one backing byte source.
#[derive(Debug)]
pub struct OverlayLog {
    segments: Vec<Segment>,
    pending_size_delta: i64,
    spool_threshold: usize,
    read_chunk: usize,
}

impl OverlayLog {
    pub fn new(spool_threshold: usize, read_chunk: usize) -> Self {
        OverlayLog {
            segments: vec![Segment::tail(0)],
            pending_size_delta: 0,
            spool_threshold,
            read_chunk: read_chunk.max(1),
        }
    }

    /// True when the log is the identity over the backing (no pending
    /// edits).
    pub fn is_identity(&self) -> bool {
        matches!(
            self.segments.as_slice(),
            [Segment {
                len: None,
                source: Source::Backing,
                source_offset: 0,
            }]
        )
    }

    /// Drop all pending edits, restoring the identity mapping.
    pub fn reset(&mut self) {
        self.segments = vec![Segment::tail(0)];
        self.pending_size_delta = 0;
    }

    /// Net size change introduced by splices so far.
    pub fn pending_size_delta(&self) -> i64 {
        self.pending_size_delta
    }

    /// Logical size given the backing store's current size.
    pub fn size(&self, backing_size: u64) -> u64 {
        self.segments
            .iter()
            .map(|seg| seg.visible_len(backing_size))
            .sum()
    }

    /// Segment descriptions, in logical order.
    pub fn segments(&self) -> Vec<SegmentInfo> {
        self.segments
            .iter()
            .map(|seg| SegmentInfo {
                len: seg.len,
                is_scratch: matches!(seg.source, Source::Scratch(_)),
                source_offset: seg.source_offset,
            })
            .collect()
    }

    /// Read the logical bytes in `r`. An open end resolves against the
    /// logical size; reads past the logical end come back short. Finite
    /// backing segments whose virtual extent outruns the physical backing
    /// are zero-padded (the backing source is sparse).
    pub fn read(
        &self,
        r: ByteRange,
        backing_size: u64,
        backing: BackingRead<'_>,
        progress: Progress<'_>,
    ) -> Result<Vec<u8>> {
        let total = self.size(backing_size);
        let (start, end) = r.resolve(total);
        let end = end.min(total);
        if end <= start {
            return Ok(Vec::new());
        }

        let expected = end - start;
        let mut result = Vec::with_capacity(expected.min(1 << 20) as usize);
        let mut done: u64 = 0;
        progress(0, expected, b"")?;

        let mut pos: u64 = 0;
        for seg in &self.segments {
            let seg_len = seg.visible_len(backing_size);
            let lo = start.max(pos);
            let hi = end.min(pos + seg_len);
            if hi > lo {
                let mut offset = seg.source_offset + (lo - pos);
                let mut remaining = hi - lo;
                while remaining > 0 {
                    let step = remaining.min(self.read_chunk as u64) as usize;
                    let mut buf = vec![0u8; step];
                    match &seg.source {
                        Source::Backing => {
                            // Short reads past the physical end stay zero.
                            let mut filled = 0;
                            while filled < step {
                                let n = backing(offset + filled as u64, &mut buf[filled..])?;
                                if n == 0 {
                                    break;
                                }
                                filled += n;
                            }
                        }
                        Source::Scratch(scratch) => {
                            scratch.read_at(offset, &mut buf)?;
                        }
                    }
                    done += step as u64;
                    let consumed = progress(done, expected, &buf)?;
                    if !consumed {
                        result.extend_from_slice(&buf);
                    }
                    offset += step as u64;
                    remaining -= step as u64;
                }
            }
            pos += seg_len;
            if pos >= end {
                break;
            }
        }

        Ok(result)
    }

    /// Replace the logical bytes in `r` with `src`, landing the payload
    /// in a fresh scratch store.
    ///
    /// Returns the change-notification range: exactly the affected bytes,
    /// extended to the open end when the splice shifts everything after
    /// it (open-ended `r`, or payload width differing from the replaced
    /// width).
    pub fn write(&mut self, src: &[u8], r: ByteRange, backing_size: u64) -> Result<ByteRange> {
        let total = self.size(backing_size);
        let (start, end) = r.resolve(total);
        let start = start.min(total);
        let end = end.max(start).min(total);
        let replaced = end - start;

        let mut rebuilt: Vec<Segment> = Vec::with_capacity(self.segments.len() + 2);
        let mut inserted = false;
        let mut pos: u64 = 0;

        for seg in &self.segments {
            let seg_len = seg.visible_len(backing_size);
            let seg_end = pos + seg_len;

            // Keep the part before the splice.
            if pos < start {
                let keep = (start - pos).min(seg_len);
                if keep == seg_len {
                    rebuilt.push(seg.clone());
                } else if keep > 0 {
                    // Split: the head keeps its source, truncated.
                    rebuilt.push(Segment {
                        len: Some(keep),
                        source: seg.source.clone(),
                        source_offset: seg.source_offset,
                    });
                }
            }

            if !inserted && seg_end > start {
                if !src.is_empty() {
                    let scratch = ScratchFile::from_bytes(src, self.spool_threshold)?;
                    rebuilt.push(Segment {
                        len: Some(src.len() as u64),
                        source: Source::Scratch(Arc::new(scratch)),
                        source_offset: 0,
                    });
                }
                inserted = true;
            }

            // Keep the part after the splice. The open tail keeps its
            // open length with an advanced source offset.
            if seg_end > end && pos >= start {
                let consumed = end.saturating_sub(pos);
                if consumed == 0 {
                    rebuilt.push(seg.clone());
                } else {
                    rebuilt.push(Segment {
                        len: seg.len.map(|len| len - consumed),
                        source: seg.source.clone(),
                        source_offset: seg.source_offset + consumed,
                    });
                }
            } else if seg_end > end && seg_end > start {
                // start and end both fall inside this segment; the head
                // was pushed above, the remainder resumes past `end`.
                let consumed = end - pos;
                rebuilt.push(Segment {
                    len: seg.len.map(|len| len - consumed),
                    source: seg.source.clone(),
                    source_offset: seg.source_offset + consumed,
                });
            }

            pos = seg_end;
        }

        // Splice lands at or past the current logical end.
        if !inserted {
            if !src.is_empty() {
                let scratch = ScratchFile::from_bytes(src, self.spool_threshold)?;
                rebuilt.push(Segment {
                    len: Some(src.len() as u64),
                    source: Source::Scratch(Arc::new(scratch)),
                    source_offset: 0,
                });
            }
            inserted = true;
        }

        if rebuilt.is_empty() {
            // Never leave the list empty: an empty file is a zero-length
            // scratch-free log with a fully consumed tail.
            rebuilt.push(Segment {
                len: Some(0),
                source: Source::Backing,
                source_offset: backing_size,
            });
        }

        self.pending_size_delta += src.len() as i64 - replaced as i64;
        self.segments = rebuilt;

        tracing::debug!(
            start,
            replaced,
            inserted = src.len(),
            segments = self.segments.len(),
            "overlay splice"
        );

        let shifted = r.end.is_open() || src.len() as u64 != replaced;
        Ok(if shifted {
            ByteRange::from(start)
        } else {
            ByteRange::to(start, start + src.len() as u64)
        })
    }
}

// -- Tests --------------------------------------------------------------------
