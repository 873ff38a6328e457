//! Half-open byte ranges with an open-ended upper sentinel.
//!
//! A `ByteRange` is `[start, end)` where `end` may be `End::Open`, meaning
//! "to the end of whatever is readable". The three operations here
//! (translate, intersect, offset) branch on the sentinel explicitly; they
//! never coerce `Open` to a finite stand-in value.

use std::fmt;

/// Upper bound of a byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum End {
    /// Exclusive finite bound.
    At(u64),
    /// Open-ended: extends to the end of the readable data.
    Open,
}

impl End {
    /// Resolve the bound against a known total size.
    pub fn or(self, size: u64) -> u64 {
        match self {
            End::At(n) => n,
            End::Open => size,
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, End::Open)
    }
}

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: End,
}

/// The identity range `[0, Open)`.
pub const ALL: ByteRange = ByteRange {
    start: 0,
    end: End::Open,
};

impl ByteRange {
    pub fn new(start: u64, end: End) -> Self {
        ByteRange { start, end }
    }

    /// Finite range `[start, end)`.
    pub fn to(start: u64, end: u64) -> Self {
        ByteRange {
            start,
            end: End::At(end),
        }
    }

    /// Open range `[start, Open)`.
    pub fn from(start: u64) -> Self {
        ByteRange {
            start,
            end: End::Open,
        }
    }

    /// True for the identity range `[0, Open)`.
    pub fn is_all(&self) -> bool {
        self.start == 0 && self.end.is_open()
    }

    pub fn is_empty(&self) -> bool {
        match self.end {
            End::At(e) => e <= self.start,
            End::Open => false,
        }
    }

    /// Width in bytes, `None` when open-ended.
    pub fn width(&self) -> Option<u64> {
        match self.end {
            End::At(e) => Some(e.saturating_sub(self.start)),
            End::Open => None,
        }
    }

    /// Express `inner` (given in this range's local coordinates) in the
    /// coordinate space this range lives in.
    ///
    /// The start is shifted by `self.start`. A finite inner end is shifted
    /// and then capped by a finite outer end; an open inner end stays open
    /// (the open bound wins).
    pub fn translate(&self, inner: ByteRange) -> ByteRange {
        let start = self.start + inner.start;
        let end = match inner.end {
            End::At(ie) => {
                let shifted = self.start + ie;
                match self.end {
                    End::At(oe) => End::At(shifted.min(oe)),
                    End::Open => End::At(shifted),
                }
            }
            End::Open => End::Open,
        };
        ByteRange { start, end }
    }

    /// Intersection of two ranges, `None` when disjoint or empty.
    pub fn intersect(&self, other: ByteRange) -> Option<ByteRange> {
        let start = self.start.max(other.start);
        let end = match (self.end, other.end) {
            (End::At(a), End::At(b)) => End::At(a.min(b)),
            (End::At(a), End::Open) | (End::Open, End::At(a)) => End::At(a),
            (End::Open, End::Open) => End::Open,
        };
        match end {
            End::At(e) if e <= start => None,
            _ => Some(ByteRange { start, end }),
        }
    }

    /// Shift both endpoints by `delta`; the open sentinel is preserved.
    ///
    /// The caller guarantees the shifted start does not underflow (ranges
    /// are intersected with the local window before being offset back).
    pub fn offset(&self, delta: i64) -> ByteRange {
        let shift = |n: u64| -> u64 {
            debug_assert!(delta >= 0 || n >= delta.unsigned_abs());
            if delta >= 0 {
                n + delta as u64
            } else {
                n.saturating_sub(delta.unsigned_abs())
            }
        };
        ByteRange {
            start: shift(self.start),
            end: match self.end {
                End::At(e) => End::At(shift(e)),
                End::Open => End::Open,
            },
        }
    }

    /// Resolve against a known total size, yielding concrete `(start, end)`.
    /// A finite end is kept as-is (reads past the physical end are sparse).
    pub fn resolve(&self, size: u64) -> (u64, u64) {
        (self.start, self.end.or(size))
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start
            && match self.end {
                End::At(e) => offset < e,
                End::Open => true,
            }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            End::At(e) => write!(f, "{}..{}", self.start, e),
            End::Open => write!(f, "{}...", self.start),
        }
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_finite_inner_finite_outer() {
        let outer = ByteRange::to(10, 20);
        let inner = ByteRange::to(2, 6);
        assert_eq!(outer.translate(inner), ByteRange::to(12, 16));
    }

    #[test]
    fn test_translate_caps_at_outer_end() {
        let outer = ByteRange::to(10, 20);
        let inner = ByteRange::to(5, 50);
        assert_eq!(outer.translate(inner), ByteRange::to(15, 20));
    }

    #[test]
    fn test_translate_open_inner_wins() {
        let outer = ByteRange::to(10, 20);
        let inner = ByteRange::from(4);
        assert_eq!(outer.translate(inner), ByteRange::from(14));
    }

    #[test]
    fn test_translate_open_outer_keeps_finite_inner() {
        let outer = ByteRange::from(10);
        let inner = ByteRange::to(2, 6);
        assert_eq!(outer.translate(inner), ByteRange::to(12, 16));
    }

    #[test]
    fn test_translate_composes() {
        // translate(a, translate(b, r)) == translate(translate(a, b), r)
        let cases = [
            (ByteRange::to(10, 40), ByteRange::to(5, 25), ByteRange::to(1, 9)),
            (ByteRange::from(10), ByteRange::to(0, 8), ByteRange::from(3)),
            (ByteRange::to(10, 20), ByteRange::from(0), ByteRange::to(0, 5)),
        ];
        for (a, b, r) in cases {
            assert_eq!(a.translate(b.translate(r)), a.translate(b).translate(r));
        }
    }

    #[test]
    fn test_intersect_disjoint() {
        assert_eq!(ByteRange::to(0, 5).intersect(ByteRange::to(5, 10)), None);
        assert_eq!(ByteRange::to(8, 9).intersect(ByteRange::to(0, 4)), None);
    }

    #[test]
    fn test_intersect_overlap() {
        assert_eq!(
            ByteRange::to(0, 10).intersect(ByteRange::to(5, 15)),
            Some(ByteRange::to(5, 10))
        );
        assert_eq!(
            ByteRange::from(5).intersect(ByteRange::to(0, 8)),
            Some(ByteRange::to(5, 8))
        );
        assert_eq!(
            ByteRange::from(5).intersect(ByteRange::from(2)),
            Some(ByteRange::from(5))
        );
    }

    #[test]
    fn test_offset_preserves_open_end() {
        assert_eq!(ByteRange::from(10).offset(-10), ByteRange::from(0));
        assert_eq!(ByteRange::to(10, 20).offset(5), ByteRange::to(15, 25));
    }

    #[test]
    fn test_resolve_against_size() {
        assert_eq!(ByteRange::from(4).resolve(16), (4, 16));
        assert_eq!(ByteRange::to(4, 32).resolve(16), (4, 32));
    }

    #[test]
    fn test_width() {
        assert_eq!(ByteRange::to(4, 6).width(), Some(2));
        assert_eq!(ByteRange::from(4).width(), None);
        assert!(ByteRange::to(0, 0).is_empty());
    }
}
