//! Deterministic splitting of an index range into contiguous chunks.
//!
//! Chunk boundaries decide which rows of a shared result each work item may
//! write, so every split produced here is gapless and non-overlapping over
//! `[0, total)`. [`is_exact_cover`] checks that property for ranges from
//! elsewhere.
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::PipeError;

/// Where the units left over by `total / parts` go.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Remainder {
    /// All parts get `total / parts`, the last one also takes the remainder.
    #[default]
    AbsorbLast,
    /// The first `total % parts` parts get one extra unit each.
    Spread,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Partitioner {
    parts: usize,
    remainder: Remainder,
}

impl Partitioner {
    pub fn new(parts: usize) -> Result<Self, PipeError> {
        if parts == 0 {
            return Err(PipeError::InvalidConfiguration(
                "cannot split into 0 parts".to_string(),
            ));
        }
        Ok(Self {
            parts,
            remainder: Remainder::default(),
        })
    }

    pub fn with_remainder(mut self, remainder: Remainder) -> Self {
        self.remainder = remainder;
        self
    }

    pub fn parts(&self) -> usize {
        self.parts
    }

    pub fn remainder(&self) -> Remainder {
        self.remainder
    }

    /// Split `[0, total)` into at most `parts` contiguous ranges.
    ///
    /// With fewer units than parts, every unit becomes its own range and the
    /// surplus parts get nothing.
    pub fn split(&self, total: usize) -> Vec<Range<usize>> {
        if total == 0 {
            return Vec::new();
        }
        if total < self.parts {
            return (0..total).map(|i| i..i + 1).collect();
        }

        let size = total / self.parts;
        let extra = total % self.parts;
        let mut ranges = Vec::with_capacity(self.parts);
        let mut start = 0;
        for i in 0..self.parts {
            let len = match self.remainder {
                Remainder::AbsorbLast if i == self.parts - 1 => total - start,
                Remainder::AbsorbLast => size,
                Remainder::Spread => size + usize::from(i < extra),
            };
            ranges.push(start..start + len);
            start += len;
        }
        debug_assert!(is_exact_cover(&ranges, total));
        ranges
    }

    /// Like [`split`](Self::split), but always returns exactly `parts` ranges so
    /// each worker gets one. Surplus workers receive empty `total..total` ranges.
    pub fn assign(&self, total: usize) -> Vec<Range<usize>> {
        let mut ranges = self.split(total);
        ranges.resize(self.parts, total..total);
        ranges
    }
}

/// Split `[0, total)` into `parts` ranges, the last one absorbing the remainder.
pub fn split(total: usize, parts: usize) -> Result<Vec<Range<usize>>, PipeError> {
    Ok(Partitioner::new(parts)?.split(total))
}

/// `true` iff `ranges` are non-empty, ordered, touch end to start and together
/// cover exactly `[0, total)`.
pub fn is_exact_cover(ranges: &[Range<usize>], total: usize) -> bool {
    let mut next = 0;
    for range in ranges {
        if range.start != next || range.end <= range.start {
            return false;
        }
        next = range.end;
    }
    next == total
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_parts_is_invalid() {
        assert!(matches!(
            split(10, 0),
            Err(PipeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn empty_total_yields_nothing() {
        assert!(split(0, 4).unwrap().is_empty());
    }

    #[test]
    fn fewer_units_than_parts() {
        assert_eq!(split(3, 8).unwrap(), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn last_part_absorbs_remainder() {
        assert_eq!(split(10, 4).unwrap(), vec![0..2, 2..4, 4..6, 6..10]);
        assert_eq!(split(8, 4).unwrap(), vec![0..2, 2..4, 4..6, 6..8]);
    }

    #[test]
    fn spread_hands_out_remainder_first() {
        let ranges = Partitioner::new(4)
            .unwrap()
            .with_remainder(Remainder::Spread)
            .split(10);
        assert_eq!(ranges, vec![0..3, 3..6, 6..8, 8..10]);
    }

    #[test]
    fn assign_pads_surplus_workers() {
        let partitioner = Partitioner::new(4).unwrap();
        assert_eq!(partitioner.assign(2), vec![0..1, 1..2, 2..2, 2..2]);
        assert_eq!(partitioner.assign(0), vec![0..0; 4]);
        assert_eq!(partitioner.assign(9), partitioner.split(9));
    }

    #[test]
    fn matrix_rows_split_disjoint() {
        let ranges = split(500, 8).unwrap();
        assert_eq!(ranges.len(), 8);
        assert!(is_exact_cover(&ranges, 500));
        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                assert!(a.end <= b.start || b.end <= a.start, "{a:?} overlaps {b:?}");
            }
        }
        assert_eq!(ranges[7], 434..500);
    }

    #[test]
    fn cover_check_spots_gaps_and_overlaps() {
        assert!(is_exact_cover(&[0..2, 2..5], 5));
        assert!(!is_exact_cover(&[0..2, 3..5], 5));
        assert!(!is_exact_cover(&[0..3, 2..5], 5));
        assert!(!is_exact_cover(&[0..2, 2..4], 5));
        assert!(is_exact_cover(&[], 0));
    }

    proptest! {
        #[test]
        fn split_covers_range_exactly(total in 0usize..5_000, parts in 1usize..64) {
            let ranges = split(total, parts).unwrap();
            prop_assert!(is_exact_cover(&ranges, total));
            prop_assert_eq!(ranges.len(), total.min(parts));
            if total >= parts {
                let size = total / parts;
                for range in &ranges[..parts - 1] {
                    prop_assert_eq!(range.len(), size);
                }
                prop_assert_eq!(ranges[parts - 1].len(), total - size * (parts - 1));
            }
        }

        #[test]
        fn spread_sizes_stay_balanced(total in 0usize..5_000, parts in 1usize..64) {
            let ranges = Partitioner::new(parts)
                .unwrap()
                .with_remainder(Remainder::Spread)
                .split(total);
            prop_assert!(is_exact_cover(&ranges, total));
            let ceil = total.div_ceil(parts);
            let min = ranges.iter().map(|r| r.len()).min().unwrap_or(0);
            let max = ranges.iter().map(|r| r.len()).max().unwrap_or(0);
            prop_assert!(max <= ceil.max(1));
            prop_assert!(max - min <= 1);
        }
    }
}
