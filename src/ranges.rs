//! Time range bookkeeping for bootstrap requests and results.
//!
//! A bootstrap request is a [`ShardTimeRanges`]: per shard, an ordered set of
//! non-overlapping half-open intervals. Fulfillment accounting works by
//! subtracting the ranges each fileset reader restored from a copy of the
//! request; whatever survives the subtraction is unfulfilled.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::types::ShardId;

/// A nanosecond-precision instant on the Unix epoch timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnixNanos(i64);

impl UnixNanos {
    /// Construct from raw nanoseconds since the epoch.
    pub const fn new(nanos: i64) -> Self {
        Self(nanos)
    }

    /// The raw nanosecond value.
    pub const fn get(&self) -> i64 {
        self.0
    }

    /// Round down to the closest multiple of `block_size`.
    pub fn truncate(&self, block_size: Duration) -> Self {
        let bs = duration_nanos(block_size);
        Self(self.0.div_euclid(bs) * bs)
    }

    /// Advance this instant by `d`.
    pub fn add(&self, d: Duration) -> Self {
        Self(self.0 + duration_nanos(d))
    }
}

impl fmt::Display for UnixNanos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A [`Duration`] as signed nanoseconds.
pub fn duration_nanos(d: Duration) -> i64 {
    d.as_nanos() as i64
}

/// A half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeRange {
    /// Inclusive start of the interval.
    pub start: UnixNanos,
    /// Exclusive end of the interval.
    pub end: UnixNanos,
}

impl TimeRange {
    /// Construct the interval `[start, end)`.
    pub const fn new(start: UnixNanos, end: UnixNanos) -> Self {
        Self { start, end }
    }

    /// `true` if the interval contains no instants.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// `true` if any instant is in both `self` and `other`.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The intersection of the two intervals, if non-empty.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let range = Self::new(self.start.max(other.start), self.end.min(other.end));
        (!range.is_empty()).then_some(range)
    }

    /// `true` if `other` lies entirely within `self`.
    pub fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// An ordered set of non-overlapping [`TimeRange`]s for a single shard.
///
/// Adjacent and overlapping ranges are coalesced on insert, so two range sets
/// covering the same instants always compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ranges(Vec<TimeRange>);

impl Ranges {
    /// An empty range set.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if the set covers no instants.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of disjoint intervals in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Add `range` to the set, merging it with any overlapping or adjacent
    /// intervals. Empty ranges are ignored.
    pub fn add_range(&mut self, range: TimeRange) {
        if range.is_empty() {
            return;
        }

        let mut merged = range;
        let mut out = Vec::with_capacity(self.0.len() + 1);
        for r in self.0.drain(..) {
            if r.end < merged.start || merged.end < r.start {
                out.push(r);
            } else {
                merged = TimeRange::new(merged.start.min(r.start), merged.end.max(r.end));
            }
        }
        out.push(merged);
        out.sort_unstable_by_key(|r| r.start);
        self.0 = out;
    }

    /// Add every interval in `other` to the set.
    pub fn add_ranges(&mut self, other: &Self) {
        for r in &other.0 {
            self.add_range(*r);
        }
    }

    /// Remove coverage of `range` from the set, splitting intervals that
    /// straddle its bounds.
    pub fn remove_range(&mut self, range: TimeRange) {
        if range.is_empty() {
            return;
        }

        let mut out = Vec::with_capacity(self.0.len() + 1);
        for r in self.0.drain(..) {
            if !r.overlaps(&range) {
                out.push(r);
                continue;
            }
            let left = TimeRange::new(r.start, range.start.min(r.end));
            if !left.is_empty() {
                out.push(left);
            }
            let right = TimeRange::new(range.end.max(r.start), r.end);
            if !right.is_empty() {
                out.push(right);
            }
        }
        self.0 = out;
    }

    /// Remove coverage of every interval in `other`.
    pub fn remove_ranges(&mut self, other: &Self) {
        for r in &other.0 {
            self.remove_range(*r);
        }
    }

    /// `true` if any interval in the set overlaps `range`.
    pub fn overlaps(&self, range: &TimeRange) -> bool {
        self.0.iter().any(|r| r.overlaps(range))
    }

    /// The portions of the set that fall within `range`.
    pub fn intersect(&self, range: &TimeRange) -> Self {
        Self(self.0.iter().filter_map(|r| r.intersect(range)).collect())
    }

    /// Iterate the disjoint intervals in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &TimeRange> {
        self.0.iter()
    }
}

impl FromIterator<TimeRange> for Ranges {
    fn from_iter<T: IntoIterator<Item = TimeRange>>(iter: T) -> Self {
        let mut ranges = Self::new();
        for r in iter {
            ranges.add_range(r);
        }
        ranges
    }
}

/// A mapping from shard to the time ranges requested (or restored) for it.
///
/// Shards whose range set becomes empty are dropped from the map, so two
/// values covering the same (shard, instant) pairs always compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardTimeRanges(BTreeMap<ShardId, Ranges>);

impl ShardTimeRanges {
    /// An empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if no shard has any coverage.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(Ranges::is_empty)
    }

    /// The range set for `shard`, if it has any coverage.
    pub fn get(&self, shard: ShardId) -> Option<&Ranges> {
        self.0.get(&shard)
    }

    /// The range set for `shard`, created empty if absent.
    pub fn get_or_add(&mut self, shard: ShardId) -> &mut Ranges {
        self.0.entry(shard).or_default()
    }

    /// Add `range` to `shard`'s coverage.
    pub fn add_range(&mut self, shard: ShardId, range: TimeRange) {
        if range.is_empty() {
            return;
        }
        self.get_or_add(shard).add_range(range);
    }

    /// Replace `shard`'s coverage with `ranges`.
    pub fn set(&mut self, shard: ShardId, ranges: Ranges) {
        if ranges.is_empty() {
            self.0.remove(&shard);
        } else {
            self.0.insert(shard, ranges);
        }
    }

    /// Union `other` into `self`, per shard.
    pub fn add_ranges(&mut self, other: &Self) {
        for (&shard, ranges) in &other.0 {
            self.get_or_add(shard).add_ranges(ranges);
        }
    }

    /// Remove `other`'s coverage from `self`, per shard. Shards left with no
    /// coverage are dropped.
    pub fn subtract(&mut self, other: &Self) {
        for (&shard, ranges) in &other.0 {
            if let Some(mine) = self.0.get_mut(&shard) {
                mine.remove_ranges(ranges);
            }
        }
        self.0.retain(|_, ranges| !ranges.is_empty());
    }

    /// `true` if `shard`'s coverage overlaps `range`.
    pub fn overlaps(&self, shard: ShardId, range: &TimeRange) -> bool {
        self.0.get(&shard).is_some_and(|r| r.overlaps(range))
    }

    /// `true` if `self` covers every (shard, instant) pair that `other` does.
    pub fn covers(&self, other: &Self) -> bool {
        let mut remainder = other.clone();
        remainder.subtract(self);
        remainder.is_empty()
    }

    /// Iterate `(shard, ranges)` pairs in ascending shard order.
    pub fn iter(&self) -> impl Iterator<Item = (ShardId, &Ranges)> {
        self.0.iter().map(|(&shard, ranges)| (shard, ranges))
    }

    /// Iterate the shards with coverage, in ascending order.
    pub fn shards(&self) -> impl Iterator<Item = ShardId> + '_ {
        self.0.keys().copied()
    }

    /// The smallest interval containing all coverage across all shards, if
    /// there is any.
    pub fn minmax(&self) -> Option<TimeRange> {
        let mut envelope: Option<TimeRange> = None;
        for ranges in self.0.values() {
            for r in ranges.iter() {
                envelope = Some(match envelope {
                    None => *r,
                    Some(e) => TimeRange::new(e.start.min(r.start), e.end.max(r.end)),
                });
            }
        }
        envelope
    }
}

impl FromIterator<(ShardId, TimeRange)> for ShardTimeRanges {
    fn from_iter<T: IntoIterator<Item = (ShardId, TimeRange)>>(iter: T) -> Self {
        let mut ranges = Self::new();
        for (shard, range) in iter {
            ranges.add_range(shard, range);
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours(h: i64) -> UnixNanos {
        UnixNanos::new(h * 3_600 * 1_000_000_000)
    }

    fn range(start_h: i64, end_h: i64) -> TimeRange {
        TimeRange::new(hours(start_h), hours(end_h))
    }

    #[test]
    fn truncate_rounds_down_to_block() {
        let block = Duration::from_secs(2 * 3_600);
        assert_eq!(hours(3).truncate(block), hours(2));
        assert_eq!(hours(4).truncate(block), hours(4));
        assert_eq!(UnixNanos::new(1).truncate(block), UnixNanos::new(0));
    }

    #[test]
    fn add_range_merges_overlapping_and_adjacent() {
        let mut ranges = Ranges::new();
        ranges.add_range(range(0, 2));
        ranges.add_range(range(4, 6));
        assert_eq!(ranges.len(), 2);

        // Adjacent to the first, overlapping the second.
        ranges.add_range(range(2, 5));
        assert_eq!(ranges.iter().copied().collect::<Vec<_>>(), vec![range(0, 6)]);
    }

    #[test]
    fn remove_range_splits_straddled_intervals() {
        let mut ranges = Ranges::new();
        ranges.add_range(range(0, 6));
        ranges.remove_range(range(2, 4));
        assert_eq!(
            ranges.iter().copied().collect::<Vec<_>>(),
            vec![range(0, 2), range(4, 6)]
        );

        ranges.remove_range(range(0, 2));
        ranges.remove_range(range(4, 6));
        assert!(ranges.is_empty());
    }

    #[test]
    fn intersect_clips_to_window() {
        let ranges: Ranges = [range(0, 2), range(3, 6)].into_iter().collect();
        let clipped = ranges.intersect(&range(1, 4));
        assert_eq!(
            clipped.iter().copied().collect::<Vec<_>>(),
            vec![range(1, 2), range(3, 4)]
        );
    }

    #[test]
    fn subtract_drops_empty_shards() {
        let mut request: ShardTimeRanges =
            [(0, range(0, 4)), (1, range(0, 2))].into_iter().collect();
        let restored: ShardTimeRanges = [(1, range(0, 2))].into_iter().collect();

        request.subtract(&restored);
        assert_eq!(request.shards().collect::<Vec<_>>(), vec![0]);
        assert!(!request.is_empty());

        let rest: ShardTimeRanges = [(0, range(0, 4))].into_iter().collect();
        request.subtract(&rest);
        assert!(request.is_empty());
    }

    #[test]
    fn covers_requires_full_coverage() {
        let fulfilled: ShardTimeRanges =
            [(0, range(0, 4)), (1, range(0, 4))].into_iter().collect();
        let subset: ShardTimeRanges = [(0, range(1, 3))].into_iter().collect();
        let disjoint: ShardTimeRanges = [(2, range(0, 1))].into_iter().collect();

        assert!(fulfilled.covers(&subset));
        assert!(!subset.covers(&fulfilled));
        assert!(!fulfilled.covers(&disjoint));
    }

    #[test]
    fn minmax_spans_all_shards() {
        let ranges: ShardTimeRanges =
            [(0, range(2, 4)), (7, range(0, 1))].into_iter().collect();
        assert_eq!(ranges.minmax(), Some(range(0, 4)));
        assert_eq!(ShardTimeRanges::new().minmax(), None);
    }
}
