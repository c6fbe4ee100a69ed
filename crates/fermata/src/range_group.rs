//! Sets of vocabulary sub-ranges describing "currently legal" tokens.
//!
//! A [`RangeGroup`] is the unit the grammar works in: the tokenizer builds a
//! handful of named groups once per configuration (pitch, velocity, duration,
//! time-shift, ...), the grammar state machine swaps between them, and the
//! sampling pipeline restricts its candidate set to the active group's
//! members. Groups are never mutated concurrently with reads; structural
//! changes happen at construction time, followed by an explicit
//! [`RangeGroup::update_cache`] before the group is used for enumeration.

/// An inclusive `[min, max]` id range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// Lowest member id.
    pub min: i32,
    /// Highest member id.
    pub max: i32,
}

/// An ordered set of disjoint inclusive integer ranges over the vocabulary.
///
/// Invariant: ranges are sorted ascending and non-overlapping (maintained by
/// [`insert`](Self::insert), which merges overlapping and adjacent ranges).
///
/// Size and enumeration are served from a cached flat index list that must be
/// refreshed with [`update_cache`](Self::update_cache) after any structural
/// change. [`len`](Self::len) and [`ids`](Self::ids) debug-assert the cache is
/// current.
#[derive(Debug, Clone, Default)]
pub struct RangeGroup {
    ranges: Vec<Range>,
    cache: Vec<i32>,
    cache_dirty: bool,
}

impl RangeGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the inclusive range `[min, max]`, merging it with any existing
    /// range it overlaps or abuts.
    ///
    /// # Panics
    ///
    /// Panics if `min > max`.
    pub fn insert(&mut self, min: i32, max: i32) {
        assert!(min <= max, "inverted range [{min}, {max}]");
        let mut merged = Range { min, max };
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        let mut placed = false;
        for &r in &self.ranges {
            if (r.max as i64) + 1 < merged.min as i64 {
                out.push(r);
            } else if (merged.max as i64) + 1 < r.min as i64 {
                if !placed {
                    out.push(merged);
                    placed = true;
                }
                out.push(r);
            } else {
                merged.min = merged.min.min(r.min);
                merged.max = merged.max.max(r.max);
            }
        }
        if !placed {
            out.push(merged);
        }
        self.ranges = out;
        self.cache_dirty = true;
    }

    /// Inserts a single id.
    pub fn insert_id(&mut self, id: i32) {
        self.insert(id, id);
    }

    /// Adds every member of `other` to this group.
    pub fn union_with(&mut self, other: &RangeGroup) {
        for &r in &other.ranges {
            self.insert(r.min, r.max);
        }
    }

    /// Returns whether `id` is a member.
    pub fn contains(&self, id: i32) -> bool {
        self.ranges
            .binary_search_by(|r| {
                if id < r.min {
                    std::cmp::Ordering::Greater
                } else if id > r.max {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Rebuilds the cached member-id list.
    ///
    /// Must be called after structural changes and before [`len`](Self::len)
    /// or [`ids`](Self::ids).
    pub fn update_cache(&mut self) {
        self.cache.clear();
        for r in &self.ranges {
            self.cache.extend(r.min..=r.max);
        }
        self.cache_dirty = false;
    }

    /// Number of member ids, from the cache.
    pub fn len(&self) -> usize {
        debug_assert!(!self.cache_dirty, "range group read before update_cache");
        self.cache.len()
    }

    /// Returns whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// All member ids in ascending order, from the cache.
    pub fn ids(&self) -> &[i32] {
        debug_assert!(!self.cache_dirty, "range group read before update_cache");
        &self.cache
    }

    /// The underlying sorted disjoint ranges.
    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_ranges_sorted_and_disjoint() {
        let mut g = RangeGroup::new();
        g.insert(10, 20);
        g.insert(40, 50);
        g.insert(0, 5);
        assert_eq!(
            g.ranges(),
            &[
                Range { min: 0, max: 5 },
                Range { min: 10, max: 20 },
                Range { min: 40, max: 50 }
            ]
        );
    }

    #[test]
    fn test_insert_merges_overlapping_ranges() {
        let mut g = RangeGroup::new();
        g.insert(10, 20);
        g.insert(15, 30);
        assert_eq!(g.ranges(), &[Range { min: 10, max: 30 }]);
    }

    #[test]
    fn test_insert_merges_adjacent_ranges() {
        let mut g = RangeGroup::new();
        g.insert(10, 20);
        g.insert(21, 25);
        assert_eq!(g.ranges(), &[Range { min: 10, max: 25 }]);
    }

    #[test]
    fn test_insert_bridges_multiple_ranges() {
        let mut g = RangeGroup::new();
        g.insert(0, 2);
        g.insert(10, 12);
        g.insert(20, 22);
        g.insert(1, 21);
        assert_eq!(g.ranges(), &[Range { min: 0, max: 22 }]);
    }

    #[test]
    fn test_contains() {
        let mut g = RangeGroup::new();
        g.insert(10, 20);
        g.insert(30, 30);
        assert!(g.contains(10));
        assert!(g.contains(15));
        assert!(g.contains(20));
        assert!(g.contains(30));
        assert!(!g.contains(9));
        assert!(!g.contains(21));
        assert!(!g.contains(29));
    }

    #[test]
    fn test_cache_enumerates_all_members() {
        let mut g = RangeGroup::new();
        g.insert(60, 63);
        g.insert(70, 71);
        g.update_cache();
        assert_eq!(g.len(), 6);
        assert_eq!(g.ids(), &[60, 61, 62, 63, 70, 71]);
    }

    #[test]
    fn test_union_with() {
        let mut a = RangeGroup::new();
        a.insert(0, 4);
        let mut b = RangeGroup::new();
        b.insert(3, 8);
        b.insert(20, 22);
        a.union_with(&b);
        a.update_cache();
        assert_eq!(a.ranges(), &[Range { min: 0, max: 8 }, Range { min: 20, max: 22 }]);
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn test_empty_group() {
        let mut g = RangeGroup::new();
        assert!(g.is_empty());
        g.update_cache();
        assert_eq!(g.len(), 0);
        assert!(!g.contains(0));
    }
}
