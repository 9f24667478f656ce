//! Sorted, merged u32 range set with binary-search membership queries.
//!
//! Stands in for the segment tree the original implementation uses; a
//! merged sorted range vector gives the same O(log n) membership contract
//! since blocklist ranges are static between reloads.

pub struct RangeIndex {
    ranges: Vec<(u32, u32)>,
}

impl RangeIndex {
    pub fn empty() -> Self {
        RangeIndex { ranges: Vec::new() }
    }

    pub fn build(mut ranges: Vec<(u32, u32)>) -> Self {
        ranges.sort_unstable_by_key(|&(first, _)| first);
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(ranges.len());
        for (first, last) in ranges {
            if let Some(top) = merged.last_mut() {
                if first <= top.1.saturating_add(1) {
                    top.1 = top.1.max(last);
                    continue;
                }
            }
            merged.push((first, last));
        }
        RangeIndex { ranges: merged }
    }

    pub fn contains(&self, value: u32) -> bool {
        match self.ranges.partition_point(|&(first, _)| first <= value) {
            0 => false,
            n => value <= self.ranges[n - 1].1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_overlapping_and_adjacent_ranges() {
        let idx = RangeIndex::build(vec![(10, 20), (21, 30), (100, 110)]);
        assert!(idx.contains(15));
        assert!(idx.contains(25));
        assert!(idx.contains(105));
        assert!(!idx.contains(50));
        assert!(!idx.contains(111));
    }

    #[test]
    fn empty_index_contains_nothing() {
        let idx = RangeIndex::empty();
        assert!(!idx.contains(0));
        assert!(!idx.contains(u32::MAX));
    }
}
