//! Per-key timed lookup shared by the controller, program and bend-range collectors.

use std::collections::HashMap;
use std::hash::Hash;

/// `(time, value)` entries bucketed by key and sorted by time.
///
/// Entries with equal times keep their insertion order, so "latest at or
/// before t" returns the one inserted last.
#[derive(Debug, Clone)]
pub struct TimedIndex<K, V> {
    buckets: HashMap<K, Vec<(f64, V)>>,
}

impl<K: Eq + Hash, V> TimedIndex<K, V> {
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
        }
    }

    /// Inserts keeping the bucket sorted by time.
    pub fn insert(&mut self, key: K, time: f64, value: V) {
        let bucket = self.buckets.entry(key).or_default();
        let at = bucket.partition_point(|(t, _)| *t <= time);
        bucket.insert(at, (time, value));
    }

    /// Value of the entry with the greatest time `<= time`.
    pub fn latest_at(&self, key: &K, time: f64) -> Option<&V> {
        let bucket = self.buckets.get(key)?;
        let end = bucket.partition_point(|(t, _)| *t <= time);
        bucket[..end].last().map(|(_, value)| value)
    }

    /// Entries with `from <= time < to`.
    pub fn between(&self, key: &K, from: f64, to: f64) -> &[(f64, V)] {
        let Some(bucket) = self.buckets.get(key) else {
            return &[];
        };
        let start = bucket.partition_point(|(t, _)| *t < from);
        let end = bucket.partition_point(|(t, _)| *t < to).max(start);
        &bucket[start..end]
    }

    pub fn entries(&self, key: &K) -> &[(f64, V)] {
        self.buckets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(Vec::is_empty)
    }
}

impl<K: Eq + Hash, V> Default for TimedIndex<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, f64, V)> for TimedIndex<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, f64, V)>>(iter: I) -> Self {
        let mut buckets: HashMap<K, Vec<(f64, V)>> = HashMap::new();
        for (key, time, value) in iter {
            buckets.entry(key).or_default().push((time, value));
        }
        for bucket in buckets.values_mut() {
            bucket.sort_by(|a, b| a.0.total_cmp(&b.0));
        }
        Self { buckets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> TimedIndex<u8, u8> {
        [(0u8, 1.0, 10u8), (0, 0.0, 5), (0, 2.0, 20), (1, 0.5, 99), (0, 2.0, 21)]
            .into_iter()
            .collect()
    }

    #[test]
    fn latest_at_finds_greatest_time_not_after() {
        let index = index();
        assert_eq!(index.latest_at(&0, 1.5), Some(&10));
        assert_eq!(index.latest_at(&0, 1.0), Some(&10));
        assert_eq!(index.latest_at(&1, 0.4), None);
        assert_eq!(index.latest_at(&2, 9.0), None);
    }

    #[test]
    fn equal_times_resolve_to_last_inserted() {
        assert_eq!(index().latest_at(&0, 2.0), Some(&21));
    }

    #[test]
    fn between_is_half_open() {
        let index = index();
        let values: Vec<u8> = index.between(&0, 1.0, 2.0).iter().map(|e| e.1).collect();
        assert_eq!(values, vec![10]);
        assert!(index.between(&0, 2.5, 1.0).is_empty());
        assert!(index.between(&7, 0.0, 1.0).is_empty());
    }

    #[test]
    fn insert_keeps_order() {
        let mut index = TimedIndex::new();
        index.insert("a", 2.0, 'x');
        index.insert("a", 1.0, 'y');
        index.insert("a", 2.0, 'z');
        assert_eq!(index.entries(&"a"), &[(1.0, 'y'), (2.0, 'x'), (2.0, 'z')]);
        assert_eq!(index.len(), 3);
        assert!(!index.is_empty());
    }
}
