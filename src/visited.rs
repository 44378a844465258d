//! Bounded record of CI runs already inspected.
//!
//! A run is identified by its id together with the time it finished, so a
//! retried run (same id, later finish time) is inspected once more while a
//! run seen before is skipped without any further API calls.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct VisitedBuildSet {
    max: usize,
    entries: HashSet<(i64, DateTime<Utc>)>,
}

impl VisitedBuildSet {
    /// `max` is clamped to at least 2 so trimming always keeps something.
    pub fn new(max: usize) -> Self {
        Self {
            max: max.max(2),
            entries: HashSet::new(),
        }
    }

    pub fn contains(&self, id: i64, finished_at: DateTime<Utc>) -> bool {
        self.entries.contains(&(id, finished_at))
    }

    /// Record a run. When the set grows past its maximum it is cut down to
    /// the most recently finished half.
    pub fn insert(&mut self, id: i64, finished_at: DateTime<Utc>) {
        self.entries.insert((id, finished_at));
        if self.entries.len() > self.max {
            self.trim();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn trim(&mut self) {
        let keep = self.max / 2;
        let mut all: Vec<_> = self.entries.drain().collect();
        // Newest first; id breaks ties so the result is deterministic.
        all.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
        all.truncate(keep);
        self.entries.extend(all);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn same_id_new_finish_time_is_distinct() {
        let mut set = VisitedBuildSet::new(10);
        set.insert(7, at(1));
        assert!(set.contains(7, at(1)));
        assert!(!set.contains(7, at(2)));
    }

    #[test]
    fn stays_untrimmed_at_max() {
        let mut set = VisitedBuildSet::new(4);
        for i in 0..4 {
            set.insert(i, at(i));
        }
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn exceeding_max_keeps_newest_half() {
        let mut set = VisitedBuildSet::new(10);
        for i in 0..11 {
            set.insert(i, at(i));
        }
        assert_eq!(set.len(), 5);
        for i in 6..11 {
            assert!(set.contains(i, at(i)), "missing newest entry {}", i);
        }
        for i in 0..6 {
            assert!(!set.contains(i, at(i)), "kept old entry {}", i);
        }
    }

    #[test]
    fn trimming_uses_finish_time_not_insertion_order() {
        let mut set = VisitedBuildSet::new(4);
        set.insert(1, at(50));
        set.insert(2, at(10));
        set.insert(3, at(40));
        set.insert(4, at(20));
        set.insert(5, at(30));
        assert_eq!(set.len(), 2);
        assert!(set.contains(1, at(50)));
        assert!(set.contains(3, at(40)));
    }
}
