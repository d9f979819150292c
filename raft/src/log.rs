//! The replicated log. Indexing is 1-based: logical index 1 is a permanent
//! sentinel `{term: 0, op: None}`, so `log.size()` is never zero and
//! `prev_log_index` can always be resolved against a real entry.

use serde::Deserialize;
use serde::Serialize;

use crate::types::LogIndex;
use crate::types::Term;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry<Op> {
    pub term: Term,
    pub op: Option<Op>,
}

impl<Op> Entry<Op> {
    fn sentinel() -> Self {
        Self { term: 0, op: None }
    }
}

#[derive(Debug)]
pub struct Log<Op> {
    entries: Vec<Entry<Op>>,
}

impl<Op: Clone> Log<Op> {
    pub fn new() -> Self {
        Self {
            entries: vec![Entry::sentinel()],
        }
    }

    /// Number of entries, including the sentinel. Never zero.
    pub fn size(&self) -> LogIndex {
        self.entries.len() as LogIndex
    }

    pub fn get(&self, index: LogIndex) -> Option<&Entry<Op>> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    pub fn last(&self) -> &Entry<Op> {
        self.entries.last().expect("log always holds the sentinel")
    }

    pub fn append(&mut self, entries: impl IntoIterator<Item = Entry<Op>>) {
        self.entries.extend(entries);
    }

    /// Keep logical indices `1..=index`, dropping anything past it.
    pub fn truncate(&mut self, index: LogIndex) {
        self.entries.truncate(index as usize);
    }

    /// Entries from `index` to the end, inclusive.
    pub fn from_index(&self, index: LogIndex) -> Vec<Entry<Op>> {
        if index == 0 {
            return Vec::new();
        }
        let start = (index - 1) as usize;
        if start >= self.entries.len() {
            Vec::new()
        } else {
            self.entries[start..].to_vec()
        }
    }
}

impl<Op: Clone> Default for Log<Op> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_only_the_sentinel() {
        let log: Log<u32> = Log::new();
        assert_eq!(log.size(), 1);
        assert_eq!(log.last().term, 0);
        assert_eq!(log.last().op, None);
    }

    #[test]
    fn append_and_get_are_one_based() {
        let mut log = Log::new();
        log.append([Entry { term: 1, op: Some(10) }, Entry { term: 1, op: Some(20) }]);
        assert_eq!(log.size(), 3);
        assert_eq!(log.get(1).unwrap().op, None);
        assert_eq!(log.get(2).unwrap().op, Some(10));
        assert_eq!(log.get(3).unwrap().op, Some(20));
        assert_eq!(log.get(4), None);
        assert_eq!(log.get(0), None);
    }

    #[test]
    fn truncate_drops_the_suffix() {
        let mut log = Log::new();
        log.append([Entry { term: 1, op: Some(10) }, Entry { term: 1, op: Some(20) }]);
        log.truncate(2);
        assert_eq!(log.size(), 2);
        assert_eq!(log.get(2).unwrap().op, Some(10));
    }

    #[test]
    fn from_index_returns_the_suffix_inclusive() {
        let mut log = Log::new();
        log.append([Entry { term: 1, op: Some(10) }, Entry { term: 2, op: Some(20) }]);
        let suffix = log.from_index(2);
        assert_eq!(suffix.len(), 2);
        assert_eq!(suffix[0].op, Some(10));
        let empty = log.from_index(4);
        assert!(empty.is_empty());
    }
}
