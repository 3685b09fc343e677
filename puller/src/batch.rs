use crate::model::Record;

/// Records accumulated since the last flush.
///
/// The threshold is a soft cap: callers check [`Batch::is_full`] between
/// pages, so a batch may exceed it by up to one page of records.
#[derive(Debug)]
pub struct Batch {
    records: Vec<Record>,
    threshold: usize,
}

impl Batch {
    pub fn new(threshold: usize) -> Self {
        Self {
            records: Vec::new(),
            threshold: threshold.max(1),
        }
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = Record>) {
        self.records.extend(records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.threshold
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Drops every buffered record and releases the allocation.
    pub fn clear(&mut self) {
        self.records = Vec::new();
    }
}
