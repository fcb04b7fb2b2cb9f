use crate::{core::value::Value, records::row::WorkItem};

/// Ordered group of work items executed together.
///
/// `seq` is assigned in source order and identifies the batch across retries;
/// `offset` is the number of items observed before this batch.
#[derive(Debug, Clone)]
pub struct Batch {
    pub seq: u64,
    pub offset: u64,
    pub items: Vec<WorkItem>,
}

impl Batch {
    pub fn new(seq: u64, offset: u64, items: Vec<WorkItem>) -> Self {
        Batch { seq, offset, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The batch as a list parameter (`_batch`).
    pub fn to_value(&self) -> Value {
        Value::Array(self.items.iter().map(WorkItem::to_value).collect())
    }
}
