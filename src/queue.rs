//! Deferred update requests, one queue per destination member.
//!
//! Entries never hold element data. They name a source buffer registered with the
//! running batch by index, plus where the piece starts in that buffer.

use crate::element::CombineOp;
use crate::layout::Extent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRequest {
    pub op: CombineOp,
    /// Global rectangle, fully inside the destination's block.
    pub region: Extent,
    /// Index of the source buffer within the batch.
    pub source: usize,
    /// Element offset of the piece's first element in the source buffer.
    pub source_offset: usize,
    pub source_ld: usize,
}

#[derive(Debug, Default)]
pub struct RequestQueue {
    entries: Vec<UpdateRequest>,
}

impl RequestQueue {
    pub fn push(&mut self, request: UpdateRequest) {
        self.entries.push(request);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, UpdateRequest> {
        self.entries.iter()
    }

    /// Drop all entries, keeping the allocation for the next epoch.
    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

/// The per-destination queues of one matrix, sized to the group.
#[derive(Debug)]
pub struct RequestQueues {
    queues: Vec<RequestQueue>,
}

impl RequestQueues {
    pub fn new(group_size: usize) -> Self {
        RequestQueues {
            queues: (0..group_size).map(|_| RequestQueue::default()).collect(),
        }
    }

    pub fn group_size(&self) -> usize {
        self.queues.len()
    }

    pub fn push(&mut self, dst: usize, request: UpdateRequest) {
        self.queues[dst].push(request);
    }

    pub fn queue(&self, dst: usize) -> &RequestQueue {
        &self.queues[dst]
    }

    pub fn reset(&mut self, dst: usize) {
        self.queues[dst].reset();
    }

    pub fn reset_all(&mut self) {
        self.queues.iter_mut().for_each(RequestQueue::reset);
    }

    /// Entries waiting across all destinations.
    pub fn pending(&self) -> usize {
        self.queues.iter().map(RequestQueue::len).sum()
    }

    /// Destinations in flush order: `start` first, wrapping around the group, so members
    /// do not all begin with member 0.
    pub fn flush_order(&self, start: usize) -> impl Iterator<Item = usize> {
        let n = self.queues.len();
        (start..start + n).map(move |d| d % n)
    }
}
