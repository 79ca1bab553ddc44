//! Batched (deferred) updates.
//!
//! Fine-grained updates, such as one panel column at a time, pay the cost of opening an
//! access epoch per owner when issued immediately. A [`BatchUpdate`] instead records each
//! piece in its destination's queue and [`flush`](BatchUpdate::flush) replays a whole queue
//! under a single shared acquisition of that destination.
//!
//! ```ignore
//! let mut batch = matrix.start_batch();
//! batch.add_accumulate_block_request(panel, &column, 1)?;
//! batch.flush()?;
//! batch.stop();
//! matrix.sync()?;
//! ```

use crate::element::{CombineOp, Element};
use crate::error::Result;
use crate::fabric::{Fabric, LockMode};
use crate::layout::Extent;
use crate::matrix::{buffer_offset, check_buffer, GlobalMatrix};
use crate::queue::UpdateRequest;

use tracing::{debug, warn};

/// A batching epoch on one matrix handle.
///
/// Holding the matrix mutably means no immediate operation, second batch or concurrent
/// flush can run on the same handle while requests are pending. Source buffers are
/// borrowed, not copied, for as long as the batch lives.
pub struct BatchUpdate<'m, 's, T: Element, F: Fabric<T>> {
    matrix: &'m mut GlobalMatrix<T, F>,
    sources: Vec<&'s [T]>,
}

impl<'m, 's, T: Element, F: Fabric<T>> BatchUpdate<'m, 's, T, F> {
    pub(crate) fn new(matrix: &'m mut GlobalMatrix<T, F>) -> Self {
        matrix.queues.reset_all();
        BatchUpdate {
            matrix,
            sources: Vec::new(),
        }
    }

    /// Queue an overwrite of `region` with `src`, row stride `src_ld`.
    pub fn add_put_block_request(&mut self, region: Extent, src: &'s [T], src_ld: usize) -> Result<()> {
        self.add_update_request(CombineOp::Replace, region, src, src_ld)
    }

    /// Queue an accumulation of `src`, row stride `src_ld`, into `region`.
    pub fn add_accumulate_block_request(
        &mut self,
        region: Extent,
        src: &'s [T],
        src_ld: usize,
    ) -> Result<()> {
        self.add_update_request(CombineOp::Sum, region, src, src_ld)
    }

    /// Split `region` by owner and queue one request per piece. Invalid requests are
    /// rejected whole; nothing is queued for them.
    pub fn add_update_request(
        &mut self,
        op: CombineOp,
        region: Extent,
        src: &'s [T],
        src_ld: usize,
    ) -> Result<()> {
        let pieces = self.matrix.layout.owners(&region)?;
        check_buffer(&region, src.len(), src_ld)?;
        let source = self.sources.len();
        self.sources.push(src);
        for (member, piece) in pieces {
            self.matrix.queues.push(
                member,
                UpdateRequest {
                    op,
                    region: piece,
                    source,
                    source_offset: buffer_offset(&region, &piece, src_ld),
                    source_ld: src_ld,
                },
            );
        }
        Ok(())
    }

    /// Requests queued and not yet flushed.
    pub fn pending(&self) -> usize {
        self.matrix.queues.pending()
    }

    /// Requests queued for `dst`.
    pub fn pending_for(&self, dst: usize) -> usize {
        self.matrix.queues.queue(dst).len()
    }

    /// Replay every queued request, one shared access epoch per destination.
    ///
    /// Destinations are visited starting at this member's id and wrapping around. Each
    /// destination's queue is cleared once its requests are issued. The transfers become
    /// visible to others at the next `sync`.
    pub fn flush(&mut self) -> Result<()> {
        let matrix = &mut *self.matrix;
        let mut destinations = 0;
        let mut requests = 0;
        for dst in matrix.queues.flush_order(matrix.my_id) {
            let queue = matrix.queues.queue(dst);
            if queue.is_empty() {
                continue;
            }
            let guard = matrix.window.access(dst, LockMode::Shared)?;
            for request in queue.iter() {
                let region = &request.region;
                guard.update(
                    matrix.local_offset(dst, region),
                    region.row_num,
                    region.col_num,
                    request.op,
                    &self.sources[request.source][request.source_offset..],
                    request.source_ld,
                )?;
            }
            guard.release()?;
            destinations += 1;
            requests += queue.len();
            matrix.queues.reset(dst);
        }
        debug!(member = matrix.my_id, destinations, requests, "flushed batch");
        Ok(())
    }

    /// End the batch. Requests that were not flushed are discarded.
    pub fn stop(self) {}
}

impl<T: Element, F: Fabric<T>> Drop for BatchUpdate<'_, '_, T, F> {
    fn drop(&mut self) {
        let pending = self.matrix.queues.pending();
        if pending > 0 {
            warn!(
                member = self.matrix.my_id,
                pending, "batch stopped with unflushed requests, discarding them"
            );
        }
        self.matrix.queues.reset_all();
    }
}
