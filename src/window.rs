//! The remotely addressable memory exposing each member's owned block.
//!
//! Every one-sided transfer happens through an [`AccessGuard`], which holds the target's
//! access epoch for its lifetime and releases it when dropped, so no path out of a block
//! operation can leave a target locked.
//!
//! Updates take the target in [`LockMode::Shared`]: accumulates from different members
//! interleave element by element, and concurrent replaces of the same element leave one of
//! the contending values. Callers needing a fixed order between overlapping replaces must
//! order those calls themselves.

use crate::descriptor::{Descriptor, DescriptorCache};
use crate::element::{CombineOp, Element};
use crate::error::Result;
use crate::fabric::{LockMode, WindowBackend};

use std::marker::PhantomData;
use tracing::{error, trace};

pub struct RemoteWindow<T: Element, W: WindowBackend<T>> {
    my_id: usize,
    backend: W,
    descriptors: DescriptorCache,
    _element: PhantomData<T>,
}

impl<T: Element, W: WindowBackend<T>> RemoteWindow<T, W> {
    /// Wrap an allocated backend whose blocks all use leading dimension `ld`.
    pub fn new(my_id: usize, backend: W, ld: usize) -> Self {
        RemoteWindow {
            my_id,
            backend,
            descriptors: DescriptorCache::new(ld),
            _element: PhantomData,
        }
    }

    pub fn ld(&self) -> usize {
        self.descriptors.window_ld()
    }

    pub fn descriptors(&self) -> &DescriptorCache {
        &self.descriptors
    }

    pub fn backend(&self) -> &W {
        &self.backend
    }

    /// Open an access epoch on `target`'s block.
    pub fn access(&self, target: usize, mode: LockMode) -> Result<AccessGuard<'_, T, W>> {
        self.backend.lock(target, mode)?;
        trace!(member = self.my_id, target, ?mode, "access acquired");
        Ok(AccessGuard {
            window: self,
            target,
            mode,
        })
    }

    /// Set every element of this member's own block.
    pub fn fill_local(&self, value: T) -> Result<()> {
        let _guard = self.access(self.my_id, LockMode::Exclusive)?;
        self.backend.update_local(&mut |data| data.fill(value));
        Ok(())
    }

    /// Copy of this member's own block storage, padding included.
    pub fn read_local(&self) -> Result<Vec<T>> {
        let _guard = self.access(self.my_id, LockMode::Shared)?;
        let mut out = Vec::new();
        self.backend.update_local(&mut |data| out = data.to_vec());
        Ok(out)
    }

    /// Wait for every transfer this member issued to land.
    pub fn complete(&self) -> Result<()> {
        self.backend.complete()
    }
}

/// An open access epoch on one target. Dropping it releases the target.
pub struct AccessGuard<'w, T: Element, W: WindowBackend<T>> {
    window: &'w RemoteWindow<T, W>,
    target: usize,
    mode: LockMode,
}

impl<'w, T: Element, W: WindowBackend<T>> AccessGuard<'w, T, W> {
    pub fn target(&self) -> usize {
        self.target
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Window-side and caller-side descriptors for a `rows x cols` transfer.
    fn regions(
        &self,
        rows: usize,
        cols: usize,
        buffer_ld: usize,
    ) -> (Descriptor<'w>, Descriptor<'w>) {
        let descriptors: &'w DescriptorCache = &self.window.descriptors;
        if DescriptorCache::is_small(rows, cols) {
            (
                Descriptor::Cached(descriptors.small_window_region(rows, cols)),
                descriptors.small_buffer_region(rows, cols, buffer_ld),
            )
        } else {
            (
                DescriptorCache::transient(rows, cols, descriptors.window_ld()),
                DescriptorCache::transient(rows, cols, buffer_ld),
            )
        }
    }

    /// Transfer a `rows x cols` block of `src` (row stride `src_ld`) into the target's
    /// block at element `offset`, replacing or summing.
    pub fn update(
        &self,
        offset: usize,
        rows: usize,
        cols: usize,
        op: CombineOp,
        src: &[T],
        src_ld: usize,
    ) -> Result<()> {
        let (dst_region, src_region) = self.regions(rows, cols, src_ld);
        trace!(
            target = self.target,
            offset,
            rows,
            cols,
            ?op,
            cached = dst_region.is_cached() && src_region.is_cached(),
            "update"
        );
        self.window
            .backend
            .accumulate(self.target, offset, &dst_region, op, src, &src_region)
    }

    /// Read a `rows x cols` block at element `offset` of the target's block into `dst`
    /// (row stride `dst_ld`).
    pub fn get(
        &self,
        offset: usize,
        rows: usize,
        cols: usize,
        dst: &mut [T],
        dst_ld: usize,
    ) -> Result<()> {
        let (src_region, dst_region) = self.regions(rows, cols, dst_ld);
        trace!(target = self.target, offset, rows, cols, "get");
        self.window
            .backend
            .get(self.target, offset, &src_region, dst, &dst_region)
    }

    /// Release the target now, reporting a failed release instead of logging it.
    pub fn release(self) -> Result<()> {
        let result = self.window.backend.unlock(self.target);
        std::mem::forget(self);
        result
    }
}

impl<T: Element, W: WindowBackend<T>> Drop for AccessGuard<'_, T, W> {
    fn drop(&mut self) {
        if let Err(e) = self.window.backend.unlock(self.target) {
            error!(target = self.target, "failed to release access: {e}");
        }
    }
}
