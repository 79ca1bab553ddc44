//! The communication substrate the matrix runs on.
//!
//! A fabric provides what a PGAS runtime provides: the member id and group size, a
//! collective barrier, collectively allocated windows of remotely addressable memory,
//! and one-sided strided put/accumulate/get on those windows under a passive-target
//! lock. [`thread`] runs a group inside one process; [`lamellar`] runs it on a lamellar
//! world.

use crate::descriptor::StridedRegion;
use crate::element::{CombineOp, Element};
use crate::error::Result;

#[cfg(feature = "lamellar")]
pub mod lamellar;
pub mod thread;

#[cfg(feature = "lamellar")]
pub use self::lamellar::{LamellarFabric, LamellarWindow};
pub use thread::{ThreadComm, ThreadGroup, ThreadWindow};

/// Access mode requested on a target window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of members may hold shared access at once.
    Shared,
    /// Only one member at a time, excluding all shared holders.
    Exclusive,
}

pub trait Fabric<T: Element> {
    type Window: WindowBackend<T>;

    fn my_id(&self) -> usize;

    fn group_size(&self) -> usize;

    /// Block until every member has arrived.
    fn barrier(&self);

    /// Collective: every member calls with its own `local_len`.
    fn allocate_window(&self, local_len: usize) -> Result<Self::Window>;
}

/// One member's handle on a collectively allocated window.
///
/// Offsets and regions are in elements relative to the start of the target member's
/// segment. Transfers are only legal between `lock` and `unlock` on the same target.
pub trait WindowBackend<T: Element> {
    fn local_len(&self) -> usize;

    fn lock(&self, target: usize, mode: LockMode) -> Result<()>;

    fn unlock(&self, target: usize) -> Result<()>;

    /// Move `src_region` of `src` into `target_region` at `target_offset`, replacing or
    /// summing. Each element lands atomically.
    fn accumulate(
        &self,
        target: usize,
        target_offset: usize,
        target_region: &StridedRegion,
        op: CombineOp,
        src: &[T],
        src_region: &StridedRegion,
    ) -> Result<()>;

    fn get(
        &self,
        target: usize,
        target_offset: usize,
        target_region: &StridedRegion,
        dst: &mut [T],
        dst_region: &StridedRegion,
    ) -> Result<()>;

    /// Direct access to this member's own segment.
    fn update_local(&self, f: &mut dyn FnMut(&mut [T]));

    /// Wait until every one-sided operation this member issued has completed remotely.
    fn complete(&self) -> Result<()>;
}
