//! An in-process group: each member is a thread, each window segment lives on the heap
//! and is reached through shared `Arc`s.
//!
//! The per-segment access epoch is a raw reader-writer lock so that shared acquisitions
//! from many members overlap, while the data itself sits behind a mutex so every element
//! of a transfer lands atomically.

use super::{Fabric, LockMode, WindowBackend};
use crate::descriptor::StridedRegion;
use crate::element::{CombineOp, Element};
use crate::error::{Error, Result};

use parking_lot::lock_api::RawRwLock as RawRwLockApi;
use parking_lot::{Condvar, Mutex, RawRwLock};
use std::any::Any;
use std::sync::Arc;
use tracing::{debug, error};

/// A reusable barrier that is poisoned when any member panics. Members already waiting,
/// and every later arrival, panic instead of waiting for a member that will never come.
struct GroupBarrier {
    size: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

struct BarrierState {
    arrived: usize,
    generation: u64,
    poisoned_by: Option<usize>,
}

impl GroupBarrier {
    fn new(size: usize) -> Self {
        GroupBarrier {
            size,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                poisoned_by: None,
            }),
            cvar: Condvar::new(),
        }
    }

    fn wait(&self, member: usize) {
        let mut state = self.state.lock();
        let generation = state.generation;
        if state.poisoned_by.is_none() {
            state.arrived += 1;
            if state.arrived == self.size {
                state.arrived = 0;
                state.generation = generation.wrapping_add(1);
                self.cvar.notify_all();
                return;
            }
            while state.generation == generation && state.poisoned_by.is_none() {
                self.cvar.wait(&mut state);
            }
            if state.generation != generation {
                return;
            }
        }
        let culprit = state.poisoned_by;
        drop(state);
        panic!("member {member} abandoned a barrier: member {culprit:?} panicked");
    }

    fn poison(&self, member: usize) {
        let mut state = self.state.lock();
        state.poisoned_by.get_or_insert(member);
        self.cvar.notify_all();
    }

    fn poisoned_by(&self) -> Option<usize> {
        self.state.lock().poisoned_by
    }
}

/// Poisons the group barrier if the member thread unwinds.
struct PoisonOnPanic {
    shared: Arc<Shared>,
    member: usize,
}

impl Drop for PoisonOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.shared.barrier.poison(self.member);
        }
    }
}

struct Shared {
    size: usize,
    barrier: GroupBarrier,
    // one slot per member, used while a window is being allocated collectively
    exchange: Mutex<Vec<Option<Arc<dyn Any + Send + Sync>>>>,
}

/// Builds the endpoints of an in-process group.
pub struct ThreadGroup;

impl ThreadGroup {
    /// One endpoint per member, ids `0..size`.
    pub fn new(size: usize) -> Vec<ThreadComm> {
        let shared = Arc::new(Shared {
            size,
            barrier: GroupBarrier::new(size),
            exchange: Mutex::new(vec![None; size]),
        });
        (0..size)
            .map(|id| ThreadComm {
                id,
                shared: shared.clone(),
            })
            .collect()
    }

    /// Run `f` on `size` member threads and collect the results in member order.
    ///
    /// If a member panics, the others are released from their barriers and the first
    /// member's panic is resumed on the calling thread.
    pub fn run<R, F>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(ThreadComm) -> R + Sync,
        R: Send,
    {
        let comms = Self::new(size);
        let shared = comms.first().map(|c| c.shared.clone());
        let results: Vec<std::thread::Result<R>> = std::thread::scope(|s| {
            let f = &f;
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let _poison = PoisonOnPanic {
                            shared: comm.shared.clone(),
                            member: comm.id,
                        };
                        f(comm)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect()
        });

        let first = shared.and_then(|s| s.barrier.poisoned_by());
        let panicked = first
            .filter(|&m| results[m].is_err())
            .or_else(|| results.iter().position(|r| r.is_err()));
        let mut out = Vec::with_capacity(size);
        let mut payload = None;
        for (member, result) in results.into_iter().enumerate() {
            match result {
                Ok(r) => out.push(r),
                Err(e) if Some(member) == panicked => payload = Some(e),
                Err(_) => {}
            }
        }
        if let Some(e) = payload {
            std::panic::resume_unwind(e);
        }
        out
    }
}

#[derive(Clone)]
pub struct ThreadComm {
    id: usize,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm")
            .field("id", &self.id)
            .field("size", &self.shared.size)
            .finish()
    }
}

impl ThreadComm {
    pub fn my_id(&self) -> usize {
        self.id
    }

    pub fn group_size(&self) -> usize {
        self.shared.size
    }

    pub fn barrier(&self) {
        self.shared.barrier.wait(self.id);
    }
}

impl<T: Element> Fabric<T> for ThreadComm {
    type Window = ThreadWindow<T>;

    fn my_id(&self) -> usize {
        self.id
    }

    fn group_size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) {
        ThreadComm::barrier(self);
    }

    fn allocate_window(&self, local_len: usize) -> Result<ThreadWindow<T>> {
        let mine = Arc::new(Segment::<T>::new(local_len));
        self.shared.exchange.lock()[self.id] = Some(mine as Arc<dyn Any + Send + Sync>);
        ThreadComm::barrier(self);

        let segments = {
            let slots = self.shared.exchange.lock();
            slots
                .iter()
                .enumerate()
                .map(|(member, slot)| {
                    slot.clone()
                        .and_then(|s| s.downcast::<Segment<T>>().ok())
                        .ok_or_else(|| {
                            Error::Fabric(format!(
                                "member {member} published no window of this element type"
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()
        };

        // every member has its copy of the handles once this returns
        ThreadComm::barrier(self);
        self.shared.exchange.lock()[self.id] = None;

        let segments = segments?;
        debug!(member = self.id, local_len, "allocated thread window");
        Ok(ThreadWindow {
            my_id: self.id,
            held: Mutex::new(vec![None; segments.len()]),
            segments,
        })
    }
}

struct Segment<T> {
    epoch: RawRwLock,
    data: Mutex<Vec<T>>,
}

impl<T: Element> Segment<T> {
    fn new(len: usize) -> Self {
        Segment {
            epoch: <RawRwLock as RawRwLockApi>::INIT,
            data: Mutex::new(vec![T::default(); len]),
        }
    }
}

pub struct ThreadWindow<T> {
    my_id: usize,
    segments: Vec<Arc<Segment<T>>>,
    // lock modes this member currently holds, per target
    held: Mutex<Vec<Option<LockMode>>>,
}

impl<T: Element> ThreadWindow<T> {
    fn segment(&self, target: usize) -> Result<&Segment<T>> {
        self.segments
            .get(target)
            .map(|s| s.as_ref())
            .ok_or(Error::InvalidMember {
                member: target,
                group_size: self.segments.len(),
            })
    }

    fn check_locked(&self, target: usize) -> Result<()> {
        match self.held.lock().get(target) {
            Some(Some(_)) => Ok(()),
            _ => Err(Error::NotLocked { target }),
        }
    }

    fn check_bounds(
        target: usize,
        offset: usize,
        region: &StridedRegion,
        len: usize,
    ) -> Result<()> {
        if offset.checked_add(region.span()).map_or(true, |end| end > len) {
            return Err(Error::WindowBounds {
                target,
                offset,
                span: region.span(),
                len,
            });
        }
        Ok(())
    }
}

impl<T: Element> WindowBackend<T> for ThreadWindow<T> {
    fn local_len(&self) -> usize {
        self.segments[self.my_id].data.lock().len()
    }

    fn lock(&self, target: usize, mode: LockMode) -> Result<()> {
        let segment = self.segment(target)?;
        if self.held.lock()[target].is_some() {
            return Err(Error::AlreadyLocked { target });
        }
        match mode {
            LockMode::Shared => segment.epoch.lock_shared(),
            LockMode::Exclusive => segment.epoch.lock_exclusive(),
        }
        self.held.lock()[target] = Some(mode);
        Ok(())
    }

    fn unlock(&self, target: usize) -> Result<()> {
        let segment = self.segment(target)?;
        let mode = self.held.lock()[target]
            .take()
            .ok_or(Error::NotLocked { target })?;
        // SAFETY: `held` recorded that this member acquired `segment.epoch` in `mode` and
        // has not released it since; the entry was just cleared so it is released once.
        unsafe {
            match mode {
                LockMode::Shared => segment.epoch.unlock_shared(),
                LockMode::Exclusive => segment.epoch.unlock_exclusive(),
            }
        }
        Ok(())
    }

    fn accumulate(
        &self,
        target: usize,
        target_offset: usize,
        target_region: &StridedRegion,
        op: CombineOp,
        src: &[T],
        src_region: &StridedRegion,
    ) -> Result<()> {
        debug_assert!(target_region.matches(src_region));
        let segment = self.segment(target)?;
        self.check_locked(target)?;
        if src_region.span() > src.len() {
            return Err(Error::BufferTooSmall {
                needed: src_region.span(),
                len: src.len(),
            });
        }
        let mut data = segment.data.lock();
        Self::check_bounds(target, target_offset, target_region, data.len())?;
        let cols = target_region.cols();
        for (dst_off, src_off) in target_region
            .row_offsets()
            .iter()
            .zip(src_region.row_offsets())
        {
            let dst_start = target_offset + dst_off;
            op.apply_row(
                &mut data[dst_start..dst_start + cols],
                &src[*src_off..*src_off + cols],
            );
        }
        Ok(())
    }

    fn get(
        &self,
        target: usize,
        target_offset: usize,
        target_region: &StridedRegion,
        dst: &mut [T],
        dst_region: &StridedRegion,
    ) -> Result<()> {
        debug_assert!(target_region.matches(dst_region));
        let segment = self.segment(target)?;
        self.check_locked(target)?;
        if dst_region.span() > dst.len() {
            return Err(Error::BufferTooSmall {
                needed: dst_region.span(),
                len: dst.len(),
            });
        }
        let data = segment.data.lock();
        Self::check_bounds(target, target_offset, target_region, data.len())?;
        let cols = target_region.cols();
        for (src_off, dst_off) in target_region
            .row_offsets()
            .iter()
            .zip(dst_region.row_offsets())
        {
            let src_start = target_offset + src_off;
            dst[*dst_off..*dst_off + cols].copy_from_slice(&data[src_start..src_start + cols]);
        }
        Ok(())
    }

    fn update_local(&self, f: &mut dyn FnMut(&mut [T])) {
        let mut data = self.segments[self.my_id].data.lock();
        f(&mut data);
    }

    fn complete(&self) -> Result<()> {
        // transfers are finished by the time accumulate/get return
        Ok(())
    }
}

impl<T> Drop for ThreadWindow<T> {
    fn drop(&mut self) {
        let held = std::mem::take(&mut *self.held.lock());
        for (target, mode) in held.into_iter().enumerate() {
            let Some(mode) = mode else { continue };
            error!(member = self.my_id, target, "window dropped while still locked");
            // SAFETY: the entry shows this member still holds the lock in `mode`.
            unsafe {
                match mode {
                    LockMode::Shared => self.segments[target].epoch.unlock_shared(),
                    LockMode::Exclusive => self.segments[target].epoch.unlock_exclusive(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_ids() {
        let ids = ThreadGroup::run(4, |comm| (comm.my_id(), comm.group_size()));
        assert_eq!(ids, vec![(0, 4), (1, 4), (2, 4), (3, 4)]);
    }

    #[test]
    fn test_one_sided_put_and_get() {
        let results = ThreadGroup::run(3, |comm| {
            let window = Fabric::<f64>::allocate_window(&comm, 6).unwrap();
            let me = comm.my_id();
            let next = (me + 1) % 3;

            // write a 2x2 block into the neighbour's 2x3 segment at column 1
            let src = vec![me as f64; 4];
            window.lock(next, LockMode::Shared).unwrap();
            window
                .accumulate(
                    next,
                    1,
                    &StridedRegion::new(2, 2, 3),
                    CombineOp::Replace,
                    &src,
                    &StridedRegion::packed(2, 2),
                )
                .unwrap();
            window.unlock(next).unwrap();
            comm.barrier();

            let mut out = vec![-1.0; 6];
            window.lock(me, LockMode::Shared).unwrap();
            window
                .get(
                    me,
                    0,
                    &StridedRegion::packed(2, 3),
                    &mut out,
                    &StridedRegion::packed(2, 3),
                )
                .unwrap();
            window.unlock(me).unwrap();
            comm.barrier();
            out
        });
        for (me, out) in results.iter().enumerate() {
            let prev = ((me + 2) % 3) as f64;
            assert_eq!(out, &vec![0.0, prev, prev, 0.0, prev, prev]);
        }
    }

    #[test]
    fn test_accumulate_from_every_member() {
        let results = ThreadGroup::run(4, |comm| {
            let window = Fabric::<u64>::allocate_window(&comm, 5).unwrap();
            let ones = vec![1u64; 5];
            for _ in 0..100 {
                window.lock(0, LockMode::Shared).unwrap();
                window
                    .accumulate(
                        0,
                        0,
                        &StridedRegion::packed(1, 5),
                        CombineOp::Sum,
                        &ones,
                        &StridedRegion::packed(1, 5),
                    )
                    .unwrap();
                window.unlock(0).unwrap();
            }
            comm.barrier();
            let mut local = Vec::new();
            window.update_local(&mut |data| local = data.to_vec());
            local
        });
        assert_eq!(results[0], vec![400; 5]);
        assert_eq!(results[1], vec![0; 5]);
    }

    #[test]
    fn test_transfer_requires_lock() {
        let comm = ThreadGroup::new(1).remove(0);
        let window = Fabric::<f32>::allocate_window(&comm, 4).unwrap();
        let region = StridedRegion::packed(1, 4);
        let err = window
            .accumulate(0, 0, &region, CombineOp::Sum, &[1.0; 4], &region)
            .unwrap_err();
        assert_eq!(err, Error::NotLocked { target: 0 });
        assert_eq!(window.unlock(0), Err(Error::NotLocked { target: 0 }));

        window.lock(0, LockMode::Exclusive).unwrap();
        assert_eq!(
            window.lock(0, LockMode::Shared),
            Err(Error::AlreadyLocked { target: 0 })
        );
        let err = window
            .accumulate(0, 1, &region, CombineOp::Sum, &[1.0; 4], &region)
            .unwrap_err();
        assert!(matches!(err, Error::WindowBounds { target: 0, .. }));
        window.unlock(0).unwrap();
    }

    #[test]
    fn test_barriers_are_reusable() {
        let rounds = ThreadGroup::run(5, |comm| {
            for _ in 0..50 {
                comm.barrier();
            }
            comm.my_id()
        });
        assert_eq!(rounds, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "member one failed")]
    fn test_member_panic_releases_the_group() {
        ThreadGroup::run(3, |comm| {
            if comm.my_id() == 1 {
                panic!("member one failed");
            }
            comm.barrier();
            comm.barrier();
        });
    }

    #[test]
    fn test_offsets_past_the_address_space_are_rejected() {
        let comm = ThreadGroup::new(1).remove(0);
        let backend = Fabric::<f64>::allocate_window(&comm, 4).unwrap();
        backend.lock(0, LockMode::Shared).unwrap();
        let region = StridedRegion::packed(1, 2);
        let src = [1.0, 2.0];
        let result = backend.accumulate(0, usize::MAX, &region, CombineOp::Replace, &src, &region);
        assert!(matches!(result, Err(Error::WindowBounds { .. })));
        let mut dst = [0.0; 2];
        let result = backend.get(0, usize::MAX - 1, &region, &mut dst, &region);
        assert!(matches!(result, Err(Error::WindowBounds { .. })));
        backend.unlock(0).unwrap();
    }
}
