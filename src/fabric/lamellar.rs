//! A fabric over a lamellar world, one member per PE.
//!
//! Each member's block lives in a [`Darc`], and transfers are active messages that run on
//! the owning PE under that block's lock. Only `f64` matrices are supported.

use crate::descriptor::StridedRegion;
use crate::element::CombineOp;
use crate::error::{Error, Result};
use crate::fabric::{Fabric, LockMode, WindowBackend};

use ::lamellar::active_messaging::prelude::*;
use ::lamellar::darc::prelude::*;
use ::lamellar::LamellarWorld;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, error};

type Block = RwLock<Vec<f64>>;

//------ Transfer AMs -----------
// Rows arrive packed; `stride` is the row stride inside the target block.
#[lamellar::AmData(Clone, Debug)]
struct UpdateAm {
    block: Darc<Block>,
    offset: usize,
    rows: usize,
    cols: usize,
    stride: usize,
    op: CombineOp,
    data: Vec<f64>,
}

/// Whether `rows x cols` at `stride` starting at `offset` lies inside `len` elements.
fn fits(offset: usize, rows: usize, cols: usize, stride: usize, len: usize) -> bool {
    let span = match rows {
        0 => Some(0),
        rows => (rows - 1)
            .checked_mul(stride)
            .and_then(|n| n.checked_add(cols)),
    };
    span.and_then(|span| span.checked_add(offset))
        .is_some_and(|end| end <= len)
}

#[lamellar::am]
impl LamellarAM for UpdateAm {
    async fn exec(self) -> Result<(), usize> {
        let mut block = self.block.write();
        if !fits(self.offset, self.rows, self.cols, self.stride, block.len()) {
            return Err(block.len());
        }
        for r in 0..self.rows {
            let start = self.offset + r * self.stride;
            self.op.apply_row(
                &mut block[start..start + self.cols],
                &self.data[r * self.cols..(r + 1) * self.cols],
            );
        }
        Ok(())
    }
}

#[lamellar::AmData(Clone, Debug)]
struct GetAm {
    block: Darc<Block>,
    offset: usize,
    rows: usize,
    cols: usize,
    stride: usize,
}

#[lamellar::am]
impl LamellarAM for GetAm {
    async fn exec(self) -> Result<Vec<f64>, usize> {
        let block = self.block.read();
        if !fits(self.offset, self.rows, self.cols, self.stride, block.len()) {
            return Err(block.len());
        }
        let mut packed = Vec::with_capacity(self.rows * self.cols);
        for r in 0..self.rows {
            let start = self.offset + r * self.stride;
            packed.extend_from_slice(&block[start..start + self.cols]);
        }
        Ok(packed)
    }
}
//-------------------------------

pub struct LamellarFabric {
    world: Arc<LamellarWorld>,
}

impl LamellarFabric {
    pub fn new() -> Self {
        Self::from_world(::lamellar::LamellarWorldBuilder::new().build())
    }

    pub fn from_world(world: LamellarWorld) -> Self {
        LamellarFabric {
            world: Arc::new(world),
        }
    }

    pub fn world(&self) -> &LamellarWorld {
        &self.world
    }
}

impl Default for LamellarFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric<f64> for LamellarFabric {
    type Window = LamellarWindow;

    fn my_id(&self) -> usize {
        self.world.my_pe()
    }

    fn group_size(&self) -> usize {
        self.world.num_pes()
    }

    fn barrier(&self) {
        self.world.barrier();
    }

    fn allocate_window(&self, local_len: usize) -> Result<LamellarWindow> {
        let block = Darc::new(&*self.world, RwLock::new(vec![0.0; local_len]))
            .block()
            .map_err(|e| Error::Fabric(format!("unable to create darc: {e:?}")))?;
        debug!(member = self.world.my_pe(), local_len, "allocated lamellar window");
        Ok(LamellarWindow {
            world: self.world.clone(),
            block,
            held: Mutex::new(vec![None; self.world.num_pes()]),
        })
    }
}

/// Epochs are tracked per target on the issuing side. Exclusion between members comes
/// from the target block's lock, taken by each AM as it runs.
pub struct LamellarWindow {
    world: Arc<LamellarWorld>,
    block: Darc<Block>,
    held: Mutex<Vec<Option<LockMode>>>,
}

impl LamellarWindow {
    fn check_locked(&self, target: usize) -> Result<()> {
        match self.held.lock().get(target) {
            Some(Some(_)) => Ok(()),
            Some(None) => Err(Error::NotLocked { target }),
            None => Err(Error::InvalidMember {
                member: target,
                group_size: self.world.num_pes(),
            }),
        }
    }
}

impl WindowBackend<f64> for LamellarWindow {
    fn local_len(&self) -> usize {
        self.block.read().len()
    }

    fn lock(&self, target: usize, mode: LockMode) -> Result<()> {
        let mut held = self.held.lock();
        match held.get_mut(target) {
            Some(Some(_)) => Err(Error::AlreadyLocked { target }),
            Some(slot) => {
                *slot = Some(mode);
                Ok(())
            }
            None => Err(Error::InvalidMember {
                member: target,
                group_size: self.world.num_pes(),
            }),
        }
    }

    fn unlock(&self, target: usize) -> Result<()> {
        self.held
            .lock()
            .get_mut(target)
            .and_then(Option::take)
            .map(|_| ())
            .ok_or(Error::NotLocked { target })
    }

    fn accumulate(
        &self,
        target: usize,
        target_offset: usize,
        target_region: &StridedRegion,
        op: CombineOp,
        src: &[f64],
        src_region: &StridedRegion,
    ) -> Result<()> {
        self.check_locked(target)?;
        if src_region.span() > src.len() {
            return Err(Error::BufferTooSmall {
                needed: src_region.span(),
                len: src.len(),
            });
        }
        let cols = src_region.cols();
        let mut data = Vec::with_capacity(src_region.len());
        for off in src_region.row_offsets() {
            data.extend_from_slice(&src[*off..*off + cols]);
        }
        let am = UpdateAm {
            block: self.block.clone(),
            offset: target_offset,
            rows: target_region.rows(),
            cols,
            stride: target_region.stride(),
            op,
            data,
        };
        self.world
            .block_on(self.world.exec_am_pe(target, am))
            .map_err(|len| Error::WindowBounds {
                target,
                offset: target_offset,
                span: target_region.span(),
                len,
            })
    }

    fn get(
        &self,
        target: usize,
        target_offset: usize,
        target_region: &StridedRegion,
        dst: &mut [f64],
        dst_region: &StridedRegion,
    ) -> Result<()> {
        self.check_locked(target)?;
        if dst_region.span() > dst.len() {
            return Err(Error::BufferTooSmall {
                needed: dst_region.span(),
                len: dst.len(),
            });
        }
        let am = GetAm {
            block: self.block.clone(),
            offset: target_offset,
            rows: target_region.rows(),
            cols: target_region.cols(),
            stride: target_region.stride(),
        };
        let packed = self
            .world
            .block_on(self.world.exec_am_pe(target, am))
            .map_err(|len| Error::WindowBounds {
                target,
                offset: target_offset,
                span: target_region.span(),
                len,
            })?;
        let cols = dst_region.cols();
        for (r, off) in dst_region.row_offsets().iter().enumerate() {
            dst[*off..*off + cols].copy_from_slice(&packed[r * cols..(r + 1) * cols]);
        }
        Ok(())
    }

    fn update_local(&self, f: &mut dyn FnMut(&mut [f64])) {
        f(&mut self.block.write());
    }

    fn complete(&self) -> Result<()> {
        self.world.wait_all();
        Ok(())
    }
}

impl Drop for LamellarWindow {
    fn drop(&mut self) {
        let held = self.held.get_mut();
        for (target, mode) in held.iter_mut().enumerate() {
            if mode.take().is_some() {
                error!(member = self.world.my_pe(), target, "window dropped while still locked");
            }
        }
    }
}
