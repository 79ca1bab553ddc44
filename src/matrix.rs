//! The global matrix: a block-partitioned 2D array any member can read, overwrite or
//! accumulate into by global coordinates.
//!
//! Block operations split the requested rectangle by owner and move each piece with a
//! one-sided transfer. Results are visible to other members after the next [`sync`].
//!
//! [`sync`]: GlobalMatrix::sync

use crate::batch::BatchUpdate;
use crate::element::{CombineOp, Element};
use crate::error::{Error, Result};
use crate::fabric::{Fabric, LockMode};
use crate::layout::{BlockLayout, Extent, MatrixConfig};
use crate::queue::RequestQueues;
use crate::window::RemoteWindow;

use tracing::{debug, trace};

pub struct GlobalMatrix<T: Element, F: Fabric<T>> {
    pub(crate) fabric: F,
    pub(crate) layout: BlockLayout,
    pub(crate) my_id: usize,
    pub(crate) window: RemoteWindow<T, F::Window>,
    pub(crate) queues: RequestQueues,
}

impl<T: Element, F: Fabric<T>> GlobalMatrix<T, F> {
    /// Collective: every member passes the same `config`.
    ///
    /// The group must have exactly one member per block of the grid. Each member's block
    /// is stored with a leading dimension equal to the widest column block, so that any
    /// member can compute offsets into any other member's block.
    pub fn create(fabric: F, config: &MatrixConfig) -> Result<Self> {
        let layout = config.layout()?;
        let group_size = fabric.group_size();
        let my_id = fabric.my_id();
        if group_size != layout.num_blocks() {
            return Err(Error::GroupSizeMismatch {
                group_size,
                blocks: layout.num_blocks(),
            });
        }
        if my_id >= group_size {
            return Err(Error::InvalidMember {
                member: my_id,
                group_size,
            });
        }

        let ld = layout.max_block_cols();
        let owned = layout.block_extent(my_id);
        let backend = fabric.allocate_window(owned.row_num * ld)?;
        debug!(
            member = my_id,
            nrows = layout.nrows(),
            ncols = layout.ncols(),
            r_blocks = layout.r_blocks(),
            c_blocks = layout.c_blocks(),
            ?owned,
            ld,
            "created global matrix"
        );
        Ok(GlobalMatrix {
            window: RemoteWindow::new(my_id, backend, ld),
            queues: RequestQueues::new(group_size),
            fabric,
            layout,
            my_id,
        })
    }

    /// Collective: release the window once every member is done with it.
    pub fn destroy(self) -> Result<()> {
        self.window.complete()?;
        self.fabric.barrier();
        debug!(member = self.my_id, "destroyed global matrix");
        Ok(())
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn my_id(&self) -> usize {
        self.my_id
    }

    pub fn group_size(&self) -> usize {
        self.fabric.group_size()
    }

    pub fn nrows(&self) -> usize {
        self.layout.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.layout.ncols()
    }

    /// Leading dimension of every member's block storage.
    pub fn ld(&self) -> usize {
        self.window.ld()
    }

    /// Global extent of this member's block.
    pub fn owned_extent(&self) -> Extent {
        self.layout.block_extent(self.my_id)
    }

    pub fn fabric(&self) -> &F {
        &self.fabric
    }

    /// Set every element of this member's own block. Other members see it after `sync`.
    pub fn fill(&self, value: T) -> Result<()> {
        self.window.fill_local(value)
    }

    /// This member's block, packed row by row without padding.
    pub fn read_local(&self) -> Result<Vec<T>> {
        let owned = self.owned_extent();
        let ld = self.ld();
        let storage = self.window.read_local()?;
        Ok((0..owned.row_num)
            .flat_map(|r| storage[r * ld..r * ld + owned.col_num].iter().copied())
            .collect())
    }

    /// Read `region` of the global matrix into `dst`, row stride `dst_ld`.
    pub fn get_block(&self, region: Extent, dst: &mut [T], dst_ld: usize) -> Result<()> {
        let pieces = self.layout.owners(&region)?;
        check_buffer(&region, dst.len(), dst_ld)?;
        for (member, piece) in pieces {
            let offset = self.local_offset(member, &piece);
            let dst_offset = buffer_offset(&region, &piece, dst_ld);
            trace!(member = self.my_id, target = member, ?piece, "get piece");
            let guard = self.window.access(member, LockMode::Shared)?;
            guard.get(
                offset,
                piece.row_num,
                piece.col_num,
                &mut dst[dst_offset..],
                dst_ld,
            )?;
            guard.release()?;
        }
        Ok(())
    }

    /// Overwrite `region` with `src`, row stride `src_ld`.
    pub fn put_block(&self, region: Extent, src: &[T], src_ld: usize) -> Result<()> {
        self.update_block(CombineOp::Replace, region, src, src_ld)
    }

    /// Add `src`, row stride `src_ld`, into `region`.
    pub fn accumulate_block(&self, region: Extent, src: &[T], src_ld: usize) -> Result<()> {
        self.update_block(CombineOp::Sum, region, src, src_ld)
    }

    /// Replace or sum `src` into `region`, one shared access epoch per owner.
    ///
    /// An empty or out-of-range `region`, or a `src` too small for it, fails before any
    /// transfer is issued.
    pub fn update_block(
        &self,
        op: CombineOp,
        region: Extent,
        src: &[T],
        src_ld: usize,
    ) -> Result<()> {
        let pieces = self.layout.owners(&region)?;
        check_buffer(&region, src.len(), src_ld)?;
        for (member, piece) in pieces {
            let offset = self.local_offset(member, &piece);
            let src_offset = buffer_offset(&region, &piece, src_ld);
            trace!(member = self.my_id, target = member, ?piece, ?op, "update piece");
            let guard = self.window.access(member, LockMode::Shared)?;
            guard.update(
                offset,
                piece.row_num,
                piece.col_num,
                op,
                &src[src_offset..],
                src_ld,
            )?;
            guard.release()?;
        }
        Ok(())
    }

    /// Begin deferring updates; see [`BatchUpdate`].
    ///
    /// The per-destination queues are reset. Source buffers handed to the batch stay
    /// borrowed until it is stopped.
    pub fn start_batch<'s>(&mut self) -> BatchUpdate<'_, 's, T, F> {
        BatchUpdate::new(self)
    }

    /// Collective barrier: returns once every member has arrived and every transfer
    /// issued before it, by any member, is visible.
    pub fn sync(&self) -> Result<()> {
        self.window.complete()?;
        self.fabric.barrier();
        Ok(())
    }

    /// Element offset of global `piece` inside `member`'s block storage.
    pub(crate) fn local_offset(&self, member: usize, piece: &Extent) -> usize {
        let block = self.layout.block_extent(member);
        (piece.row_start - block.row_start) * self.ld() + (piece.col_start - block.col_start)
    }
}

/// Element offset of `piece` inside a caller buffer that holds `region` at stride `ld`.
pub(crate) fn buffer_offset(region: &Extent, piece: &Extent, ld: usize) -> usize {
    (piece.row_start - region.row_start) * ld + (piece.col_start - region.col_start)
}

/// `len` elements at stride `ld` must hold a whole `region`.
pub(crate) fn check_buffer(region: &Extent, len: usize, ld: usize) -> Result<()> {
    if ld < region.col_num {
        return Err(Error::LeadingDimension {
            ld,
            cols: region.col_num,
        });
    }
    // a region no buffer could hold needs more than any slice has
    let needed = (region.row_num - 1)
        .checked_mul(ld)
        .and_then(|n| n.checked_add(region.col_num))
        .unwrap_or(usize::MAX);
    if len < needed {
        return Err(Error::BufferTooSmall { needed, len });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::ThreadGroup;

    #[test]
    fn test_buffer_checks() {
        let region = Extent::new(2, 3, 1, 4);
        assert!(check_buffer(&region, 12, 4).is_ok());
        assert_eq!(
            check_buffer(&region, 12, 3),
            Err(Error::LeadingDimension { ld: 3, cols: 4 })
        );
        assert_eq!(
            check_buffer(&region, 13, 5),
            Err(Error::BufferTooSmall { needed: 14, len: 13 })
        );
        assert_eq!(buffer_offset(&region, &Extent::new(3, 2, 2, 3), 5), 6);
        assert_eq!(
            check_buffer(&Extent::new(0, 3, 0, 1), 10, usize::MAX),
            Err(Error::BufferTooSmall {
                needed: usize::MAX,
                len: 10
            })
        );
    }

    #[test]
    fn test_create_checks_group_size() {
        let comm = ThreadGroup::new(1).remove(0);
        let config = MatrixConfig::new(4, 4, vec![0, 2, 4], vec![0, 4]);
        let err = GlobalMatrix::<f64, _>::create(comm, &config).err();
        assert_eq!(
            err,
            Some(Error::GroupSizeMismatch {
                group_size: 1,
                blocks: 2
            })
        );
    }

    #[test]
    fn test_single_member_round_trip() {
        let comm = ThreadGroup::new(1).remove(0);
        let config = MatrixConfig::new(3, 4, vec![0, 3], vec![0, 4]);
        let matrix = GlobalMatrix::<f64, _>::create(comm, &config).unwrap();
        matrix.fill(1.0).unwrap();
        matrix
            .accumulate_block(Extent::new(1, 2, 1, 2), &[1.0, 2.0, 3.0, 4.0], 2)
            .unwrap();
        matrix.sync().unwrap();
        assert_eq!(
            matrix.read_local().unwrap(),
            vec![1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 3.0, 1.0, 1.0, 4.0, 5.0, 1.0]
        );
        matrix.destroy().unwrap();
    }
}
