use crate::element::Average;
use crate::error::{Error, Result};
use crate::fabric::Fabric;
use crate::matrix::GlobalMatrix;

use tracing::debug;

impl<T: Average, F: Fabric<T>> GlobalMatrix<T, F> {
    /// Collective: replace the matrix `M` with `(M + Mᵗ) / 2`.
    ///
    /// Every member averages its own block against the mirror region across the
    /// diagonal, with no leader. For a block on the diagonal the mirror is the block
    /// itself. The mirror region may span several owners when the row and column
    /// splits differ, so only a square matrix is required.
    ///
    /// Runs in three barrier-separated phases: settle all earlier writes, read the
    /// pre-symmetrization values, then overwrite owned blocks. No member writes until every
    /// member has finished reading, and the result is visible to all when this returns.
    pub fn symmetrize(&self) -> Result<()> {
        if self.nrows() != self.ncols() {
            return Err(Error::NotSquare {
                nrows: self.nrows(),
                ncols: self.ncols(),
            });
        }
        let owned = self.owned_extent();
        let (rows, cols) = (owned.row_num, owned.col_num);

        self.sync()?;

        let mut block = vec![T::default(); owned.len()];
        self.get_block(owned, &mut block, cols)?;
        // the mirror region is cols x rows
        let mut mirror = vec![T::default(); owned.len()];
        self.get_block(owned.transpose(), &mut mirror, rows)?;

        self.sync()?;

        for i in 0..rows {
            for j in 0..cols {
                let x = &mut block[i * cols + j];
                *x = x.average(mirror[j * rows + i]);
            }
        }
        self.put_block(owned, &block, cols)?;
        debug!(member = self.my_id(), ?owned, "symmetrized block");

        self.sync()
    }
}
