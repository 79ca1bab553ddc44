//! A distributed global matrix.
//!
//! A logical `nrows x ncols` matrix is split by an irregular row/column block grid across
//! the members of a group, one block per member. Any member can get, put or accumulate any
//! rectangle of it by global coordinates using one-sided transfers into the owners'
//! windows; nobody waits on the owner except at [`GlobalMatrix::sync`].
//!
//! ```ignore
//! use gtmatrix::{fabric::ThreadGroup, Extent, GlobalMatrix, MatrixConfig};
//!
//! let config = MatrixConfig::new(10, 10, vec![0, 1, 4, 6, 10], vec![0, 2, 5, 7, 10]);
//! ThreadGroup::run(16, |comm| {
//!     let matrix = GlobalMatrix::<f64, _>::create(comm, &config)?;
//!     matrix.fill(matrix.my_id() as f64 + 10.0)?;
//!     matrix.symmetrize()?;
//!     let mut row = vec![0.0; 10];
//!     matrix.get_block(Extent::new(0, 1, 0, 10), &mut row, 10)?;
//!     matrix.destroy()
//! });
//! ```

pub mod batch;
pub mod descriptor;
pub mod element;
pub mod error;
pub mod fabric;
pub mod layout;
pub mod logging;
pub mod matrix;
pub mod queue;
mod symmetrize;
pub mod window;

pub use batch::BatchUpdate;
pub use element::{Average, CombineOp, Element};
pub use error::{Error, Result};
pub use layout::{BlockLayout, Extent, MatrixConfig};
pub use matrix::GlobalMatrix;
