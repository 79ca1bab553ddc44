use crate::layout::Extent;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("{axis} displacements {displs:?} must start at 0, end at {extent} and strictly increase")]
    InvalidDisplacements {
        axis: &'static str,
        displs: Vec<usize>,
        extent: usize,
    },

    #[error("group has {group_size} members but the block grid has {blocks} blocks")]
    GroupSizeMismatch { group_size: usize, blocks: usize },

    #[error("member {member} is not part of a group of {group_size}")]
    InvalidMember { member: usize, group_size: usize },

    #[error("block request {region:?} is empty or leaves the {nrows}x{ncols} matrix")]
    InvalidRegion {
        region: Extent,
        nrows: usize,
        ncols: usize,
    },

    #[error("buffer holds {len} elements but the request needs {needed}")]
    BufferTooSmall { needed: usize, len: usize },

    #[error("leading dimension {ld} is smaller than the {cols} requested columns")]
    LeadingDimension { ld: usize, cols: usize },

    #[error("symmetrize needs a square matrix, got {nrows}x{ncols}")]
    NotSquare { nrows: usize, ncols: usize },

    #[error("transfer of {span} elements at offset {offset} overruns member {target}'s window of {len}")]
    WindowBounds {
        target: usize,
        offset: usize,
        span: usize,
        len: usize,
    },

    #[error("member {target}'s window is not locked by this member")]
    NotLocked { target: usize },

    #[error("member {target}'s window is already locked by this member")]
    AlreadyLocked { target: usize },

    /// The block layout and the per-owner decomposition disagree. Never recover from this.
    #[error("layout invariant violated: block of member {member} does not intersect {region:?}")]
    LayoutInvariant { member: usize, region: Extent },

    #[error("fabric error: {0}")]
    Fabric(String),
}

impl Error {
    /// Invariant violations leave the matrix in an unknown state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::LayoutInvariant { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let region = Extent::new(0, 1, 0, 1);
        assert!(Error::LayoutInvariant { member: 3, region }.is_fatal());
        assert!(!Error::InvalidRegion {
            region,
            nrows: 1,
            ncols: 1
        }
        .is_fatal());
        assert!(!Error::NotLocked { target: 0 }.is_fatal());
    }

    #[test]
    fn test_display() {
        let err = Error::GroupSizeMismatch {
            group_size: 4,
            blocks: 16,
        };
        assert_eq!(
            err.to_string(),
            "group has 4 members but the block grid has 16 blocks"
        );
    }
}
