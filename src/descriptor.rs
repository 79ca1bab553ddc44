//! Strided-region transfer descriptors.
//!
//! A [`StridedRegion`] addresses `rows x cols` elements inside a buffer whose rows are
//! `stride` elements apart, with the row start offsets precomputed. Shapes up to
//! [`SMALL_BLOCK_DIM_MAX`] in both axes are built once per matrix and looked up by
//! `(rows - 1, cols - 1)`; larger shapes are built for a single transfer and dropped.
//! The two paths are separate entry points: callers test [`DescriptorCache::is_small`]
//! once and then use either the `small_*` lookups or [`DescriptorCache::transient`].

use std::ops::Deref;

use tracing::trace;

/// Largest row or column count served from the descriptor cache.
pub const SMALL_BLOCK_DIM_MAX: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StridedRegion {
    rows: usize,
    cols: usize,
    stride: usize,
    row_offsets: Box<[usize]>,
}

impl StridedRegion {
    /// Offsets that do not fit in a `usize` saturate, so a region that no buffer can hold
    /// reports a [`span`](Self::span) of `usize::MAX`.
    pub fn new(rows: usize, cols: usize, stride: usize) -> Self {
        debug_assert!(stride >= cols);
        StridedRegion {
            rows,
            cols,
            stride,
            row_offsets: (0..rows).map(|r| r.saturating_mul(stride)).collect(),
        }
    }

    /// Rows laid out back to back.
    pub fn packed(rows: usize, cols: usize) -> Self {
        Self::new(rows, cols, cols)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn len(&self) -> usize {
        self.rows.saturating_mul(self.cols)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_packed(&self) -> bool {
        self.stride == self.cols
    }

    /// Elements between the first and one past the last addressed element.
    pub fn span(&self) -> usize {
        match self.rows {
            0 => 0,
            rows => (rows - 1)
                .saturating_mul(self.stride)
                .saturating_add(self.cols),
        }
    }

    /// Index range of row `r` relative to the region's base offset.
    #[inline]
    pub fn row(&self, r: usize) -> std::ops::Range<usize> {
        let start = self.row_offsets[r];
        start..start + self.cols
    }

    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    /// Same shape, strides may differ.
    pub fn matches(&self, other: &StridedRegion) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }
}

/// A descriptor either borrowed from the cache or built for one transfer.
#[derive(Debug)]
pub enum Descriptor<'c> {
    Cached(&'c StridedRegion),
    Transient(StridedRegion),
}

impl Deref for Descriptor<'_> {
    type Target = StridedRegion;

    fn deref(&self) -> &StridedRegion {
        match self {
            Descriptor::Cached(region) => region,
            Descriptor::Transient(region) => region,
        }
    }
}

impl Descriptor<'_> {
    pub fn is_cached(&self) -> bool {
        matches!(self, Descriptor::Cached(_))
    }
}

/// Small-shape descriptor table for one window.
///
/// `strided` entries use the window's leading dimension and describe the destination
/// side of every small transfer (and the source side when the caller's buffer has that
/// same leading dimension). `packed` entries describe contiguous source buffers.
#[derive(Debug)]
pub struct DescriptorCache {
    window_ld: usize,
    strided: Vec<StridedRegion>,
    packed: Vec<StridedRegion>,
}

impl DescriptorCache {
    pub fn new(window_ld: usize) -> Self {
        let mut strided = Vec::with_capacity(SMALL_BLOCK_DIM_MAX * SMALL_BLOCK_DIM_MAX);
        let mut packed = Vec::with_capacity(SMALL_BLOCK_DIM_MAX * SMALL_BLOCK_DIM_MAX);
        for rows in 1..=SMALL_BLOCK_DIM_MAX {
            for cols in 1..=SMALL_BLOCK_DIM_MAX {
                // a column count past window_ld can never address the window
                strided.push(StridedRegion::new(rows, cols, window_ld.max(cols)));
                packed.push(StridedRegion::packed(rows, cols));
            }
        }
        DescriptorCache {
            window_ld,
            strided,
            packed,
        }
    }

    pub fn window_ld(&self) -> usize {
        self.window_ld
    }

    #[inline]
    pub fn is_small(rows: usize, cols: usize) -> bool {
        rows <= SMALL_BLOCK_DIM_MAX && cols <= SMALL_BLOCK_DIM_MAX
    }

    #[inline]
    fn slot(rows: usize, cols: usize) -> usize {
        (rows - 1) * SMALL_BLOCK_DIM_MAX + (cols - 1)
    }

    /// Cached destination-side descriptor for a small `rows x cols` block of the window.
    ///
    /// # Panics
    ///
    /// If either dimension is zero or the shape is not [`is_small`](Self::is_small).
    #[inline]
    pub fn small_window_region(&self, rows: usize, cols: usize) -> &StridedRegion {
        &self.strided[Self::slot(rows, cols)]
    }

    /// Caller-buffer descriptor for a small `rows x cols` block with row stride `stride`.
    /// Packed and window-strided buffers come from the cache; any other stride is built
    /// for this transfer.
    ///
    /// # Panics
    ///
    /// If either dimension is zero or the shape is not [`is_small`](Self::is_small).
    pub fn small_buffer_region(&self, rows: usize, cols: usize, stride: usize) -> Descriptor<'_> {
        let slot = Self::slot(rows, cols);
        if stride == cols {
            Descriptor::Cached(&self.packed[slot])
        } else if stride == self.window_ld {
            Descriptor::Cached(&self.strided[slot])
        } else {
            Self::transient(rows, cols, stride)
        }
    }

    /// A descriptor built for one transfer and dropped with it.
    pub fn transient(rows: usize, cols: usize, stride: usize) -> Descriptor<'static> {
        trace!(rows, cols, stride, "building transient descriptor");
        Descriptor::Transient(StridedRegion::new(rows, cols, stride))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_offsets() {
        let region = StridedRegion::new(3, 2, 5);
        assert_eq!(region.row_offsets(), &[0, 5, 10]);
        assert_eq!(region.row(2), 10..12);
        assert_eq!(region.span(), 12);
        assert!(!region.is_packed());
        assert!(StridedRegion::packed(4, 4).is_packed());
    }

    #[test]
    fn test_unaddressable_region_saturates() {
        let region = StridedRegion::new(3, 1, usize::MAX);
        assert_eq!(region.span(), usize::MAX);
        assert_eq!(region.row_offsets(), &[0, usize::MAX, usize::MAX]);
        assert_eq!(StridedRegion::new(2, usize::MAX, usize::MAX).len(), usize::MAX);
    }

    #[test]
    fn test_small_shapes_are_cached() {
        let cache = DescriptorCache::new(8);
        let packed = cache.small_buffer_region(3, 4, 4);
        assert!(packed.is_cached());
        assert!(packed.is_packed());

        let window_strided = cache.small_buffer_region(3, 4, 8);
        assert!(window_strided.is_cached());
        assert_eq!(window_strided.stride(), 8);

        let odd = cache.small_buffer_region(3, 4, 11);
        assert!(!odd.is_cached());
        assert_eq!(odd.stride(), 11);

        let dst = cache.small_window_region(SMALL_BLOCK_DIM_MAX, SMALL_BLOCK_DIM_MAX);
        assert_eq!(dst.stride(), SMALL_BLOCK_DIM_MAX);
        assert!(DescriptorCache::is_small(SMALL_BLOCK_DIM_MAX, SMALL_BLOCK_DIM_MAX));
    }

    #[test]
    fn test_cache_returns_same_entry() {
        let cache = DescriptorCache::new(10);
        let a = cache.small_window_region(2, 7);
        let b = cache.small_window_region(2, 7);
        assert!(std::ptr::eq(a, b));
        match cache.small_buffer_region(2, 7, 10) {
            Descriptor::Cached(c) => assert!(std::ptr::eq(a, c)),
            Descriptor::Transient(_) => panic!("window-strided buffer should be cached"),
        }
    }

    #[test]
    fn test_large_shapes_are_transient() {
        assert!(!DescriptorCache::is_small(SMALL_BLOCK_DIM_MAX + 1, 3));
        assert!(!DescriptorCache::is_small(2, SMALL_BLOCK_DIM_MAX + 4));
        let dst = DescriptorCache::transient(SMALL_BLOCK_DIM_MAX + 1, 3, 40);
        assert!(!dst.is_cached());
        assert_eq!(dst.stride(), 40);
        let src = DescriptorCache::transient(2, SMALL_BLOCK_DIM_MAX + 4, SMALL_BLOCK_DIM_MAX + 4);
        assert!(!src.is_cached());
        assert!(src.is_packed());
    }
}
