//! Irregular block-grid partition of a global matrix.
//!
//! Rows are split by `r_displs` and columns by `c_displs`. Block `(rb, cb)` covers rows
//! `r_displs[rb]..r_displs[rb + 1]` and columns `c_displs[cb]..c_displs[cb + 1]`, and is
//! owned by member `rb * c_blocks + cb`.

use crate::error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// A rectangle in global matrix coordinates, `row_num x col_num` elements starting at
/// `(row_start, col_start)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    pub row_start: usize,
    pub row_num: usize,
    pub col_start: usize,
    pub col_num: usize,
}

impl Extent {
    pub const fn new(row_start: usize, row_num: usize, col_start: usize, col_num: usize) -> Self {
        Extent {
            row_start,
            row_num,
            col_start,
            col_num,
        }
    }

    /// One past the last row.
    pub fn row_end(&self) -> usize {
        self.row_start + self.row_num
    }

    /// One past the last column.
    pub fn col_end(&self) -> usize {
        self.col_start + self.col_num
    }

    /// `row_end`, or `None` when it does not fit in a `usize`.
    pub fn checked_row_end(&self) -> Option<usize> {
        self.row_start.checked_add(self.row_num)
    }

    /// `col_end`, or `None` when it does not fit in a `usize`.
    pub fn checked_col_end(&self) -> Option<usize> {
        self.col_start.checked_add(self.col_num)
    }

    pub fn len(&self) -> usize {
        self.row_num * self.col_num
    }

    pub fn is_empty(&self) -> bool {
        self.row_num == 0 || self.col_num == 0
    }

    /// The mirror rectangle across the main diagonal.
    pub fn transpose(&self) -> Extent {
        Extent::new(self.col_start, self.col_num, self.row_start, self.row_num)
    }

    /// The overlapping sub-rectangle, or `None` when the two do not touch.
    pub fn intersect(&self, other: &Extent) -> Option<Extent> {
        let row_start = self.row_start.max(other.row_start);
        let row_end = self.row_end().min(other.row_end());
        let col_start = self.col_start.max(other.col_start);
        let col_end = self.col_end().min(other.col_end());
        if row_start >= row_end || col_start >= col_end {
            return None;
        }
        Some(Extent::new(
            row_start,
            row_end - row_start,
            col_start,
            col_end - col_start,
        ))
    }

    /// `other` lies inside `self`. An `other` whose end overflows is never contained.
    pub fn contains(&self, other: &Extent) -> bool {
        other.row_start >= self.row_start
            && other.col_start >= self.col_start
            && other.checked_row_end().is_some_and(|e| e <= self.row_end())
            && other.checked_col_end().is_some_and(|e| e <= self.col_end())
    }
}

/// Creation parameters shared by every member of the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixConfig {
    pub nrows: usize,
    pub ncols: usize,
    pub r_displs: Vec<usize>,
    pub c_displs: Vec<usize>,
}

impl MatrixConfig {
    pub fn new(nrows: usize, ncols: usize, r_displs: Vec<usize>, c_displs: Vec<usize>) -> Self {
        MatrixConfig {
            nrows,
            ncols,
            r_displs,
            c_displs,
        }
    }

    /// Near-equal splits of both axes.
    pub fn uniform(nrows: usize, ncols: usize, r_blocks: usize, c_blocks: usize) -> Self {
        MatrixConfig {
            nrows,
            ncols,
            r_displs: even_splits(nrows, r_blocks),
            c_displs: even_splits(ncols, c_blocks),
        }
    }

    pub fn r_blocks(&self) -> usize {
        self.r_displs.len().saturating_sub(1)
    }

    pub fn c_blocks(&self) -> usize {
        self.c_displs.len().saturating_sub(1)
    }

    pub fn layout(&self) -> Result<BlockLayout> {
        BlockLayout::new(
            self.nrows,
            self.ncols,
            self.r_displs.clone(),
            self.c_displs.clone(),
        )
    }
}

fn even_splits(extent: usize, blocks: usize) -> Vec<usize> {
    (0..=blocks)
        .map(|i| (i * extent) / blocks.max(1))
        .collect()
}

fn check_displs(axis: &'static str, displs: &[usize], extent: usize) -> Result<()> {
    let valid = displs.len() >= 2
        && displs[0] == 0
        && displs[displs.len() - 1] == extent
        && displs.windows(2).all(|w| w[0] < w[1]);
    if !valid {
        return Err(Error::InvalidDisplacements {
            axis,
            displs: displs.to_vec(),
            extent,
        });
    }
    Ok(())
}

/// Index of the block holding `i`; `displs` must contain `i` in its span.
#[inline]
fn block_of(displs: &[usize], i: usize) -> usize {
    displs.partition_point(|&d| d <= i) - 1
}

/// Blocks whose extent intersects the half-open range `start..end` (`start < end`).
#[inline]
fn blocks_overlapping(displs: &[usize], start: usize, end: usize) -> RangeInclusive<usize> {
    block_of(displs, start)..=block_of(displs, end - 1)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    nrows: usize,
    ncols: usize,
    r_displs: Vec<usize>,
    c_displs: Vec<usize>,
}

impl BlockLayout {
    pub fn new(
        nrows: usize,
        ncols: usize,
        r_displs: Vec<usize>,
        c_displs: Vec<usize>,
    ) -> Result<Self> {
        check_displs("row", &r_displs, nrows)?;
        check_displs("column", &c_displs, ncols)?;
        Ok(BlockLayout {
            nrows,
            ncols,
            r_displs,
            c_displs,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn r_blocks(&self) -> usize {
        self.r_displs.len() - 1
    }

    pub fn c_blocks(&self) -> usize {
        self.c_displs.len() - 1
    }

    pub fn num_blocks(&self) -> usize {
        self.r_blocks() * self.c_blocks()
    }

    pub fn r_displs(&self) -> &[usize] {
        &self.r_displs
    }

    pub fn c_displs(&self) -> &[usize] {
        &self.c_displs
    }

    /// The whole matrix as an extent.
    pub fn full(&self) -> Extent {
        Extent::new(0, self.nrows, 0, self.ncols)
    }

    pub fn owner_of_row(&self, i: usize) -> Option<usize> {
        (i < self.nrows).then(|| block_of(&self.r_displs, i))
    }

    pub fn owner_of_col(&self, j: usize) -> Option<usize> {
        (j < self.ncols).then(|| block_of(&self.c_displs, j))
    }

    /// Member owning global element `(i, j)`.
    pub fn owner_of(&self, i: usize, j: usize) -> Option<usize> {
        Some(self.member_at(self.owner_of_row(i)?, self.owner_of_col(j)?))
    }

    /// Row blocks intersecting `start..end`, `None` for an empty or out-of-range span.
    pub fn row_blocks_overlapping(&self, start: usize, end: usize) -> Option<RangeInclusive<usize>> {
        (start < end && end <= self.nrows).then(|| blocks_overlapping(&self.r_displs, start, end))
    }

    /// Column blocks intersecting `start..end`, `None` for an empty or out-of-range span.
    pub fn col_blocks_overlapping(&self, start: usize, end: usize) -> Option<RangeInclusive<usize>> {
        (start < end && end <= self.ncols).then(|| blocks_overlapping(&self.c_displs, start, end))
    }

    pub fn member_at(&self, row_block: usize, col_block: usize) -> usize {
        row_block * self.c_blocks() + col_block
    }

    pub fn grid_position(&self, member: usize) -> (usize, usize) {
        (member / self.c_blocks(), member % self.c_blocks())
    }

    /// Global extent of the block owned by `member`.
    pub fn block_extent(&self, member: usize) -> Extent {
        let (rb, cb) = self.grid_position(member);
        let (r0, r1) = (self.r_displs[rb], self.r_displs[rb + 1]);
        let (c0, c1) = (self.c_displs[cb], self.c_displs[cb + 1]);
        Extent::new(r0, r1 - r0, c0, c1 - c0)
    }

    /// Widest column block; every member uses it as its local leading dimension.
    pub fn max_block_cols(&self) -> usize {
        self.c_displs
            .windows(2)
            .map(|w| w[1] - w[0])
            .max()
            .unwrap_or(0)
    }

    /// Widest row block.
    pub fn max_block_rows(&self) -> usize {
        self.r_displs
            .windows(2)
            .map(|w| w[1] - w[0])
            .max()
            .unwrap_or(0)
    }

    /// Non-empty and fully inside the matrix.
    pub fn is_valid_region(&self, region: &Extent) -> bool {
        !region.is_empty()
            && region.checked_row_end().is_some_and(|e| e <= self.nrows)
            && region.checked_col_end().is_some_and(|e| e <= self.ncols)
    }

    pub fn check_region(&self, region: &Extent) -> Result<()> {
        if !self.is_valid_region(region) {
            return Err(Error::InvalidRegion {
                region: *region,
                nrows: self.nrows,
                ncols: self.ncols,
            });
        }
        Ok(())
    }

    /// Split `region` into the parts held by each owner, in row-major block order.
    ///
    /// The returned pieces tile `region` exactly. An empty intersection inside the swept
    /// block range means the layout is corrupt and is reported as a fatal error.
    pub fn owners(&self, region: &Extent) -> Result<Vec<(usize, Extent)>> {
        self.check_region(region)?;
        let row_blocks = blocks_overlapping(&self.r_displs, region.row_start, region.row_end());
        let col_blocks = blocks_overlapping(&self.c_displs, region.col_start, region.col_end());
        let mut pieces = Vec::with_capacity(row_blocks.clone().count() * col_blocks.clone().count());
        for rb in row_blocks {
            for cb in col_blocks.clone() {
                let member = self.member_at(rb, cb);
                let piece = self
                    .block_extent(member)
                    .intersect(region)
                    .ok_or(Error::LayoutInvariant {
                        member,
                        region: *region,
                    })?;
                pieces.push((member, piece));
            }
        }
        Ok(pieces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_layout() -> BlockLayout {
        BlockLayout::new(10, 10, vec![0, 1, 4, 6, 10], vec![0, 1, 4, 6, 10]).unwrap()
    }

    #[test]
    fn test_rejects_bad_displacements() {
        assert!(BlockLayout::new(10, 10, vec![0, 4, 4, 10], vec![0, 10]).is_err());
        assert!(BlockLayout::new(10, 10, vec![1, 10], vec![0, 10]).is_err());
        assert!(BlockLayout::new(10, 10, vec![0, 9], vec![0, 10]).is_err());
        assert!(BlockLayout::new(10, 10, vec![0], vec![0, 10]).is_err());
    }

    #[test]
    fn test_owner_of_row() {
        let layout = scenario_layout();
        assert_eq!(layout.owner_of_row(0), Some(0));
        assert_eq!(layout.owner_of_row(1), Some(1));
        assert_eq!(layout.owner_of_row(3), Some(1));
        assert_eq!(layout.owner_of_row(4), Some(2));
        assert_eq!(layout.owner_of_row(9), Some(3));
        assert_eq!(layout.owner_of_row(10), None);
        assert_eq!(layout.owner_of(5, 0), Some(8));
    }

    #[test]
    fn test_blocks_overlapping() {
        let layout = scenario_layout();
        assert_eq!(layout.row_blocks_overlapping(0, 10), Some(0..=3));
        assert_eq!(layout.row_blocks_overlapping(2, 5), Some(1..=2));
        assert_eq!(layout.row_blocks_overlapping(4, 6), Some(2..=2));
        assert_eq!(layout.row_blocks_overlapping(3, 3), None);
        assert_eq!(layout.col_blocks_overlapping(9, 11), None);
    }

    #[test]
    fn test_intersect_edges() {
        let a = Extent::new(0, 4, 0, 4);
        assert_eq!(a.intersect(&Extent::new(4, 2, 0, 4)), None);
        assert_eq!(
            a.intersect(&Extent::new(2, 5, 3, 5)),
            Some(Extent::new(2, 2, 3, 1))
        );
    }

    #[test]
    fn test_partition_completeness() {
        let layouts = [
            scenario_layout(),
            BlockLayout::new(10, 10, vec![0, 1, 4, 6, 10], vec![0, 2, 5, 7, 10]).unwrap(),
            BlockLayout::new(7, 13, vec![0, 7], vec![0, 3, 4, 13]).unwrap(),
        ];
        for layout in layouts {
            let mut hits = vec![0usize; layout.nrows() * layout.ncols()];
            for member in 0..layout.num_blocks() {
                let e = layout.block_extent(member);
                for i in e.row_start..e.row_end() {
                    for j in e.col_start..e.col_end() {
                        hits[i * layout.ncols() + j] += 1;
                        assert_eq!(layout.owner_of(i, j), Some(member));
                    }
                }
            }
            assert!(hits.iter().all(|&h| h == 1));
        }
    }

    #[test]
    fn test_owners_tile_request() {
        let layout = scenario_layout();
        let region = Extent::new(0, 5, 2, 7);
        let pieces = layout.owners(&region).unwrap();
        let members: Vec<usize> = pieces.iter().map(|(m, _)| *m).collect();
        assert_eq!(members, vec![1, 2, 3, 5, 6, 7, 9, 10, 11]);
        assert_eq!(pieces.iter().map(|(_, e)| e.len()).sum::<usize>(), region.len());
        for (member, piece) in &pieces {
            assert!(layout.block_extent(*member).contains(piece));
            assert!(region.contains(piece));
        }
    }

    #[test]
    fn test_owners_rejects_invalid_regions() {
        let layout = scenario_layout();
        assert!(matches!(
            layout.owners(&Extent::new(0, 0, 0, 3)),
            Err(Error::InvalidRegion { .. })
        ));
        assert!(matches!(
            layout.owners(&Extent::new(8, 3, 0, 3)),
            Err(Error::InvalidRegion { .. })
        ));
    }

    #[test]
    fn test_overflowing_regions_are_invalid() {
        let layout = scenario_layout();
        let past_rows = Extent::new(usize::MAX, 2, 0, 1);
        let past_cols = Extent::new(0, 1, usize::MAX, 2);
        for region in [past_rows, past_cols] {
            assert!(!layout.is_valid_region(&region));
            assert!(matches!(
                layout.owners(&region),
                Err(Error::InvalidRegion { .. })
            ));
        }
        assert_eq!(past_rows.checked_row_end(), None);
        assert!(!Extent::new(0, 10, 0, 10).contains(&past_cols));
    }

    #[test]
    fn test_uniform_config() {
        let config = MatrixConfig::uniform(10, 9, 3, 2);
        assert_eq!(config.r_displs, vec![0, 3, 6, 10]);
        assert_eq!(config.c_displs, vec![0, 4, 9]);
        let layout = config.layout().unwrap();
        assert_eq!(layout.num_blocks(), 6);
        assert_eq!(layout.max_block_cols(), 5);
    }

    #[test]
    fn test_config_from_json() {
        let config: MatrixConfig = serde_json::from_str(
            r#"{"nrows": 10, "ncols": 10, "r_displs": [0, 1, 4, 6, 10], "c_displs": [0, 2, 5, 7, 10]}"#,
        )
        .unwrap();
        let layout = config.layout().unwrap();
        assert_eq!(layout.num_blocks(), 16);
        assert_eq!(layout.block_extent(5), Extent::new(1, 3, 2, 3));

        let bad: MatrixConfig = serde_json::from_str(
            r#"{"nrows": 4, "ncols": 4, "r_displs": [0, 3, 2, 4], "c_displs": [0, 4]}"#,
        )
        .unwrap();
        assert!(matches!(
            bad.layout(),
            Err(Error::InvalidDisplacements { axis: "row", .. })
        ));
    }
}
