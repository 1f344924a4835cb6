//! Process maps
//!
//! A process map is a pure function from tile ordinal to owning rank, plus
//! a precomputed, increasing list of the ordinals local to this rank. Maps
//! are immutable after construction and shared behind `Arc`.
//!
//! Three decompositions are provided: [`BlockedPmap`] (one contiguous
//! block per rank), [`CyclicPmap`] (round-robin over ordinals) and
//! [`CyclicPmap2D`] (a 2-D tile grid cyclically mapped onto a 2-D process
//! grid, the layout used by the contraction evaluator).

use crate::error::{PmapError, Result};

/// Tile-to-rank ownership map
pub trait Pmap: Send + Sync + std::fmt::Debug {
    /// This process's rank
    fn rank(&self) -> usize;

    /// Number of processes
    fn nprocs(&self) -> usize;

    /// Number of tiles mapped
    fn size(&self) -> usize;

    /// The rank that owns `tile`
    fn owner(&self, tile: usize) -> usize;

    /// True when `tile` is owned by this rank
    fn is_local(&self, tile: usize) -> bool {
        self.owner(tile) == self.rank()
    }

    /// Ordinals local to this rank, in increasing order
    fn local(&self) -> &[usize];
}

fn check_world(rank: usize, nprocs: usize) -> Result<()> {
    if nprocs == 0 {
        return Err(PmapError::ZeroGrid.into());
    }
    if rank >= nprocs {
        return Err(PmapError::InvalidRank { rank, nprocs }.into());
    }
    Ok(())
}

/// One contiguous block of ordinals per rank
///
/// The default distribution for non-contraction results.
#[derive(Debug)]
pub struct BlockedPmap {
    rank: usize,
    nprocs: usize,
    size: usize,
    block: usize,
    local: Vec<usize>,
}

impl BlockedPmap {
    pub fn new(rank: usize, nprocs: usize, size: usize) -> Result<Self> {
        check_world(rank, nprocs)?;
        let block = size / nprocs + usize::from(size % nprocs != 0);
        let local = if block > 0 {
            let lo = (rank * block).min(size);
            let hi = ((rank + 1) * block).min(size);
            (lo..hi).collect()
        } else {
            Vec::new()
        };
        Ok(Self {
            rank,
            nprocs,
            size,
            block,
            local,
        })
    }
}

impl Pmap for BlockedPmap {
    fn rank(&self) -> usize {
        self.rank
    }

    fn nprocs(&self) -> usize {
        self.nprocs
    }

    fn size(&self) -> usize {
        self.size
    }

    fn owner(&self, tile: usize) -> usize {
        debug_assert!(tile < self.size);
        tile / self.block
    }

    fn local(&self) -> &[usize] {
        &self.local
    }
}

/// Round-robin distribution of ordinals over ranks
#[derive(Debug)]
pub struct CyclicPmap {
    rank: usize,
    nprocs: usize,
    size: usize,
    local: Vec<usize>,
}

impl CyclicPmap {
    pub fn new(rank: usize, nprocs: usize, size: usize) -> Result<Self> {
        check_world(rank, nprocs)?;
        let local = (rank..size).step_by(nprocs).collect();
        Ok(Self {
            rank,
            nprocs,
            size,
            local,
        })
    }
}

impl Pmap for CyclicPmap {
    fn rank(&self) -> usize {
        self.rank
    }

    fn nprocs(&self) -> usize {
        self.nprocs
    }

    fn size(&self) -> usize {
        self.size
    }

    fn owner(&self, tile: usize) -> usize {
        debug_assert!(tile < self.size);
        tile % self.nprocs
    }

    fn local(&self) -> &[usize] {
        &self.local
    }
}

/// 2-D cyclic decomposition of a `rows x cols` tile grid onto a
/// `proc_rows x proc_cols` process grid
///
/// `owner(r, c) = (r mod proc_rows) * proc_cols + (c mod proc_cols)`.
/// Ranks outside the process grid own nothing but remain valid to query.
///
/// # Examples
///
/// ```
/// use tessra_core::pmap::{CyclicPmap2D, Pmap};
///
/// let pmap = CyclicPmap2D::new(4, 6, 6, 6, 2, 3).unwrap();
/// assert_eq!(pmap.local(), &[7, 10, 19, 22, 31, 34]);
/// ```
#[derive(Debug)]
pub struct CyclicPmap2D {
    rank: usize,
    nprocs: usize,
    rows: usize,
    cols: usize,
    proc_rows: usize,
    proc_cols: usize,
    local: Vec<usize>,
}

impl CyclicPmap2D {
    pub fn new(
        rank: usize,
        nprocs: usize,
        rows: usize,
        cols: usize,
        proc_rows: usize,
        proc_cols: usize,
    ) -> Result<Self> {
        check_world(rank, nprocs)?;
        if rows == 0 || cols == 0 || proc_rows == 0 || proc_cols == 0 {
            return Err(PmapError::ZeroGrid.into());
        }
        if proc_rows * proc_cols > nprocs {
            return Err(PmapError::GridTooLarge {
                proc_rows,
                proc_cols,
                nprocs,
            }
            .into());
        }

        let mut local = Vec::new();
        if rank < proc_rows * proc_cols {
            let rank_row = rank / proc_cols;
            let rank_col = rank % proc_cols;
            for i in (rank_row..rows).step_by(proc_rows) {
                for j in (rank_col..cols).step_by(proc_cols) {
                    local.push(i * cols + j);
                }
            }
        }

        Ok(Self {
            rank,
            nprocs,
            rows,
            cols,
            proc_rows,
            proc_cols,
            local,
        })
    }

    /// A process grid as square as possible for `nprocs` ranks
    ///
    /// Picks the largest `proc_rows <= sqrt(nprocs)` dividing into a full
    /// grid, clamped to the tile grid dimensions.
    pub fn with_default_grid(
        rank: usize,
        nprocs: usize,
        rows: usize,
        cols: usize,
    ) -> Result<Self> {
        check_world(rank, nprocs)?;
        let mut proc_rows = (nprocs as f64).sqrt() as usize;
        while proc_rows > 1 && nprocs % proc_rows != 0 {
            proc_rows -= 1;
        }
        let proc_rows = proc_rows.clamp(1, rows.max(1));
        let proc_cols = (nprocs / proc_rows).clamp(1, cols.max(1));
        Self::new(rank, nprocs, rows, cols, proc_rows, proc_cols)
    }

    /// Tile rows in the mapped grid
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Tile columns in the mapped grid
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Process-grid rows
    pub fn proc_rows(&self) -> usize {
        self.proc_rows
    }

    /// Process-grid columns
    pub fn proc_cols(&self) -> usize {
        self.proc_cols
    }
}

impl Pmap for CyclicPmap2D {
    fn rank(&self) -> usize {
        self.rank
    }

    fn nprocs(&self) -> usize {
        self.nprocs
    }

    fn size(&self) -> usize {
        self.rows * self.cols
    }

    fn owner(&self, tile: usize) -> usize {
        debug_assert!(tile < self.size());
        let tile_row = tile / self.cols;
        let tile_col = tile % self.cols;
        (tile_row % self.proc_rows) * self.proc_cols + (tile_col % self.proc_cols)
    }

    fn local(&self) -> &[usize] {
        &self.local
    }
}

/// The default distribution: blocked over all ranks
pub fn default_pmap(rank: usize, nprocs: usize, size: usize) -> Result<std::sync::Arc<dyn Pmap>> {
    Ok(std::sync::Arc::new(BlockedPmap::new(rank, nprocs, size)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_partition(maps: Vec<Box<dyn Pmap>>, size: usize) {
        // Local sets partition the ordinal space
        let mut seen = vec![false; size];
        for m in &maps {
            for &t in m.local() {
                assert!(!seen[t], "tile {} owned twice", t);
                assert_eq!(m.owner(t), m.rank());
                seen[t] = true;
            }
        }
        assert!(seen.iter().all(|&s| s), "some tile unowned");
    }

    #[test]
    fn blocked_partitions_all_tiles() {
        let maps: Vec<Box<dyn Pmap>> = (0..3)
            .map(|r| Box::new(BlockedPmap::new(r, 3, 10).unwrap()) as Box<dyn Pmap>)
            .collect();
        check_partition(maps, 10);
    }

    #[test]
    fn blocked_local_is_contiguous() {
        let m = BlockedPmap::new(1, 3, 10).unwrap();
        assert_eq!(m.local(), &[4, 5, 6, 7]);
    }

    #[test]
    fn cyclic_partitions_all_tiles() {
        let maps: Vec<Box<dyn Pmap>> = (0..4)
            .map(|r| Box::new(CyclicPmap::new(r, 4, 11).unwrap()) as Box<dyn Pmap>)
            .collect();
        check_partition(maps, 11);
    }

    #[test]
    fn cyclic_2d_owner_formula() {
        let m = CyclicPmap2D::new(0, 6, 6, 6, 2, 3).unwrap();
        // owner(r, c) = (r % 2) * 3 + (c % 3)
        assert_eq!(m.owner(0), 0);
        assert_eq!(m.owner(7), 4); // tile (1, 1)
        assert_eq!(m.owner(14), 2); // tile (2, 2)
    }

    #[test]
    fn cyclic_2d_rank4_locals() {
        // rows=cols=6, 2x3 process grid: rank 4 is grid position (1, 1),
        // so it owns tiles with r mod 2 == 1 and c mod 3 == 1
        let m = CyclicPmap2D::new(4, 6, 6, 6, 2, 3).unwrap();
        assert_eq!(m.local(), &[7, 10, 19, 22, 31, 34]);
    }

    #[test]
    fn cyclic_2d_partitions_all_tiles() {
        let maps: Vec<Box<dyn Pmap>> = (0..6)
            .map(|r| Box::new(CyclicPmap2D::new(r, 6, 5, 4, 2, 3).unwrap()) as Box<dyn Pmap>)
            .collect();
        check_partition(maps, 20);
    }

    #[test]
    fn rank_outside_subgrid_owns_nothing() {
        let m = CyclicPmap2D::new(5, 8, 4, 4, 2, 2).unwrap();
        assert!(m.local().is_empty());
        // Queries remain valid
        assert!(m.owner(3) < 4);
        assert!(!m.is_local(3));
    }

    #[test]
    fn oversized_grid_is_rejected() {
        assert!(CyclicPmap2D::new(0, 4, 4, 4, 2, 3).is_err());
        assert!(CyclicPmap2D::new(0, 4, 4, 4, 0, 2).is_err());
    }

    #[test]
    fn default_grid_fits_world() {
        for nprocs in 1..=9 {
            let m = CyclicPmap2D::with_default_grid(0, nprocs, 8, 8).unwrap();
            assert!(m.proc_rows() * m.proc_cols() <= nprocs);
        }
    }
}
