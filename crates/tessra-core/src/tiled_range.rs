//! Tiled element ranges
//!
//! A [`TiledRange1`] partitions a half-open 1-D interval into contiguous
//! tiles by a strictly increasing boundary sequence; a [`TiledRange`] is the
//! Cartesian product of one partition per axis. The tile grid and the
//! element box both use the row-major ordinal convention of
//! [`Range`](crate::range::Range).

use crate::error::{RangeError, Result};
use crate::perm::Permutation;
use crate::range::{Index, Range};

/// Partition of a 1-D half-open interval into contiguous tiles
///
/// # Examples
///
/// ```
/// use tessra_core::tiled_range::TiledRange1;
///
/// let tr = TiledRange1::new(vec![0, 4, 8]).unwrap();
/// assert_eq!(tr.tile_count(), 2);
/// assert_eq!(tr.tile(1).unwrap(), 4..8);
/// assert_eq!(tr.element_to_tile(5).unwrap(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TiledRange1 {
    boundaries: Vec<usize>,
}

impl TiledRange1 {
    /// Construct from a strictly increasing boundary sequence
    ///
    /// `boundaries[i]..boundaries[i+1]` is tile `i`; at least one boundary
    /// is required (a single boundary yields zero tiles).
    pub fn new(boundaries: impl Into<Vec<usize>>) -> Result<Self> {
        let boundaries = boundaries.into();
        if boundaries.is_empty() {
            return Err(RangeError::UnsortedBoundaries { position: 0 }.into());
        }
        for i in 1..boundaries.len() {
            if boundaries[i] <= boundaries[i - 1] {
                return Err(RangeError::UnsortedBoundaries { position: i }.into());
            }
        }
        Ok(Self { boundaries })
    }

    /// Uniform tiling of `[0, elements)` into blocks of `block` elements
    ///
    /// The trailing tile is shorter when `block` does not divide `elements`.
    pub fn uniform(elements: usize, block: usize) -> Result<Self> {
        if block == 0 {
            return Err(RangeError::UnsortedBoundaries { position: 1 }.into());
        }
        let mut boundaries: Vec<usize> = (0..=elements / block).map(|i| i * block).collect();
        if *boundaries.last().unwrap_or(&0) < elements {
            boundaries.push(elements);
        }
        Self::new(boundaries)
    }

    /// Number of tiles
    pub fn tile_count(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// The covered element interval `[lo, hi)`
    pub fn elements(&self) -> std::ops::Range<usize> {
        self.boundaries[0]..*self.boundaries.last().expect("nonempty boundaries")
    }

    /// Number of elements covered
    pub fn element_count(&self) -> usize {
        self.elements().len()
    }

    /// Element interval of tile `i`
    pub fn tile(&self, i: usize) -> Result<std::ops::Range<usize>> {
        if i >= self.tile_count() {
            return Err(RangeError::OrdinalOutOfRange {
                ordinal: i,
                volume: self.tile_count(),
            }
            .into());
        }
        Ok(self.boundaries[i]..self.boundaries[i + 1])
    }

    /// The tile whose half-open interval contains `element`
    ///
    /// Binary search over the boundary sequence.
    pub fn element_to_tile(&self, element: usize) -> Result<usize> {
        let r = self.elements();
        if element < r.start || element >= r.end {
            return Err(RangeError::ElementOutOfRange {
                element,
                lo: r.start,
                hi: r.end,
            }
            .into());
        }
        // First boundary strictly greater than `element`, minus one
        Ok(self.boundaries.partition_point(|&b| b <= element) - 1)
    }

    /// The boundary sequence
    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }
}

/// Cartesian product of per-axis tilings
///
/// # Examples
///
/// ```
/// use tessra_core::tiled_range::{TiledRange, TiledRange1};
///
/// let tr = TiledRange::new(vec![
///     TiledRange1::new(vec![0, 4, 8]).unwrap(),
///     TiledRange1::new(vec![0, 4, 8]).unwrap(),
/// ]);
/// assert_eq!(tr.tiles_range().volume(), 4);
/// assert_eq!(tr.elements_range().volume(), 64);
/// let t3 = tr.make_tile_range(3).unwrap();
/// assert_eq!(t3.lower(), &[4, 4]);
/// assert_eq!(t3.upper(), &[8, 8]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TiledRange {
    axes: Vec<TiledRange1>,
    tiles_range: Range,
    elements_range: Range,
}

impl TiledRange {
    /// Construct from per-axis tilings
    pub fn new(axes: impl Into<Vec<TiledRange1>>) -> Self {
        let axes = axes.into();
        let tiles_range = Range::from_extents(axes.iter().map(|a| a.tile_count()))
            .expect("tile grid extents are well-formed");
        let elements_range = Range::new(
            axes.iter().map(|a| a.elements().start),
            axes.iter().map(|a| a.elements().end),
        )
        .expect("element box bounds are well-formed");
        Self {
            axes,
            tiles_range,
            elements_range,
        }
    }

    /// Uniform tiling helper: one `TiledRange1::uniform` per axis
    pub fn uniform(extents: &[usize], block: usize) -> Result<Self> {
        let axes: Vec<TiledRange1> = extents
            .iter()
            .map(|&n| TiledRange1::uniform(n, block))
            .collect::<Result<_>>()?;
        Ok(Self::new(axes))
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    /// Per-axis tiling
    pub fn dim(&self, d: usize) -> &TiledRange1 {
        &self.axes[d]
    }

    /// The box of tile coordinates
    pub fn tiles_range(&self) -> &Range {
        &self.tiles_range
    }

    /// The box of element coordinates
    pub fn elements_range(&self) -> &Range {
        &self.elements_range
    }

    /// Total number of tiles
    pub fn tile_count(&self) -> usize {
        self.tiles_range.volume()
    }

    /// Element range of the tile at grid coordinate `coord`
    pub fn tile_range_by_coord(&self, coord: &[usize]) -> Result<Range> {
        if coord.len() != self.rank() {
            return Err(RangeError::RankMismatch {
                expected: self.rank(),
                got: coord.len(),
            }
            .into());
        }
        let mut lower: Index = Index::with_capacity(self.rank());
        let mut upper: Index = Index::with_capacity(self.rank());
        for (d, &c) in coord.iter().enumerate() {
            let t = self.axes[d].tile(c)?;
            lower.push(t.start);
            upper.push(t.end);
        }
        Range::new(lower, upper)
    }

    /// Element range of the tile at row-major grid ordinal `ordinal`
    pub fn make_tile_range(&self, ordinal: usize) -> Result<Range> {
        let coord = self.tiles_range.coord(ordinal)?;
        self.tile_range_by_coord(&coord)
    }

    /// Tile grid coordinate containing a global element coordinate
    pub fn element_to_tile(&self, element: &[usize]) -> Result<Index> {
        if element.len() != self.rank() {
            return Err(RangeError::RankMismatch {
                expected: self.rank(),
                got: element.len(),
            }
            .into());
        }
        element
            .iter()
            .enumerate()
            .map(|(d, &e)| self.axes[d].element_to_tile(e))
            .collect()
    }

    /// The permuted tiled range: axis `i` becomes axis `p[i]`
    pub fn permute(&self, perm: &Permutation) -> Result<TiledRange> {
        if perm.is_identity() {
            return Ok(self.clone());
        }
        let axes = perm.apply(&self.axes)?;
        Ok(Self::new(axes))
    }
}

impl std::fmt::Display for TiledRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TiledRange{}d{{tiles={}}}", self.rank(), self.tile_count())
    }
}
