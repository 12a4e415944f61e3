//! Pure arithmetic over shape vectors: padded extents, item counts, and
//! linear/multi-index and chunk/block coordinate conversions.
//!
//! No I/O and no allocation beyond the small `CoordVec`s themselves. This is
//! the lowest-level component; every other module builds on it.

use crate::error::CatervaError;
use crate::{CoordVec, Shape, MAX_DIM};

/// Rounds `x` up to the next multiple of `m` (0 stays 0).
pub fn pad_up(x: u64, m: u64) -> u64 {
    if m == 0 || x % m == 0 {
        x
    } else {
        x + m - x % m
    }
}

/// Per-dimension `pad_up`, used for both `ext_shape` (shape vs chunkshape)
/// and `ext_chunk_shape` (chunkshape vs blockshape).
pub fn pad_up_shape(extents: &Shape, units: &Shape) -> Shape {
    extents
        .iter()
        .zip(units.iter())
        .map(|(&x, &m)| pad_up(x, m))
        .collect()
}

/// Product of a shape vector's entries; 0-dimensional and all-zero shapes
/// both yield the conventional product (empty product = 1, any-zero = 0).
pub fn nitems(shape: &Shape) -> u64 {
    shape.iter().product()
}

/// Places `v`'s entries into the last `v.len()` slots of a `MAX_DIM`-wide
/// array, pre-filling the leading slots with 1 so that product and
/// linearization arithmetic over the padded array is dimension-agnostic.
pub fn right_align(v: &Shape) -> [u64; MAX_DIM] {
    debug_assert!(v.len() <= MAX_DIM);
    let mut out = [1u64; MAX_DIM];
    let offset = MAX_DIM - v.len();
    for (i, &x) in v.iter().enumerate() {
        out[offset + i] = x;
    }
    out
}

/// Decomposes a row-major linear index `i` into a `d`-component multi-index
/// over `shape` (last axis fastest).
pub fn lin_to_multi(mut i: u64, shape: &[u64]) -> CoordVec<u64> {
    let mut out = CoordVec::from_elem(0u64, shape.len());
    for axis in (0..shape.len()).rev() {
        let extent = shape[axis].max(1);
        out[axis] = i % extent;
        i /= extent;
    }
    out
}

/// Row-major linearization of a multi-index over `shape` (inverse of
/// `lin_to_multi`).
pub fn multi_to_lin(coord: &[u64], shape: &[u64]) -> u64 {
    let mut total = 0u64;
    let mut stride = 1u64;
    for axis in (0..shape.len()).rev() {
        total += coord[axis] * stride;
        stride *= shape[axis].max(1);
    }
    total
}

/// Which chunk (in dim `i`) logical coordinate `c` falls in.
pub fn chunk_index(c: u64, chunkshape_i: u64) -> u64 {
    c / chunkshape_i
}

/// Which block inside its chunk (in dim `i`) logical coordinate `c` falls
/// in.
pub fn block_index(c: u64, chunkshape_i: u64, blockshape_i: u64) -> u64 {
    (c % chunkshape_i) / blockshape_i
}

/// Offset inside the block (in dim `i`) that logical coordinate `c` falls
/// at.
pub fn offset_in_block(c: u64, chunkshape_i: u64, blockshape_i: u64) -> u64 {
    (c % chunkshape_i) % blockshape_i
}

/// The full derived geometry of an array: logical shape plus chunk/block
/// tiling and every counter defined in the data model. Pure value type; it
/// owns no backend state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub ndim: usize,
    pub itemsize: usize,
    pub shape: Shape,
    pub chunkshape: Shape,
    pub blockshape: Shape,
    pub extshape: Shape,
    pub extchunkshape: Shape,
    pub next_chunkshape: Shape,
}

impl Geometry {
    pub fn new(itemsize: usize, shape: Shape, chunkshape: Shape, blockshape: Shape) -> crate::error::Result<Self> {
        let ndim = shape.len();
        if ndim == 0 || ndim > MAX_DIM {
            return Err(CatervaError::InvalidArgument(format!(
                "ndim must be in 1..={MAX_DIM}, got {ndim}"
            )));
        }
        if chunkshape.len() != ndim || blockshape.len() != ndim {
            return Err(CatervaError::InvalidArgument(
                "shape, chunkshape and blockshape must have equal length".into(),
            ));
        }
        for i in 0..ndim {
            if shape[i] > 0 {
                if chunkshape[i] == 0 {
                    return Err(CatervaError::InvalidArgument(format!(
                        "chunkshape[{i}] must be > 0 when shape[{i}] > 0"
                    )));
                }
                if blockshape[i] == 0 {
                    return Err(CatervaError::InvalidArgument(format!(
                        "blockshape[{i}] must be > 0 when shape[{i}] > 0"
                    )));
                }
                if chunkshape[i] > shape[i] {
                    return Err(CatervaError::InvalidArgument(format!(
                        "chunkshape[{i}] ({}) exceeds shape[{i}] ({})",
                        chunkshape[i], shape[i]
                    )));
                }
                if blockshape[i] > chunkshape[i] {
                    return Err(CatervaError::InvalidArgument(format!(
                        "blockshape[{i}] ({}) exceeds chunkshape[{i}] ({})",
                        blockshape[i], chunkshape[i]
                    )));
                }
            }
        }

        let extshape = pad_up_shape(&shape, &chunkshape);
        let extchunkshape = pad_up_shape(&chunkshape, &blockshape);
        let next_chunkshape = Self::compute_next_chunkshape(&shape, &chunkshape, &extshape, 0);

        Ok(Self {
            ndim,
            itemsize,
            shape,
            chunkshape,
            blockshape,
            extshape,
            extchunkshape,
            next_chunkshape,
        })
    }

    pub fn nitems(&self) -> u64 {
        nitems(&self.shape)
    }

    pub fn chunknitems(&self) -> u64 {
        nitems(&self.chunkshape)
    }

    pub fn blocknitems(&self) -> u64 {
        nitems(&self.blockshape)
    }

    pub fn extnitems(&self) -> u64 {
        nitems(&self.extshape)
    }

    pub fn extchunknitems(&self) -> u64 {
        nitems(&self.extchunkshape)
    }

    pub fn next_chunknitems(&self) -> u64 {
        nitems(&self.next_chunkshape)
    }

    /// Number of chunks along each dimension (`extshape[i] / chunkshape[i]`).
    pub fn chunk_grid_shape(&self) -> Shape {
        self.extshape
            .iter()
            .zip(self.chunkshape.iter())
            .map(|(&e, &c)| if c == 0 { 0 } else { e / c })
            .collect()
    }

    /// Total number of chunks once the array is completely filled.
    pub fn n_chunks_when_filled(&self) -> u64 {
        if self.chunknitems() == 0 {
            0
        } else {
            self.extnitems() / self.chunknitems()
        }
    }

    /// Number of blocks per chunk (`extchunkshape[i] / blockshape[i]`,
    /// product).
    pub fn n_blocks_per_chunk(&self) -> u64 {
        if self.blocknitems() == 0 {
            0
        } else {
            self.extchunknitems() / self.blocknitems()
        }
    }

    /// Recomputes `next_chunkshape` for the chunk at row-major index
    /// `chunk_idx` in the chunk grid: each axis shrinks to the remaining
    /// logical extent whenever that chunk sits on the trailing edge.
    ///
    /// Only meaningful when chunks are (or will be) appended in strictly
    /// row-major order; callers must not call this for an out-of-order
    /// append.
    pub fn compute_next_chunkshape(shape: &Shape, chunkshape: &Shape, extshape: &Shape, chunk_idx: u64) -> Shape {
        let ndim = shape.len();
        let grid: Shape = extshape
            .iter()
            .zip(chunkshape.iter())
            .map(|(&e, &c)| if c == 0 { 0 } else { e / c })
            .collect();
        let multi = lin_to_multi(chunk_idx, &grid);
        (0..ndim)
            .map(|i| {
                let origin = multi[i] * chunkshape[i];
                let remaining = shape[i].saturating_sub(origin);
                remaining.min(chunkshape[i]).max(if remaining == 0 { 0 } else { 1 })
            })
            .collect()
    }

    /// Updates `self.next_chunkshape` to describe the chunk that will be
    /// appended *after* `last_appended_chunk_idx`.
    pub fn advance_next_chunkshape(&mut self, last_appended_chunk_idx: u64) {
        self.next_chunkshape = Self::compute_next_chunkshape(
            &self.shape,
            &self.chunkshape,
            &self.extshape,
            last_appended_chunk_idx + 1,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn pad_up_basic() {
        assert_eq!(pad_up(0, 4), 0);
        assert_eq!(pad_up(10, 4), 12);
        assert_eq!(pad_up(8, 4), 8);
    }

    #[test]
    fn lin_multi_roundtrip() {
        let shape = [6u64, 5];
        for i in 0..30 {
            let multi = lin_to_multi(i, &shape);
            assert_eq!(multi_to_lin(&multi, &shape), i);
        }
    }

    #[test]
    fn geometry_scenario_1() {
        // shape=[10], chunkshape=[4], blockshape=[2]
        let g = Geometry::new(4, smallvec![10], smallvec![4], smallvec![2]).unwrap();
        assert_eq!(g.extshape, Shape::from_slice(&[12]));
        assert_eq!(g.n_chunks_when_filled(), 3);
    }

    #[test]
    fn geometry_scenario_2() {
        // shape=[6,5], chunkshape=[3,3], blockshape=[2,2]
        let g = Geometry::new(1, smallvec![6, 5], smallvec![3, 3], smallvec![2, 2]).unwrap();
        assert_eq!(g.extshape, Shape::from_slice(&[6, 6]));
        assert_eq!(g.extchunkshape, Shape::from_slice(&[4, 4]));
        assert_eq!(g.n_chunks_when_filled(), 4);
    }

    #[test]
    fn blockshape_exceeding_chunkshape_is_rejected() {
        let res = Geometry::new(4, smallvec![10], smallvec![4], smallvec![8]);
        assert!(res.is_err());
    }

    #[test]
    fn chunkshape_exceeding_shape_is_rejected() {
        let res = Geometry::new(4, smallvec![10], smallvec![16], smallvec![2]);
        assert!(res.is_err());
    }

    #[test]
    fn right_align_pads_leading_axes_with_one() {
        let v: Shape = smallvec![3, 4];
        let aligned = right_align(&v);
        assert_eq!(&aligned[..MAX_DIM - 2], &[1u64; MAX_DIM - 2]);
        assert_eq!(&aligned[MAX_DIM - 2..], &[3, 4]);
    }
}
