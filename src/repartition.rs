//! Reorders a dense row-major chunk buffer into block-tiled storage (and,
//! via the reader path, back again).

use crate::geometry::{lin_to_multi, right_align};
use crate::{Shape, MAX_DIM};

/// Repartitions `src` (row-major, sized `chunknitems * itemsize`, already
/// zero-padded to `chunkshape`) into `dst` (block-major, row-major inside
/// each block, sized `extchunknitems * itemsize`).
///
/// `dst` must be zero-initialized by the caller: cells beyond the clip of a
/// trailing block against `chunkshape` are never written and must already
/// read as zero.
pub fn repartition(
    chunkshape: &Shape,
    blockshape: &Shape,
    extchunkshape: &Shape,
    itemsize: usize,
    src: &[u8],
    dst: &mut [u8],
) {
    let ndim = chunkshape.len();
    let chunkshape_a = right_align(chunkshape);
    let blockshape_a = right_align(blockshape);
    let extchunkshape_a = right_align(extchunkshape);

    let grid_a: [u64; MAX_DIM] = {
        let mut g = [1u64; MAX_DIM];
        for i in 0..MAX_DIM {
            g[i] = if blockshape_a[i] == 0 { 0 } else { extchunkshape_a[i] / blockshape_a[i] };
        }
        g
    };
    let n_blocks: u64 = grid_a.iter().product();

    // Strides (row-major, last axis fastest) of the *logical* chunk, used to
    // compute a flat source offset from a multi-index.
    let chunk_strides = row_major_strides(&chunkshape_a);
    let block_strides = row_major_strides(&blockshape_a);

    for sci in 0..n_blocks {
        let block_multi = lin_to_multi(sci, &grid_a);

        // Block origin inside the chunk, and the clipped logical extent of
        // this block against the chunk's logical shape (trailing blocks on
        // a trailing chunk are smaller than blockshape).
        let mut origin = [0u64; MAX_DIM];
        let mut clip = [0u64; MAX_DIM];
        let mut any_empty = false;
        for i in 0..MAX_DIM {
            origin[i] = block_multi[i] * blockshape_a[i];
            let remaining = chunkshape_a[i].saturating_sub(origin[i]);
            clip[i] = remaining.min(blockshape_a[i]);
            if clip[i] == 0 {
                any_empty = true;
            }
        }
        if any_empty {
            continue;
        }

        let block_byte_offset = (sci as usize) * (blockshape_a.iter().product::<u64>() as usize) * itemsize;

        // Iterate every row (all axes but the last) within the clip.
        let line_len_items = clip[MAX_DIM - 1];
        let n_lines: u64 = clip[..MAX_DIM - 1].iter().product();

        for line in 0..n_lines {
            let line_multi = lin_to_multi(line, &clip[..MAX_DIM - 1]);

            let mut src_coord = [0u64; MAX_DIM];
            let mut dst_coord = [0u64; MAX_DIM];
            for i in 0..MAX_DIM - 1 {
                src_coord[i] = origin[i] + line_multi[i];
                dst_coord[i] = line_multi[i];
            }

            let src_offset = (dot(&src_coord, &chunk_strides) as usize) * itemsize;
            let dst_offset = block_byte_offset + (dot(&dst_coord, &block_strides) as usize) * itemsize;
            let len = (line_len_items as usize) * itemsize;

            dst[dst_offset..dst_offset + len].copy_from_slice(&src[src_offset..src_offset + len]);
        }
    }
    let _ = ndim;
}

fn row_major_strides(shape: &[u64; MAX_DIM]) -> [u64; MAX_DIM] {
    let mut strides = [1u64; MAX_DIM];
    for i in (0..MAX_DIM - 1).rev() {
        strides[i] = strides[i + 1] * shape[i + 1].max(1);
    }
    strides
}

fn dot(a: &[u64; MAX_DIM], b: &[u64; MAX_DIM]) -> u64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn repartition_identity_on_aligned_chunk() {
        // chunkshape == blockshape: repartition is a no-op reshuffle of a
        // single block, i.e. identity.
        let chunkshape: Shape = smallvec![4];
        let blockshape: Shape = smallvec![4];
        let extchunkshape: Shape = smallvec![4];
        let src: Vec<u8> = (0..4u8).collect();
        let mut dst = vec![0u8; 4];
        repartition(&chunkshape, &blockshape, &extchunkshape, 1, &src, &mut dst);
        assert_eq!(dst, src);
    }

    #[test]
    fn repartition_2x2_blocks_of_4x4() {
        // 4x4 chunk of u8 values 0..16 row-major, 2x2 blocks.
        let chunkshape: Shape = smallvec![4, 4];
        let blockshape: Shape = smallvec![2, 2];
        let extchunkshape: Shape = smallvec![4, 4];
        let src: Vec<u8> = (0..16u8).collect();
        let mut dst = vec![0u8; 16];
        repartition(&chunkshape, &blockshape, &extchunkshape, 1, &src, &mut dst);

        // Block (0,0) is rows 0-1, cols 0-1: [0,1,4,5]
        assert_eq!(&dst[0..4], &[0, 1, 4, 5]);
        // Block (0,1) is rows 0-1, cols 2-3: [2,3,6,7]
        assert_eq!(&dst[4..8], &[2, 3, 6, 7]);
    }

    #[test]
    fn repartition_pads_trailing_block_with_zero() {
        // chunkshape=[3], blockshape=[2] -> extchunkshape=[4], one full
        // block [0,1] and one trailing block with only logical cell 2 and
        // a padded zero at index 3.
        let chunkshape: Shape = smallvec![3];
        let blockshape: Shape = smallvec![2];
        let extchunkshape: Shape = smallvec![4];
        let src: Vec<u8> = vec![10, 11, 12];
        let mut dst = vec![0u8; 4];
        repartition(&chunkshape, &blockshape, &extchunkshape, 1, &src, &mut dst);
        assert_eq!(dst, vec![10, 11, 12, 0]);
    }
}
