//! The super-chunk backend collaborator.
//!
//! The compressed super-chunk store an array writes to and reads from is
//! expressed here as a narrow trait covering creation, chunk
//! append/decompress, and a small named-blob metadata store — an array
//! only ever addresses backend state by integer chunk index or by named
//! metadata blob, never by an arbitrary key path.

pub mod memory;

#[cfg(feature = "filesystem")]
pub mod filesystem;

use crate::config::{CodecParams, StorageConfig};
use crate::error::Result;

/// A compressed super-chunk store: an ordered sequence of opaque
/// chunk-sized buffers plus a small set of named metadata blobs.
///
/// Implementors own the compressed bytes; an `Array` never holds
/// decompressed chunk data across calls except through its own
/// single-slot cache.
pub trait SuperChunkStore {
    /// Creates a fresh, empty store. `blocknitems`/`itemsize` are needed
    /// up front because masked decompression (and, for the filesystem
    /// backend, nothing else) depends on the block geometry.
    fn create(storage: StorageConfig, blocknitems: u64, itemsize: usize) -> Result<Self>
    where
        Self: Sized;

    /// The element width this store was created with. Not part of the
    /// persisted `"caterva"` blob, which only carries shape geometry, so
    /// `Array::open` recovers it from the backend instead via a
    /// codec-parameter query.
    fn itemsize(&self) -> usize;

    /// Appends one already-repartitioned (block-ordered) chunk buffer.
    /// Returns the new total chunk count.
    fn append_buffer(&mut self, buf: &[u8]) -> Result<u32>;

    /// Decompresses chunk `nchunk` in full into `dst`
    /// (`dst.len() == extchunknitems * itemsize`).
    fn decompress_chunk(&self, nchunk: u32, dst: &mut [u8]) -> Result<()>;

    /// Masked decompression: `mask[b] == true` means block `b` should be
    /// *skipped* (left as zero in `dst`). A backend with no native
    /// per-block masking support (e.g. one built on a compressor that only
    /// exposes whole-buffer decompression) may implement this by
    /// decompressing in full and then zeroing the masked regions; this is
    /// observationally identical to a true per-block masked decompression.
    fn decompress_chunk_masked(&self, nchunk: u32, mask: &[bool], dst: &mut [u8]) -> Result<()>;

    /// Total number of chunks currently stored.
    fn n_chunks(&self) -> u32;

    fn meta_exists(&self, name: &str) -> bool;
    fn meta_get(&self, name: &str) -> Option<Vec<u8>>;
    fn meta_add(&mut self, name: &str, bytes: &[u8]) -> Result<()>;
    fn meta_update(&mut self, name: &str, bytes: &[u8]) -> Result<()>;

    fn codec_params(&self) -> &CodecParams;

    fn storage_config(&self) -> &StorageConfig;
}

/// Zeroes every block flagged in `mask` (`true` == masked-out) within a
/// chunk-shaped buffer that has already been fully decompressed. Shared by
/// backends whose underlying compressor has no native block mask.
pub fn apply_mask_by_zeroing(mask: &[bool], blocknitems: u64, itemsize: usize, buf: &mut [u8]) {
    let block_bytes = blocknitems as usize * itemsize;
    for (b, masked) in mask.iter().enumerate() {
        if *masked {
            let start = b * block_bytes;
            let end = start + block_bytes;
            if end <= buf.len() {
                buf[start..end].iter_mut().for_each(|byte| *byte = 0);
            }
        }
    }
}
