//! An in-memory `SuperChunkStore`: chunks held directly in a `Vec`, rather
//! than addressed by filesystem path. Compression is delegated to `flate2`
//! and `blosc`, gated behind the matching Cargo features.

use std::collections::HashMap;

use crate::backend::{apply_mask_by_zeroing, SuperChunkStore};
use crate::config::{CodecParams, Compressor, StorageConfig};
use crate::error::{CatervaError, Result};

#[derive(Clone)]
struct StoredChunk {
    compressed: Vec<u8>,
    /// Decompressed length, needed because some compressors don't encode it.
    decompressed_len: usize,
}

#[derive(Clone)]
pub struct MemoryStore {
    chunks: Vec<StoredChunk>,
    meta: HashMap<String, Vec<u8>>,
    storage: StorageConfig,
    blocknitems: u64,
    itemsize: usize,
}

impl MemoryStore {
    pub fn new(storage: StorageConfig, blocknitems: u64, itemsize: usize) -> Self {
        Self {
            chunks: Vec::new(),
            meta: HashMap::new(),
            storage,
            blocknitems,
            itemsize,
        }
    }

    fn compress(&self, buf: &[u8]) -> Result<Vec<u8>> {
        match self.storage.codec_params.compressor {
            Compressor::None => Ok(buf.to_vec()),
            #[cfg(feature = "gzip")]
            Compressor::Gzip => {
                use flate2::write::GzEncoder;
                use flate2::Compression;
                use std::io::Write;
                let mut enc = GzEncoder::new(Vec::new(), Compression::new(self.storage.codec_params.level as u32));
                enc.write_all(buf)
                    .map_err(|e| CatervaError::BackendFailed(e.to_string()))?;
                enc.finish().map_err(|e| CatervaError::BackendFailed(e.to_string()))
            }
            #[cfg(feature = "blosc")]
            Compressor::Blosc => {
                let ctx = blosc::Context::new()
                    .compressor(blosc::Compressor::BloscLZ)
                    .map_err(|_| CatervaError::BackendFailed("unsupported blosc compressor".into()))?
                    .clevel(level_to_clevel(self.storage.codec_params.level))
                    .blocksize(None);
                let compressed: Vec<u8> = ctx.compress(buf).into();
                Ok(compressed)
            }
        }
    }

    fn decompress(&self, compressed: &[u8], decompressed_len: usize) -> Result<Vec<u8>> {
        match self.storage.codec_params.compressor {
            Compressor::None => Ok(compressed.to_vec()),
            #[cfg(feature = "gzip")]
            Compressor::Gzip => {
                use flate2::read::GzDecoder;
                use std::io::Read;
                let mut dec = GzDecoder::new(compressed);
                let mut out = Vec::with_capacity(decompressed_len);
                dec.read_to_end(&mut out)
                    .map_err(|e| CatervaError::BackendFailed(e.to_string()))?;
                Ok(out)
            }
            #[cfg(feature = "blosc")]
            Compressor::Blosc => unsafe {
                blosc::decompress_bytes(compressed)
                    .map_err(|_| CatervaError::BackendFailed("blosc decompression failed".into()))
            },
        }
    }
}

#[cfg(feature = "blosc")]
fn level_to_clevel(level: u8) -> blosc::Clevel {
    use blosc::Clevel::*;
    match level {
        0 => None,
        1 => L1,
        2 => L2,
        3 => L3,
        4 => L4,
        5 => L5,
        6 => L6,
        7 => L7,
        8 => L8,
        _ => L9,
    }
}

impl SuperChunkStore for MemoryStore {
    fn create(storage: StorageConfig, blocknitems: u64, itemsize: usize) -> Result<Self> {
        Ok(Self::new(storage, blocknitems, itemsize))
    }

    fn itemsize(&self) -> usize {
        self.itemsize
    }

    fn append_buffer(&mut self, buf: &[u8]) -> Result<u32> {
        let compressed = self.compress(buf)?;
        self.chunks.push(StoredChunk {
            compressed,
            decompressed_len: buf.len(),
        });
        Ok(self.chunks.len() as u32)
    }

    fn decompress_chunk(&self, nchunk: u32, dst: &mut [u8]) -> Result<()> {
        let chunk = self
            .chunks
            .get(nchunk as usize)
            .ok_or_else(|| CatervaError::InvalidIndex(format!("no such chunk {nchunk}")))?;
        let decompressed = self.decompress(&chunk.compressed, chunk.decompressed_len)?;
        if decompressed.len() != dst.len() {
            return Err(CatervaError::BackendFailed(format!(
                "decompressed length {} does not match destination {}",
                decompressed.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(&decompressed);
        Ok(())
    }

    fn decompress_chunk_masked(&self, nchunk: u32, mask: &[bool], dst: &mut [u8]) -> Result<()> {
        // This backend's compressors (gzip, or blosc via the whole-buffer
        // `blosc` crate API) expose no per-block mask, so masking is
        // applied array-side: decompress in full, then zero the masked
        // blocks.
        self.decompress_chunk(nchunk, dst)?;
        apply_mask_by_zeroing(mask, self.blocknitems, self.itemsize, dst);
        Ok(())
    }

    fn n_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    fn meta_exists(&self, name: &str) -> bool {
        self.meta.contains_key(name)
    }

    fn meta_get(&self, name: &str) -> Option<Vec<u8>> {
        self.meta.get(name).cloned()
    }

    fn meta_add(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        if self.meta.contains_key(name) {
            return Err(CatervaError::InvalidArgument(format!("metadata {name} already exists")));
        }
        self.meta.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn meta_update(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        if !self.meta.contains_key(name) {
            return Err(CatervaError::InvalidArgument(format!("metadata {name} does not exist")));
        }
        self.meta.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn codec_params(&self) -> &CodecParams {
        &self.storage.codec_params
    }

    fn storage_config(&self) -> &StorageConfig {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_decompress_roundtrip() {
        let mut store = MemoryStore::new(StorageConfig::default(), 4, 1);
        let buf = vec![1u8, 2, 3, 4];
        assert_eq!(store.append_buffer(&buf).unwrap(), 1);
        let mut dst = vec![0u8; 4];
        store.decompress_chunk(0, &mut dst).unwrap();
        assert_eq!(dst, buf);
    }

    #[test]
    fn masked_decompress_zeroes_masked_blocks() {
        let mut store = MemoryStore::new(StorageConfig::default(), 2, 1);
        let buf = vec![1u8, 2, 3, 4];
        store.append_buffer(&buf).unwrap();
        let mut dst = vec![0u8; 4];
        store.decompress_chunk_masked(0, &[false, true], &mut dst).unwrap();
        assert_eq!(dst, vec![1, 2, 0, 0]);
    }

    #[test]
    fn meta_add_then_update() {
        let mut store = MemoryStore::new(StorageConfig::default(), 4, 1);
        store.meta_add("caterva", b"v1").unwrap();
        assert!(store.meta_exists("caterva"));
        assert_eq!(store.meta_get("caterva").unwrap(), b"v1");
        store.meta_update("caterva", b"v2").unwrap();
        assert_eq!(store.meta_get("caterva").unwrap(), b"v2");
    }
}
