//! An on-disk `SuperChunkStore`: one directory per super-chunk, one file
//! per chunk plus one file per named metadata blob. `fs4` advisory locks
//! are taken on every read/write.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use itertools::Itertools;
use walkdir::WalkDir;

use crate::backend::{apply_mask_by_zeroing, SuperChunkStore};
use crate::config::{CodecParams, Compressor, StorageConfig};
use crate::error::{CatervaError, Result};

pub struct FileStore {
    base_path: PathBuf,
    n_chunks: u32,
    storage: StorageConfig,
    blocknitems: u64,
    itemsize: usize,
}

impl FileStore {
    /// Creates a fresh, empty store rooted at `base_path` (created if
    /// absent).
    pub fn create(base_path: PathBuf, storage: StorageConfig, blocknitems: u64, itemsize: usize) -> Result<Self> {
        fs::create_dir_all(&base_path)?;
        log::debug!("created super-chunk store at {}", base_path.display());
        Ok(Self {
            base_path,
            n_chunks: 0,
            storage,
            blocknitems,
            itemsize,
        })
    }

    /// Reopens a store previously created with `create`, inferring the
    /// chunk count by walking `base_path` for `chunk_*.bin` files rather
    /// than trusting any separately-persisted counter.
    pub fn open(base_path: PathBuf, storage: StorageConfig, blocknitems: u64, itemsize: usize) -> Result<Self> {
        let indices: Vec<u32> = WalkDir::new(&base_path)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| match entry.file_name().to_str() {
                Some(name) => name
                    .strip_prefix("chunk_")
                    .and_then(|rest| rest.strip_suffix(".bin"))
                    .and_then(|n| n.parse::<u32>().ok()),
                None => {
                    log::warn!("skipping directory entry with non-UTF8 name at {}", entry.path().display());
                    None
                }
            })
            .sorted()
            .collect();

        let n_chunks = match indices.last() {
            Some(&max) if indices.len() as u32 == max + 1 => max + 1,
            Some(&max) => {
                return Err(CatervaError::InvalidStorage(format!(
                    "chunk files at {} are not contiguous from 0 (found {} files, highest index {max})",
                    base_path.display(),
                    indices.len()
                )));
            }
            None => 0,
        };
        log::debug!("reopened super-chunk store at {} with {n_chunks} chunks", base_path.display());
        Ok(Self {
            base_path,
            n_chunks,
            storage,
            blocknitems,
            itemsize,
        })
    }

    fn compress(&self, buf: &[u8]) -> Result<Vec<u8>> {
        match self.storage.codec_params.compressor {
            Compressor::None => Ok(buf.to_vec()),
            #[cfg(feature = "gzip")]
            Compressor::Gzip => {
                use flate2::write::GzEncoder;
                use flate2::Compression;
                let mut enc = GzEncoder::new(Vec::new(), Compression::new(self.storage.codec_params.level as u32));
                enc.write_all(buf).map_err(|e| CatervaError::BackendFailed(e.to_string()))?;
                enc.finish().map_err(|e| CatervaError::BackendFailed(e.to_string()))
            }
            #[cfg(feature = "blosc")]
            Compressor::Blosc => {
                let ctx = blosc::Context::new()
                    .compressor(blosc::Compressor::BloscLZ)
                    .map_err(|_| CatervaError::BackendFailed("unsupported blosc compressor".into()))?
                    .blocksize(None);
                Ok(ctx.compress(buf).into())
            }
        }
    }

    fn decompress(&self, compressed: &[u8]) -> Result<Vec<u8>> {
        match self.storage.codec_params.compressor {
            Compressor::None => Ok(compressed.to_vec()),
            #[cfg(feature = "gzip")]
            Compressor::Gzip => {
                use flate2::read::GzDecoder;
                let mut dec = GzDecoder::new(compressed);
                let mut out = Vec::new();
                dec.read_to_end(&mut out).map_err(|e| CatervaError::BackendFailed(e.to_string()))?;
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

fn chunk_path(base: &Path, nchunk: u32) -> PathBuf {
    base.join(format!("chunk_{nchunk}.bin"))
}

fn meta_path(base: &Path, name: &str) -> PathBuf {
    base.join(format!("meta_{name}.bin"))
}

impl SuperChunkStore for FileStore {
    fn create(storage: StorageConfig, blocknitems: u64, itemsize: usize) -> Result<Self> {
        let path = storage
            .path
            .clone()
            .ok_or_else(|| CatervaError::InvalidStorage("filesystem backend requires a path".into()))?;
        Self::create(path, storage, blocknitems, itemsize)
    }

    fn itemsize(&self) -> usize {
        self.itemsize
    }

    fn append_buffer(&mut self, buf: &[u8]) -> Result<u32> {
        let compressed = self.compress(buf)?;
        let path = chunk_path(&self.base_path, self.n_chunks);
        let mut f = File::create(&path)?;
        f.lock_exclusive()?;
        f.write_all(&compressed)?;
        self.n_chunks += 1;
        Ok(self.n_chunks)
    }

    fn decompress_chunk(&self, nchunk: u32, dst: &mut [u8]) -> Result<()> {
        if nchunk >= self.n_chunks {
            return Err(CatervaError::InvalidIndex(format!("no such chunk {nchunk}")));
        }
        let path = chunk_path(&self.base_path, nchunk);
        let mut f = File::open(&path)?;
        f.lock_shared()?;
        let mut compressed = Vec::new();
        f.read_to_end(&mut compressed)?;
        let decompressed = self.decompress(&compressed)?;
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
        self.decompress_chunk(nchunk, dst)?;
        apply_mask_by_zeroing(mask, self.blocknitems, self.itemsize, dst);
        Ok(())
    }

    fn n_chunks(&self) -> u32 {
        self.n_chunks
    }

    fn meta_exists(&self, name: &str) -> bool {
        meta_path(&self.base_path, name).exists()
    }

    fn meta_get(&self, name: &str) -> Option<Vec<u8>> {
        let path = meta_path(&self.base_path, name);
        let mut f = File::open(path).ok()?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf).ok()?;
        Some(buf)
    }

    fn meta_add(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        if self.meta_exists(name) {
            return Err(CatervaError::InvalidArgument(format!("metadata {name} already exists")));
        }
        let mut f = File::create(meta_path(&self.base_path, name))?;
        f.lock_exclusive()?;
        f.write_all(bytes)?;
        Ok(())
    }

    fn meta_update(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        if !self.meta_exists(name) {
            return Err(CatervaError::InvalidArgument(format!("metadata {name} does not exist")));
        }
        let mut f = File::create(meta_path(&self.base_path, name))?;
        f.lock_exclusive()?;
        f.write_all(bytes)?;
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
    use tempdir::TempDir;

    #[test]
    fn append_and_reopen_roundtrip() {
        let tmp = TempDir::new("caterva-fs-test").unwrap();
        let path = tmp.path().join("arr");
        {
            let mut store = FileStore::create(path.clone(), StorageConfig::default(), 4, 1).unwrap();
            store.append_buffer(&[1, 2, 3, 4]).unwrap();
            store.meta_add("caterva", b"geometry").unwrap();
        }

        let reopened = FileStore::open(path, StorageConfig::default(), 4, 1).unwrap();
        assert_eq!(reopened.n_chunks(), 1);
        let mut dst = vec![0u8; 4];
        reopened.decompress_chunk(0, &mut dst).unwrap();
        assert_eq!(dst, vec![1, 2, 3, 4]);
        assert_eq!(reopened.meta_get("caterva").unwrap(), b"geometry");
    }
}
