//! Explicit configuration structs, passed by the caller into every
//! operation that needs them instead of touching global/process state.

/// Which compressor backend a `MemoryStore`/`FileStore` should use. A plain
/// enum, since the metadata format here is a fixed binary envelope, not a
/// JSON codec chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compressor {
    /// No compression; chunks are stored verbatim.
    None,
    #[cfg(feature = "gzip")]
    Gzip,
    #[cfg(feature = "blosc")]
    Blosc,
}

impl Default for Compressor {
    fn default() -> Self {
        Compressor::None
    }
}

/// Codec parameters passed through to the backend: compressor selection,
/// level, filters and their metadata, thread counts, and dictionary use.
#[derive(Clone, Debug)]
pub struct CodecParams {
    pub compressor: Compressor,
    pub level: u8,
    /// Filter identifiers applied before compression, in application
    /// order (e.g. byte-shuffle). Opaque small integers; the concrete
    /// backend interprets them.
    pub filters: Vec<u8>,
    pub filter_meta: Vec<u8>,
    pub compression_threads: u16,
    pub decompression_threads: u16,
    pub use_dict: bool,
}

impl Default for CodecParams {
    fn default() -> Self {
        Self {
            compressor: Compressor::default(),
            level: 5,
            filters: Vec::new(),
            filter_meta: Vec::new(),
            compression_threads: 1,
            decompression_threads: 1,
            use_dict: false,
        }
    }
}

/// Storage configuration for a super-chunk backend: whether chunks live in
/// one contiguous frame or are addressed individually, an optional on-disk
/// path, and the codec parameters above.
#[derive(Clone, Debug, Default)]
pub struct StorageConfig {
    pub contiguous: bool,
    pub path: Option<std::path::PathBuf>,
    pub codec_params: CodecParams,
}
