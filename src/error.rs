//! Error types.
//!
//! A flat `thiserror` enum covering the failure modes of geometry
//! construction, metadata decoding, and backend I/O, rather than a
//! collection of per-module error types.

use thiserror::Error;

use crate::metadata::MetadataError;

#[derive(Error, Debug)]
pub enum CatervaError {
    #[error("expected a handle, found none")]
    NullPointer,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid index: {0}")]
    InvalidIndex(String),

    #[error("invalid storage configuration: {0}")]
    InvalidStorage(String),

    #[error("backend operation failed: {0}")]
    BackendFailed(String),

    #[error("allocation failed")]
    AllocFailed,

    #[error("metadata error")]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CatervaError>;
