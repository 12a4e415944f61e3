//! The `"caterva"` metadata blob: a compact, self-delimited, tagged-array
//! byte envelope describing an array's geometry.
//!
//! Always big-endian on the wire, regardless of host endianness — values
//! are written and read with `byteorder::BigEndian` explicitly, with no
//! conditional compilation on `cfg(target_endian = ...)` anywhere.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

use crate::{Shape, METADATA_VERSION};

pub const METADATA_NAME: &str = "caterva";

const FIXARRAY5_TAG: u8 = 0x95;
const FIXARRAY_MASK: u8 = 0x90;
const INT64_TAG: u8 = 0xd3;
const INT32_TAG: u8 = 0xd2;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("truncated metadata blob")]
    Truncated(#[from] io::Error),

    #[error("unexpected tag byte 0x{found:02x}, expected 0x{expected:02x}")]
    UnexpectedTag { expected: u8, found: u8 },

    #[error("unsupported metadata version {stored}, newest known is {known}")]
    VersionMismatch { stored: u8, known: u8 },

    #[error("ndim {0} is out of range 1..=8")]
    InvalidNdim(u8),
}

/// Encodes `(shape, chunkshape, blockshape)` into the on-wire format.
/// `shape.len() == chunkshape.len() == blockshape.len()`.
pub fn serialize_meta(shape: &Shape, chunkshape: &Shape, blockshape: &Shape) -> Vec<u8> {
    let ndim = shape.len();
    debug_assert!(ndim > 0 && ndim <= crate::MAX_DIM);
    debug_assert_eq!(chunkshape.len(), ndim);
    debug_assert_eq!(blockshape.len(), ndim);

    let mut buf = Vec::with_capacity(3 + 3 * (1 + ndim) + ndim * 16);
    buf.push(FIXARRAY5_TAG);
    buf.push(METADATA_VERSION);
    buf.push(ndim as u8);

    write_int64_array(&mut buf, shape);
    write_int32_array(&mut buf, chunkshape);
    write_int32_array(&mut buf, blockshape);

    buf
}

fn write_int64_array(buf: &mut Vec<u8>, values: &Shape) {
    buf.push(FIXARRAY_MASK | values.len() as u8);
    for &v in values.iter() {
        buf.push(INT64_TAG);
        buf.write_i64::<BigEndian>(v as i64).expect("Vec<u8> write cannot fail");
    }
}

fn write_int32_array(buf: &mut Vec<u8>, values: &Shape) {
    buf.push(FIXARRAY_MASK | values.len() as u8);
    for &v in values.iter() {
        buf.push(INT32_TAG);
        buf.write_i32::<BigEndian>(v as i32).expect("Vec<u8> write cannot fail");
    }
}

/// Decoded geometry vectors. The encoder never writes past the stored
/// `ndim`, so every axis present here came straight off the wire.
pub struct DecodedMeta {
    pub ndim: usize,
    pub shape: Shape,
    pub chunkshape: Shape,
    pub blockshape: Shape,
}

/// Decodes a `"caterva"` blob produced by `serialize_meta`.
///
/// A stored version newer than `METADATA_VERSION` is a hard error rather
/// than a silently-ignored mismatch.
pub fn deserialize_meta(bytes: &[u8]) -> Result<DecodedMeta, MetadataError> {
    let mut r = Cursor::new(bytes);

    expect_tag(&mut r, FIXARRAY5_TAG)?;

    let stored_version = r.read_u8()?;
    if stored_version > METADATA_VERSION {
        return Err(MetadataError::VersionMismatch {
            stored: stored_version,
            known: METADATA_VERSION,
        });
    }

    let ndim = r.read_u8()?;
    if ndim == 0 || ndim as usize > crate::MAX_DIM {
        return Err(MetadataError::InvalidNdim(ndim));
    }
    let ndim = ndim as usize;

    let shape = read_int64_array(&mut r, ndim)?;
    let chunkshape = read_int32_array(&mut r, ndim)?;
    let blockshape = read_int32_array(&mut r, ndim)?;

    Ok(DecodedMeta {
        ndim,
        shape,
        chunkshape,
        blockshape,
    })
}

fn expect_tag<R: Read>(r: &mut R, expected: u8) -> Result<(), MetadataError> {
    let found = r.read_u8()?;
    if found != expected {
        return Err(MetadataError::UnexpectedTag { expected, found });
    }
    Ok(())
}

fn read_int64_array<R: Read>(r: &mut R, ndim: usize) -> Result<Shape, MetadataError> {
    expect_tag(r, FIXARRAY_MASK | ndim as u8)?;
    let mut out = Shape::with_capacity(ndim);
    for _ in 0..ndim {
        expect_tag(r, INT64_TAG)?;
        out.push(r.read_i64::<BigEndian>()? as u64);
    }
    Ok(out)
}

fn read_int32_array<R: Read>(r: &mut R, ndim: usize) -> Result<Shape, MetadataError> {
    expect_tag(r, FIXARRAY_MASK | ndim as u8)?;
    let mut out = Shape::with_capacity(ndim);
    for _ in 0..ndim {
        expect_tag(r, INT32_TAG)?;
        out.push(r.read_i32::<BigEndian>()? as u64);
    }
    Ok(out)
}

/// Writes a `DecodedMeta`'s vectors through any `Write`, mainly useful for
/// streaming the blob straight into a backend's metadata call without an
/// intermediate `Vec` when that matters.
pub fn write_meta<W: Write>(w: &mut W, shape: &Shape, chunkshape: &Shape, blockshape: &Shape) -> io::Result<()> {
    w.write_all(&serialize_meta(shape, chunkshape, blockshape))
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn roundtrip() {
        let shape: Shape = smallvec![1000, 2000];
        let chunkshape: Shape = smallvec![100, 200];
        let blockshape: Shape = smallvec![10, 20];

        let bytes = serialize_meta(&shape, &chunkshape, &blockshape);
        let decoded = deserialize_meta(&bytes).unwrap();

        assert_eq!(decoded.ndim, 2);
        assert_eq!(decoded.shape, shape);
        assert_eq!(decoded.chunkshape, chunkshape);
        assert_eq!(decoded.blockshape, blockshape);
    }

    #[test]
    fn scenario_5_byte_layout() {
        let shape: Shape = smallvec![1000, 2000];
        let chunkshape: Shape = smallvec![100, 200];
        let blockshape: Shape = smallvec![10, 20];
        let bytes = serialize_meta(&shape, &chunkshape, &blockshape);

        assert_eq!(bytes[0], 0x95);
        assert_eq!(bytes[2], 2);
        // bytes[3] is the shape fixarray tag, bytes[4] is the int64 tag,
        // bytes[5..13) is the big-endian payload for shape[0] == 1000.
        let be_1000 = i64::from_be_bytes(bytes[5..13].try_into().unwrap());
        assert_eq!(be_1000, 1000);
    }

    #[test]
    fn version_mismatch_is_a_hard_error() {
        let shape: Shape = smallvec![4];
        let mut bytes = serialize_meta(&shape, &shape, &shape);
        bytes[1] = METADATA_VERSION + 1;
        let err = deserialize_meta(&bytes).unwrap_err();
        assert!(matches!(err, MetadataError::VersionMismatch { .. }));
    }

    #[test]
    fn total_length_matches_formula() {
        let ndim = 3usize;
        let shape: Shape = smallvec![7, 8, 9];
        let bytes = serialize_meta(&shape, &shape, &shape);
        assert_eq!(bytes.len(), 3 + 3 * (1 + ndim) + ndim * (8 + 4 + 4));
    }
}
