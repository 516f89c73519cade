//! Binary encoding of 2D pixel arrays.
//!
//! Layout, all little-endian:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 8    | magic `LCARRAY1` |
//! | 8      | 8    | rows (`u64`) |
//! | 16     | 8    | cols (`u64`) |
//! | 24     | 8 * rows * cols | row-major `f64` data |

use bytemuck::{Pod, Zeroable};
use ndarray::{Array2, ArrayView2};
use thiserror::Error;

pub const ARRAY_MAGIC: [u8; 8] = *b"LCARRAY1";

const HEADER_LEN: usize = std::mem::size_of::<ArrayHeader>();

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload of {0} bytes is shorter than the array header")]
    TooShort(usize),
    #[error("bad magic {0:?}")]
    BadMagic([u8; 8]),
    #[error("header declares {rows}x{cols} values but payload holds {data_bytes} data bytes")]
    LengthMismatch {
        rows: u64,
        cols: u64,
        data_bytes: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct ArrayHeader {
    magic: [u8; 8],
    rows: [u8; 8],
    cols: [u8; 8],
}

impl ArrayHeader {
    fn new(rows: usize, cols: usize) -> Self {
        Self {
            magic: ARRAY_MAGIC,
            rows: (rows as u64).to_le_bytes(),
            cols: (cols as u64).to_le_bytes(),
        }
    }

    fn rows(&self) -> u64 {
        u64::from_le_bytes(self.rows)
    }

    fn cols(&self) -> u64 {
        u64::from_le_bytes(self.cols)
    }
}

pub fn encode_array(array: &ArrayView2<f64>) -> Vec<u8> {
    let (rows, cols) = array.dim();
    let header = ArrayHeader::new(rows, cols);

    let mut out = Vec::with_capacity(HEADER_LEN + 8 * array.len());
    out.extend_from_slice(bytemuck::bytes_of(&header));
    for &v in array.iter() {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode_array(bytes: &[u8]) -> Result<Array2<f64>, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::TooShort(bytes.len()));
    }
    let (head, data) = bytes.split_at(HEADER_LEN);
    let header: ArrayHeader = *bytemuck::from_bytes(head);
    if header.magic != ARRAY_MAGIC {
        return Err(CodecError::BadMagic(header.magic));
    }

    let (rows, cols) = (header.rows(), header.cols());
    let mismatch = CodecError::LengthMismatch {
        rows,
        cols,
        data_bytes: data.len(),
    };
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(8))
        .ok_or_else(|| mismatch.clone())?;
    if expected != data.len() as u64 {
        return Err(mismatch);
    }

    let words: Vec<u64> = bytemuck::pod_collect_to_vec(data);
    let values = words
        .into_iter()
        .map(|w| f64::from_bits(u64::from_le(w)))
        .collect();
    Array2::from_shape_vec((rows as usize, cols as usize), values).map_err(|_| mismatch)
}
