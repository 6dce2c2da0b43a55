//! One-time import of legacy NumPy `.npy` vector files.
//!
//! Early campaign stores wrote their vectors as little-endian float32 NumPy
//! arrays next to the JSON metadata and texts. This adapter parses those
//! files once so they can be migrated into the JSON store format; it is not
//! part of the steady-state store.

use std::fmt;

const MAGIC: &[u8] = b"\x93NUMPY";

/// Errors surfaced while parsing a legacy `.npy` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NpyError {
    /// The file does not start with the NumPy magic bytes.
    BadMagic,
    /// The file ends before the header or payload is complete.
    Truncated,
    /// The header is present but not a supported f32 array description.
    BadHeader(String),
    /// The payload length disagrees with the shape in the header.
    BadPayload(String),
}

impl fmt::Display for NpyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "not an NPY file (bad magic bytes)"),
            Self::Truncated => write!(f, "NPY file is truncated"),
            Self::BadHeader(detail) => write!(f, "unsupported NPY header: {detail}"),
            Self::BadPayload(detail) => write!(f, "inconsistent NPY payload: {detail}"),
        }
    }
}

impl std::error::Error for NpyError {}

/// Parses a legacy NPY file holding a little-endian float32 array.
///
/// A 2-D array of shape `(rows, dims)` yields one vector per row; a 1-D
/// array yields a single vector. Anything else is rejected.
pub fn read_f32_vectors(bytes: &[u8]) -> Result<Vec<Vec<f32>>, NpyError> {
    let (header, payload) = split_header(bytes)?;
    if !header.contains("'<f4'") && !header.contains("\"<f4\"") {
        return Err(NpyError::BadHeader(format!(
            "expected little-endian float32 ('<f4'), got: {}",
            header.trim()
        )));
    }
    if header.contains("'fortran_order': True") {
        return Err(NpyError::BadHeader(
            "fortran-ordered arrays are not supported".to_string(),
        ));
    }
    let shape = parse_shape(header)?;
    let (rows, dims) = match shape.as_slice() {
        [len] => (1usize, *len),
        [rows, dims] => (*rows, *dims),
        other => {
            return Err(NpyError::BadHeader(format!(
                "expected a 1-D or 2-D array, got {} dimensions",
                other.len()
            )))
        }
    };

    let expected_bytes = rows
        .checked_mul(dims)
        .and_then(|count| count.checked_mul(4))
        .ok_or_else(|| NpyError::BadPayload("shape overflows".to_string()))?;
    if payload.len() != expected_bytes {
        return Err(NpyError::BadPayload(format!(
            "shape ({rows}, {dims}) wants {expected_bytes} bytes, file holds {}",
            payload.len()
        )));
    }

    let mut vectors = Vec::with_capacity(rows);
    let row_bytes = dims * 4;
    for row in payload.chunks_exact(row_bytes.max(1)) {
        let vector: Vec<f32> = row
            .chunks_exact(4)
            .map(|quad| f32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
            .collect();
        vectors.push(vector);
    }
    if dims == 0 {
        vectors = vec![Vec::new(); rows];
    }
    Ok(vectors)
}

/// Splits the raw file into its header text and float payload, handling both
/// v1 (u16 header length) and v2 (u32 header length) layouts.
fn split_header(bytes: &[u8]) -> Result<(&str, &[u8]), NpyError> {
    if bytes.len() < 10 {
        return Err(NpyError::Truncated);
    }
    if &bytes[..6] != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10usize),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(NpyError::Truncated);
            }
            (
                u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize,
                12usize,
            )
        }
        other => {
            return Err(NpyError::BadHeader(format!(
                "unsupported NPY format version {other}"
            )))
        }
    };
    let payload_start = header_start
        .checked_add(header_len)
        .ok_or(NpyError::Truncated)?;
    if bytes.len() < payload_start {
        return Err(NpyError::Truncated);
    }
    let header = std::str::from_utf8(&bytes[header_start..payload_start])
        .map_err(|_| NpyError::BadHeader("header is not valid ASCII".to_string()))?;
    Ok((header, &bytes[payload_start..]))
}

/// Pulls the `'shape': (...)` tuple out of the header dict.
fn parse_shape(header: &str) -> Result<Vec<usize>, NpyError> {
    let after_key = header
        .split_once("'shape':")
        .or_else(|| header.split_once("\"shape\":"))
        .map(|(_, rest)| rest)
        .ok_or_else(|| NpyError::BadHeader("missing 'shape' key".to_string()))?;
    let open = after_key
        .find('(')
        .ok_or_else(|| NpyError::BadHeader("missing shape tuple".to_string()))?;
    let close = after_key[open..]
        .find(')')
        .map(|offset| open + offset)
        .ok_or_else(|| NpyError::BadHeader("unterminated shape tuple".to_string()))?;
    let mut shape = Vec::new();
    for part in after_key[open + 1..close].split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let value: usize = part
            .parse()
            .map_err(|_| NpyError::BadHeader(format!("bad shape component {part:?}")))?;
        shape.push(value);
    }
    if shape.is_empty() {
        return Err(NpyError::BadHeader("empty shape tuple".to_string()));
    }
    Ok(shape)
}
