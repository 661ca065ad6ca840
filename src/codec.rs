//! Terrain chunk wire encoding: run-length encoding wrapped in base64.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("decoded run length {decoded} does not match expected size {expected}")]
    SizeMismatch { decoded: usize, expected: usize },
    #[error("run at byte offset {offset} overflows expected size {expected}")]
    Overflow { offset: usize, expected: usize },
    #[error("truncated RLE stream: expected a count byte after value byte at offset {offset}")]
    Truncated { offset: usize },
    #[error("invalid base64: {0}")]
    Base64(String),
}

/// Run-length encode a row-major terrain buffer as `(value, count)` byte
/// pairs. A run longer than 255 cells is split across multiple pairs.
pub fn encode_terrain_rle(values: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut iter = values.iter().peekable();

    while let Some(&value) = iter.next() {
        let mut count: u32 = 1;
        while let Some(&&next) = iter.peek() {
            if next == value && count < 255 {
                iter.next();
                count += 1;
            } else {
                break;
            }
        }
        out.push(value);
        out.push(count as u8);
    }
    out
}

/// Decode an RLE stream produced by [`encode_terrain_rle`].
///
/// # Errors
/// Fails if a run would overflow `expected_size`, or the decoded length
/// doesn't exactly match `expected_size` once the stream is exhausted.
pub fn decode_terrain_rle(data: &[u8], expected_size: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(expected_size);
    let mut offset = 0;

    while offset < data.len() {
        let value = data[offset];
        let count = *data
            .get(offset + 1)
            .ok_or(CodecError::Truncated { offset })? as usize;

        if out.len() + count > expected_size {
            return Err(CodecError::Overflow {
                offset,
                expected: expected_size,
            });
        }
        out.extend(std::iter::repeat(value).take(count));
        offset += 2;
    }

    if out.len() != expected_size {
        return Err(CodecError::SizeMismatch {
            decoded: out.len(),
            expected: expected_size,
        });
    }

    Ok(out)
}

pub fn encode_terrain_base64(values: &[u8]) -> String {
    BASE64.encode(encode_terrain_rle(values))
}

pub fn decode_terrain_base64(encoded: &str, expected_size: usize) -> Result<Vec<u8>, CodecError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| CodecError::Base64(e.to_string()))?;
    decode_terrain_rle(&bytes, expected_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_uniform_chunk() {
        let values = vec![6u8; 1024]; // 32x32, all stone
        let encoded = encode_terrain_rle(&values);
        let decoded = decode_terrain_rle(&encoded, 1024).unwrap();
        assert_eq!(decoded, values);
        // A single uniform run over 1024 cells splits into ceil(1024/255) = 5 pairs.
        assert_eq!(encoded.len(), 5 * 2);
    }

    #[test]
    fn round_trips_mixed_chunk_via_base64() {
        let mut values = vec![3u8; 10];
        values.extend(vec![0u8; 5]);
        values.extend(vec![6u8; 3]);
        let encoded = encode_terrain_base64(&values);
        let decoded = decode_terrain_base64(&encoded, values.len()).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn decode_rejects_size_mismatch() {
        let values = vec![3u8; 4];
        let encoded = encode_terrain_rle(&values);
        let err = decode_terrain_rle(&encoded, 5).unwrap_err();
        assert!(matches!(err, CodecError::SizeMismatch { .. }));
    }

    #[test]
    fn decode_rejects_overflowing_run() {
        // A single run of 200 claiming to fit in a 10-cell buffer.
        let data = vec![3u8, 200u8];
        let err = decode_terrain_rle(&data, 10).unwrap_err();
        assert!(matches!(err, CodecError::Overflow { .. }));
    }
}
