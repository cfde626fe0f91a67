//! zlib (RFC 1950) compression shared by loose objects and pack entries.

use crate::{Result, StorageError};
use flate2::write::ZlibEncoder;
use flate2::{Decompress, FlushDecompress, Status};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Compression level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// No compression (stored blocks).
    None,
    /// Fast compression (lower ratio)
    Fast,
    /// Default compression (balanced)
    #[default]
    Default,
    /// Best compression (slower, higher ratio)
    Best,
}

impl CompressionLevel {
    /// Converts to flate2 compression level.
    pub fn to_flate2(self) -> flate2::Compression {
        match self {
            CompressionLevel::None => flate2::Compression::none(),
            CompressionLevel::Fast => flate2::Compression::fast(),
            CompressionLevel::Default => flate2::Compression::default(),
            CompressionLevel::Best => flate2::Compression::best(),
        }
    }
}

/// Compresses `data` into a zlib stream.
pub fn compress(data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), level.to_flate2());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses a complete zlib stream.
///
/// Trailing bytes after the end of the stream are rejected.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let (out, consumed) = inflate(data, data.len().saturating_mul(2), None)?;
    if consumed != data.len() {
        return Err(StorageError::CorruptStream(format!(
            "{} trailing bytes after end of stream",
            data.len() - consumed
        )));
    }
    Ok(out)
}

/// Decompresses the zlib stream at the start of `input`.
///
/// Returns the inflated bytes and the number of input bytes the stream
/// occupied, so callers walking a concatenation of streams (pack files)
/// know where the next record begins. A stream that runs out of input
/// before its end marker is `CorruptStream`, and so is one that inflates
/// to more than `max_len` bytes; inflation stops as soon as the limit is
/// passed.
pub fn decompress_prefix(input: &[u8], max_len: usize) -> Result<(Vec<u8>, usize)> {
    inflate(input, max_len, Some(max_len))
}

fn inflate(input: &[u8], size_hint: usize, limit: Option<usize>) -> Result<(Vec<u8>, usize)> {
    let mut inflater = Decompress::new(true);
    let mut initial = size_hint.clamp(64, 1 << 20);
    if let Some(limit) = limit {
        initial = initial.min(limit.saturating_add(1));
    }
    let mut out = Vec::with_capacity(initial);

    loop {
        if out.len() == out.capacity() {
            let mut additional = out.capacity().max(64);
            if let Some(limit) = limit {
                // out.len() <= limit here, so this is at least one byte.
                additional = additional.min(limit.saturating_add(1) - out.len());
            }
            out.reserve_exact(additional);
        }
        let before_in = inflater.total_in();
        let before_out = inflater.total_out();
        let consumed = before_in as usize;

        let status = inflater
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
            .map_err(|e| StorageError::CorruptStream(e.to_string()))?;

        if let Some(limit) = limit {
            if out.len() > limit {
                return Err(StorageError::CorruptStream(format!(
                    "stream inflates past the expected {limit} bytes"
                )));
            }
        }

        match status {
            Status::StreamEnd => return Ok((out, inflater.total_in() as usize)),
            Status::Ok | Status::BufError => {
                let stalled =
                    inflater.total_in() == before_in && inflater.total_out() == before_out;
                if stalled {
                    return Err(StorageError::CorruptStream(format!(
                        "stream truncated after {} input bytes",
                        inflater.total_in()
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_level_default() {
        assert_eq!(CompressionLevel::default(), CompressionLevel::Default);
    }

    #[test]
    fn test_roundtrip_all_levels() {
        let data: Vec<u8> = (0..10_000).map(|i| (i % 251) as u8).collect();
        for level in [
            CompressionLevel::None,
            CompressionLevel::Fast,
            CompressionLevel::Default,
            CompressionLevel::Best,
        ] {
            let compressed = compress(&data, level).unwrap();
            assert_eq!(decompress(&compressed).unwrap(), data);
        }
    }

    #[test]
    fn test_empty_input_roundtrip() {
        let compressed = compress(b"", CompressionLevel::Default).unwrap();
        assert!(decompress(&compressed).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_stream_is_corrupt() {
        let data = vec![7u8; 4096];
        let compressed = compress(&data, CompressionLevel::None).unwrap();
        let truncated = &compressed[..compressed.len() - 10];
        assert!(matches!(
            decompress(truncated),
            Err(StorageError::CorruptStream(_))
        ));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            decompress(b"definitely not zlib"),
            Err(StorageError::CorruptStream(_))
        ));
        assert!(decompress(b"").is_err());
    }

    #[test]
    fn test_prefix_reports_consumed_length() {
        let first = compress(b"first stream", CompressionLevel::Default).unwrap();
        let second = compress(b"second", CompressionLevel::Default).unwrap();
        let mut joined = first.clone();
        joined.extend_from_slice(&second);

        let (out, used) = decompress_prefix(&joined, 12).unwrap();
        assert_eq!(out, b"first stream");
        assert_eq!(used, first.len());

        let (out, used) = decompress_prefix(&joined[used..], 6).unwrap();
        assert_eq!(out, b"second");
        assert_eq!(used, second.len());
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut compressed = compress(b"abc", CompressionLevel::Default).unwrap();
        compressed.push(0);
        assert!(decompress(&compressed).is_err());
    }

    #[test]
    fn test_prefix_stops_at_limit() {
        let data = vec![0u8; 4 << 20];
        let compressed = compress(&data, CompressionLevel::Best).unwrap();
        assert!(compressed.len() < 64 * 1024);

        assert!(matches!(
            decompress_prefix(&compressed, 1),
            Err(StorageError::CorruptStream(_))
        ));
        assert!(matches!(
            decompress_prefix(&compressed, data.len() - 1),
            Err(StorageError::CorruptStream(_))
        ));
        let (out, used) = decompress_prefix(&compressed, data.len()).unwrap();
        assert_eq!(out.len(), data.len());
        assert_eq!(used, compressed.len());
    }

    #[test]
    fn test_prefix_zero_limit() {
        let empty = compress(b"", CompressionLevel::Default).unwrap();
        assert!(decompress_prefix(&empty, 0).unwrap().0.is_empty());

        let one = compress(b"x", CompressionLevel::Default).unwrap();
        assert!(decompress_prefix(&one, 0).is_err());
    }
}
