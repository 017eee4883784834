use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompressionError {
    #[error("compression I/O failed: {0}")]
    Io(String),

    /// Decompressed output did not have the advertised size
    #[error("decompressed size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("unsupported compression algorithm '{0}'")]
    Unsupported(String),
}

impl From<std::io::Error> for CompressionError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    Gzip,
    Zlib,
    Deflate,
}

impl CompressionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Zlib => "zlib",
            Self::Deflate => "deflate",
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = CompressionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" => Ok(Self::Gzip),
            "zlib" => Ok(Self::Zlib),
            "deflate" => Ok(Self::Deflate),
            other => Err(CompressionError::Unsupported(other.to_string())),
        }
    }
}

/// Compression metadata attached to a resource response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionInfo {
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<CompressionAlgorithm>,
    pub original_size: usize,
    pub compressed_size: usize,
}

impl CompressionInfo {
    pub fn uncompressed(size: usize) -> Self {
        Self {
            applied: false,
            algorithm: None,
            original_size: size,
            compressed_size: size,
        }
    }
}

pub fn compress(data: &[u8], algorithm: CompressionAlgorithm, level: u32) -> Result<Vec<u8>, CompressionError> {
    let level = Compression::new(level.min(9));
    let compressed = match algorithm {
        CompressionAlgorithm::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            encoder.finish()?
        }
        CompressionAlgorithm::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            encoder.finish()?
        }
        CompressionAlgorithm::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            encoder.finish()?
        }
    };
    Ok(compressed)
}

/// Decompress and verify the result is exactly `original_size` bytes.
///
/// At most `original_size + 1` bytes are inflated, so an oversized payload is
/// detected without being fully expanded.
pub fn decompress(
    data: &[u8],
    algorithm: CompressionAlgorithm,
    original_size: usize,
) -> Result<Vec<u8>, CompressionError> {
    let limit = (original_size as u64).saturating_add(1);
    // The advertised size is untrusted; grow from the payload size instead
    let mut output = Vec::with_capacity(original_size.min(data.len().saturating_mul(4)));

    match algorithm {
        CompressionAlgorithm::Gzip => GzDecoder::new(data).take(limit).read_to_end(&mut output)?,
        CompressionAlgorithm::Zlib => ZlibDecoder::new(data).take(limit).read_to_end(&mut output)?,
        CompressionAlgorithm::Deflate => {
            DeflateDecoder::new(data).take(limit).read_to_end(&mut output)?
        }
    };

    if output.len() != original_size {
        return Err(CompressionError::SizeMismatch {
            expected: original_size,
            actual: output.len(),
        });
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"the quick brown fox jumps over the lazy dog\n".repeat(200)
    }

    #[test]
    fn test_round_trip_each_algorithm() {
        let data = sample();
        for algorithm in [
            CompressionAlgorithm::Gzip,
            CompressionAlgorithm::Zlib,
            CompressionAlgorithm::Deflate,
        ] {
            let compressed = compress(&data, algorithm, 6).unwrap();
            assert!(compressed.len() < data.len());
            assert_eq!(decompress(&compressed, algorithm, data.len()).unwrap(), data);
        }
    }

    #[test]
    fn test_size_mismatch_is_integrity_error() {
        let data = sample();
        let compressed = compress(&data, CompressionAlgorithm::Gzip, 6).unwrap();

        assert_eq!(
            decompress(&compressed, CompressionAlgorithm::Gzip, data.len() + 10),
            Err(CompressionError::SizeMismatch {
                expected: data.len() + 10,
                actual: data.len()
            })
        );
        assert!(matches!(
            decompress(&compressed, CompressionAlgorithm::Gzip, 10),
            Err(CompressionError::SizeMismatch { expected: 10, actual: 11 })
        ));
    }

    #[test]
    fn test_absurd_advertised_size_is_mismatch() {
        let compressed = compress(b"hello", CompressionAlgorithm::Gzip, 6).unwrap();
        for advertised in [usize::MAX, 1usize << 62] {
            assert_eq!(
                decompress(&compressed, CompressionAlgorithm::Gzip, advertised),
                Err(CompressionError::SizeMismatch {
                    expected: advertised,
                    actual: 5
                })
            );
        }
    }

    #[test]
    fn test_corrupt_payload_fails() {
        assert!(decompress(b"definitely not gzip", CompressionAlgorithm::Gzip, 5).is_err());
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("GZIP".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Gzip);
        assert!("brotli".parse::<CompressionAlgorithm>().is_err());
        assert_eq!(
            serde_json::to_value(CompressionAlgorithm::Deflate).unwrap(),
            serde_json::json!("deflate")
        );
    }
}
