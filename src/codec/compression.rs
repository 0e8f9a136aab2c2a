//! Batch compression.
//!
//! Newer protocols prefix the compressed payload with a one-byte
//! algorithm tag, so the algorithm can change from batch to batch.
//! Older protocols compress every batch with the negotiated algorithm
//! and carry no tag.

use crate::{codec::CodecError, protocol::BUFFER_LIMIT};
use flate2::{
    read::{DeflateDecoder, DeflateEncoder},
    Compression,
};
use serde::{Deserialize, Serialize};
use std::io::{self, Read};

const TAG_ZLIB: u8 = 0x00;
const TAG_SNAPPY: u8 = 0x01;
const TAG_NONE: u8 = 0xff;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    /// Raw deflate, despite the name.
    #[default]
    Zlib,
    Snappy,
    None,
}

impl CompressionAlgorithm {
    pub fn tag(self) -> u8 {
        match self {
            CompressionAlgorithm::Zlib => TAG_ZLIB,
            CompressionAlgorithm::Snappy => TAG_SNAPPY,
            CompressionAlgorithm::None => TAG_NONE,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_ZLIB => Some(CompressionAlgorithm::Zlib),
            TAG_SNAPPY => Some(CompressionAlgorithm::Snappy),
            TAG_NONE => Some(CompressionAlgorithm::None),
            _ => None,
        }
    }

    /// Id used in the network settings packet.
    pub fn network_id(self) -> u16 {
        match self {
            CompressionAlgorithm::Zlib => 0,
            CompressionAlgorithm::Snappy => 1,
            CompressionAlgorithm::None => 0xffff,
        }
    }

    pub fn from_network_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(CompressionAlgorithm::Zlib),
            1 => Some(CompressionAlgorithm::Snappy),
            0xffff => Some(CompressionAlgorithm::None),
            _ => None,
        }
    }
}

fn snappy_error(error: snap::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error)
}

/// How a connection compresses batches.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompressionStrategy {
    /// Before network settings are negotiated.
    Disabled,
    /// Every batch uses one algorithm and there is no tag byte.
    Static(CompressionAlgorithm),
    /// Tagged batches; batches smaller than `threshold` go uncompressed.
    Dynamic {
        preferred: CompressionAlgorithm,
        threshold: usize,
    },
}

impl CompressionStrategy {
    /// Whether a payload compressed with `algorithm` can be sent as-is.
    pub fn accepts(self, algorithm: CompressionAlgorithm) -> bool {
        match self {
            CompressionStrategy::Disabled => algorithm == CompressionAlgorithm::None,
            CompressionStrategy::Static(fixed) => algorithm == fixed,
            CompressionStrategy::Dynamic { .. } => true,
        }
    }

    fn has_tag(self) -> bool {
        matches!(self, CompressionStrategy::Dynamic { .. })
    }
}

/// What the proxy offers clients in network settings.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub algorithm: CompressionAlgorithm,
    pub level: u32,
    /// Smallest batch worth compressing, in bytes.
    pub threshold: u16,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Zlib,
            level: 6,
            threshold: 256,
        }
    }
}

/// Compression state of one connection.
#[derive(Debug, Clone)]
pub struct Compressor {
    strategy: CompressionStrategy,
    level: Compression,
}

impl Compressor {
    pub fn new(strategy: CompressionStrategy, level: u32) -> Self {
        Self {
            strategy,
            level: Compression::new(level.min(9)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(CompressionStrategy::Disabled, 0)
    }

    pub fn strategy(&self) -> CompressionStrategy {
        self.strategy
    }

    /// Algorithm the next batch of `len` uncompressed bytes will use.
    pub fn choose(&self, len: usize) -> CompressionAlgorithm {
        match self.strategy {
            CompressionStrategy::Disabled => CompressionAlgorithm::None,
            CompressionStrategy::Static(algorithm) => algorithm,
            CompressionStrategy::Dynamic {
                preferred,
                threshold,
            } => {
                if len < threshold {
                    CompressionAlgorithm::None
                } else {
                    preferred
                }
            }
        }
    }

    /// Compresses `data` with `algorithm`, without any tag byte.
    pub fn compress(
        &self,
        algorithm: CompressionAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, CodecError> {
        match algorithm {
            CompressionAlgorithm::None => Ok(data.to_vec()),
            CompressionAlgorithm::Zlib => {
                let mut out = Vec::with_capacity(data.len() / 2);
                DeflateEncoder::new(data, self.level)
                    .read_to_end(&mut out)
                    .map_err(CodecError::Compression)?;
                Ok(out)
            }
            CompressionAlgorithm::Snappy => snap::raw::Encoder::new()
                .compress_vec(data)
                .map_err(|e| CodecError::Compression(snappy_error(e))),
        }
    }

    /// Writes the tag byte, if this strategy uses one, and the payload.
    pub fn write_payload(&self, algorithm: CompressionAlgorithm, payload: &[u8], out: &mut Vec<u8>) {
        if self.strategy.has_tag() {
            out.push(algorithm.tag());
        }
        out.extend_from_slice(payload);
    }

    /// Splits a received payload into its algorithm and compressed bytes.
    pub fn read_tag<'a>(&self, data: &'a [u8]) -> Result<(CompressionAlgorithm, &'a [u8]), CodecError> {
        match self.strategy {
            CompressionStrategy::Disabled => Ok((CompressionAlgorithm::None, data)),
            CompressionStrategy::Static(algorithm) => Ok((algorithm, data)),
            CompressionStrategy::Dynamic { .. } => {
                let (&tag, rest) = data.split_first().ok_or(CodecError::EmptyFrame)?;
                let algorithm =
                    CompressionAlgorithm::from_tag(tag).ok_or(CodecError::UnknownCompression(tag))?;
                Ok((algorithm, rest))
            }
        }
    }

    /// Decompresses a payload, refusing output beyond the buffer limit.
    pub fn decompress(
        &self,
        algorithm: CompressionAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, CodecError> {
        match algorithm {
            CompressionAlgorithm::None => {
                if data.len() > BUFFER_LIMIT {
                    return Err(CodecError::TooLarge(data.len()));
                }
                Ok(data.to_vec())
            }
            CompressionAlgorithm::Zlib => {
                let mut out = Vec::with_capacity(data.len() * 2);
                DeflateDecoder::new(data)
                    .take(BUFFER_LIMIT as u64 + 1)
                    .read_to_end(&mut out)
                    .map_err(CodecError::Decompression)?;
                if out.len() > BUFFER_LIMIT {
                    return Err(CodecError::TooLarge(out.len()));
                }
                Ok(out)
            }
            CompressionAlgorithm::Snappy => {
                let len = snap::raw::decompress_len(data)
                    .map_err(|e| CodecError::Decompression(snappy_error(e)))?;
                if len > BUFFER_LIMIT {
                    return Err(CodecError::TooLarge(len));
                }
                snap::raw::Decoder::new()
                    .decompress_vec(data)
                    .map_err(|e| CodecError::Decompression(snappy_error(e)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic() -> Compressor {
        Compressor::new(
            CompressionStrategy::Dynamic {
                preferred: CompressionAlgorithm::Zlib,
                threshold: 256,
            },
            6,
        )
    }

    #[test]
    fn small_batches_skip_compression() {
        let compressor = dynamic();
        assert_eq!(compressor.choose(10), CompressionAlgorithm::None);
        assert_eq!(compressor.choose(256), CompressionAlgorithm::Zlib);
    }

    #[test]
    fn algorithms_roundtrip() {
        let data = b"minecraft:stone ".repeat(100);
        let compressor = dynamic();
        for algorithm in [
            CompressionAlgorithm::Zlib,
            CompressionAlgorithm::Snappy,
            CompressionAlgorithm::None,
        ] {
            let compressed = compressor.compress(algorithm, &data).unwrap();
            let mut framed = Vec::new();
            compressor.write_payload(algorithm, &compressed, &mut framed);
            let (read_algorithm, payload) = compressor.read_tag(&framed).unwrap();
            assert_eq!(read_algorithm, algorithm);
            assert_eq!(compressor.decompress(algorithm, payload).unwrap(), data);
        }
    }

    #[test]
    fn corrupt_payload_is_an_error() {
        let compressor = dynamic();
        let garbage = [0xff, 0xff, 0xff, 0xff, 0x00, 0x12];
        assert!(compressor
            .decompress(CompressionAlgorithm::Snappy, &garbage)
            .is_err());
        assert!(compressor
            .decompress(CompressionAlgorithm::Zlib, &[0x07, 0xff, 0xff])
            .is_err());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(
            dynamic().read_tag(&[0x42, 1, 2]),
            Err(CodecError::UnknownCompression(0x42))
        ));
    }

    #[test]
    fn static_strategy_has_no_tag() {
        let compressor = Compressor::new(CompressionStrategy::Static(CompressionAlgorithm::Zlib), 6);
        let (algorithm, payload) = compressor.read_tag(&[1, 2, 3]).unwrap();
        assert_eq!(algorithm, CompressionAlgorithm::Zlib);
        assert_eq!(payload, [1, 2, 3]);
        assert!(compressor.strategy().accepts(CompressionAlgorithm::Zlib));
        assert!(!compressor.strategy().accepts(CompressionAlgorithm::Snappy));
    }
}
