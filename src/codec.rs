//! The wire codec stack: frame marker, encryption, compression and
//! batch splitting, in that order from the wire inwards.

pub mod batch;
pub mod compression;
pub mod encryption;
pub mod frame;

use crate::{
    collaborators::{NoopObserver, Observer},
    protocol::{var_uint_size, DecodeError, Decoder, PacketCodec, PacketHeader, BUFFER_LIMIT},
};
use batch::{BatchPacket, PacketBatch};
use bytes::Bytes;
use compression::{CompressionAlgorithm, CompressionStrategy, Compressor};
use encryption::{EncryptionKey, EncryptionState};
use std::{io, sync::Arc};

/// Errors of the codec stack. Every one of them ends the connection.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid frame marker {0:#04x}")]
    FrameMarker(u8),
    #[error("empty frame")]
    EmptyFrame,
    #[error("unknown compression algorithm tag {0:#04x}")]
    UnknownCompression(u8),
    #[error("failed to compress batch: {0}")]
    Compression(#[source] io::Error),
    #[error("failed to decompress batch: {0}")]
    Decompression(#[source] io::Error),
    #[error("batch of {0} bytes exceeds the buffer limit")]
    TooLarge(usize),
    #[error("encryption is already enabled")]
    EncryptionAlreadyEnabled,
    #[error("encryption checksum mismatch")]
    TrailerMismatch,
    #[error("malformed batch: {0}")]
    Batch(#[source] DecodeError),
}

/// Per-connection codec state.
pub struct BatchCodec {
    packet_codec: &'static PacketCodec,
    compressor: Compressor,
    encryption: Option<EncryptionState>,
    observer: Arc<dyn Observer>,
}

impl BatchCodec {
    pub fn new(packet_codec: &'static PacketCodec) -> Self {
        Self {
            packet_codec,
            compressor: Compressor::disabled(),
            encryption: None,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn packet_codec(&self) -> &'static PacketCodec {
        self.packet_codec
    }

    /// Swaps the packet codec, e.g. once version negotiation is done.
    pub fn set_packet_codec(&mut self, packet_codec: &'static PacketCodec) {
        self.packet_codec = packet_codec;
    }

    pub fn compression(&self) -> CompressionStrategy {
        self.compressor.strategy()
    }

    pub fn set_compression(&mut self, strategy: CompressionStrategy, level: u32) {
        self.compressor = Compressor::new(strategy, level);
    }

    /// Compression strategy a connection of this version uses once
    /// network settings have been exchanged.
    pub fn negotiated_strategy(
        &self,
        algorithm: CompressionAlgorithm,
        threshold: usize,
    ) -> CompressionStrategy {
        if self.packet_codec.version().has_compression_header() {
            CompressionStrategy::Dynamic {
                preferred: algorithm,
                threshold,
            }
        } else {
            CompressionStrategy::Static(algorithm)
        }
    }

    pub fn enable_encryption(&mut self, key: EncryptionKey, validate: bool) -> Result<(), CodecError> {
        if self.encryption.is_some() {
            return Err(CodecError::EncryptionAlreadyEnabled);
        }
        self.encryption = Some(EncryptionState::new(key, validate));
        Ok(())
    }

    /// Turns a received frame into a batch. The packet bodies share
    /// the decompressed buffer.
    pub fn decode(&mut self, frame: &[u8]) -> Result<PacketBatch, CodecError> {
        let payload = frame::strip_marker(frame)?;
        let payload = match &mut self.encryption {
            Some(encryption) => {
                let mut data = payload.to_vec();
                encryption.decrypt(&mut data)?;
                Bytes::from(data)
            }
            None => Bytes::copy_from_slice(payload),
        };

        let (algorithm, compressed) = self.compressor.read_tag(&payload)?;
        let offset = payload.len() - compressed.len();
        let compressed = payload.slice(offset..);
        let uncompressed = match algorithm {
            CompressionAlgorithm::None => compressed.clone(),
            _ => Bytes::from(self.compressor.decompress(algorithm, &compressed)?),
        };
        if algorithm != CompressionAlgorithm::None {
            self.observer
                .bytes_decompressed(compressed.len(), uncompressed.len());
        }

        let packets = split_packets(&uncompressed)?;
        Ok(PacketBatch {
            packets,
            compressed: Some(compressed),
            uncompressed: Some(uncompressed),
            algorithm,
            modified: false,
            skip_queue: false,
        })
    }

    /// Turns a batch into a frame, reusing the batch's original bytes
    /// when nothing changed.
    pub fn encode(&mut self, batch: PacketBatch) -> Result<Bytes, CodecError> {
        let reusable = match &batch.compressed {
            Some(compressed)
                if !batch.modified && self.compressor.strategy().accepts(batch.algorithm) =>
            {
                Some((batch.algorithm, compressed.clone()))
            }
            _ => None,
        };

        let (algorithm, compressed) = match reusable {
            Some(reused) => {
                self.observer.packets_passed_through(batch.len());
                reused
            }
            None => {
                if batch.modified {
                    self.observer.packets_reencoded(batch.len());
                } else {
                    self.observer.packets_passed_through(batch.len());
                }
                let uncompressed = batch.serialize(self.packet_codec);
                let algorithm = self.compressor.choose(uncompressed.len());
                let compressed = match algorithm {
                    CompressionAlgorithm::None => uncompressed,
                    _ => {
                        let compressed =
                            Bytes::from(self.compressor.compress(algorithm, &uncompressed)?);
                        self.observer
                            .bytes_compressed(uncompressed.len(), compressed.len());
                        compressed
                    }
                };
                (algorithm, compressed)
            }
        };
        drop(batch);

        let mut out = frame::start_frame(compressed.len() + 9);
        match &mut self.encryption {
            Some(encryption) => {
                let mut payload = Vec::with_capacity(compressed.len() + 9);
                self.compressor
                    .write_payload(algorithm, &compressed, &mut payload);
                encryption.encrypt(&mut payload);
                out.extend_from_slice(&payload);
            }
            None => self
                .compressor
                .write_payload(algorithm, &compressed, &mut out),
        }
        Ok(Bytes::from(out))
    }
}

/// Splits a batch body into raw packets.
fn split_packets(uncompressed: &Bytes) -> Result<Vec<BatchPacket>, CodecError> {
    let mut packets = Vec::new();
    let mut decoder = Decoder::new(uncompressed);
    while !decoder.is_finished() {
        let length = decoder.read_var_uint().map_err(CodecError::Batch)?;
        let length = usize::try_from(length)
            .map_err(|e| CodecError::Batch(DecodeError::IntConversion(e)))?;
        if length > BUFFER_LIMIT {
            return Err(CodecError::TooLarge(length));
        }
        let start = uncompressed.len() - decoder.buffer().len();
        let packet = decoder.consume_slice(length).map_err(CodecError::Batch)?;

        let mut packet_decoder = Decoder::new(packet);
        let header = PacketHeader::decode(&mut packet_decoder).map_err(CodecError::Batch)?;
        let header_len = var_uint_size(header.to_raw());
        let body = uncompressed.slice(start + header_len..start + length);
        packets.push(BatchPacket::raw(header, body));
    }
    Ok(packets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collaborators::test_support::CountingObserver,
        protocol::{
            latest_codec,
            packet::{ChunkRadiusUpdated, RemoveEntity},
            Packet,
        },
    };

    fn zlib_codec() -> BatchCodec {
        let mut codec = BatchCodec::new(latest_codec());
        codec.set_compression(
            CompressionStrategy::Dynamic {
                preferred: CompressionAlgorithm::Zlib,
                threshold: 0,
            },
            6,
        );
        codec
    }

    fn sample_batch() -> PacketBatch {
        PacketBatch::from_packets([
            Packet::from(RemoveEntity {
                unique_entity_id: 1,
            }),
            Packet::from(ChunkRadiusUpdated { radius: 8 }),
        ])
    }

    #[test]
    fn decode_splits_packets() {
        let mut codec = zlib_codec();
        let frame = codec.encode(sample_batch()).unwrap();
        assert_eq!(frame[0], frame::FRAME_MARKER);
        assert_eq!(frame[1], CompressionAlgorithm::Zlib.tag());

        let batch = codec.decode(&frame).unwrap();
        assert!(!batch.modified);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.packets[0].id(), 0x0e);
        assert_eq!(&batch.packets[0].body()[..], &[0x02]);
        assert_eq!(batch.packets[1].id(), 0x46);
    }

    #[test]
    fn unmodified_batches_pass_through_byte_for_byte() {
        let observer = Arc::new(CountingObserver::default());
        let mut upstream = zlib_codec();
        let frame = upstream.encode(sample_batch()).unwrap();

        let mut downstream = zlib_codec().with_observer(observer.clone());
        let batch = downstream.decode(&frame).unwrap();
        let forwarded = downstream.encode(batch).unwrap();
        assert_eq!(forwarded, frame);
        assert_eq!(observer.passed_through(), 2);
        assert_eq!(observer.reencoded(), 0);
    }

    #[test]
    fn incompatible_compression_is_recompressed() {
        let mut snappy = BatchCodec::new(latest_codec());
        snappy.set_compression(CompressionStrategy::Static(CompressionAlgorithm::Snappy), 0);
        let mut zlib = zlib_codec();
        let frame = zlib.encode(sample_batch()).unwrap();
        let batch = zlib.decode(&frame).unwrap();

        let converted = snappy.encode(batch).unwrap();
        let batch = snappy.decode(&converted).unwrap();
        assert_eq!(batch.algorithm, CompressionAlgorithm::Snappy);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn wrong_marker_is_fatal() {
        let mut codec = zlib_codec();
        assert!(matches!(
            codec.decode(&[0x00, 0xff]),
            Err(CodecError::FrameMarker(0x00))
        ));
    }

    #[test]
    fn encryption_can_only_be_enabled_once() {
        let mut codec = zlib_codec();
        let key = EncryptionKey::new([1; 32]);
        codec.enable_encryption(key, true).unwrap();
        assert!(matches!(
            codec.enable_encryption(key, true),
            Err(CodecError::EncryptionAlreadyEnabled)
        ));
    }

    #[test]
    fn encrypted_roundtrip() {
        let key = EncryptionKey::new([3; 32]);
        let mut sender = zlib_codec();
        let mut receiver = zlib_codec();
        sender.enable_encryption(key, true).unwrap();
        receiver.enable_encryption(key, true).unwrap();
        for _ in 0..3 {
            let frame = sender.encode(sample_batch()).unwrap();
            let batch = receiver.decode(&frame).unwrap();
            assert_eq!(batch.len(), 2);
        }
    }

    #[test]
    fn truncated_packet_is_a_batch_error() {
        let mut codec = BatchCodec::new(latest_codec());
        // declares a five byte packet but carries one byte
        assert!(matches!(
            codec.decode(&[0xfe, 0x05, 0x0e]),
            Err(CodecError::Batch(_))
        ));
    }
}
