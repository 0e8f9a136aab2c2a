//! Packet batches: the unit the codec stack reads and writes.

use crate::{
    codec::compression::CompressionAlgorithm,
    protocol::{DecodeError, Encoder, Packet, PacketBody, PacketCodec, PacketHeader},
};
use bytes::Bytes;

/// One packet inside a batch.
///
/// Starts out as raw body bytes. The body is decoded only when
/// somebody asks for it; once it has been mutated (`dirty`) it is
/// re-encoded from the decoded value on the way out.
#[derive(Debug, Clone)]
pub struct BatchPacket {
    pub header: PacketHeader,
    body: Bytes,
    decoded: Option<Packet>,
    dirty: bool,
}

impl BatchPacket {
    /// A packet as received, not yet decoded.
    pub fn raw(header: PacketHeader, body: Bytes) -> Self {
        Self {
            header,
            body,
            decoded: None,
            dirty: false,
        }
    }

    /// A packet synthesized by the proxy.
    pub fn new(packet: impl Into<Packet>) -> Self {
        let packet = packet.into();
        Self {
            header: PacketHeader::new(packet.packet_id()),
            body: Bytes::new(),
            decoded: Some(packet),
            dirty: true,
        }
    }

    pub fn id(&self) -> u32 {
        self.header.packet_id
    }

    /// Raw body bytes as received. Empty for synthesized packets.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn decoded(&self) -> Option<&Packet> {
        self.decoded.as_ref()
    }

    /// Decodes the body if that has not happened yet.
    pub fn decode(&mut self, codec: &PacketCodec) -> Result<&Packet, DecodeError> {
        if self.decoded.is_none() {
            self.decoded = Some(codec.decode_body(self.header.packet_id, &self.body)?);
        }
        self.decoded
            .as_ref()
            .ok_or(DecodeError::UnknownPacket(self.header.packet_id))
    }

    /// Like [`Self::decode`], but hands out the packet for rewriting.
    /// Changes are only written out after [`Self::mark_dirty`].
    pub fn decode_mut(&mut self, codec: &PacketCodec) -> Result<&mut Packet, DecodeError> {
        if self.decoded.is_none() {
            self.decoded = Some(codec.decode_body(self.header.packet_id, &self.body)?);
        }
        self.decoded
            .as_mut()
            .ok_or(DecodeError::UnknownPacket(self.header.packet_id))
    }

    /// Mutable access to the decoded packet. Call [`Self::mark_dirty`]
    /// after changing it.
    pub fn decoded_mut(&mut self) -> Option<&mut Packet> {
        self.decoded.as_mut()
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Replaces the decoded packet after a rewrite changed it.
    pub fn replace(&mut self, packet: Packet) {
        self.header.packet_id = packet.packet_id();
        self.decoded = Some(packet);
        self.dirty = true;
    }

    /// Consumes the packet, returning its decoded value if any.
    pub fn into_decoded(self) -> Option<Packet> {
        self.decoded
    }

    /// Writes the header and body, re-encoding only if dirty.
    pub fn write_to(&self, codec: &PacketCodec, out: &mut Vec<u8>) {
        let mut encoder = Encoder::with_version(out, codec.version());
        self.header.encode(&mut encoder);
        match (&self.decoded, self.dirty) {
            (Some(packet), true) => packet.encode_body(&mut encoder),
            _ => encoder.write_slice(&self.body),
        }
    }
}

/// An ordered group of packets sent as one compressed (and
/// possibly encrypted) frame.
///
/// `compressed` and `uncompressed` hold the representations the batch
/// arrived in. While `modified` is false they are written out verbatim
/// instead of re-serializing the packets.
#[derive(Debug, Clone, Default)]
pub struct PacketBatch {
    pub packets: Vec<BatchPacket>,
    /// Compressed payload, without the algorithm tag.
    pub compressed: Option<Bytes>,
    /// Concatenated length-prefixed packets.
    pub uncompressed: Option<Bytes>,
    pub algorithm: CompressionAlgorithm,
    pub modified: bool,
    /// Write immediately, bypassing the outbound queue.
    pub skip_queue: bool,
}

impl PacketBatch {
    /// A batch of proxy-made packets. Always serialized on write.
    pub fn new(packets: Vec<BatchPacket>) -> Self {
        Self {
            packets,
            modified: true,
            ..Default::default()
        }
    }

    pub fn from_packets(packets: impl IntoIterator<Item = Packet>) -> Self {
        Self::new(packets.into_iter().map(BatchPacket::new).collect())
    }

    pub fn with_skip_queue(mut self) -> Self {
        self.skip_queue = true;
        self
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Drops the original representations; the batch will be re-serialized.
    pub fn mark_modified(&mut self) {
        self.modified = true;
        self.compressed = None;
        self.uncompressed = None;
    }

    /// The uncompressed batch body, reusing the original when unmodified.
    pub fn serialize(&self, codec: &PacketCodec) -> Bytes {
        if !self.modified {
            if let Some(uncompressed) = &self.uncompressed {
                return uncompressed.clone();
            }
        }
        let mut out = Vec::new();
        let mut packet_buf = Vec::new();
        for packet in &self.packets {
            packet_buf.clear();
            packet.write_to(codec, &mut packet_buf);
            let mut encoder = Encoder::with_version(&mut out, codec.version());
            encoder.write_var_uint(packet_buf.len().try_into().unwrap_or(u32::MAX));
            encoder.write_slice(&packet_buf);
        }
        Bytes::from(out)
    }

    /// Appends the packets of `other`, which loses its representations.
    pub fn extend(&mut self, other: PacketBatch) {
        if other.is_empty() {
            return;
        }
        self.mark_modified();
        self.packets.extend(other.packets);
    }
}
