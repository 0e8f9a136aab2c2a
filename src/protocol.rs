//! Bedrock packet serialization: primitive encoding, the packet
//! header and the per-version packet codec table.

mod decoder;
mod encoder;
mod header;
pub mod nbt;
pub mod packet;
pub mod types;

pub use decoder::{Decode, DecodeError, Decoder};
pub use encoder::{var_uint_size, Encode, Encoder};
pub use header::PacketHeader;
pub use packet::{Packet, UnknownPacket};

/// Limit to avoid out-of-memory DOS.
pub const BUFFER_LIMIT: usize = 12 * 1024 * 1024; // 12 MiB

/// A Bedrock network protocol version.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtocolVersion(u32);

impl ProtocolVersion {
    /// 1.19.80
    pub const V582: Self = Self(582);
    /// 1.20.60
    pub const V649: Self = Self(649);
    /// 1.21.20
    pub const V712: Self = Self(712);

    pub const LATEST: Self = Self::V712;

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether batches carry a compression algorithm tag byte.
    pub fn has_compression_header(self) -> bool {
        self >= Self::V649
    }

    /// Whether level chunks carry their dimension.
    pub fn has_chunk_dimension(self) -> bool {
        self >= Self::V649
    }

    /// Whether `Disconnect` carries a reason code.
    pub fn has_disconnect_reason(self) -> bool {
        self >= Self::V649
    }

    /// Whether `Disconnect` carries a filtered copy of its message.
    pub fn has_filtered_disconnect_message(self) -> bool {
        self >= Self::V712
    }

    /// Whether container packets carry a full container name.
    pub fn has_full_container_name(self) -> bool {
        self >= Self::V712
    }

    /// Whether `StopSound` carries the legacy music flag.
    pub fn has_stop_music_flag(self) -> bool {
        self >= Self::V712
    }

    /// Whether `ChangeDimension` carries a loading screen id.
    pub fn has_loading_screen_id(self) -> bool {
        self >= Self::V712
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Body serialization for one protocol version.
///
/// Resolved once per connection from the version announced at login.
#[derive(Debug, PartialEq, Eq)]
pub struct PacketCodec {
    version: ProtocolVersion,
}

static CODECS: [PacketCodec; 3] = [
    PacketCodec {
        version: ProtocolVersion::V582,
    },
    PacketCodec {
        version: ProtocolVersion::V649,
    },
    PacketCodec {
        version: ProtocolVersion::V712,
    },
];

/// Looks up the codec for a raw protocol version, if supported.
pub fn codec_for(raw_version: u32) -> Option<&'static PacketCodec> {
    CODECS
        .iter()
        .find(|codec| codec.version.raw() == raw_version)
}

/// Codec for the newest supported version.
pub fn latest_codec() -> &'static PacketCodec {
    &CODECS[CODECS.len() - 1]
}

/// Every supported raw protocol version, oldest first.
pub fn supported_versions() -> impl Iterator<Item = u32> {
    CODECS.iter().map(|codec| codec.version.raw())
}

impl PacketCodec {
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Decodes a packet body. The body must be consumed entirely.
    pub fn decode_body(&self, packet_id: u32, body: &[u8]) -> Result<Packet, DecodeError> {
        let mut decoder = Decoder::with_version(body, self.version);
        let packet = Packet::decode_body(packet_id, &mut decoder)?;
        decoder.finish()?;
        Ok(packet)
    }

    /// Encodes a packet body, without the header.
    pub fn encode_body(&self, packet: &Packet) -> Vec<u8> {
        let mut buf = Vec::new();
        packet.encode_body(&mut Encoder::with_version(&mut buf, self.version));
        buf
    }

    /// Encodes a header followed by the body of `packet`.
    pub fn encode_packet(&self, header: PacketHeader, packet: &Packet) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut encoder = Encoder::with_version(&mut buf, self.version);
        header.encode(&mut encoder);
        packet.encode_body(&mut encoder);
        buf
    }
}

/// Implemented by the top-level packet enum, whose discriminant
/// lives in the packet header.
pub trait PacketBody: Sized {
    fn packet_id(&self) -> u32;

    fn encode_body(&self, encoder: &mut Encoder);

    fn decode_body(packet_id: u32, decoder: &mut Decoder) -> Result<Self, DecodeError>;
}

/// Body of a packet without a dedicated variant.
pub trait UnknownBody: Sized {
    fn packet_id(&self) -> u32;

    fn decode_unknown(packet_id: u32, decoder: &mut Decoder) -> Result<Self, DecodeError>;
}
