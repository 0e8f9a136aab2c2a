//! Login, negotiation and session-level packets.

use crate::{
    position::{Rotation, Vec3},
    protocol::{Decode, DecodeError, Decoder, Encode, Encoder},
};
use bedrock_transfer_proxy_macros::{Decode, Encode};

/// First packet of a connection, asking for compression settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestNetworkSettings {
    pub protocol_version: i32,
}

impl Encode for RequestNetworkSettings {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_be(self.protocol_version);
    }
}

impl Decode for RequestNetworkSettings {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            protocol_version: decoder.read_i32_be()?,
        })
    }
}

/// Compression algorithm ids in [`NetworkSettings`].
pub mod network_compression {
    pub const ZLIB: u16 = 0;
    pub const SNAPPY: u16 = 1;
    pub const NONE: u16 = 0xffff;
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct NetworkSettings {
    pub compression_threshold: u16,
    pub compression_algorithm: u16,
    pub client_throttle: bool,
    pub client_throttle_threshold: u8,
    pub client_throttle_scalar: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub protocol_version: i32,
    /// Certificate chain and client data JWTs. Not interpreted.
    pub connection_request: Vec<u8>,
}

impl Encode for Login {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_be(self.protocol_version);
        encoder.write_byte_array(&self.connection_request);
    }
}

impl Decode for Login {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            protocol_version: decoder.read_i32_be()?,
            connection_request: decoder.read_byte_array()?.to_vec(),
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PlayStatus {
    pub status: i32,
}

impl PlayStatus {
    pub const LOGIN_SUCCESS: i32 = 0;
    pub const FAILED_CLIENT: i32 = 1;
    pub const FAILED_SERVER: i32 = 2;
    pub const PLAYER_SPAWN: i32 = 3;

    pub fn is_failure(self) -> bool {
        !matches!(self.status, Self::LOGIN_SUCCESS | Self::PLAYER_SPAWN)
    }
}

impl Encode for PlayStatus {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_be(self.status);
    }
}

impl Decode for PlayStatus {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            status: decoder.read_i32_be()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    /// Absent before the reason code existed.
    pub reason: i32,
    pub hide_disconnect_screen: bool,
    pub message: String,
    pub filtered_message: String,
}

impl Disconnect {
    /// Reason code used for disconnects the proxy originates.
    pub const REASON_UNKNOWN: i32 = 0;

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            reason: Self::REASON_UNKNOWN,
            hide_disconnect_screen: false,
            message: message.into(),
            filtered_message: String::new(),
        }
    }
}

impl Encode for Disconnect {
    fn encode(&self, encoder: &mut Encoder) {
        if encoder.version().has_disconnect_reason() {
            encoder.write_var_int(self.reason);
        }
        encoder.write_bool(self.hide_disconnect_screen);
        if !self.hide_disconnect_screen {
            encoder.write_string(&self.message);
            if encoder.version().has_filtered_disconnect_message() {
                encoder.write_string(&self.filtered_message);
            }
        }
    }
}

impl Decode for Disconnect {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.version();
        let reason = if version.has_disconnect_reason() {
            decoder.read_var_int()?
        } else {
            Self::REASON_UNKNOWN
        };
        let hide_disconnect_screen = decoder.read_bool()?;
        let mut message = String::new();
        let mut filtered_message = String::new();
        if !hide_disconnect_screen {
            message = String::decode(decoder)?;
            if version.has_filtered_disconnect_message() {
                filtered_message = String::decode(decoder)?;
            }
        }
        Ok(Self {
            reason,
            hide_disconnect_screen,
            message,
            filtered_message,
        })
    }
}

/// Pack listing sent by the server. Only acknowledged, never inspected.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ResourcePacksInfo {
    #[encoding(rest)]
    pub body: Vec<u8>,
}

/// Pack ordering sent by the server. Only acknowledged, never inspected.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ResourcePackStack {
    #[encoding(rest)]
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePackClientResponse {
    pub status: u8,
    pub pack_ids: Vec<String>,
}

impl ResourcePackClientResponse {
    pub const REFUSED: u8 = 1;
    pub const SEND_PACKS: u8 = 2;
    pub const HAVE_ALL_PACKS: u8 = 3;
    pub const COMPLETED: u8 = 4;

    pub fn new(status: u8) -> Self {
        Self {
            status,
            pack_ids: Vec::new(),
        }
    }
}

impl Encode for ResourcePackClientResponse {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_u8(self.status);
        encoder.write_u16(self.pack_ids.len().try_into().unwrap_or(u16::MAX));
        for pack_id in &self.pack_ids {
            encoder.write_string(pack_id);
        }
    }
}

impl Decode for ResourcePackClientResponse {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let status = decoder.read_u8()?;
        let count = decoder.read_u16()?;
        let pack_ids = (0..count)
            .map(|_| String::decode(decoder))
            .collect::<Result<_, _>>()?;
        Ok(Self { status, pack_ids })
    }
}

/// Spawns the player into the world.
///
/// The level settings continue well past the dimension; they are
/// carried through in `rest`.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct StartGame {
    #[encoding(varlong)]
    pub unique_entity_id: i64,
    #[encoding(varulong)]
    pub runtime_entity_id: u64,
    #[encoding(varint)]
    pub player_gamemode: i32,
    pub position: Vec3,
    pub rotation: Rotation,
    pub seed: u64,
    pub spawn_biome_type: i16,
    pub custom_biome_name: String,
    #[encoding(varint)]
    pub dimension: i32,
    #[encoding(rest)]
    pub rest: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct RequestChunkRadius {
    #[encoding(varint)]
    pub radius: i32,
    pub max_radius: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ChunkRadiusUpdated {
    #[encoding(varint)]
    pub radius: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SetLocalPlayerAsInitialized {
    #[encoding(varulong)]
    pub runtime_entity_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{codec_for, Packet, PacketBody};

    #[test]
    fn login_header_fields_are_big_endian() {
        let mut buf = Vec::new();
        RequestNetworkSettings {
            protocol_version: 712,
        }
        .encode(&mut Encoder::new(&mut buf));
        assert_eq!(buf, [0, 0, 2, 200]);
    }

    #[test]
    fn disconnect_reason_depends_on_version() {
        let packet = Packet::from(Disconnect::with_message("bye"));
        let old = codec_for(582).unwrap();
        let new = codec_for(712).unwrap();
        let old_body = old.encode_body(&packet);
        let new_body = new.encode_body(&packet);
        // reason varint and the filtered message length
        assert_eq!(new_body.len(), old_body.len() + 2);
        assert_eq!(old.decode_body(packet.packet_id(), &old_body).unwrap(), packet);
        assert_eq!(new.decode_body(packet.packet_id(), &new_body).unwrap(), packet);
    }

    #[test]
    fn play_status_failures() {
        assert!(!PlayStatus { status: PlayStatus::LOGIN_SUCCESS }.is_failure());
        assert!(!PlayStatus { status: PlayStatus::PLAYER_SPAWN }.is_failure());
        assert!(PlayStatus { status: PlayStatus::FAILED_SERVER }.is_failure());
    }
}
