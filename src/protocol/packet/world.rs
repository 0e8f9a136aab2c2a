//! World, chunk and sound packets.

use crate::{
    position::{BlockPosition, Vec3},
    protocol::{Decode, DecodeError, Decoder, Encode, Encoder},
};
use bedrock_transfer_proxy_macros::{Decode, Encode};

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct UpdateBlock {
    pub position: BlockPosition,
    #[encoding(varuint)]
    pub block_runtime_id: u32,
    #[encoding(varuint)]
    pub flags: u32,
    #[encoding(varuint)]
    pub layer: u32,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct LevelEvent {
    #[encoding(varint)]
    pub event: i32,
    pub position: Vec3,
    #[encoding(varint)]
    pub data: i32,
}

impl LevelEvent {
    /// `data` is a block runtime id.
    pub const PARTICLE_DESTROY_BLOCK: i32 = 2001;
    /// `data` is a block runtime id in the low 24 bits, the face above.
    pub const PARTICLE_CRACK_BLOCK: i32 = 2014;
}

/// Sound types whose `extra_data` is a block runtime id.
pub mod block_sound {
    pub const ITEM_USE_ON: u32 = 0;
    pub const HIT: u32 = 1;
    pub const STEP: u32 = 2;
    pub const JUMP: u32 = 4;
    pub const BREAK: u32 = 5;
    pub const PLACE: u32 = 6;
    pub const HEAVY_STEP: u32 = 7;
    pub const FALL: u32 = 9;
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct LevelSoundEvent {
    #[encoding(varuint)]
    pub sound: u32,
    pub position: Vec3,
    #[encoding(varint)]
    pub extra_data: i32,
    /// Entity identifier and flags.
    #[encoding(rest)]
    pub rest: Vec<u8>,
}

impl LevelSoundEvent {
    pub fn carries_block(&self) -> bool {
        use block_sound::*;
        matches!(
            self.sound,
            ITEM_USE_ON | HIT | STEP | JUMP | BREAK | PLACE | HEAVY_STEP | FALL
        )
    }
}

/// Level event with an NBT payload. High frequency and
/// purely cosmetic.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct LevelEventGeneric {
    #[encoding(varint)]
    pub event: i32,
    #[encoding(rest)]
    pub data: Vec<u8>,
}

const EMPTY_CHUNK_BIOME_SECTIONS: usize = 24;

/// A column of sub-chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelChunk {
    pub chunk_x: i32,
    pub chunk_z: i32,
    pub dimension: i32,
    pub sub_chunk_count: u32,
    /// Present when the client must request sub-chunks up to a limit.
    pub highest_sub_chunk: Option<u16>,
    /// Present when the blob cache is in use.
    pub blob_ids: Option<Vec<u64>>,
    pub data: Vec<u8>,
}

impl LevelChunk {
    const REQUEST_UNLIMITED: u32 = u32::MAX;
    const REQUEST_LIMITED: u32 = u32::MAX - 1;

    /// An empty column with no sub-chunks and default biomes.
    pub fn empty(chunk_x: i32, chunk_z: i32, dimension: i32) -> Self {
        // one single-value biome storage per section, then no border blocks
        let mut data = [0x01, 0x00].repeat(EMPTY_CHUNK_BIOME_SECTIONS);
        data.push(0);
        Self {
            chunk_x,
            chunk_z,
            dimension,
            sub_chunk_count: 0,
            highest_sub_chunk: None,
            blob_ids: None,
            data,
        }
    }

    /// Whether `data` begins with `sub_chunk_count` serialized sub-chunks.
    pub fn has_inline_sub_chunks(&self) -> bool {
        self.sub_chunk_count != Self::REQUEST_UNLIMITED
            && self.sub_chunk_count != Self::REQUEST_LIMITED
            && self.blob_ids.is_none()
    }
}

impl Encode for LevelChunk {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_int(self.chunk_x);
        encoder.write_var_int(self.chunk_z);
        if encoder.version().has_chunk_dimension() {
            encoder.write_var_int(self.dimension);
        }
        encoder.write_var_uint(self.sub_chunk_count);
        if self.sub_chunk_count == Self::REQUEST_LIMITED {
            encoder.write_u16(self.highest_sub_chunk.unwrap_or_default());
        }
        encoder.write_bool(self.blob_ids.is_some());
        if let Some(blob_ids) = &self.blob_ids {
            encoder.write_var_uint(blob_ids.len().try_into().unwrap_or(u32::MAX));
            for blob_id in blob_ids {
                encoder.write_u64(*blob_id);
            }
        }
        encoder.write_byte_array(&self.data);
    }
}

impl Decode for LevelChunk {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let chunk_x = decoder.read_var_int()?;
        let chunk_z = decoder.read_var_int()?;
        let dimension = if decoder.version().has_chunk_dimension() {
            decoder.read_var_int()?
        } else {
            0
        };
        let sub_chunk_count = decoder.read_var_uint()?;
        let highest_sub_chunk = if sub_chunk_count == Self::REQUEST_LIMITED {
            Some(decoder.read_u16()?)
        } else {
            None
        };
        let blob_ids = if decoder.read_bool()? {
            let count = usize::try_from(decoder.read_var_uint()?)?;
            let mut blob_ids = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                blob_ids.push(decoder.read_u64()?);
            }
            Some(blob_ids)
        } else {
            None
        };
        let data = decoder.read_byte_array()?.to_vec();
        Ok(Self {
            chunk_x,
            chunk_z,
            dimension,
            sub_chunk_count,
            highest_sub_chunk,
            blob_ids,
            data,
        })
    }
}

const HEIGHT_MAP_LEN: usize = 256;

/// One sub-chunk of a [`SubChunk`] response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubChunkEntry {
    /// Relative to the response's center.
    pub offset: [i8; 3],
    pub result: u8,
    /// A serialized sub-chunk followed by its block entities. Absent
    /// for all-air sub-chunks when the blob cache is in use.
    pub payload: Vec<u8>,
    pub height_map_type: u8,
    /// 16x16 heights, only present with [`Self::HEIGHT_MAP_HAS_DATA`].
    pub height_map: Vec<u8>,
    pub blob_hash: Option<u64>,
}

impl SubChunkEntry {
    pub const SUCCESS: u8 = 1;
    pub const SUCCESS_ALL_AIR: u8 = 6;
    pub const HEIGHT_MAP_HAS_DATA: u8 = 1;

    fn has_payload(result: u8, cache_enabled: bool) -> bool {
        result != Self::SUCCESS_ALL_AIR || !cache_enabled
    }

    fn encode(&self, encoder: &mut Encoder, cache_enabled: bool) {
        for offset in self.offset {
            encoder.write_i8(offset);
        }
        encoder.write_u8(self.result);
        if Self::has_payload(self.result, cache_enabled) {
            encoder.write_byte_array(&self.payload);
        }
        encoder.write_u8(self.height_map_type);
        if self.height_map_type == Self::HEIGHT_MAP_HAS_DATA {
            encoder.write_slice(&self.height_map);
        }
        if cache_enabled {
            encoder.write_u64(self.blob_hash.unwrap_or_default());
        }
    }

    fn decode(decoder: &mut Decoder, cache_enabled: bool) -> Result<Self, DecodeError> {
        let offset = [decoder.read_i8()?, decoder.read_i8()?, decoder.read_i8()?];
        let result = decoder.read_u8()?;
        let payload = if Self::has_payload(result, cache_enabled) {
            decoder.read_byte_array()?.to_vec()
        } else {
            Vec::new()
        };
        let height_map_type = decoder.read_u8()?;
        let height_map = if height_map_type == Self::HEIGHT_MAP_HAS_DATA {
            decoder.consume_slice(HEIGHT_MAP_LEN)?.to_vec()
        } else {
            Vec::new()
        };
        let blob_hash = if cache_enabled {
            Some(decoder.read_u64()?)
        } else {
            None
        };
        Ok(Self {
            offset,
            result,
            payload,
            height_map_type,
            height_map,
            blob_hash,
        })
    }
}

/// Sub-chunks sent in answer to a client request, used by backends
/// that send chunk columns in request mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubChunk {
    pub cache_enabled: bool,
    pub dimension: i32,
    /// Sub-chunk coordinates of the center.
    pub position: [i32; 3],
    pub entries: Vec<SubChunkEntry>,
}

impl Encode for SubChunk {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_bool(self.cache_enabled);
        encoder.write_var_int(self.dimension);
        for coordinate in self.position {
            encoder.write_var_int(coordinate);
        }
        encoder.write_u32(self.entries.len().try_into().unwrap_or(u32::MAX));
        for entry in &self.entries {
            entry.encode(encoder, self.cache_enabled);
        }
    }
}

impl Decode for SubChunk {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let cache_enabled = decoder.read_bool()?;
        let dimension = decoder.read_var_int()?;
        let position = [
            decoder.read_var_int()?,
            decoder.read_var_int()?,
            decoder.read_var_int()?,
        ];
        let count = usize::try_from(decoder.read_u32()?)?;
        let mut entries = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            entries.push(SubChunkEntry::decode(decoder, cache_enabled)?);
        }
        Ok(Self {
            cache_enabled,
            dimension,
            position,
            entries,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeDimension {
    /// 0 overworld, 1 nether, 2 end.
    pub dimension: i32,
    pub position: Vec3,
    pub respawn: bool,
    pub loading_screen_id: Option<u32>,
}

impl ChangeDimension {
    pub const OVERWORLD: i32 = 0;
    pub const NETHER: i32 = 1;
    pub const END: i32 = 2;
}

impl Encode for ChangeDimension {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_var_int(self.dimension);
        self.position.encode(encoder);
        encoder.write_bool(self.respawn);
        if encoder.version().has_loading_screen_id() {
            encoder.write_bool(self.loading_screen_id.is_some());
            if let Some(id) = self.loading_screen_id {
                encoder.write_u32(id);
            }
        }
    }
}

impl Decode for ChangeDimension {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let dimension = decoder.read_var_int()?;
        let position = Vec3::decode(decoder)?;
        let respawn = decoder.read_bool()?;
        let loading_screen_id =
            if decoder.version().has_loading_screen_id() && decoder.read_bool()? {
                Some(decoder.read_u32()?)
            } else {
                None
            };
        Ok(Self {
            dimension,
            position,
            respawn,
            loading_screen_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSound {
    pub sound_name: String,
    pub stop_all: bool,
    pub stop_music_legacy: bool,
}

impl StopSound {
    /// Stops every playing sound.
    pub fn all() -> Self {
        Self {
            sound_name: String::new(),
            stop_all: true,
            stop_music_legacy: false,
        }
    }
}

impl Encode for StopSound {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_string(&self.sound_name);
        encoder.write_bool(self.stop_all);
        if encoder.version().has_stop_music_flag() {
            encoder.write_bool(self.stop_music_legacy);
        }
    }
}

impl Decode for StopSound {
    fn decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let sound_name = String::decode(decoder)?;
        let stop_all = decoder.read_bool()?;
        let stop_music_legacy = if decoder.version().has_stop_music_flag() {
            decoder.read_bool()?
        } else {
            false
        };
        Ok(Self {
            sound_name,
            stop_all,
            stop_music_legacy,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SavedChunk {
    #[encoding(varint)]
    pub x: i32,
    #[encoding(varint)]
    pub z: i32,
}

/// Tells the client which area of the world the server publishes.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct NetworkChunkPublisherUpdate {
    pub position: BlockPosition,
    /// In blocks.
    #[encoding(varuint)]
    pub radius: u32,
    #[encoding(length_prefix = "u32")]
    pub saved_chunks: Vec<SavedChunk>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{codec_for, packet::id, Packet, PacketBody};

    #[test]
    fn chunk_dimension_is_version_gated() {
        let chunk = LevelChunk::empty(-3, 9, 0);
        let packet = Packet::from(chunk.clone());
        let old = codec_for(582).unwrap().encode_body(&packet);
        let new = codec_for(649).unwrap().encode_body(&packet);
        assert_eq!(new.len(), old.len() + 1);
        assert_eq!(
            codec_for(582)
                .unwrap()
                .decode_body(packet.packet_id(), &old)
                .unwrap(),
            packet
        );
        assert!(chunk.has_inline_sub_chunks());
    }

    #[test]
    fn limited_request_mode_has_no_inline_sub_chunks() {
        let chunk = LevelChunk {
            sub_chunk_count: u32::MAX - 1,
            highest_sub_chunk: Some(12),
            ..LevelChunk::empty(0, 0, 0)
        };
        assert!(!chunk.has_inline_sub_chunks());
        let packet = Packet::from(chunk);
        let codec = codec_for(712).unwrap();
        let body = codec.encode_body(&packet);
        assert_eq!(codec.decode_body(packet.packet_id(), &body).unwrap(), packet);
    }

    #[test]
    fn sub_chunk_entries_follow_the_cache_flag() {
        let entry = |result, height_map_type, blob_hash| SubChunkEntry {
            offset: [0, -1, 2],
            result,
            payload: if result == SubChunkEntry::SUCCESS {
                vec![8, 0]
            } else {
                Vec::new()
            },
            height_map_type,
            height_map: if height_map_type == SubChunkEntry::HEIGHT_MAP_HAS_DATA {
                vec![4; 256]
            } else {
                Vec::new()
            },
            blob_hash,
        };
        let codec = codec_for(712).unwrap();
        for (cache_enabled, blob_hash) in [(false, None), (true, Some(99))] {
            let packet = Packet::from(SubChunk {
                cache_enabled,
                dimension: 0,
                position: [3, -4, 5],
                entries: vec![
                    entry(SubChunkEntry::SUCCESS, SubChunkEntry::HEIGHT_MAP_HAS_DATA, blob_hash),
                    entry(SubChunkEntry::SUCCESS_ALL_AIR, 0, blob_hash),
                ],
            });
            let body = codec.encode_body(&packet);
            assert_eq!(codec.decode_body(id::SUB_CHUNK, &body).unwrap(), packet);
        }
    }

    #[test]
    fn block_sounds() {
        let mut event = LevelSoundEvent {
            sound: block_sound::PLACE,
            position: Vec3::ZERO,
            extra_data: 5,
            rest: Vec::new(),
        };
        assert!(event.carries_block());
        event.sound = 3;
        assert!(!event.carries_block());
    }
}
