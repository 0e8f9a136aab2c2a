//! Enumerates the packet types the proxy understands.
//!
//! Only the fields required for identifier rewriting and session
//! handling are decoded. Where a packet continues past those fields,
//! the remainder is kept as raw bytes so that decoding and re-encoding
//! is lossless.

use crate::protocol::{Decoder, DecodeError, Encode, Encoder, UnknownBody};
use bedrock_transfer_proxy_macros::{Encode, FromVariants};

pub mod entity;
pub mod inventory;
pub mod session;
pub mod world;

pub use entity::*;
pub use inventory::*;
pub use session::*;
pub use world::*;

/// Packet ids.
pub mod id {
    pub const LOGIN: u32 = 0x01;
    pub const PLAY_STATUS: u32 = 0x02;
    pub const DISCONNECT: u32 = 0x05;
    pub const RESOURCE_PACKS_INFO: u32 = 0x06;
    pub const RESOURCE_PACK_STACK: u32 = 0x07;
    pub const RESOURCE_PACK_CLIENT_RESPONSE: u32 = 0x08;
    pub const START_GAME: u32 = 0x0b;
    pub const ADD_PLAYER: u32 = 0x0c;
    pub const ADD_ENTITY: u32 = 0x0d;
    pub const REMOVE_ENTITY: u32 = 0x0e;
    pub const ADD_ITEM_ENTITY: u32 = 0x0f;
    pub const MOVE_ENTITY_ABSOLUTE: u32 = 0x12;
    pub const MOVE_PLAYER: u32 = 0x13;
    pub const UPDATE_BLOCK: u32 = 0x15;
    pub const LEVEL_EVENT: u32 = 0x19;
    pub const ENTITY_EVENT: u32 = 0x1b;
    pub const MOB_EQUIPMENT: u32 = 0x1f;
    pub const PLAYER_ACTION: u32 = 0x24;
    pub const SET_ENTITY_DATA: u32 = 0x27;
    pub const SET_ENTITY_MOTION: u32 = 0x28;
    pub const SET_ENTITY_LINK: u32 = 0x29;
    pub const INVENTORY_CONTENT: u32 = 0x31;
    pub const INVENTORY_SLOT: u32 = 0x32;
    pub const LEVEL_CHUNK: u32 = 0x3a;
    pub const CHANGE_DIMENSION: u32 = 0x3d;
    pub const PLAYER_LIST: u32 = 0x3f;
    pub const REQUEST_CHUNK_RADIUS: u32 = 0x45;
    pub const CHUNK_RADIUS_UPDATED: u32 = 0x46;
    pub const STOP_SOUND: u32 = 0x57;
    pub const SET_LOCAL_PLAYER_AS_INITIALIZED: u32 = 0x71;
    pub const NETWORK_CHUNK_PUBLISHER_UPDATE: u32 = 0x79;
    pub const LEVEL_SOUND_EVENT: u32 = 0x7b;
    pub const LEVEL_EVENT_GENERIC: u32 = 0x7c;
    pub const NETWORK_SETTINGS: u32 = 0x8f;
    pub const SUB_CHUNK: u32 = 0xae;
    pub const REQUEST_NETWORK_SETTINGS: u32 = 0xc1;
}

#[derive(Debug, Clone, PartialEq, Encode, strum::AsRefStr, FromVariants)]
#[encoding(discriminant = "header")]
pub enum Packet {
    #[encoding(id = 0x01)]
    Login(Login),
    #[encoding(id = 0x02)]
    PlayStatus(PlayStatus),
    #[encoding(id = 0x05)]
    Disconnect(Disconnect),
    #[encoding(id = 0x06)]
    ResourcePacksInfo(ResourcePacksInfo),
    #[encoding(id = 0x07)]
    ResourcePackStack(ResourcePackStack),
    #[encoding(id = 0x08)]
    ResourcePackClientResponse(ResourcePackClientResponse),
    #[encoding(id = 0x0b)]
    StartGame(StartGame),
    #[encoding(id = 0x0c)]
    AddPlayer(AddPlayer),
    #[encoding(id = 0x0d)]
    AddEntity(AddEntity),
    #[encoding(id = 0x0e)]
    RemoveEntity(RemoveEntity),
    #[encoding(id = 0x0f)]
    AddItemEntity(AddItemEntity),
    #[encoding(id = 0x12)]
    MoveEntityAbsolute(MoveEntityAbsolute),
    #[encoding(id = 0x13)]
    MovePlayer(MovePlayer),
    #[encoding(id = 0x15)]
    UpdateBlock(UpdateBlock),
    #[encoding(id = 0x19)]
    LevelEvent(LevelEvent),
    #[encoding(id = 0x1b)]
    EntityEvent(EntityEvent),
    #[encoding(id = 0x1f)]
    MobEquipment(MobEquipment),
    #[encoding(id = 0x24)]
    PlayerAction(PlayerAction),
    #[encoding(id = 0x27)]
    SetEntityData(SetEntityData),
    #[encoding(id = 0x28)]
    SetEntityMotion(SetEntityMotion),
    #[encoding(id = 0x29)]
    SetEntityLink(SetEntityLink),
    #[encoding(id = 0x31)]
    InventoryContent(InventoryContent),
    #[encoding(id = 0x32)]
    InventorySlot(InventorySlot),
    #[encoding(id = 0x3a)]
    LevelChunk(LevelChunk),
    #[encoding(id = 0x3d)]
    ChangeDimension(ChangeDimension),
    #[encoding(id = 0x3f)]
    PlayerList(PlayerList),
    #[encoding(id = 0x45)]
    RequestChunkRadius(RequestChunkRadius),
    #[encoding(id = 0x46)]
    ChunkRadiusUpdated(ChunkRadiusUpdated),
    #[encoding(id = 0x57)]
    StopSound(StopSound),
    #[encoding(id = 0x71)]
    SetLocalPlayerAsInitialized(SetLocalPlayerAsInitialized),
    #[encoding(id = 0x79)]
    NetworkChunkPublisherUpdate(NetworkChunkPublisherUpdate),
    #[encoding(id = 0x7b)]
    LevelSoundEvent(LevelSoundEvent),
    #[encoding(id = 0x7c)]
    LevelEventGeneric(LevelEventGeneric),
    #[encoding(id = 0x8f)]
    NetworkSettings(NetworkSettings),
    #[encoding(id = 0xae)]
    SubChunk(SubChunk),
    #[encoding(id = 0xc1)]
    RequestNetworkSettings(RequestNetworkSettings),
    #[encoding(fallback)]
    Unknown(UnknownPacket),
}

impl Packet {
    pub fn name(&self) -> &str {
        self.as_ref()
    }
}

/// A packet without a dedicated variant, kept as raw body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPacket {
    pub packet_id: u32,
    pub body: Vec<u8>,
}

impl Encode for UnknownPacket {
    fn encode(&self, encoder: &mut Encoder) {
        encoder.write_slice(&self.body);
    }
}

impl UnknownBody for UnknownPacket {
    fn packet_id(&self) -> u32 {
        self.packet_id
    }

    fn decode_unknown(packet_id: u32, decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            packet_id,
            body: decoder.consume_rest().to_vec(),
        })
    }
}
