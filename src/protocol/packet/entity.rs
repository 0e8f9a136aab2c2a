//! Entity lifecycle and movement packets.

use crate::{
    position::{Rotation, Vec3},
    protocol::{
        types::{entity_flag, EntityAttribute, EntityMetadata, EntityProperties, ItemStack},
        Encode, Encoder,
    },
};
use bedrock_transfer_proxy_macros::{Decode, Encode};

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct AddPlayer {
    pub uuid: u128,
    pub username: String,
    #[encoding(varulong)]
    pub runtime_entity_id: u64,
    pub platform_chat_id: String,
    pub position: Vec3,
    pub velocity: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    pub head_yaw: f32,
    pub held_item: ItemStack,
    #[encoding(varint)]
    pub gamemode: i32,
    pub metadata: EntityMetadata,
    pub properties: EntityProperties,
    /// First field of the ability data.
    pub unique_entity_id: i64,
    #[encoding(rest)]
    pub rest: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct AddEntity {
    #[encoding(varlong)]
    pub unique_entity_id: i64,
    #[encoding(varulong)]
    pub runtime_entity_id: u64,
    pub entity_type: String,
    pub position: Vec3,
    pub velocity: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    pub head_yaw: f32,
    pub body_yaw: f32,
    #[encoding(length_prefix = "varuint")]
    pub attributes: Vec<EntityAttribute>,
    pub metadata: EntityMetadata,
    /// Properties and entity links.
    #[encoding(rest)]
    pub rest: Vec<u8>,
}

impl AddEntity {
    pub const FALLING_BLOCK: &'static str = "minecraft:falling_block";
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct RemoveEntity {
    #[encoding(varlong)]
    pub unique_entity_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct AddItemEntity {
    #[encoding(varlong)]
    pub unique_entity_id: i64,
    #[encoding(varulong)]
    pub runtime_entity_id: u64,
    pub item: ItemStack,
    #[encoding(rest)]
    pub rest: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct MoveEntityAbsolute {
    #[encoding(varulong)]
    pub runtime_entity_id: u64,
    #[encoding(rest)]
    pub rest: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct MovePlayer {
    #[encoding(varulong)]
    pub runtime_entity_id: u64,
    pub position: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    pub head_yaw: f32,
    pub mode: u8,
    pub on_ground: bool,
    #[encoding(varulong)]
    pub riding_runtime_entity_id: u64,
    /// Teleport cause (teleport mode only) and tick.
    #[encoding(rest)]
    pub rest: Vec<u8>,
}

impl MovePlayer {
    pub const MODE_NORMAL: u8 = 0;
    pub const MODE_RESET: u8 = 1;
    pub const MODE_TELEPORT: u8 = 2;

    const TELEPORT_CAUSE_UNKNOWN: i32 = 0;

    /// Teleports the player to `position`.
    pub fn teleport(runtime_entity_id: u64, position: Vec3, rotation: Rotation) -> Self {
        let mut rest = Vec::new();
        let mut encoder = Encoder::new(&mut rest);
        encoder.write_i32(Self::TELEPORT_CAUSE_UNKNOWN);
        // source entity type
        encoder.write_i32(0);
        // tick
        encoder.write_var_ulong(0);
        Self {
            runtime_entity_id,
            position,
            pitch: rotation.pitch,
            yaw: rotation.yaw,
            head_yaw: rotation.yaw,
            mode: Self::MODE_TELEPORT,
            on_ground: false,
            riding_runtime_entity_id: 0,
            rest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct EntityEvent {
    #[encoding(varulong)]
    pub runtime_entity_id: u64,
    pub event: u8,
    #[encoding(varint)]
    pub data: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct PlayerAction {
    #[encoding(varulong)]
    pub runtime_entity_id: u64,
    #[encoding(varint)]
    pub action: i32,
    /// Block position, result position and face.
    #[encoding(rest)]
    pub rest: Vec<u8>,
}

impl PlayerAction {
    /// Sent by the client once a dimension change has been rendered.
    pub const DIMENSION_CHANGE_SUCCESS: i32 = 14;
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct SetEntityData {
    #[encoding(varulong)]
    pub runtime_entity_id: u64,
    pub metadata: EntityMetadata,
    /// Properties and tick.
    #[encoding(rest)]
    pub rest: Vec<u8>,
}

impl SetEntityData {
    /// Freezes the entity in place.
    pub fn immobile(runtime_entity_id: u64) -> Self {
        let mut rest = Vec::new();
        let mut encoder = Encoder::new(&mut rest);
        EntityProperties::default().encode(&mut encoder);
        // tick
        encoder.write_var_ulong(0);
        Self {
            runtime_entity_id,
            metadata: EntityMetadata::with_flags(&[
                entity_flag::IMMOBILE,
                entity_flag::BREATHING,
                entity_flag::HAS_GRAVITY,
            ]),
            rest,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct SetEntityMotion {
    #[encoding(varulong)]
    pub runtime_entity_id: u64,
    pub motion: Vec3,
    #[encoding(rest)]
    pub rest: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SetEntityLink {
    #[encoding(varlong)]
    pub from_unique_entity_id: i64,
    #[encoding(varlong)]
    pub to_unique_entity_id: i64,
    pub link_type: u8,
    pub immediate: bool,
    pub rider_initiated: bool,
    #[encoding(rest)]
    pub rest: Vec<u8>,
}

impl SetEntityLink {
    pub const TYPE_REMOVE: u8 = 0;
    pub const TYPE_RIDER: u8 = 1;
    pub const TYPE_PASSENGER: u8 = 2;

    /// Unlinks `from` and `to`.
    pub fn remove(from_unique_entity_id: i64, to_unique_entity_id: i64) -> Self {
        let mut rest = Vec::new();
        // vehicle angular velocity
        Encoder::new(&mut rest).write_f32(0.0);
        Self {
            from_unique_entity_id,
            to_unique_entity_id,
            link_type: Self::TYPE_REMOVE,
            immediate: true,
            rider_initiated: false,
            rest,
        }
    }
}

/// Player list changes. Added entries carry skins and are not decoded.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
#[encoding(discriminant = "byte")]
pub enum PlayerList {
    #[encoding(id = 0)]
    Add {
        #[encoding(rest)]
        entries: Vec<u8>,
    },
    #[encoding(id = 1)]
    Remove {
        #[encoding(length_prefix = "varuint")]
        uuids: Vec<u128>,
    },
}
