//! Identifier rewriting.
//!
//! The client keeps the entity ids and block/item palette it learned
//! from the first backend for the whole session. Every packet that
//! carries one of those identifiers is translated here between the
//! client's view and the current backend's.

use crate::{
    chunk,
    collaborators::ServerInfo,
    entity_id::{RuntimeEntityId, UniqueEntityId},
    palette::{BlockPalette, BlockRewrite, ItemPalette, ItemRewrite, PaletteRewrite},
    position::{Rotation, Vec3},
    protocol::{
        packet::{id, AddEntity, LevelEvent, StartGame, SubChunk, SubChunkEntry},
        types::{metadata_key, ItemStack, MetadataValue},
        Packet,
    },
    transfer::Transfer,
};
use std::sync::Arc;

/// Which way a packet travels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::AsRefStr)]
pub enum Direction {
    /// Backend to client.
    Clientbound,
    /// Client to backend.
    Serverbound,
}

const DEFAULT_CHUNK_RADIUS: i32 = 8;
const CRACK_BLOCK_ID_MASK: i32 = 0x00ff_ffff;

/// Per-session rewrite state.
#[derive(Debug)]
pub struct RewriteContext {
    /// Runtime id the client knows itself by. Never changes.
    pub entity_id: RuntimeEntityId,
    pub unique_entity_id: UniqueEntityId,
    /// The current backend's ids for the player.
    pub original_entity_id: RuntimeEntityId,
    pub original_unique_entity_id: UniqueEntityId,
    ids_fixed: bool,
    pub dimension: i32,
    pub block_rewrite: BlockRewrite,
    pub item_rewrite: ItemRewrite,
    pub upstream_blocks: Option<Arc<BlockPalette>>,
    pub upstream_items: Option<Arc<ItemPalette>>,
    pub spawn_position: Vec3,
    pub spawn_rotation: Rotation,
    pub chunk_radius: i32,
    pub transfer: Option<Transfer>,
}

impl Default for RewriteContext {
    fn default() -> Self {
        Self {
            entity_id: RuntimeEntityId::default(),
            unique_entity_id: UniqueEntityId::default(),
            original_entity_id: RuntimeEntityId::default(),
            original_unique_entity_id: UniqueEntityId::default(),
            ids_fixed: false,
            dimension: 0,
            block_rewrite: PaletteRewrite::Equal,
            item_rewrite: PaletteRewrite::Equal,
            upstream_blocks: None,
            upstream_items: None,
            spawn_position: Vec3::ZERO,
            spawn_rotation: Rotation::default(),
            chunk_radius: DEFAULT_CHUNK_RADIUS,
            transfer: None,
        }
    }
}

impl RewriteContext {
    /// A context whose client-facing ids are fixed up front. Without
    /// them, the first backend's ids are adopted.
    pub fn new(client_ids: Option<(RuntimeEntityId, UniqueEntityId)>) -> Self {
        let mut context = Self::default();
        if let Some((runtime_id, unique_id)) = client_ids {
            context.entity_id = runtime_id;
            context.unique_entity_id = unique_id;
            context.original_entity_id = runtime_id;
            context.original_unique_entity_id = unique_id;
            context.ids_fixed = true;
        }
        context
    }

    /// Switches to a backend that just sent its start game packet.
    pub fn adopt_backend(&mut self, start_game: &StartGame, server: &ServerInfo) {
        let runtime_id = RuntimeEntityId::new(start_game.runtime_entity_id);
        let unique_id = UniqueEntityId::new(start_game.unique_entity_id);
        if !self.ids_fixed {
            self.entity_id = runtime_id;
            self.unique_entity_id = unique_id;
            self.ids_fixed = true;
        }
        self.original_entity_id = runtime_id;
        self.original_unique_entity_id = unique_id;

        // the first backend's palettes are the ones the client learns
        let upstream_blocks = self
            .upstream_blocks
            .get_or_insert_with(|| server.block_palette.clone());
        self.block_rewrite = PaletteRewrite::between(upstream_blocks, &server.block_palette);
        let upstream_items = self
            .upstream_items
            .get_or_insert_with(|| server.item_palette.clone());
        self.item_rewrite = PaletteRewrite::between(upstream_items, &server.item_palette);

        self.spawn_position = start_game.position;
        self.spawn_rotation = start_game.rotation;
    }

    fn swaps_ids(&self) -> bool {
        self.entity_id != self.original_entity_id
            || self.unique_entity_id != self.original_unique_entity_id
    }

    /// Whether packets with this id may need rewriting.
    pub fn interested(&self, direction: Direction, packet_id: u32) -> bool {
        let ids = self.swaps_ids();
        let blocks = !self.block_rewrite.is_identity();
        let items = !self.item_rewrite.is_identity();
        match direction {
            Direction::Clientbound => match packet_id {
                id::START_GAME
                | id::REMOVE_ENTITY
                | id::MOVE_ENTITY_ABSOLUTE
                | id::MOVE_PLAYER
                | id::ENTITY_EVENT
                | id::SET_ENTITY_DATA
                | id::SET_ENTITY_MOTION
                | id::SET_ENTITY_LINK => ids,
                id::UPDATE_BLOCK
                | id::LEVEL_EVENT
                | id::LEVEL_SOUND_EVENT
                | id::LEVEL_CHUNK
                | id::SUB_CHUNK => blocks,
                id::INVENTORY_CONTENT | id::INVENTORY_SLOT => items || blocks,
                id::ADD_PLAYER | id::ADD_ENTITY | id::ADD_ITEM_ENTITY | id::MOB_EQUIPMENT => {
                    ids || items || blocks
                }
                _ => false,
            },
            Direction::Serverbound => match packet_id {
                id::MOVE_PLAYER
                | id::MOVE_ENTITY_ABSOLUTE
                | id::PLAYER_ACTION
                | id::ENTITY_EVENT
                | id::SET_LOCAL_PLAYER_AS_INITIALIZED => ids,
                id::LEVEL_SOUND_EVENT => blocks,
                id::MOB_EQUIPMENT => ids || items || blocks,
                _ => false,
            },
        }
    }

    fn swap_runtime_id(&self, id: &mut u64) -> bool {
        let client = self.entity_id.as_u64();
        let backend = self.original_entity_id.as_u64();
        if client == backend {
            false
        } else if *id == backend {
            *id = client;
            true
        } else if *id == client {
            *id = backend;
            true
        } else {
            false
        }
    }

    fn swap_unique_id(&self, id: &mut i64) -> bool {
        let client = self.unique_entity_id.as_i64();
        let backend = self.original_unique_entity_id.as_i64();
        if client == backend {
            false
        } else if *id == backend {
            *id = client;
            true
        } else if *id == client {
            *id = backend;
            true
        } else {
            false
        }
    }

    fn block(&self, direction: Direction, id: u32) -> u32 {
        match direction {
            Direction::Clientbound => self.block_rewrite.from_downstream(id),
            Direction::Serverbound => self.block_rewrite.from_upstream(id),
        }
    }

    fn rewrite_block(&self, direction: Direction, id: &mut u32) -> bool {
        let translated = self.block(direction, *id);
        let changed = translated != *id;
        *id = translated;
        changed
    }

    fn rewrite_block_i32(&self, direction: Direction, id: &mut i32) -> bool {
        let translated = self.block(direction, *id as u32) as i32;
        let changed = translated != *id;
        *id = translated;
        changed
    }

    fn rewrite_item(&self, direction: Direction, item: &mut ItemStack) -> bool {
        if item.is_air() {
            return false;
        }
        let translated = match direction {
            Direction::Clientbound => self.item_rewrite.from_downstream(item.id),
            Direction::Serverbound => self.item_rewrite.from_upstream(item.id),
        };
        let mut changed = translated != item.id;
        item.id = translated;
        if item.block_runtime_id != 0 {
            changed |= self.rewrite_block_i32(direction, &mut item.block_runtime_id);
        }
        changed
    }

    fn rewrite_falling_block(&self, direction: Direction, entity: &mut AddEntity) -> bool {
        if entity.entity_type != AddEntity::FALLING_BLOCK {
            return false;
        }
        match entity.metadata.get_mut(metadata_key::VARIANT) {
            Some(MetadataValue::Int(block)) => {
                let translated = self.block(direction, *block as u32) as i32;
                let changed = translated != *block;
                *block = translated;
                changed
            }
            _ => false,
        }
    }

    fn rewrite_sub_chunks(&self, sub_chunk: &mut SubChunk) -> bool {
        // block data of cached sub-chunks travels in blobs
        if sub_chunk.cache_enabled {
            return false;
        }
        let mut changed = false;
        for entry in &mut sub_chunk.entries {
            if entry.result != SubChunkEntry::SUCCESS {
                continue;
            }
            match chunk::rewrite_sub_chunk(&entry.payload, &self.block_rewrite) {
                Ok(Some(payload)) => {
                    entry.payload = payload;
                    changed = true;
                }
                Ok(None) => {}
                Err(e) => tracing::debug!(
                    "Not rewriting sub-chunk {:?} + {:?}: {e}",
                    sub_chunk.position,
                    entry.offset
                ),
            }
        }
        changed
    }

    /// Rewrites identifiers in `packet`. Returns whether it changed.
    pub fn rewrite(&self, direction: Direction, packet: &mut Packet) -> bool {
        match packet {
            Packet::StartGame(packet) => {
                self.swap_runtime_id(&mut packet.runtime_entity_id)
                    | self.swap_unique_id(&mut packet.unique_entity_id)
            }
            Packet::AddPlayer(packet) => {
                self.swap_runtime_id(&mut packet.runtime_entity_id)
                    | self.swap_unique_id(&mut packet.unique_entity_id)
                    | self.rewrite_item(direction, &mut packet.held_item)
            }
            Packet::AddEntity(packet) => {
                self.swap_runtime_id(&mut packet.runtime_entity_id)
                    | self.swap_unique_id(&mut packet.unique_entity_id)
                    | self.rewrite_falling_block(direction, packet)
            }
            Packet::AddItemEntity(packet) => {
                self.swap_runtime_id(&mut packet.runtime_entity_id)
                    | self.swap_unique_id(&mut packet.unique_entity_id)
                    | self.rewrite_item(direction, &mut packet.item)
            }
            Packet::RemoveEntity(packet) => self.swap_unique_id(&mut packet.unique_entity_id),
            Packet::MoveEntityAbsolute(packet) => {
                self.swap_runtime_id(&mut packet.runtime_entity_id)
            }
            Packet::MovePlayer(packet) => {
                self.swap_runtime_id(&mut packet.runtime_entity_id)
                    | self.swap_runtime_id(&mut packet.riding_runtime_entity_id)
            }
            Packet::EntityEvent(packet) => self.swap_runtime_id(&mut packet.runtime_entity_id),
            Packet::PlayerAction(packet) => self.swap_runtime_id(&mut packet.runtime_entity_id),
            Packet::SetEntityData(packet) => self.swap_runtime_id(&mut packet.runtime_entity_id),
            Packet::SetEntityMotion(packet) => {
                self.swap_runtime_id(&mut packet.runtime_entity_id)
            }
            Packet::SetEntityLink(packet) => {
                self.swap_unique_id(&mut packet.from_unique_entity_id)
                    | self.swap_unique_id(&mut packet.to_unique_entity_id)
            }
            Packet::SetLocalPlayerAsInitialized(packet) => {
                self.swap_runtime_id(&mut packet.runtime_entity_id)
            }
            Packet::MobEquipment(packet) => {
                self.swap_runtime_id(&mut packet.runtime_entity_id)
                    | self.rewrite_item(direction, &mut packet.item)
            }
            Packet::InventoryContent(packet) => packet
                .items
                .iter_mut()
                .fold(false, |changed, item| {
                    self.rewrite_item(direction, item) | changed
                }),
            Packet::InventorySlot(packet) => self.rewrite_item(direction, &mut packet.item),
            Packet::UpdateBlock(packet) => {
                self.rewrite_block(direction, &mut packet.block_runtime_id)
            }
            Packet::LevelEvent(packet) => match packet.event {
                LevelEvent::PARTICLE_DESTROY_BLOCK => {
                    self.rewrite_block_i32(direction, &mut packet.data)
                }
                LevelEvent::PARTICLE_CRACK_BLOCK => {
                    let face = packet.data & !CRACK_BLOCK_ID_MASK;
                    let mut block = packet.data & CRACK_BLOCK_ID_MASK;
                    let changed = self.rewrite_block_i32(direction, &mut block);
                    packet.data = face | (block & CRACK_BLOCK_ID_MASK);
                    changed
                }
                _ => false,
            },
            Packet::LevelSoundEvent(packet) if packet.carries_block() => {
                self.rewrite_block_i32(direction, &mut packet.extra_data)
            }
            Packet::LevelChunk(chunk) if direction == Direction::Clientbound => {
                if !chunk.has_inline_sub_chunks() {
                    return false;
                }
                match chunk::rewrite_chunk_data(
                    &chunk.data,
                    chunk.sub_chunk_count,
                    &self.block_rewrite,
                ) {
                    Ok(Some(data)) => {
                        chunk.data = data;
                        true
                    }
                    Ok(None) => false,
                    Err(e) => {
                        tracing::debug!(
                            "Not rewriting chunk ({}, {}): {e}",
                            chunk.chunk_x,
                            chunk.chunk_z
                        );
                        false
                    }
                }
            }
            Packet::SubChunk(sub_chunk) if direction == Direction::Clientbound => {
                self.rewrite_sub_chunks(sub_chunk)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        palette::{BlockPalette, ItemPalette},
        position::BlockPosition,
        protocol::{
            packet::{
                LevelChunk, LevelSoundEvent, MobEquipment, MovePlayer, SubChunk, SubChunkEntry,
                UpdateBlock,
            },
            types::EntityMetadata,
        },
    };
    use std::net::SocketAddr;

    fn server(stone: u32, apple: i32) -> ServerInfo {
        ServerInfo {
            name: format!("stone-{stone}"),
            address: SocketAddr::from(([127, 0, 0, 1], 19132)),
            block_palette: Arc::new(BlockPalette::new([
                ("minecraft:air".to_owned(), 0),
                ("minecraft:stone".to_owned(), stone),
            ])),
            item_palette: Arc::new(ItemPalette::new([("minecraft:apple".to_owned(), apple)])),
        }
    }

    fn start_game(runtime_entity_id: u64, unique_entity_id: i64) -> StartGame {
        StartGame {
            unique_entity_id,
            runtime_entity_id,
            player_gamemode: 0,
            position: Vec3::new(1.0, 70.0, 1.0),
            rotation: Rotation::default(),
            seed: 0,
            spawn_biome_type: 0,
            custom_biome_name: String::new(),
            dimension: 0,
            rest: Vec::new(),
        }
    }

    /// Session that started on a server with stone = 3 and moved to
    /// one with stone = 7.
    fn transferred() -> RewriteContext {
        let mut context = RewriteContext::new(None);
        context.adopt_backend(&start_game(1, 1), &server(3, 257));
        context.adopt_backend(&start_game(40, 40), &server(7, 300));
        context
    }

    #[test]
    fn first_backend_needs_no_rewrites() {
        let mut context = RewriteContext::new(None);
        context.adopt_backend(&start_game(1, 1), &server(3, 257));
        assert_eq!(context.entity_id, RuntimeEntityId::new(1));
        for packet_id in [id::UPDATE_BLOCK, id::MOVE_PLAYER, id::LEVEL_CHUNK] {
            assert!(!context.interested(Direction::Clientbound, packet_id));
        }
    }

    #[test]
    fn own_ids_are_swapped_both_ways() {
        let context = transferred();
        let mut packet = Packet::from(MovePlayer::teleport(40, Vec3::ZERO, Rotation::default()));
        assert!(context.rewrite(Direction::Clientbound, &mut packet));
        assert!(matches!(&packet, Packet::MovePlayer(p) if p.runtime_entity_id == 1));

        assert!(context.rewrite(Direction::Serverbound, &mut packet));
        assert!(matches!(&packet, Packet::MovePlayer(p) if p.runtime_entity_id == 40));

        // an unrelated entity keeps its id
        let mut other = Packet::from(MovePlayer::teleport(12, Vec3::ZERO, Rotation::default()));
        assert!(!context.rewrite(Direction::Clientbound, &mut other));
    }

    #[test]
    fn blocks_are_translated() {
        let context = transferred();
        let mut packet = Packet::from(UpdateBlock {
            position: BlockPosition { x: 0, y: 64, z: 0 },
            block_runtime_id: 7,
            flags: 3,
            layer: 0,
        });
        assert!(context.rewrite(Direction::Clientbound, &mut packet));
        assert!(matches!(&packet, Packet::UpdateBlock(p) if p.block_runtime_id == 3));
    }

    #[test]
    fn crack_events_keep_their_face() {
        let context = transferred();
        let mut packet = Packet::from(LevelEvent {
            event: LevelEvent::PARTICLE_CRACK_BLOCK,
            position: Vec3::ZERO,
            data: 7 | 4 << 24,
        });
        assert!(context.rewrite(Direction::Clientbound, &mut packet));
        assert!(matches!(&packet, Packet::LevelEvent(p) if p.data == 3 | 4 << 24));
    }

    #[test]
    fn only_block_sounds_are_touched() {
        let context = transferred();
        let sound = |sound| {
            Packet::from(LevelSoundEvent {
                sound,
                position: Vec3::ZERO,
                extra_data: 7,
                rest: Vec::new(),
            })
        };
        let mut place = sound(crate::protocol::packet::block_sound::PLACE);
        assert!(context.rewrite(Direction::Clientbound, &mut place));
        // note block sounds use extra data for the pitch
        let mut note = sound(81);
        assert!(!context.rewrite(Direction::Clientbound, &mut note));
    }

    #[test]
    fn falling_blocks_are_translated() {
        let context = transferred();
        let mut metadata = EntityMetadata::default();
        metadata.insert(metadata_key::VARIANT, MetadataValue::Int(7));
        let mut packet = Packet::from(AddEntity {
            unique_entity_id: 90,
            runtime_entity_id: 90,
            entity_type: AddEntity::FALLING_BLOCK.to_owned(),
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            pitch: 0.0,
            yaw: 0.0,
            head_yaw: 0.0,
            body_yaw: 0.0,
            attributes: Vec::new(),
            metadata,
            rest: Vec::new(),
        });
        assert!(context.rewrite(Direction::Clientbound, &mut packet));
        let Packet::AddEntity(entity) = &packet else {
            unreachable!()
        };
        assert_eq!(
            entity.metadata.get(metadata_key::VARIANT),
            Some(&MetadataValue::Int(3))
        );
    }

    #[test]
    fn items_are_translated_and_unknown_ones_become_air() {
        let context = transferred();
        let equipment = |id| {
            Packet::from(MobEquipment {
                runtime_entity_id: 12,
                item: ItemStack {
                    id,
                    count: 1,
                    ..ItemStack::default()
                },
                inventory_slot: 0,
                hotbar_slot: 0,
                window_id: 0,
            })
        };
        let mut apple = equipment(300);
        assert!(context.rewrite(Direction::Clientbound, &mut apple));
        assert!(matches!(&apple, Packet::MobEquipment(p) if p.item.id == 257));

        let mut unknown = equipment(999);
        assert!(context.rewrite(Direction::Clientbound, &mut unknown));
        assert!(matches!(&unknown, Packet::MobEquipment(p) if p.item.is_air()));
    }

    #[test]
    fn broken_chunks_are_left_alone() {
        let context = transferred();
        let mut chunk = LevelChunk::empty(0, 0, 0);
        chunk.sub_chunk_count = 1;
        chunk.data = vec![77, 1, 2, 3];
        let mut packet = Packet::from(chunk.clone());
        assert!(!context.rewrite(Direction::Clientbound, &mut packet));
        assert_eq!(packet, Packet::from(chunk));
    }

    #[test]
    fn sub_chunk_responses_are_translated() {
        let context = transferred();
        assert!(context.interested(Direction::Clientbound, id::SUB_CHUNK));

        // version 8, one storage: 1 bit per block, palette [air, stone]
        let sub_chunk = |stone: i32| {
            let mut data = vec![8, 1, 1 << 1 | 1];
            data.extend([0u8; 512]);
            data.extend([4, 0, (stone * 2) as u8]);
            data
        };
        let entry = |result, payload| SubChunkEntry {
            offset: [0, 0, 0],
            result,
            payload,
            height_map_type: 0,
            height_map: Vec::new(),
            blob_hash: None,
        };
        let mut packet = Packet::from(SubChunk {
            cache_enabled: false,
            dimension: 0,
            position: [0, 4, 0],
            entries: vec![
                entry(SubChunkEntry::SUCCESS, sub_chunk(7)),
                entry(SubChunkEntry::SUCCESS_ALL_AIR, Vec::new()),
            ],
        });
        assert!(context.rewrite(Direction::Clientbound, &mut packet));
        let Packet::SubChunk(rewritten) = &packet else {
            panic!("expected a sub-chunk");
        };
        assert_eq!(rewritten.entries[0].payload, sub_chunk(3));
        assert!(rewritten.entries[1].payload.is_empty());

        let mut cached = Packet::from(SubChunk {
            cache_enabled: true,
            entries: vec![entry(SubChunkEntry::SUCCESS, sub_chunk(7))],
            ..rewritten.clone()
        });
        assert!(!context.rewrite(Direction::Clientbound, &mut cached));
    }
}
