#![allow(dead_code)]

use bedrock_transfer_proxy::{
    collaborators::ServerInfo,
    palette::{BlockPalette, ItemPalette},
    position::{Rotation, Vec3},
    protocol::{
        packet::{LevelChunk, StartGame, SubChunk, SubChunkEntry},
        Encoder,
    },
};
use std::{net::SocketAddr, sync::Arc};

/// A server whose palettes only differ in the id of stone.
pub fn server(name: &str, stone: u32) -> ServerInfo {
    ServerInfo {
        name: name.to_owned(),
        address: SocketAddr::from(([127, 0, 0, 1], 19132)),
        block_palette: Arc::new(BlockPalette::new([
            ("minecraft:air".to_owned(), 0),
            ("minecraft:stone".to_owned(), stone),
        ])),
        item_palette: Arc::new(ItemPalette::new([("minecraft:apple".to_owned(), 257)])),
    }
}

pub fn start_game(runtime_entity_id: u64, dimension: i32) -> StartGame {
    StartGame {
        unique_entity_id: runtime_entity_id as i64,
        runtime_entity_id,
        player_gamemode: 0,
        position: Vec3::new(0.5, 64.0, 0.5),
        rotation: Rotation::default(),
        seed: 0,
        spawn_biome_type: 0,
        custom_biome_name: String::new(),
        dimension,
        rest: Vec::new(),
    }
}

/// Sub-chunk of version 8 with one single-bit storage.
fn sub_chunk(palette: &[i32]) -> Vec<u8> {
    let mut out = vec![8, 1, 1 << 1 | 1];
    out.extend(std::iter::repeat(0x5a).take(128 * 4));
    let mut encoder = Encoder::new(&mut out);
    encoder.write_var_int(palette.len() as i32);
    for &id in palette {
        encoder.write_var_int(id);
    }
    out
}

/// A chunk column with one sub-chunk using `palette`.
pub fn chunk(palette: &[i32]) -> LevelChunk {
    let mut chunk = LevelChunk::empty(3, -2, 0);
    chunk.sub_chunk_count = 1;
    chunk.data = sub_chunk(palette);
    chunk.data.extend([0x01, 0x02, 0x03]);
    chunk
}

/// A sub-chunk response in request mode, carrying one sub-chunk
/// using `palette` and its block entities.
pub fn sub_chunk_response(palette: &[i32]) -> SubChunk {
    let mut payload = sub_chunk(palette);
    payload.extend([0x0a, 0x00, 0x00, 0x00]);
    SubChunk {
        cache_enabled: false,
        dimension: 0,
        position: [3, 2, -2],
        entries: vec![SubChunkEntry {
            offset: [0, 0, 0],
            result: SubChunkEntry::SUCCESS,
            payload,
            height_map_type: SubChunkEntry::HEIGHT_MAP_HAS_DATA,
            height_map: vec![15; 256],
            blob_hash: None,
        }],
    }
}
