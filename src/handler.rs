//! Handlers for the two sides of an established session.

use crate::{
    bridge::{Action, HandlerContext, PacketHandler, Verdict},
    collaborators::ServerInfo,
    protocol::{
        packet::{id, PlayerAction},
        Packet,
    },
};

/// Client to backend.
#[derive(Debug, Default)]
pub struct UpstreamHandler;

impl PacketHandler for UpstreamHandler {
    fn interested(&self, packet_id: u32) -> bool {
        matches!(packet_id, id::PLAYER_ACTION | id::REQUEST_CHUNK_RADIUS)
    }

    fn handle(&mut self, packet: &mut Packet, cx: &mut HandlerContext) -> anyhow::Result<Verdict> {
        Ok(match packet {
            Packet::PlayerAction(action)
                if action.action == PlayerAction::DIMENSION_CHANGE_SUCCESS
                    && cx.rewrite.transfer.is_some() =>
            {
                // acknowledges a dimension change the backend never sent
                cx.push(Action::DimensionChangeSuccess);
                Verdict::Cancel
            }
            Packet::RequestChunkRadius(request) => {
                cx.rewrite.chunk_radius = request.radius;
                Verdict::Forward
            }
            _ => Verdict::Forward,
        })
    }
}

/// Backend to client, once the backend owns the session.
#[derive(Debug)]
pub struct DownstreamHandler {
    server: ServerInfo,
}

impl DownstreamHandler {
    pub fn new(server: ServerInfo) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }
}

impl PacketHandler for DownstreamHandler {
    fn interested(&self, packet_id: u32) -> bool {
        matches!(
            packet_id,
            id::START_GAME | id::CHANGE_DIMENSION | id::DISCONNECT | id::CHUNK_RADIUS_UPDATED
        )
    }

    fn handle(&mut self, packet: &mut Packet, cx: &mut HandlerContext) -> anyhow::Result<Verdict> {
        Ok(match packet {
            Packet::StartGame(start_game) => {
                cx.rewrite.adopt_backend(start_game, &self.server);
                cx.rewrite.dimension = start_game.dimension;
                Verdict::Forward
            }
            Packet::ChangeDimension(change) => {
                cx.rewrite.dimension = change.dimension;
                Verdict::Forward
            }
            Packet::ChunkRadiusUpdated(update) => {
                cx.rewrite.chunk_radius = update.radius;
                Verdict::Forward
            }
            Packet::Disconnect(disconnect) => {
                cx.push(Action::BackendDisconnected(disconnect.message.clone()));
                Verdict::Cancel
            }
            _ => Verdict::Forward,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bridge::BatchBridge,
        codec::batch::PacketBatch,
        collaborators::NoopObserver,
        entity_tracker::EntityTracker,
        palette::Palette,
        position::{Rotation, Vec3},
        protocol::{
            latest_codec,
            packet::{Disconnect, StartGame},
        },
        rewrite::{Direction, RewriteContext},
        transfer::{Transfer, TransferQueueLimits},
    };
    use std::{net::SocketAddr, sync::Arc};

    fn server() -> ServerInfo {
        ServerInfo {
            name: "lobby".to_owned(),
            address: SocketAddr::from(([127, 0, 0, 1], 19132)),
            block_palette: Arc::new(Palette::empty()),
            item_palette: Arc::new(Palette::empty()),
        }
    }

    fn dimension_change_success() -> Packet {
        PlayerAction {
            runtime_entity_id: 1,
            action: PlayerAction::DIMENSION_CHANGE_SUCCESS,
            rest: Vec::new(),
        }
        .into()
    }

    #[test]
    fn dimension_change_success_is_swallowed_during_transfer() {
        let mut rewrite = RewriteContext::new(None);
        let mut tracker = EntityTracker::new();
        let mut actions = Vec::new();
        let mut cx = HandlerContext {
            rewrite: &mut rewrite,
            tracker: &mut tracker,
            actions: &mut actions,
        };

        // not ours to swallow without a transfer
        let mut packet = dimension_change_success();
        assert_eq!(
            UpstreamHandler.handle(&mut packet, &mut cx).unwrap(),
            Verdict::Forward
        );

        cx.rewrite.transfer = Some(Transfer::new(
            None,
            server(),
            0,
            0,
            TransferQueueLimits::default(),
        ));
        assert_eq!(
            UpstreamHandler.handle(&mut packet, &mut cx).unwrap(),
            Verdict::Cancel
        );
        assert_eq!(actions, [Action::DimensionChangeSuccess]);
    }

    #[test]
    fn downstream_tracks_start_game_and_kicks() {
        let mut rewrite = RewriteContext::new(None);
        let mut tracker = EntityTracker::new();
        let mut actions = Vec::new();
        let mut batch = PacketBatch::from_packets([
            Packet::from(StartGame {
                unique_entity_id: 3,
                runtime_entity_id: 3,
                player_gamemode: 0,
                position: Vec3::new(0.0, 64.0, 0.0),
                rotation: Rotation::default(),
                seed: 0,
                spawn_biome_type: 0,
                custom_biome_name: String::new(),
                dimension: 1,
                rest: Vec::new(),
            }),
            Packet::from(Disconnect::with_message("bye")),
        ]);
        let report = BatchBridge::new(Direction::Clientbound, Arc::new(NoopObserver)).process(
            &mut batch,
            latest_codec(),
            &mut DownstreamHandler::new(server()),
            &mut HandlerContext {
                rewrite: &mut rewrite,
                tracker: &mut tracker,
                actions: &mut actions,
            },
        );
        assert_eq!(report.canceled, 1);
        assert_eq!(batch.len(), 1);
        assert_eq!(rewrite.dimension, 1);
        assert_eq!(rewrite.entity_id.as_u64(), 3);
        assert_eq!(actions, [Action::BackendDisconnected("bye".to_owned())]);
    }
}
