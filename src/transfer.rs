//! Moving a session to another backend without the client noticing.
//!
//! The client is sent through two dimension changes: first into a
//! temporary dimension while the new backend spawns the player, then
//! into the new backend's dimension. Each change is acknowledged by the
//! client, and each acknowledgment advances the [`Transfer`] one phase.

use crate::{
    bridge::{Action, HandlerContext, PacketHandler, Verdict},
    codec::batch::{BatchPacket, PacketBatch},
    collaborators::ServerInfo,
    position::{BlockPosition, Vec3},
    protocol::{
        packet::{
            id, ChangeDimension, LevelChunk, MovePlayer, NetworkChunkPublisherUpdate, PlayStatus,
            RequestChunkRadius, ResourcePackClientResponse, SetEntityData,
            SetLocalPlayerAsInitialized, StopSound,
        },
        Packet,
    },
    rewrite::RewriteContext,
};
use serde::{Deserialize, Serialize};

/// Empty chunks sent around the player after a dimension change so the
/// client can leave the loading screen.
const EMPTY_CHUNK_RADIUS: i32 = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::AsRefStr)]
pub enum TransferPhase {
    /// Waiting for the client to enter the temporary dimension.
    Phase1,
    /// Waiting for the client to enter the target dimension.
    Phase2,
    Reset,
}

/// Result of a dimension change acknowledgment.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferStep {
    Ignored,
    Phase1Completed,
    Completed,
}

/// Radius in chunks announced to the client once it arrives in the
/// target dimension.
pub fn publisher_radius(chunk_radius: i32) -> i32 {
    if chunk_radius < 12 {
        (chunk_radius - 2).max(4)
    } else {
        chunk_radius - 4
    }
}

/// A dimension that is neither `current` nor `target`.
pub fn fake_dimension(current: i32, target: i32) -> i32 {
    [
        ChangeDimension::OVERWORLD,
        ChangeDimension::NETHER,
        ChangeDimension::END,
    ]
    .into_iter()
    .find(|dimension| *dimension != current && *dimension != target)
    .unwrap_or(ChangeDimension::END)
}

/// Packets that move the client into `dimension` at `position`.
pub fn dimension_change_packets(dimension: i32, position: Vec3, chunk_radius: i32) -> Vec<Packet> {
    let block = BlockPosition::from(position);
    let center = block.chunk();
    let mut packets: Vec<Packet> = vec![ChangeDimension {
        dimension,
        position,
        respawn: false,
        loading_screen_id: None,
    }
    .into()];
    for x in -EMPTY_CHUNK_RADIUS..=EMPTY_CHUNK_RADIUS {
        for z in -EMPTY_CHUNK_RADIUS..=EMPTY_CHUNK_RADIUS {
            packets.push(LevelChunk::empty(center.x + x, center.z + z, dimension).into());
        }
    }
    packets.push(
        NetworkChunkPublisherUpdate {
            position: block,
            radius: (publisher_radius(chunk_radius) * 16) as u32,
            saved_chunks: Vec::new(),
        }
        .into(),
    );
    packets
}

/// Limits of the queue holding the new backend's packets while the
/// client is still changing dimension.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferQueueLimits {
    /// Logs a warning once when exceeded.
    pub soft: usize,
    /// Fails the transfer when exceeded.
    pub hard: usize,
    /// Packets per released batch.
    pub release_batch: usize,
}

impl Default for TransferQueueLimits {
    fn default() -> Self {
        Self {
            soft: 500,
            hard: 4096,
            release_batch: 256,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("more than {limit} packets queued during transfer")]
pub struct TransferQueueFull {
    pub limit: usize,
}

/// Packets from the new backend waiting for the client.
#[derive(Debug, Default)]
pub struct TransferQueue {
    packets: Vec<BatchPacket>,
    limits: TransferQueueLimits,
    warned: bool,
    dropped: usize,
}

impl TransferQueue {
    pub fn new(limits: TransferQueueLimits) -> Self {
        Self {
            limits,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Generic level events dropped instead of queued.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn push_batch(&mut self, batch: PacketBatch) -> Result<(), TransferQueueFull> {
        for packet in batch.packets {
            if packet.id() == id::LEVEL_EVENT_GENERIC {
                self.dropped += 1;
                continue;
            }
            self.packets.push(packet);
        }

        if self.packets.len() > self.limits.hard {
            self.packets.clear();
            return Err(TransferQueueFull {
                limit: self.limits.hard,
            });
        }
        if self.packets.len() > self.limits.soft && !self.warned {
            self.warned = true;
            tracing::warn!(
                "{} packets queued during transfer, it is taking a while",
                self.packets.len()
            );
        }
        Ok(())
    }

    /// Empties the queue into batches of bounded size, in order.
    pub fn release(&mut self) -> Vec<PacketBatch> {
        let chunk = self.limits.release_batch.max(1);
        let mut batches = Vec::with_capacity(self.packets.len().div_ceil(chunk));
        let mut packets = std::mem::take(&mut self.packets).into_iter().peekable();
        while packets.peek().is_some() {
            batches.push(PacketBatch::new(packets.by_ref().take(chunk).collect()));
        }
        batches
    }
}

/// A transfer in progress.
#[derive(Debug)]
pub struct Transfer {
    phase: TransferPhase,
    /// The backend being left. `None` when reconnecting after the
    /// previous backend was lost.
    pub source: Option<ServerInfo>,
    pub target: ServerInfo,
    pub target_dimension: i32,
    /// Where the client waits while the new backend spawns the player.
    pub fake_dimension: i32,
    pub queue: TransferQueue,
}

impl Transfer {
    pub fn new(
        source: Option<ServerInfo>,
        target: ServerInfo,
        current_dimension: i32,
        target_dimension: i32,
        limits: TransferQueueLimits,
    ) -> Self {
        Self {
            phase: TransferPhase::Phase1,
            source,
            target,
            target_dimension,
            fake_dimension: fake_dimension(current_dimension, target_dimension),
            queue: TransferQueue::new(limits),
        }
    }

    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    /// Whether the client still waits in the temporary dimension.
    pub fn dimension_locked(&self) -> bool {
        self.phase == TransferPhase::Phase1
    }

    pub fn on_dimension_change_success(&mut self) -> TransferStep {
        match self.phase {
            TransferPhase::Phase1 => {
                self.phase = TransferPhase::Phase2;
                TransferStep::Phase1Completed
            }
            TransferPhase::Phase2 => {
                self.phase = TransferPhase::Reset;
                TransferStep::Completed
            }
            TransferPhase::Reset => TransferStep::Ignored,
        }
    }

    /// Sent to the client when the transfer starts, after the old
    /// backend's entities have been removed.
    pub fn start_packets(&self, cx: &RewriteContext) -> Vec<Packet> {
        let mut packets =
            dimension_change_packets(self.fake_dimension, cx.spawn_position, cx.chunk_radius);
        packets.push(StopSound::all().into());
        packets
    }

    /// Sent to the client once it reached the temporary dimension.
    /// `cx` already describes the new backend.
    pub fn phase1_packets(&self, cx: &RewriteContext) -> Vec<Packet> {
        let entity_id = cx.entity_id.as_u64();
        let mut packets: Vec<Packet> = vec![
            SetEntityData::immobile(entity_id).into(),
            MovePlayer::teleport(entity_id, cx.spawn_position, cx.spawn_rotation).into(),
        ];
        if self.target_dimension != self.fake_dimension {
            packets.extend(dimension_change_packets(
                self.target_dimension,
                cx.spawn_position,
                cx.chunk_radius,
            ));
        }
        packets.push(StopSound::all().into());
        packets
    }

    /// Sent to the client when the transfer completes.
    pub fn completion_packets(&self) -> Vec<Packet> {
        vec![StopSound::all().into()]
    }

    /// Sent to the new backend when the transfer completes. Bypasses the
    /// rewrite, so it carries the backend's own id.
    pub fn initialized_packet(cx: &RewriteContext) -> Packet {
        SetLocalPlayerAsInitialized {
            runtime_entity_id: cx.original_entity_id.as_u64(),
        }
        .into()
    }
}

/// Handles the transfer target's packets until the client has been
/// moved over.
///
/// Until start game the backend is still logging the player in: its
/// resource pack negotiation is answered here and nothing reaches the
/// client. Afterwards packets are let through so the session can queue
/// them.
pub struct TransferHandler {
    source: Option<ServerInfo>,
    target: ServerInfo,
    limits: TransferQueueLimits,
    started: bool,
}

impl TransferHandler {
    pub fn new(source: Option<ServerInfo>, target: ServerInfo, limits: TransferQueueLimits) -> Self {
        Self {
            source,
            target,
            limits,
            started: false,
        }
    }

    pub fn target(&self) -> &ServerInfo {
        &self.target
    }

    pub fn started(&self) -> bool {
        self.started
    }

    fn handle_login(&mut self, packet: &mut Packet, cx: &mut HandlerContext) -> Verdict {
        match packet {
            Packet::ResourcePacksInfo(_) => cx.push(Action::Reply(
                ResourcePackClientResponse::new(ResourcePackClientResponse::HAVE_ALL_PACKS).into(),
            )),
            Packet::ResourcePackStack(_) => cx.push(Action::Reply(
                ResourcePackClientResponse::new(ResourcePackClientResponse::COMPLETED).into(),
            )),
            Packet::PlayStatus(status) if status.is_failure() => {
                cx.push(Action::TransferFailed(play_status_message(*status)))
            }
            Packet::Disconnect(disconnect) => {
                cx.push(Action::TransferFailed(disconnect.message.clone()))
            }
            Packet::StartGame(start_game) => {
                self.started = true;
                let transfer = Transfer::new(
                    self.source.clone(),
                    self.target.clone(),
                    cx.rewrite.dimension,
                    start_game.dimension,
                    self.limits,
                );
                cx.rewrite.adopt_backend(start_game, &self.target);
                cx.rewrite.transfer = Some(transfer);
                // before anything from the new backend is tracked
                let teardown = cx.tracker.teardown();
                cx.push(Action::TransferStarted(teardown));
                cx.push(Action::Reply(
                    RequestChunkRadius {
                        radius: cx.rewrite.chunk_radius,
                        max_radius: cx.rewrite.chunk_radius.clamp(0, u8::MAX as i32) as u8,
                    }
                    .into(),
                ));
            }
            _ => {}
        }
        Verdict::Cancel
    }
}

fn play_status_message(status: PlayStatus) -> String {
    match status.status {
        PlayStatus::FAILED_CLIENT => "outdated client".to_owned(),
        PlayStatus::FAILED_SERVER => "outdated server".to_owned(),
        status => format!("login failed with status {status}"),
    }
}

impl PacketHandler for TransferHandler {
    fn interested(&self, packet_id: u32) -> bool {
        !self.started
            || matches!(
                packet_id,
                id::DISCONNECT | id::CHANGE_DIMENSION | id::CHUNK_RADIUS_UPDATED | id::START_GAME
            )
    }

    fn handle(&mut self, packet: &mut Packet, cx: &mut HandlerContext) -> anyhow::Result<Verdict> {
        if !self.started {
            return Ok(self.handle_login(packet, cx));
        }
        Ok(match packet {
            Packet::Disconnect(disconnect) => {
                cx.push(Action::TransferFailed(disconnect.message.clone()));
                Verdict::Cancel
            }
            Packet::ChangeDimension(change) => {
                if let Some(transfer) = &mut cx.rewrite.transfer {
                    transfer.target_dimension = change.dimension;
                }
                Verdict::Forward
            }
            // the client keeps the radius it negotiated with the first backend
            Packet::ChunkRadiusUpdated(_) => Verdict::Cancel,
            Packet::StartGame(_) => {
                tracing::debug!("Ignoring repeated start game from {}", self.target.name);
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
        entity_tracker::EntityTracker,
        palette::Palette,
        position::Rotation,
        protocol::packet::{LevelEventGeneric, RemoveEntity, StartGame},
    };
    use std::{net::SocketAddr, sync::Arc};

    fn server(name: &str) -> ServerInfo {
        ServerInfo {
            name: name.to_owned(),
            address: SocketAddr::from(([127, 0, 0, 1], 19132)),
            block_palette: Arc::new(Palette::empty()),
            item_palette: Arc::new(Palette::empty()),
        }
    }

    fn start_game(dimension: i32) -> StartGame {
        StartGame {
            unique_entity_id: 40,
            runtime_entity_id: 40,
            player_gamemode: 0,
            position: Vec3::new(8.0, 70.0, 8.0),
            rotation: Rotation::default(),
            seed: 0,
            spawn_biome_type: 0,
            custom_biome_name: String::new(),
            dimension,
            rest: Vec::new(),
        }
    }

    #[test]
    fn publisher_radius_keeps_a_margin() {
        assert_eq!(publisher_radius(8), 6);
        assert_eq!(publisher_radius(4), 4);
        assert_eq!(publisher_radius(12), 8);
        assert_eq!(publisher_radius(32), 28);
    }

    #[test]
    fn fake_dimension_avoids_both_ends() {
        assert_eq!(fake_dimension(0, 0), 1);
        assert_eq!(fake_dimension(0, 1), 2);
        assert_eq!(fake_dimension(1, 2), 0);
        assert_eq!(fake_dimension(2, 0), 1);
    }

    #[test]
    fn phases_advance_once_each() {
        let mut transfer = Transfer::new(
            Some(server("a")),
            server("b"),
            0,
            0,
            TransferQueueLimits::default(),
        );
        assert_eq!(transfer.phase(), TransferPhase::Phase1);
        assert_eq!(
            transfer.on_dimension_change_success(),
            TransferStep::Phase1Completed
        );
        assert_eq!(transfer.phase(), TransferPhase::Phase2);
        assert_eq!(transfer.on_dimension_change_success(), TransferStep::Completed);
        assert_eq!(transfer.phase(), TransferPhase::Reset);
        assert_eq!(transfer.on_dimension_change_success(), TransferStep::Ignored);
        assert_eq!(transfer.phase(), TransferPhase::Reset);
    }

    #[test]
    fn phase1_moves_client_to_target() {
        let transfer = Transfer::new(None, server("b"), 0, 0, TransferQueueLimits::default());
        let mut cx = RewriteContext::new(None);
        cx.adopt_backend(&start_game(0), &server("b"));
        let packets = transfer.phase1_packets(&cx);

        assert!(matches!(packets[0], Packet::SetEntityData(_)));
        assert!(matches!(packets[1], Packet::MovePlayer(_)));
        assert!(matches!(
            &packets[2],
            Packet::ChangeDimension(change) if change.dimension == 0
        ));
        let publisher = packets.iter().find_map(|packet| match packet {
            Packet::NetworkChunkPublisherUpdate(update) => Some(update),
            _ => None,
        });
        assert_eq!(publisher.map(|update| update.radius), Some(96));
        assert!(matches!(packets.last(), Some(Packet::StopSound(_))));
    }

    #[test]
    fn queue_drops_generic_events_and_splits_release() {
        let mut queue = TransferQueue::new(TransferQueueLimits {
            soft: 2,
            hard: 10,
            release_batch: 2,
        });
        let mut packets: Vec<Packet> = (0..5)
            .map(|id| RemoveEntity { unique_entity_id: id }.into())
            .collect();
        packets.push(
            LevelEventGeneric {
                event: 0,
                data: Vec::new(),
            }
            .into(),
        );
        queue.push_batch(PacketBatch::from_packets(packets)).unwrap();
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.dropped(), 1);

        let batches = queue.release();
        assert_eq!(
            batches.iter().map(PacketBatch::len).collect::<Vec<_>>(),
            [2, 2, 1]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn queue_fails_past_hard_limit() {
        let mut queue = TransferQueue::new(TransferQueueLimits {
            soft: 1,
            hard: 3,
            release_batch: 256,
        });
        let batch = || {
            PacketBatch::from_packets(
                (0..2).map(|id| Packet::from(RemoveEntity { unique_entity_id: id })),
            )
        };
        queue.push_batch(batch()).unwrap();
        assert!(queue.push_batch(batch()).is_err());
        assert!(queue.is_empty());
    }

    #[test]
    fn handler_completes_login_and_starts_transfer() {
        let mut handler = TransferHandler::new(
            Some(server("a")),
            server("b"),
            TransferQueueLimits::default(),
        );
        let mut rewrite = RewriteContext::new(None);
        rewrite.adopt_backend(
            &StartGame {
                runtime_entity_id: 1,
                unique_entity_id: 1,
                ..start_game(0)
            },
            &server("a"),
        );
        let mut tracker = EntityTracker::new();
        let mut actions = Vec::new();
        let mut cx = HandlerContext {
            rewrite: &mut rewrite,
            tracker: &mut tracker,
            actions: &mut actions,
        };

        let mut status = Packet::from(PlayStatus {
            status: PlayStatus::LOGIN_SUCCESS,
        });
        assert_eq!(handler.handle(&mut status, &mut cx).unwrap(), Verdict::Cancel);
        let mut start = Packet::from(start_game(1));
        assert_eq!(handler.handle(&mut start, &mut cx).unwrap(), Verdict::Cancel);
        assert!(handler.started());
        assert!(!handler.interested(id::LEVEL_CHUNK));

        assert_eq!(cx.actions[0], Action::TransferStarted(Vec::new()));
        assert!(matches!(&cx.actions[1], Action::Reply(Packet::RequestChunkRadius(_))));
        let transfer = cx.rewrite.transfer.as_ref().unwrap();
        assert_eq!(transfer.target_dimension, 1);
        assert_eq!(transfer.fake_dimension, 2);
        // the client keeps its first id, the backend's is recorded
        assert_eq!(cx.rewrite.entity_id.as_u64(), 1);
        assert_eq!(cx.rewrite.original_entity_id.as_u64(), 40);
    }

    #[test]
    fn handler_reports_refused_logins() {
        let mut handler = TransferHandler::new(None, server("b"), TransferQueueLimits::default());
        let mut rewrite = RewriteContext::new(None);
        let mut tracker = EntityTracker::new();
        let mut actions = Vec::new();
        let mut cx = HandlerContext {
            rewrite: &mut rewrite,
            tracker: &mut tracker,
            actions: &mut actions,
        };
        let mut status = Packet::from(PlayStatus {
            status: PlayStatus::FAILED_SERVER,
        });
        handler.handle(&mut status, &mut cx).unwrap();
        assert_eq!(
            actions,
            [Action::TransferFailed("outdated server".to_owned())]
        );
    }
}
