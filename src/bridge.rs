//! Drives packet batches through handlers, rewriting and entity
//! tracking, and decides whether a batch can be forwarded as-is.

use crate::{
    codec::batch::PacketBatch,
    collaborators::Observer,
    entity_tracker::EntityTracker,
    protocol::{Packet, PacketCodec},
    rewrite::{Direction, RewriteContext},
};
use anyhow::Context;
use std::sync::Arc;

/// What a handler decided about a packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    /// Forward, but the handler changed the packet.
    Modified,
    /// Remove the packet from the batch.
    Cancel,
}

/// Work a handler asks the session to do once the batch is processed.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send a packet back to the connection the batch came from.
    Reply(Packet),
    /// The client finished a dimension change we injected.
    DimensionChangeSuccess,
    /// A transfer target sent its start game; the rewrite context
    /// now describes the new backend. Carries the packets removing the
    /// old backend's entities from the client.
    TransferStarted(Vec<Packet>),
    /// The transfer target refused the player.
    TransferFailed(String),
    /// The backend kicked the player with this message.
    BackendDisconnected(String),
}

/// Session state a handler may touch.
pub struct HandlerContext<'a> {
    pub rewrite: &'a mut RewriteContext,
    pub tracker: &'a mut EntityTracker,
    pub actions: &'a mut Vec<Action>,
}

impl HandlerContext<'_> {
    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }
}

/// Connection-specific packet handling.
pub trait PacketHandler {
    /// Whether `handle` wants packets with this id. Other packets are
    /// not decoded on its behalf.
    fn interested(&self, packet_id: u32) -> bool;

    fn handle(&mut self, packet: &mut Packet, cx: &mut HandlerContext) -> anyhow::Result<Verdict>;
}

/// Counts from one processed batch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BridgeReport {
    pub forwarded: usize,
    pub modified: usize,
    pub canceled: usize,
    /// Body bytes of canceled packets.
    pub canceled_bytes: usize,
    /// Packets canceled because handling them failed.
    pub failed: usize,
}

impl BridgeReport {
    pub fn is_pass_through(&self) -> bool {
        self.modified == 0 && self.canceled == 0
    }
}

/// Bridges the batches travelling in one direction.
pub struct BatchBridge {
    direction: Direction,
    observer: Arc<dyn Observer>,
}

impl BatchBridge {
    pub fn new(direction: Direction, observer: Arc<dyn Observer>) -> Self {
        Self {
            direction,
            observer,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Processes every packet of `batch` in order.
    ///
    /// A batch in which nothing was changed or canceled keeps its
    /// original bytes. Canceled packets are dropped here.
    pub fn process(
        &self,
        batch: &mut PacketBatch,
        codec: &PacketCodec,
        handler: &mut dyn PacketHandler,
        cx: &mut HandlerContext,
    ) -> BridgeReport {
        let mut report = BridgeReport::default();
        let packets = std::mem::take(&mut batch.packets);
        let mut kept = Vec::with_capacity(packets.len());

        for mut packet in packets {
            let keep = match self.process_packet(&mut packet, codec, handler, cx) {
                Ok(keep) => keep,
                Err(e) => {
                    tracing::warn!(
                        "Dropping {} packet {:#x}: {e:#}",
                        self.direction.as_ref(),
                        packet.id()
                    );
                    report.failed += 1;
                    false
                }
            };

            if keep {
                if packet.is_dirty() {
                    report.modified += 1;
                } else {
                    report.forwarded += 1;
                }
                kept.push(packet);
            } else {
                report.canceled += 1;
                report.canceled_bytes += packet.body().len();
            }
        }

        batch.packets = kept;
        if !report.is_pass_through() {
            batch.mark_modified();
        }
        if report.canceled > 0 {
            self.observer
                .packets_canceled(report.canceled, report.canceled_bytes);
        }
        report
    }

    /// Returns whether the packet stays in the batch.
    fn process_packet(
        &self,
        packet: &mut crate::codec::batch::BatchPacket,
        codec: &PacketCodec,
        handler: &mut dyn PacketHandler,
        cx: &mut HandlerContext,
    ) -> anyhow::Result<bool> {
        let id = packet.id();
        let wants_handler = handler.interested(id);
        let wants_rewrite = cx.rewrite.interested(self.direction, id);
        let wants_tracker =
            self.direction == Direction::Clientbound && EntityTracker::interested(id);
        if !(wants_handler || wants_rewrite || wants_tracker) {
            return Ok(true);
        }

        let decoded = packet
            .decode_mut(codec)
            .with_context(|| format!("failed to decode packet {id:#x}"))?;

        let mut dirty = false;
        if wants_handler {
            match handler.handle(decoded, cx)? {
                Verdict::Cancel => return Ok(false),
                Verdict::Modified => dirty = true,
                Verdict::Forward => {}
            }
        }
        // the handler may have switched backends
        if cx.rewrite.interested(self.direction, id) {
            dirty |= cx.rewrite.rewrite(self.direction, decoded);
        }
        if wants_tracker {
            cx.tracker.observe(decoded);
        }

        if dirty {
            packet.mark_dirty();
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::batch::BatchPacket,
        collaborators::test_support::CountingObserver,
        protocol::{
            latest_codec,
            packet::{id, ChunkRadiusUpdated, RemoveEntity},
            PacketHeader,
        },
    };
    use bytes::Bytes;

    struct CancelRadius;

    impl PacketHandler for CancelRadius {
        fn interested(&self, packet_id: u32) -> bool {
            packet_id == id::CHUNK_RADIUS_UPDATED
        }

        fn handle(&mut self, _packet: &mut Packet, _cx: &mut HandlerContext) -> anyhow::Result<Verdict> {
            Ok(Verdict::Cancel)
        }
    }

    struct Ignore;

    impl PacketHandler for Ignore {
        fn interested(&self, _packet_id: u32) -> bool {
            false
        }

        fn handle(&mut self, _packet: &mut Packet, _cx: &mut HandlerContext) -> anyhow::Result<Verdict> {
            Ok(Verdict::Forward)
        }
    }

    fn run(
        batch: &mut PacketBatch,
        handler: &mut dyn PacketHandler,
        observer: Arc<CountingObserver>,
    ) -> (BridgeReport, EntityTracker) {
        let mut rewrite = RewriteContext::new(None);
        let mut tracker = EntityTracker::new();
        let mut actions = Vec::new();
        let report = BatchBridge::new(Direction::Clientbound, observer).process(
            batch,
            latest_codec(),
            handler,
            &mut HandlerContext {
                rewrite: &mut rewrite,
                tracker: &mut tracker,
                actions: &mut actions,
            },
        );
        (report, tracker)
    }

    fn received(packets: &[(u32, &'static [u8])]) -> PacketBatch {
        let mut batch = PacketBatch::new(
            packets
                .iter()
                .map(|(id, body)| BatchPacket::raw(PacketHeader::new(*id), Bytes::from_static(body)))
                .collect(),
        );
        batch.modified = false;
        batch
    }

    #[test]
    fn untouched_batches_stay_unmodified() {
        let observer = Arc::new(CountingObserver::default());
        let mut batch = received(&[(id::REMOVE_ENTITY, &[0x02]), (0x3ff, &[1, 2, 3])]);
        let (report, tracker) = run(&mut batch, &mut Ignore, observer.clone());
        assert!(report.is_pass_through());
        assert_eq!(report.forwarded, 2);
        assert!(!batch.modified);
        assert_eq!(observer.canceled(), 0);
        // the tracker saw the removal, which did not change the packet
        assert_eq!(tracker.entity_count(), 0);
    }

    #[test]
    fn canceled_packets_leave_the_batch() {
        let observer = Arc::new(CountingObserver::default());
        let mut batch = PacketBatch::from_packets([
            Packet::from(RemoveEntity {
                unique_entity_id: 1,
            }),
            Packet::from(ChunkRadiusUpdated { radius: 8 }),
            Packet::from(RemoveEntity {
                unique_entity_id: 2,
            }),
        ]);
        batch.modified = false;
        let (report, _) = run(&mut batch, &mut CancelRadius, observer.clone());
        assert_eq!(report.canceled, 1);
        assert_eq!(batch.len(), 2);
        assert!(batch.modified);
        assert_eq!(observer.canceled(), 1);
    }

    #[test]
    fn undecodable_packets_are_canceled() {
        let observer = Arc::new(CountingObserver::default());
        // radius varint is cut short
        let mut batch = received(&[
            (id::CHUNK_RADIUS_UPDATED, &[0x80]),
            (id::REMOVE_ENTITY, &[0x02]),
        ]);
        let (report, _) = run(&mut batch, &mut CancelRadius, observer.clone());
        assert_eq!(report.failed, 1);
        assert_eq!(report.canceled, 1);
        assert_eq!(report.canceled_bytes, 1);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.packets[0].id(), id::REMOVE_ENTITY);
        assert_eq!(observer.canceled_bytes(), 1);
    }
}
