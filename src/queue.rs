//! Outbound backpressure queue.
//!
//! Single packets sent to a connection are collected in a bounded
//! queue and flushed as one batch per tick. Full batches are written
//! right away, after whatever was queued before them.

use crate::{
    codec::batch::{BatchPacket, PacketBatch},
    collaborators::Observer,
    protocol::Packet,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// How often queued packets are flushed.
pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueLimits {
    /// Single packets waiting for the next tick.
    pub max_packets: usize,
    /// Batches held while the queue is inactive.
    pub max_batches: usize,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_packets: 4096,
            max_batches: 256,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("outbound queue overflowed with {packets} packets and {batches} batches queued")]
pub struct QueueOverflow {
    pub packets: usize,
    pub batches: usize,
}

struct Shared {
    packets: flume::Receiver<BatchPacket>,
    dead: AtomicBool,
    limits: QueueLimits,
    observer: Arc<dyn Observer>,
}

impl Shared {
    /// Drops everything queued and marks the queue dead.
    fn overflow(&self, held_batches: usize) -> QueueOverflow {
        let dropped: Vec<BatchPacket> = self.packets.drain().collect();
        let overflow = QueueOverflow {
            packets: dropped.len(),
            batches: held_batches,
        };
        if !self.dead.swap(true, Ordering::AcqRel) {
            self.observer.queue_overflow(&overflow);
            self.observer
                .bytes_dropped(dropped.iter().map(|packet| packet.body().len()).sum());
        }
        overflow
    }
}

/// Clonable handle used to queue packets from anywhere.
#[derive(Clone)]
pub struct QueueHandle {
    sender: flume::Sender<BatchPacket>,
    shared: Arc<Shared>,
}

impl QueueHandle {
    /// Queues a packet for the next tick.
    ///
    /// Once the queue has overflowed, every push fails and nothing is
    /// queued anymore.
    pub fn push(&self, packet: impl Into<Packet>) -> Result<(), QueueOverflow> {
        self.push_raw(BatchPacket::new(packet))
    }

    pub fn push_raw(&self, packet: BatchPacket) -> Result<(), QueueOverflow> {
        if self.shared.dead.load(Ordering::Acquire) {
            return Err(QueueOverflow {
                packets: 0,
                batches: 0,
            });
        }
        match self.sender.try_send(packet) {
            Ok(()) => Ok(()),
            Err(flume::TrySendError::Full(_)) => {
                tracing::warn!(
                    "Outbound queue full ({} packets), dropping it",
                    self.shared.limits.max_packets
                );
                Err(self.shared.overflow(0))
            }
            Err(flume::TrySendError::Disconnected(_)) => Err(QueueOverflow {
                packets: 0,
                batches: 0,
            }),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.shared.dead.load(Ordering::Acquire)
    }
}

/// The queue of one outbound connection.
///
/// Sans-IO: every operation returns the batches that should be written
/// now, in order.
pub struct OutboundQueue {
    handle: QueueHandle,
    active: bool,
    held: Vec<PacketBatch>,
}

impl OutboundQueue {
    pub fn new(limits: QueueLimits, observer: Arc<dyn Observer>) -> Self {
        let (sender, receiver) = flume::bounded(limits.max_packets.max(1));
        Self {
            handle: QueueHandle {
                sender,
                shared: Arc::new(Shared {
                    packets: receiver,
                    dead: AtomicBool::new(false),
                    limits,
                    observer,
                }),
            },
            active: true,
            held: Vec::new(),
        }
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub fn push(&self, packet: impl Into<Packet>) -> Result<(), QueueOverflow> {
        self.handle.push(packet)
    }

    pub fn is_dead(&self) -> bool {
        self.handle.is_dead()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Packets waiting for the next tick.
    pub fn queued(&self) -> usize {
        self.handle.shared.packets.len()
    }

    pub fn held(&self) -> usize {
        self.held.len()
    }

    fn check_alive(&self) -> Result<(), QueueOverflow> {
        if self.is_dead() {
            Err(QueueOverflow {
                packets: 0,
                batches: self.held.len(),
            })
        } else {
            Ok(())
        }
    }

    /// Queued packets as one batch, if any.
    fn drain_queued(&self) -> Option<PacketBatch> {
        let packets: Vec<BatchPacket> = self.handle.shared.packets.drain().collect();
        (!packets.is_empty()).then(|| PacketBatch::new(packets))
    }

    /// Writes a full batch.
    pub fn write_batch(&mut self, batch: PacketBatch) -> Result<Vec<PacketBatch>, QueueOverflow> {
        self.check_alive()?;
        if batch.skip_queue {
            return Ok(vec![batch]);
        }
        if !self.active {
            self.held.push(batch);
            if self.held.len() > self.handle.shared.limits.max_batches {
                tracing::warn!(
                    "{} batches held for an inactive connection, dropping them",
                    self.held.len()
                );
                let batches = self.held.len();
                self.release();
                return Err(self.handle.shared.overflow(batches));
            }
            return Ok(Vec::new());
        }
        let mut out = Vec::with_capacity(2);
        out.extend(self.drain_queued());
        out.push(batch);
        Ok(out)
    }

    /// Flushes queued packets. Called every [`TICK_INTERVAL`].
    pub fn tick(&mut self) -> Result<Option<PacketBatch>, QueueOverflow> {
        self.check_alive()?;
        if !self.active {
            return Ok(None);
        }
        Ok(self.drain_queued())
    }

    /// While inactive, nothing is flushed and full batches are held.
    /// Reactivating returns what was held, in order.
    pub fn set_active(&mut self, active: bool) -> Vec<PacketBatch> {
        self.active = active;
        if !active {
            return Vec::new();
        }
        let mut out = std::mem::take(&mut self.held);
        out.extend(self.drain_queued());
        out
    }

    /// Drops everything queued or held. Returns the number of packets
    /// released.
    pub fn release(&mut self) -> usize {
        let held: usize = self.held.drain(..).map(|batch| batch.len()).sum();
        held + self.handle.shared.packets.drain().count()
    }

    /// Everything still queued, for a final flush on teardown.
    pub fn drain_all(&mut self) -> Vec<PacketBatch> {
        let mut out = std::mem::take(&mut self.held);
        out.extend(self.drain_queued());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collaborators::test_support::CountingObserver, protocol::packet::RemoveEntity,
    };

    fn remove(id: i64) -> RemoveEntity {
        RemoveEntity {
            unique_entity_id: id,
        }
    }

    fn queue(max_packets: usize, max_batches: usize) -> (OutboundQueue, Arc<CountingObserver>) {
        let observer = Arc::new(CountingObserver::default());
        let queue = OutboundQueue::new(
            QueueLimits {
                max_packets,
                max_batches,
            },
            observer.clone(),
        );
        (queue, observer)
    }

    #[test]
    fn tick_flushes_one_batch() {
        let (mut queue, _) = queue(16, 4);
        for id in 0..3 {
            queue.push(remove(id)).unwrap();
        }
        let batch = queue.tick().unwrap().unwrap();
        assert_eq!(batch.len(), 3);
        assert!(queue.tick().unwrap().is_none());
    }

    #[test]
    fn batches_are_written_after_queued_packets() {
        let (mut queue, _) = queue(16, 4);
        queue.push(remove(1)).unwrap();
        let out = queue
            .write_batch(PacketBatch::from_packets([Packet::from(remove(2))]))
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].packets[0].decoded(),
            Some(&Packet::from(remove(1)))
        );

        let urgent = queue
            .write_batch(PacketBatch::from_packets([Packet::from(remove(3))]).with_skip_queue())
            .unwrap();
        assert_eq!(urgent.len(), 1);
    }

    #[test]
    fn overflow_kills_the_queue() {
        let (queue, observer) = queue(2, 4);
        queue.push(remove(1)).unwrap();
        queue.push(remove(2)).unwrap();
        let overflow = queue.push(remove(3)).unwrap_err();
        assert_eq!(overflow.packets, 2);
        assert!(queue.is_dead());
        assert_eq!(queue.queued(), 0);
        assert_eq!(observer.overflows(), 1);

        // nothing more gets in
        assert!(queue.push(remove(4)).is_err());
        assert_eq!(queue.queued(), 0);
        assert_eq!(observer.overflows(), 1);
    }

    #[test]
    fn inactive_queue_holds_batches() {
        let (mut queue, observer) = queue(16, 2);
        assert!(queue.set_active(false).is_empty());
        queue.push(remove(1)).unwrap();
        assert!(queue.tick().unwrap().is_none());
        for id in 0..2 {
            let out = queue
                .write_batch(PacketBatch::from_packets([Packet::from(remove(id))]))
                .unwrap();
            assert!(out.is_empty());
        }
        assert_eq!(queue.set_active(true).len(), 3);

        queue.set_active(false);
        for id in 0..2 {
            queue
                .write_batch(PacketBatch::from_packets([Packet::from(remove(id))]))
                .unwrap();
        }
        assert!(queue
            .write_batch(PacketBatch::from_packets([Packet::from(remove(9))]))
            .is_err());
        assert_eq!(queue.held(), 0);
        assert_eq!(observer.overflows(), 1);
    }
}
