//! Byte links carrying whole frames, with I/O offloaded to Tokio tasks.

use crate::{
    codec::{batch::PacketBatch, BatchCodec},
    protocol::{Packet, PacketCodec, BUFFER_LIMIT},
};
use anyhow::{anyhow, Context};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::{net::TcpStream, task};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Frames buffered in each direction before backpressure kicks in.
const CHANNEL_CAPACITY: usize = 64;

/// One end of a frame link.
///
/// Dropping the link closes it.
pub struct Link {
    outgoing: flume::Sender<Bytes>,
    incoming: flume::Receiver<Bytes>,
    peer: Option<SocketAddr>,
}

impl Link {
    /// Frames a TCP stream with length prefixes.
    pub fn tcp(stream: TcpStream) -> anyhow::Result<Self> {
        let peer = stream.peer_addr().ok();
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let codec = || {
            LengthDelimitedCodec::builder()
                .max_frame_length(BUFFER_LIMIT)
                .new_codec()
        };

        let (outgoing, outgoing_rx) = flume::bounded::<Bytes>(CHANNEL_CAPACITY);
        task::spawn(async move {
            let mut writer = FramedWrite::new(writer, codec());
            while let Ok(frame) = outgoing_rx.recv_async().await {
                if let Err(e) = writer.send(frame).await {
                    tracing::debug!("Link write failed: {e}");
                    break;
                }
            }
        });

        let (incoming_tx, incoming) = flume::bounded::<Bytes>(CHANNEL_CAPACITY);
        task::spawn(async move {
            let mut reader = FramedRead::new(reader, codec());
            while let Some(frame) = reader.next().await {
                match frame {
                    Ok(frame) => {
                        if incoming_tx.send_async(frame.freeze()).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Link read failed: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            outgoing,
            incoming,
            peer,
        })
    }

    /// Two links connected to each other in memory.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = flume::bounded(CHANNEL_CAPACITY);
        let (b_tx, a_rx) = flume::bounded(CHANNEL_CAPACITY);
        (
            Self {
                outgoing: a_tx,
                incoming: a_rx,
                peer: None,
            },
            Self {
                outgoing: b_tx,
                incoming: b_rx,
                peer: None,
            },
        )
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub async fn send(&self, frame: Bytes) -> anyhow::Result<()> {
        self.outgoing
            .send_async(frame)
            .await
            .map_err(|_| anyhow!("link closed"))
    }

    /// Next frame, or `None` once the other side is gone.
    pub async fn recv(&self) -> Option<Bytes> {
        self.incoming.recv_async().await.ok()
    }

    pub fn is_closed(&self) -> bool {
        self.outgoing.is_disconnected()
    }
}

/// A link plus the codec state of the connection it carries.
pub struct Connection {
    link: Link,
    codec: BatchCodec,
}

impl Connection {
    pub fn new(link: Link, codec: BatchCodec) -> Self {
        Self { link, codec }
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn codec(&self) -> &BatchCodec {
        &self.codec
    }

    pub fn codec_mut(&mut self) -> &mut BatchCodec {
        &mut self.codec
    }

    pub fn packet_codec(&self) -> &'static PacketCodec {
        self.codec.packet_codec()
    }

    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    /// Decodes a frame received on this connection.
    pub fn decode(&mut self, frame: &[u8]) -> anyhow::Result<PacketBatch> {
        self.codec.decode(frame).context("failed to decode batch")
    }

    /// Next batch, or `None` once the connection is closed.
    pub async fn recv_batch(&mut self) -> anyhow::Result<Option<PacketBatch>> {
        match self.link.recv().await {
            Some(frame) => self.decode(&frame).map(Some),
            None => Ok(None),
        }
    }

    pub async fn send_batch(&mut self, batch: PacketBatch) -> anyhow::Result<()> {
        let frame = self.codec.encode(batch)?;
        self.link.send(frame).await
    }

    pub async fn send_packets(
        &mut self,
        packets: impl IntoIterator<Item = Packet>,
    ) -> anyhow::Result<()> {
        self.send_batch(PacketBatch::from_packets(packets)).await
    }

    /// Receives the first packet of the next batch, decoded. Only meant
    /// for the handshake, where batches hold one packet.
    pub async fn recv_packet(&mut self) -> anyhow::Result<Packet> {
        let batch = self
            .recv_batch()
            .await?
            .ok_or_else(|| anyhow!("connection closed"))?;
        let mut packet = batch
            .packets
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty batch"))?;
        packet.decode(self.packet_codec())?;
        packet
            .into_decoded()
            .ok_or_else(|| anyhow!("packet was not decoded"))
    }
}
