//! Interfaces to the parts of the proxy that live outside the
//! session core: backend connection setup, fallback selection,
//! events and observability.

use crate::{
    disconnect::DisconnectReason,
    link::Connection,
    login::LoginData,
    palette::{BlockPalette, ItemPalette},
    queue::QueueOverflow,
};
use futures::future::BoxFuture;
use std::{fmt, net::SocketAddr, sync::Arc};

/// Identifies a session for collaborators.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A backend server the proxy can route sessions to.
#[derive(Clone)]
pub struct ServerInfo {
    pub name: String,
    pub address: SocketAddr,
    pub block_palette: Arc<BlockPalette>,
    pub item_palette: Arc<ItemPalette>,
}

impl fmt::Debug for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerInfo")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ServerInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.address == other.address
    }
}

/// Opens connections to backend servers.
///
/// The returned connection has completed network settings
/// negotiation and has been sent the client's login.
pub trait BackendConnector: Send + Sync {
    fn connect(
        &self,
        server: &ServerInfo,
        login: &LoginData,
    ) -> BoxFuture<'static, anyhow::Result<Connection>>;
}

/// Picks where a session goes when its backend is lost.
pub trait ReconnectPolicy: Send + Sync {
    /// Returns `None` to disconnect the client.
    fn fallback_server(
        &self,
        session: SessionId,
        old: &ServerInfo,
        reason: &DisconnectReason,
        message: &str,
    ) -> Option<ServerInfo>;
}

/// Tries a fixed list of servers in order, skipping the one that failed.
#[derive(Debug, Clone, Default)]
pub struct FallbackList {
    servers: Vec<ServerInfo>,
}

impl FallbackList {
    pub fn new(servers: Vec<ServerInfo>) -> Self {
        Self { servers }
    }
}

impl ReconnectPolicy for FallbackList {
    fn fallback_server(
        &self,
        session: SessionId,
        old: &ServerInfo,
        reason: &DisconnectReason,
        _message: &str,
    ) -> Option<ServerInfo> {
        let server = self.servers.iter().find(|server| *server != old).cloned();
        match &server {
            Some(server) => tracing::info!(
                "Session {session} lost {} ({reason}), falling back to {}",
                old.name,
                server.name
            ),
            None => tracing::info!("Session {session} lost {} ({reason}), no fallback", old.name),
        }
        server
    }
}

/// Receives session lifecycle events. Calls must not block.
pub trait EventSink: Send + Sync {
    fn transfer_completed(&self, _session: SessionId, _from: &ServerInfo, _to: &ServerInfo) {}

    fn resource_packs_rebuilt(&self, _session: SessionId) {}
}

#[derive(Debug, Default)]
pub struct NoopEvents;

impl EventSink for NoopEvents {}

/// Logs events through `tracing`.
#[derive(Debug, Default)]
pub struct LogEvents;

impl EventSink for LogEvents {
    fn transfer_completed(&self, session: SessionId, from: &ServerInfo, to: &ServerInfo) {
        tracing::info!("Session {session} transferred from {} to {}", from.name, to.name);
    }

    fn resource_packs_rebuilt(&self, session: SessionId) {
        tracing::debug!("Session {session} resource packs rebuilt");
    }
}

/// Observability hooks. All of them are fire-and-forget.
pub trait Observer: Send + Sync {
    fn queue_overflow(&self, _overflow: &QueueOverflow) {}

    fn bytes_compressed(&self, _uncompressed: usize, _compressed: usize) {}

    fn bytes_decompressed(&self, _compressed: usize, _uncompressed: usize) {}

    fn packets_passed_through(&self, _count: usize) {}

    fn packets_reencoded(&self, _count: usize) {}

    /// Packets removed from a batch; `bytes` is the size of their bodies.
    fn packets_canceled(&self, _count: usize, _bytes: usize) {}

    fn bytes_dropped(&self, _bytes: usize) {}
}

#[derive(Debug, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}
