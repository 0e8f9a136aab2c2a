//! A player's session: one client connection and the backend it is
//! currently routed to, plus the backend it is being moved to.
//!
//! All of a session's state lives in [`Session`] and is only touched
//! from the task driving it. Other threads talk to it through a
//! [`SessionHandle`].

use crate::{
    bridge::{Action, BatchBridge, HandlerContext},
    codec::batch::PacketBatch,
    collaborators::{
        BackendConnector, EventSink, Observer, ReconnectPolicy, ServerInfo, SessionId,
    },
    disconnect::DisconnectReason,
    entity_tracker::EntityTracker,
    handler::{DownstreamHandler, UpstreamHandler},
    link::Connection,
    login::LoginData,
    protocol::Packet,
    queue::{OutboundQueue, QueueHandle, QueueLimits, QueueOverflow},
    rewrite::{Direction, RewriteContext},
    transfer::{Transfer, TransferHandler, TransferQueueLimits, TransferStep},
};
use bytes::Bytes;
use futures::future::{self, BoxFuture};
use std::{sync::Arc, time::Duration};
use tokio::time::{self, MissedTickBehavior};

/// Everything a session needs from outside.
#[derive(Clone)]
pub struct SessionServices {
    pub connector: Arc<dyn BackendConnector>,
    pub reconnect: Arc<dyn ReconnectPolicy>,
    pub events: Arc<dyn EventSink>,
    pub observer: Arc<dyn Observer>,
    pub queue_limits: QueueLimits,
    pub transfer_limits: TransferQueueLimits,
    /// How often queued packets are flushed.
    pub tick_interval: Duration,
}

#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Move the player to another backend.
    Transfer(ServerInfo),
    Disconnect(DisconnectReason),
}

/// Controls a session from other threads.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    commands: flume::Sender<SessionCommand>,
    client_queue: QueueHandle,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn transfer(&self, server: ServerInfo) -> bool {
        self.commands
            .send(SessionCommand::Transfer(server))
            .is_ok()
    }

    pub fn disconnect(&self, reason: DisconnectReason) -> bool {
        self.commands
            .send(SessionCommand::Disconnect(reason))
            .is_ok()
    }

    /// Queues a packet for the client. It is sent on the next tick.
    pub fn send_packet(&self, packet: impl Into<Packet>) -> Result<(), QueueOverflow> {
        self.client_queue.push(packet)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_disconnected()
    }
}

/// A connection plus its outbound queue.
struct Peer {
    connection: Connection,
    queue: OutboundQueue,
}

impl Peer {
    fn new(connection: Connection, services: &SessionServices) -> Self {
        Self {
            connection,
            queue: OutboundQueue::new(services.queue_limits, services.observer.clone()),
        }
    }

    async fn write(&mut self, batch: PacketBatch) -> anyhow::Result<()> {
        for batch in self.queue.write_batch(batch)? {
            self.connection.send_batch(batch).await?;
        }
        Ok(())
    }

    /// Writes packets right away, ahead of anything queued.
    async fn send_now(&mut self, packets: Vec<Packet>) -> anyhow::Result<()> {
        if packets.is_empty() {
            return Ok(());
        }
        self.write(PacketBatch::from_packets(packets).with_skip_queue())
            .await
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        if let Some(batch) = self.queue.tick()? {
            self.connection.send_batch(batch).await?;
        }
        Ok(())
    }

    /// Flushes what is still queued if the connection is open, and
    /// releases it otherwise.
    async fn close(mut self, farewell: Option<Packet>) {
        if self.connection.is_closed() {
            let released = self.queue.release();
            if released > 0 {
                tracing::debug!("Released {released} packets queued for a closed connection");
            }
            return;
        }
        let mut batches = self.queue.drain_all();
        batches.extend(farewell.map(|packet| PacketBatch::from_packets([packet])));
        for batch in batches {
            if let Err(e) = self.connection.send_batch(batch).await {
                tracing::debug!("Final flush failed: {e:#}");
                break;
            }
        }
    }
}

/// A backend connection and the handler for its packets.
struct Backend<H> {
    server: ServerInfo,
    peer: Peer,
    handler: H,
}

impl Backend<TransferHandler> {
    fn promote(self) -> Backend<DownstreamHandler> {
        Backend {
            handler: DownstreamHandler::new(self.server.clone()),
            server: self.server,
            peer: self.peer,
        }
    }
}

struct Connecting {
    server: ServerInfo,
    source: Option<ServerInfo>,
    future: BoxFuture<'static, anyhow::Result<Connection>>,
}

/// Why a session ended.
#[derive(Debug)]
enum Exit {
    Disconnect(DisconnectReason),
    ClientGone,
}

/// Where a batch came from, for replies.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Source {
    Client,
    Backend,
    Pending,
}

enum Event {
    Client(Option<Bytes>),
    Backend(Option<Bytes>),
    Pending(Option<Bytes>),
    Connected(anyhow::Result<Connection>),
    Tick,
    Command(Option<SessionCommand>),
}

async fn next_frame(connection: Option<&Connection>) -> Option<Bytes> {
    match connection {
        Some(connection) => connection.link().recv().await,
        None => future::pending().await,
    }
}

async fn next_connected(connecting: &mut Option<Connecting>) -> anyhow::Result<Connection> {
    match connecting {
        Some(connecting) => (&mut connecting.future).await,
        None => future::pending().await,
    }
}

async fn next_command(commands: Option<&flume::Receiver<SessionCommand>>) -> Option<SessionCommand> {
    match commands {
        Some(commands) => commands.recv_async().await.ok(),
        None => future::pending().await,
    }
}

/// Backend write failures surface when the backend's link reports
/// closure. Overflows end the session.
fn backend_write_result(result: anyhow::Result<()>) -> anyhow::Result<()> {
    match result {
        Err(e) if e.downcast_ref::<QueueOverflow>().is_some() => Err(e),
        Err(e) => {
            tracing::debug!("Write to backend failed: {e:#}");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

pub struct Session {
    id: SessionId,
    login: LoginData,
    services: SessionServices,
    client: Peer,
    backend: Option<Backend<DownstreamHandler>>,
    /// Transfer target, once connected.
    pending: Option<Backend<TransferHandler>>,
    connecting: Option<Connecting>,
    rewrite: RewriteContext,
    tracker: EntityTracker,
    upstream: UpstreamHandler,
    clientbound: BatchBridge,
    serverbound: BatchBridge,
    commands: Option<flume::Receiver<SessionCommand>>,
    exit: Option<Exit>,
}

impl Session {
    /// A session for a client that completed login.
    pub fn new(
        client: Connection,
        login: LoginData,
        services: SessionServices,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = flume::unbounded();
        let client = Peer::new(client, &services);
        let handle = SessionHandle {
            id: login.session_id,
            commands: commands_tx,
            client_queue: client.queue.handle(),
        };
        let session = Self {
            id: login.session_id,
            rewrite: RewriteContext::new(login.client_ids),
            tracker: EntityTracker::new(),
            upstream: UpstreamHandler,
            clientbound: BatchBridge::new(Direction::Clientbound, services.observer.clone()),
            serverbound: BatchBridge::new(Direction::Serverbound, services.observer.clone()),
            client,
            backend: None,
            pending: None,
            connecting: None,
            commands: Some(commands),
            exit: None,
            login,
            services,
        };
        (session, handle)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Connects to `server` and proxies until the session ends.
    pub async fn run(mut self, server: ServerInfo) {
        let exit = match self.services.connector.connect(&server, &self.login).await {
            Ok(connection) => {
                tracing::info!("Session {} joined {}", self.id, server.name);
                self.backend = Some(Backend {
                    handler: DownstreamHandler::new(server.clone()),
                    peer: Peer::new(connection, &self.services),
                    server,
                });
                self.drive().await
            }
            Err(e) => {
                tracing::warn!("Session {} could not join {}: {e:#}", self.id, server.name);
                Exit::Disconnect(DisconnectReason::transfer_failed(
                    &server.name,
                    &format!("{e:#}"),
                ))
            }
        };
        self.shutdown(exit).await;
    }

    async fn drive(&mut self) -> Exit {
        let mut tick = time::interval(self.services.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let event = tokio::select! {
                frame = self.client.connection.link().recv() => Event::Client(frame),
                frame = next_frame(self.backend.as_ref().map(|backend| &backend.peer.connection)) => {
                    Event::Backend(frame)
                }
                frame = next_frame(self.pending.as_ref().map(|pending| &pending.peer.connection)) => {
                    Event::Pending(frame)
                }
                result = next_connected(&mut self.connecting) => Event::Connected(result),
                _ = tick.tick() => Event::Tick,
                command = next_command(self.commands.as_ref()) => Event::Command(command),
            };

            let result = match event {
                Event::Client(Some(frame)) => self.on_client_frame(frame).await,
                Event::Client(None) => return Exit::ClientGone,
                Event::Backend(Some(frame)) => self.on_backend_frame(frame).await,
                Event::Backend(None) => self.on_backend_lost(None).await,
                Event::Pending(frame) => self.on_pending_frame(frame).await,
                Event::Connected(result) => self.on_connected(result).await,
                Event::Tick => self.on_tick().await,
                Event::Command(Some(command)) => self.on_command(command),
                Event::Command(None) => {
                    self.commands = None;
                    Ok(())
                }
            };

            if let Err(e) = result {
                return self.exit_for(e);
            }
            if let Some(exit) = self.exit.take() {
                return exit;
            }
        }
    }

    fn exit_for(&self, error: anyhow::Error) -> Exit {
        if self.client.connection.is_closed() {
            return Exit::ClientGone;
        }
        if let Some(overflow) = error.downcast_ref::<QueueOverflow>() {
            tracing::warn!("Session {}: {overflow}", self.id);
            return Exit::Disconnect(DisconnectReason::queue_overflow());
        }
        tracing::warn!("Session {} failed: {error:#}", self.id);
        Exit::Disconnect(DisconnectReason::protocol_error(format!("{error:#}")))
    }

    fn dimension_locked(&self) -> bool {
        self.rewrite
            .transfer
            .as_ref()
            .is_some_and(Transfer::dimension_locked)
    }

    async fn on_client_frame(&mut self, frame: Bytes) -> anyhow::Result<()> {
        let mut batch = self.client.connection.decode(&frame)?;
        let mut actions = Vec::new();
        self.serverbound.process(
            &mut batch,
            self.client.connection.packet_codec(),
            &mut self.upstream,
            &mut HandlerContext {
                rewrite: &mut self.rewrite,
                tracker: &mut self.tracker,
                actions: &mut actions,
            },
        );

        let locked = self.dimension_locked();
        if !batch.is_empty() {
            match self.backend.as_mut() {
                Some(backend) if !locked => backend_write_result(backend.peer.write(batch).await)?,
                _ => tracing::trace!(
                    "Session {} dropping {} packets while no backend is ready",
                    self.id,
                    batch.len()
                ),
            }
        }
        self.run_actions(Source::Client, actions).await
    }

    async fn on_backend_frame(&mut self, frame: Bytes) -> anyhow::Result<()> {
        let locked = self.dimension_locked();
        let Some(backend) = self.backend.as_mut() else {
            return Ok(());
        };
        let mut batch = backend.peer.connection.decode(&frame)?;
        if locked {
            // the client is waiting for the new backend
            return Ok(());
        }

        let mut actions = Vec::new();
        self.clientbound.process(
            &mut batch,
            backend.peer.connection.packet_codec(),
            &mut backend.handler,
            &mut HandlerContext {
                rewrite: &mut self.rewrite,
                tracker: &mut self.tracker,
                actions: &mut actions,
            },
        );
        if !batch.is_empty() {
            self.client.write(batch).await?;
        }
        self.run_actions(Source::Backend, actions).await
    }

    async fn on_pending_frame(&mut self, frame: Option<Bytes>) -> anyhow::Result<()> {
        let Some(frame) = frame else {
            return self.fail_transfer("connection closed").await;
        };
        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };
        let mut batch = match pending.peer.connection.decode(&frame) {
            Ok(batch) => batch,
            Err(e) => return self.fail_transfer(&format!("{e:#}")).await,
        };

        let mut actions = Vec::new();
        self.clientbound.process(
            &mut batch,
            pending.peer.connection.packet_codec(),
            &mut pending.handler,
            &mut HandlerContext {
                rewrite: &mut self.rewrite,
                tracker: &mut self.tracker,
                actions: &mut actions,
            },
        );
        if pending.handler.started() && !batch.is_empty() {
            if let Some(transfer) = self.rewrite.transfer.as_mut() {
                if let Err(e) = transfer.queue.push_batch(batch) {
                    actions.push(Action::TransferFailed(e.to_string()));
                }
            }
        }
        self.run_actions(Source::Pending, actions).await
    }

    async fn on_connected(&mut self, result: anyhow::Result<Connection>) -> anyhow::Result<()> {
        let Some(connecting) = self.connecting.take() else {
            return Ok(());
        };
        match result {
            Ok(connection) => {
                tracing::debug!(
                    "Session {} logging in to {}",
                    self.id,
                    connecting.server.name
                );
                self.pending = Some(Backend {
                    handler: TransferHandler::new(
                        connecting.source,
                        connecting.server.clone(),
                        self.services.transfer_limits,
                    ),
                    peer: Peer::new(connection, &self.services),
                    server: connecting.server,
                });
                Ok(())
            }
            Err(e) => {
                self.abandon_transfer(connecting.server, &format!("{e:#}"))
                    .await;
                Ok(())
            }
        }
    }

    async fn on_tick(&mut self) -> anyhow::Result<()> {
        self.client.flush().await?;
        if let Some(backend) = self.backend.as_mut() {
            backend_write_result(backend.peer.flush().await)?;
        }
        Ok(())
    }

    fn on_command(&mut self, command: SessionCommand) -> anyhow::Result<()> {
        match command {
            SessionCommand::Transfer(server) => {
                let current = self.backend.as_ref().map(|backend| backend.server.clone());
                if current.as_ref() == Some(&server) {
                    tracing::info!("Session {} is already on {}", self.id, server.name);
                } else {
                    self.connect_to(server, current);
                }
            }
            SessionCommand::Disconnect(reason) => self.exit = Some(Exit::Disconnect(reason)),
        }
        Ok(())
    }

    async fn run_actions(&mut self, source: Source, actions: Vec<Action>) -> anyhow::Result<()> {
        for action in actions {
            match action {
                Action::Reply(packet) => self.reply(source, packet).await?,
                Action::DimensionChangeSuccess => self.on_dimension_change_success().await?,
                Action::TransferStarted(teardown) => self.on_transfer_started(teardown).await?,
                Action::TransferFailed(message) => self.fail_transfer(&message).await?,
                Action::BackendDisconnected(message) => {
                    self.on_backend_lost(Some(message)).await?
                }
            }
            if self.exit.is_some() {
                break;
            }
        }
        Ok(())
    }

    async fn reply(&mut self, source: Source, packet: Packet) -> anyhow::Result<()> {
        match source {
            Source::Client => self.client.send_now(vec![packet]).await,
            Source::Backend => match self.backend.as_mut() {
                Some(backend) => backend_write_result(backend.peer.send_now(vec![packet]).await),
                None => Ok(()),
            },
            Source::Pending => match self.pending.as_mut() {
                Some(pending) => backend_write_result(pending.peer.send_now(vec![packet]).await),
                None => Ok(()),
            },
        }
    }

    fn connect_to(&mut self, server: ServerInfo, source: Option<ServerInfo>) {
        if self.rewrite.transfer.is_some() {
            tracing::warn!(
                "Session {} is already being transferred, not moving to {}",
                self.id,
                server.name
            );
            return;
        }
        // a newer request replaces one still logging in
        self.pending = None;
        tracing::info!("Session {} connecting to {}", self.id, server.name);
        let future = self.services.connector.connect(&server, &self.login);
        self.connecting = Some(Connecting {
            server,
            source,
            future,
        });
    }

    async fn on_transfer_started(&mut self, mut packets: Vec<Packet>) -> anyhow::Result<()> {
        let Some(transfer) = self.rewrite.transfer.as_ref() else {
            return Ok(());
        };
        tracing::info!(
            "Session {} transferring to {} (dimension {} via {})",
            self.id,
            transfer.target.name,
            transfer.target_dimension,
            transfer.fake_dimension
        );
        packets.extend(transfer.start_packets(&self.rewrite));
        self.rewrite.dimension = transfer.fake_dimension;
        if let Some(old) = self.backend.as_mut() {
            old.peer.queue.set_active(false);
        }
        self.services.events.resource_packs_rebuilt(self.id);
        self.client.send_now(packets).await
    }

    async fn on_dimension_change_success(&mut self) -> anyhow::Result<()> {
        let Some(mut transfer) = self.rewrite.transfer.take() else {
            return Ok(());
        };
        match transfer.on_dimension_change_success() {
            TransferStep::Phase1Completed => {
                let Some(pending) = self.pending.take() else {
                    self.rewrite.transfer = Some(transfer);
                    return self.fail_transfer("connection closed").await;
                };
                self.rewrite.dimension = transfer.target_dimension;
                let packets = transfer.phase1_packets(&self.rewrite);
                let released = transfer.queue.release();
                self.rewrite.transfer = Some(transfer);

                if let Some(mut old) = self.backend.take() {
                    let dropped = old.peer.queue.release();
                    tracing::debug!(
                        "Session {} left {}, {dropped} packets dropped",
                        self.id,
                        old.server.name
                    );
                }
                self.backend = Some(pending.promote());

                self.client.send_now(packets).await?;
                for batch in released {
                    self.client.write(batch).await?;
                }
                Ok(())
            }
            TransferStep::Completed => {
                self.client.send_now(transfer.completion_packets()).await?;
                let initialized = Transfer::initialized_packet(&self.rewrite);
                let backend = self
                    .backend
                    .as_mut()
                    .filter(|backend| !backend.peer.connection.is_closed());
                let Some(backend) = backend else {
                    self.abandon_transfer(transfer.target, "connection closed")
                        .await;
                    return Ok(());
                };
                backend_write_result(backend.peer.send_now(vec![initialized]).await)?;

                tracing::info!("Session {} transferred to {}", self.id, transfer.target.name);
                if let Some(source) = &transfer.source {
                    self.services
                        .events
                        .transfer_completed(self.id, source, &transfer.target);
                }
                Ok(())
            }
            TransferStep::Ignored => Ok(()),
        }
    }

    async fn fail_transfer(&mut self, message: &str) -> anyhow::Result<()> {
        let target = self
            .rewrite
            .transfer
            .as_ref()
            .map(|transfer| transfer.target.clone())
            .or_else(|| self.pending.as_ref().map(|pending| pending.server.clone()))
            .or_else(|| {
                self.connecting
                    .as_ref()
                    .map(|connecting| connecting.server.clone())
            });
        match target {
            Some(target) => self.abandon_transfer(target, message).await,
            None => tracing::debug!("Session {} has no transfer to fail", self.id),
        }
        Ok(())
    }

    /// Tears down a failed transfer and the old backend, then falls
    /// back or disconnects.
    async fn abandon_transfer(&mut self, target: ServerInfo, message: &str) {
        tracing::warn!(
            "Session {} failed to transfer to {}: {message}",
            self.id,
            target.name
        );
        self.rewrite.transfer = None;
        self.connecting = None;
        if let Some(pending) = self.pending.take() {
            pending.peer.close(None).await;
        }
        if let Some(old) = self.backend.take() {
            old.peer.close(None).await;
        }
        let reason = DisconnectReason::transfer_failed(&target.name, message);
        self.fall_back(&target, reason, message);
    }

    async fn on_backend_lost(&mut self, message: Option<String>) -> anyhow::Result<()> {
        let Some(backend) = self.backend.take() else {
            return Ok(());
        };
        backend.peer.close(None).await;

        // the new backend is already promoted once phase 1 completed
        let promoted = self
            .rewrite
            .transfer
            .as_ref()
            .filter(|transfer| !transfer.dimension_locked())
            .map(|transfer| transfer.target.clone());
        if let Some(target) = promoted {
            let message = message.as_deref().unwrap_or("connection closed");
            self.abandon_transfer(target, message).await;
            return Ok(());
        }

        if self.rewrite.transfer.is_some()
            || self.pending.is_some()
            || self.connecting.is_some()
        {
            tracing::info!(
                "Session {} lost {} while transferring away",
                self.id,
                backend.server.name
            );
            return Ok(());
        }

        let reason = match &message {
            Some(message) => DisconnectReason::backend_kicked(&backend.server.name, message),
            None => DisconnectReason::backend_closed(&backend.server.name),
        };
        tracing::info!("Session {}: {reason}", self.id);
        self.fall_back(&backend.server, reason, message.as_deref().unwrap_or(""));
        Ok(())
    }

    fn fall_back(&mut self, lost: &ServerInfo, reason: DisconnectReason, message: &str) {
        match self
            .services
            .reconnect
            .fallback_server(self.id, lost, &reason, message)
        {
            Some(server) if server != *lost => self.connect_to(server, None),
            _ => self.exit = Some(Exit::Disconnect(reason)),
        }
    }

    /// Ends the session. Queued data is flushed where the connection is
    /// still open and released otherwise.
    async fn shutdown(mut self, exit: Exit) {
        self.rewrite.transfer = None;
        self.connecting = None;
        self.tracker.clear();
        if let Some(pending) = self.pending.take() {
            pending.peer.close(None).await;
        }
        if let Some(backend) = self.backend.take() {
            backend.peer.close(None).await;
        }
        match exit {
            Exit::Disconnect(reason) => {
                tracing::info!("Session {} disconnected: {reason}", self.id);
                self.client.close(Some(reason.to_packet().into())).await;
            }
            Exit::ClientGone => {
                tracing::info!("Session {} closed by the client", self.id);
                self.client.close(None).await;
            }
        }
    }
}
