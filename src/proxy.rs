//! Accepts client connections and runs a session for each.

use crate::{
    codec::{compression::CompressionSettings, BatchCodec},
    collaborators::{ServerInfo, SessionId},
    disconnect::DisconnectReason,
    link::{Connection, Link},
    login::accept_login,
    protocol::latest_codec,
    session::{Session, SessionHandle, SessionServices},
};
use ahash::AHashMap;
use anyhow::Context;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread,
    time::Duration,
};
use tokio::{
    net::{TcpListener, TcpStream},
    runtime,
    task::LocalSet,
    time::timeout,
};

/// Time a client gets to finish network settings and login.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handles of the sessions currently running.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<AHashMap<SessionId, SessionHandle>>>,
}

impl SessionRegistry {
    fn lock(&self) -> std::sync::MutexGuard<'_, AHashMap<SessionId, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, handle: SessionHandle) {
        self.lock().insert(handle.id(), handle);
    }

    fn remove(&self, id: SessionId) {
        self.lock().remove(&id);
    }

    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.lock().get(&id).cloned()
    }

    pub fn handles(&self) -> Vec<SessionHandle> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Moves a session to another backend. Returns `false` if the
    /// session is gone.
    pub fn transfer(&self, id: SessionId, server: ServerInfo) -> bool {
        self.get(id).is_some_and(|handle| handle.transfer(server))
    }

    pub fn disconnect_all(&self, reason: &DisconnectReason) {
        for handle in self.handles() {
            handle.disconnect(reason.clone());
        }
    }
}

/// The client-facing listener.
pub struct Proxy {
    listener: TcpListener,
    services: SessionServices,
    compression: CompressionSettings,
    initial_server: ServerInfo,
    registry: SessionRegistry,
    next_id: AtomicU64,
}

impl Proxy {
    pub async fn bind(
        address: SocketAddr,
        services: SessionServices,
        compression: CompressionSettings,
        initial_server: ServerInfo,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("failed to bind {address}"))?;
        Ok(Self {
            listener,
            services,
            compression,
            initial_server,
            registry: SessionRegistry::default(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> SessionRegistry {
        self.registry.clone()
    }

    /// Accepts clients until the listener fails.
    pub async fn run(&self) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await.context("listener closed")?;
            let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            tracing::info!("Accepted connection {id} from {peer}");

            let services = self.services.clone();
            let compression = self.compression;
            let initial_server = self.initial_server.clone();
            let registry = self.registry.clone();
            let runtime = runtime::Handle::current();
            thread::spawn(move || {
                let local_set = LocalSet::new();
                local_set.spawn_local(async move {
                    if let Err(e) = drive_connection(
                        stream,
                        id,
                        services,
                        compression,
                        initial_server,
                        &registry,
                    )
                    .await
                    {
                        tracing::info!("Connection {id} lost: {e:?}");
                    }
                });
                runtime.block_on(local_set);
            });
        }
    }
}

async fn drive_connection(
    stream: TcpStream,
    id: SessionId,
    services: SessionServices,
    compression: CompressionSettings,
    initial_server: ServerInfo,
    registry: &SessionRegistry,
) -> anyhow::Result<()> {
    let mut client = Connection::new(
        Link::tcp(stream)?,
        BatchCodec::new(latest_codec()).with_observer(services.observer.clone()),
    );
    let login = timeout(LOGIN_TIMEOUT, accept_login(&mut client, id, compression))
        .await
        .context("login timed out")??;

    let (session, handle) = Session::new(client, login, services);
    registry.insert(handle);
    session.run(initial_server).await;
    registry.remove(id);
    Ok(())
}
