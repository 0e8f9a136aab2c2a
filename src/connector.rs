//! Backend side of the handshake.

use crate::{
    codec::{compression::CompressionAlgorithm, BatchCodec},
    collaborators::{BackendConnector, Observer, ServerInfo},
    link::{Connection, Link},
    login::LoginData,
    protocol::{
        codec_for,
        packet::{NetworkSettings, RequestNetworkSettings},
        Packet,
    },
};
use anyhow::{anyhow, bail, Context};
use futures::future::BoxFuture;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpStream, time::timeout};

/// Time allowed for connecting and negotiating with a backend.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Performs network settings negotiation on a connection to a backend
/// and forwards the player's login.
pub async fn negotiate_backend(
    backend: &mut Connection,
    login: &LoginData,
    compression_level: u32,
) -> anyhow::Result<()> {
    let packet_codec = codec_for(login.protocol_version)
        .ok_or_else(|| anyhow!("unsupported protocol version {}", login.protocol_version))?;
    backend.codec_mut().set_packet_codec(packet_codec);

    backend
        .send_packets([Packet::from(RequestNetworkSettings {
            protocol_version: login.protocol_version as i32,
        })])
        .await?;
    let settings: NetworkSettings = match backend.recv_packet().await? {
        Packet::NetworkSettings(settings) => settings,
        Packet::Disconnect(disconnect) => bail!("refused: {}", disconnect.message),
        packet => bail!("expected network settings, got {}", packet.name()),
    };
    let algorithm = CompressionAlgorithm::from_network_id(settings.compression_algorithm)
        .ok_or_else(|| {
            anyhow!(
                "unknown compression algorithm {}",
                settings.compression_algorithm
            )
        })?;
    let strategy = backend
        .codec()
        .negotiated_strategy(algorithm, settings.compression_threshold.into());
    backend
        .codec_mut()
        .set_compression(strategy, compression_level);

    backend
        .send_packets([Packet::from(login.login.clone())])
        .await
}

/// Connects to backends over length-prefixed TCP.
pub struct TcpConnector {
    compression_level: u32,
    observer: Arc<dyn Observer>,
}

impl TcpConnector {
    pub fn new(compression_level: u32, observer: Arc<dyn Observer>) -> Self {
        Self {
            compression_level,
            observer,
        }
    }
}

impl BackendConnector for TcpConnector {
    fn connect(
        &self,
        server: &ServerInfo,
        login: &LoginData,
    ) -> BoxFuture<'static, anyhow::Result<Connection>> {
        let server = server.clone();
        let login = login.clone();
        let compression_level = self.compression_level;
        let observer = self.observer.clone();
        Box::pin(async move {
            let connect = async {
                let stream = TcpStream::connect(server.address)
                    .await
                    .with_context(|| format!("failed to connect to {}", server.name))?;
                let packet_codec = codec_for(login.protocol_version)
                    .ok_or_else(|| anyhow!("unsupported protocol version"))?;
                let mut backend = Connection::new(
                    Link::tcp(stream)?,
                    BatchCodec::new(packet_codec).with_observer(observer),
                );
                negotiate_backend(&mut backend, &login, compression_level).await?;
                tracing::info!(
                    "Connected session {} to backend server {}",
                    login.session_id,
                    server.name
                );
                Ok::<_, anyhow::Error>(backend)
            };
            timeout(CONNECT_TIMEOUT, connect)
                .await
                .map_err(|_| anyhow!("timed out connecting to {}", server.name))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collaborators::SessionId,
        protocol::{latest_codec, packet::Login},
    };

    #[tokio::test]
    async fn forwards_login_after_negotiation() {
        let (proxy_link, backend_link) = Link::pair();
        let mut proxy_side = Connection::new(proxy_link, BatchCodec::new(latest_codec()));
        let mut backend = Connection::new(backend_link, BatchCodec::new(latest_codec()));
        let login = LoginData {
            session_id: SessionId::new(1),
            protocol_version: 712,
            login: Login {
                protocol_version: 712,
                connection_request: b"chain".to_vec(),
            },
            client_ids: None,
        };

        let backend_task = tokio::spawn(async move {
            let request = backend.recv_packet().await.unwrap();
            assert_eq!(
                request,
                Packet::from(RequestNetworkSettings {
                    protocol_version: 712
                })
            );
            backend
                .send_packets([Packet::from(NetworkSettings {
                    compression_threshold: 0,
                    compression_algorithm: CompressionAlgorithm::Zlib.network_id(),
                    client_throttle: false,
                    client_throttle_threshold: 0,
                    client_throttle_scalar: 0.0,
                })])
                .await
                .unwrap();
            let strategy = backend
                .codec()
                .negotiated_strategy(CompressionAlgorithm::Zlib, 0);
            backend.codec_mut().set_compression(strategy, 6);
            backend.recv_packet().await.unwrap()
        });

        negotiate_backend(&mut proxy_side, &login, 6).await.unwrap();
        assert_eq!(backend_task.await.unwrap(), Packet::from(login.login));
    }
}
