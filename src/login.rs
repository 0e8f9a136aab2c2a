//! Client side of the handshake: network settings negotiation and the
//! login packet.

use crate::{
    codec::{batch::PacketBatch, compression::CompressionSettings},
    collaborators::SessionId,
    disconnect::DisconnectReason,
    entity_id::{RuntimeEntityId, UniqueEntityId},
    link::Connection,
    protocol::{
        codec_for,
        packet::{Login, NetworkSettings, PlayStatus, RequestNetworkSettings},
        supported_versions, Packet,
    },
};
use anyhow::{anyhow, bail};

/// What a backend needs to log the player in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginData {
    pub session_id: SessionId,
    pub protocol_version: u32,
    /// Forwarded verbatim to every backend.
    pub login: Login,
    /// Ids the client should know itself by. When absent the first
    /// backend's ids are used.
    pub client_ids: Option<(RuntimeEntityId, UniqueEntityId)>,
}

/// Status telling a client with an unsupported version who is outdated.
fn version_status(version: i32) -> PlayStatus {
    let oldest = supported_versions().next().unwrap_or_default();
    let status = if i64::from(version) < i64::from(oldest) {
        PlayStatus::FAILED_CLIENT
    } else {
        PlayStatus::FAILED_SERVER
    };
    PlayStatus { status }
}

/// Negotiates network settings with a freshly connected client and
/// reads its login.
///
/// Clients on an unsupported version are told so and disconnected.
pub async fn accept_login(
    client: &mut Connection,
    session_id: SessionId,
    settings: CompressionSettings,
) -> anyhow::Result<LoginData> {
    let version = RequestNetworkSettings::try_from(client.recv_packet().await?)
        .map_err(|packet| anyhow!("expected network settings request, got {}", packet.name()))?
        .protocol_version;

    let Some(packet_codec) = u32::try_from(version).ok().and_then(codec_for) else {
        tracing::info!("Session {session_id} uses unsupported protocol version {version}");
        client
            .send_batch(
                PacketBatch::from_packets([
                    Packet::from(version_status(version)),
                    DisconnectReason::unsupported_version(version)
                        .to_packet()
                        .into(),
                ])
                .with_skip_queue(),
            )
            .await?;
        bail!("unsupported protocol version {version}");
    };
    client.codec_mut().set_packet_codec(packet_codec);

    client
        .send_packets([Packet::from(NetworkSettings {
            compression_threshold: settings.threshold,
            compression_algorithm: settings.algorithm.network_id(),
            client_throttle: false,
            client_throttle_threshold: 0,
            client_throttle_scalar: 0.0,
        })])
        .await?;
    let strategy = client
        .codec()
        .negotiated_strategy(settings.algorithm, settings.threshold.into());
    client.codec_mut().set_compression(strategy, settings.level);

    let login = Login::try_from(client.recv_packet().await?)
        .map_err(|packet| anyhow!("expected login, got {}", packet.name()))?;
    if login.protocol_version != version {
        bail!(
            "login announced protocol {} after requesting {version}",
            login.protocol_version
        );
    }
    tracing::debug!("Session {session_id} logged in with protocol {version}");

    Ok(LoginData {
        session_id,
        protocol_version: packet_codec.version().raw(),
        login,
        client_ids: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{compression::CompressionAlgorithm, BatchCodec},
        link::Link,
        protocol::{latest_codec, ProtocolVersion},
    };

    fn connections() -> (Connection, Connection) {
        let (a, b) = Link::pair();
        (
            Connection::new(a, BatchCodec::new(latest_codec())),
            Connection::new(b, BatchCodec::new(latest_codec())),
        )
    }

    #[tokio::test]
    async fn negotiates_and_reads_login() {
        let (mut proxy_side, mut client) = connections();
        let settings = CompressionSettings {
            algorithm: CompressionAlgorithm::Snappy,
            level: 6,
            threshold: 1,
        };
        let login = Login {
            protocol_version: 712,
            connection_request: b"chain".to_vec(),
        };

        let client_login = login.clone();
        let client_task = tokio::spawn(async move {
            client
                .send_packets([Packet::from(RequestNetworkSettings {
                    protocol_version: 712,
                })])
                .await
                .unwrap();
            let Packet::NetworkSettings(network) = client.recv_packet().await.unwrap() else {
                panic!("expected network settings");
            };
            let algorithm =
                CompressionAlgorithm::from_network_id(network.compression_algorithm).unwrap();
            let strategy = client
                .codec()
                .negotiated_strategy(algorithm, network.compression_threshold.into());
            client.codec_mut().set_compression(strategy, 6);
            client
                .send_packets([Packet::from(client_login)])
                .await
                .unwrap();
            client
        });

        let data = accept_login(&mut proxy_side, SessionId::new(7), settings)
            .await
            .unwrap();
        assert_eq!(data.login, login);
        assert_eq!(data.protocol_version, ProtocolVersion::V712.raw());
        client_task.await.unwrap();
    }

    #[tokio::test]
    async fn refuses_unknown_versions() {
        let (mut proxy_side, mut client) = connections();
        client
            .send_packets([Packet::from(RequestNetworkSettings {
                protocol_version: 1,
            })])
            .await
            .unwrap();
        assert!(
            accept_login(&mut proxy_side, SessionId::new(1), CompressionSettings::default())
                .await
                .is_err()
        );

        let batch = client.recv_batch().await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        let mut packets = batch.packets.into_iter();
        let mut status = packets.next().unwrap();
        assert_eq!(
            status.decode(latest_codec()).unwrap(),
            &Packet::from(PlayStatus {
                status: PlayStatus::FAILED_CLIENT
            })
        );
    }
}
