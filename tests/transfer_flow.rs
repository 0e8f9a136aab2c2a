mod common;

use bedrock_transfer_proxy::{
    bridge::{Action, BatchBridge, HandlerContext},
    codec::batch::PacketBatch,
    collaborators::NoopObserver,
    entity_tracker::EntityTracker,
    protocol::{
        latest_codec,
        packet::{ChunkRadiusUpdated, LevelEventGeneric, PlayStatus, SetLocalPlayerAsInitialized},
        Packet,
    },
    rewrite::{Direction, RewriteContext},
    transfer::{Transfer, TransferHandler, TransferPhase, TransferQueueLimits, TransferStep},
};
use common::{chunk, server, start_game};
use std::sync::Arc;

#[test]
fn new_backend_is_held_back_until_the_client_arrives() {
    let lobby = server("lobby", 3);
    let survival = server("survival", 7);
    let mut rewrite = RewriteContext::new(None);
    rewrite.adopt_backend(&start_game(1, 0), &lobby);
    let mut tracker = EntityTracker::new();
    let bridge = BatchBridge::new(Direction::Clientbound, Arc::new(NoopObserver));
    let mut handler = TransferHandler::new(
        Some(lobby.clone()),
        survival.clone(),
        TransferQueueLimits::default(),
    );

    // login status is swallowed, start game starts the transfer
    let mut actions = Vec::new();
    let mut login = PacketBatch::from_packets([
        Packet::from(PlayStatus {
            status: PlayStatus::LOGIN_SUCCESS,
        }),
        Packet::from(start_game(90, 0)),
    ]);
    bridge.process(
        &mut login,
        latest_codec(),
        &mut handler,
        &mut HandlerContext {
            rewrite: &mut rewrite,
            tracker: &mut tracker,
            actions: &mut actions,
        },
    );
    assert!(login.is_empty());
    assert!(handler.started());
    assert!(matches!(&actions[0], Action::TransferStarted(teardown) if teardown.is_empty()));
    assert!(matches!(
        &actions[1],
        Action::Reply(Packet::RequestChunkRadius(_))
    ));
    let transfer = rewrite.transfer.as_ref().unwrap();
    assert_eq!(transfer.fake_dimension, 1);
    assert!(transfer.dimension_locked());

    // the world arrives while the client is still changing dimension
    let mut actions = Vec::new();
    let mut world = PacketBatch::from_packets([
        Packet::from(chunk(&[0, 7])),
        Packet::from(LevelEventGeneric {
            event: 9800,
            data: Vec::new(),
        }),
        Packet::from(ChunkRadiusUpdated { radius: 16 }),
    ]);
    bridge.process(
        &mut world,
        latest_codec(),
        &mut handler,
        &mut HandlerContext {
            rewrite: &mut rewrite,
            tracker: &mut tracker,
            actions: &mut actions,
        },
    );
    assert!(actions.is_empty());
    assert_eq!(world.len(), 2);
    let mut transfer = rewrite.transfer.take().unwrap();
    transfer.queue.push_batch(world).unwrap();
    assert_eq!(transfer.queue.len(), 1);
    assert_eq!(transfer.queue.dropped(), 1);

    // the client reached the temporary dimension
    assert_eq!(
        transfer.on_dimension_change_success(),
        TransferStep::Phase1Completed
    );
    rewrite.dimension = transfer.target_dimension;
    let packets = transfer.phase1_packets(&rewrite);
    assert!(packets.iter().any(|packet| matches!(
        packet,
        Packet::ChangeDimension(change) if change.dimension == 0
    )));
    assert!(packets.iter().any(|packet| matches!(
        packet,
        Packet::NetworkChunkPublisherUpdate(update) if update.radius == 96
    )));

    let released = transfer.queue.release();
    assert_eq!(released.len(), 1);
    assert_eq!(
        released[0].packets[0].decoded(),
        Some(&Packet::from(chunk(&[0, 3])))
    );

    // and then the target
    assert_eq!(transfer.on_dimension_change_success(), TransferStep::Completed);
    assert_eq!(transfer.phase(), TransferPhase::Reset);
    assert_eq!(transfer.on_dimension_change_success(), TransferStep::Ignored);
    assert_eq!(
        Transfer::initialized_packet(&rewrite),
        Packet::from(SetLocalPlayerAsInitialized {
            runtime_entity_id: 90
        })
    );
}

#[test]
fn refused_login_fails_the_transfer() {
    let mut rewrite = RewriteContext::new(None);
    rewrite.adopt_backend(&start_game(1, 0), &server("lobby", 3));
    let mut tracker = EntityTracker::new();
    let bridge = BatchBridge::new(Direction::Clientbound, Arc::new(NoopObserver));
    let mut handler = TransferHandler::new(
        None,
        server("survival", 7),
        TransferQueueLimits::default(),
    );

    let mut actions = Vec::new();
    let mut batch = PacketBatch::from_packets([Packet::from(PlayStatus {
        status: PlayStatus::FAILED_SERVER,
    })]);
    bridge.process(
        &mut batch,
        latest_codec(),
        &mut handler,
        &mut HandlerContext {
            rewrite: &mut rewrite,
            tracker: &mut tracker,
            actions: &mut actions,
        },
    );
    assert!(batch.is_empty());
    assert!(!handler.started());
    assert!(rewrite.transfer.is_none());
    assert!(matches!(
        &actions[..],
        [Action::TransferFailed(message)] if message == "outdated server"
    ));
}
