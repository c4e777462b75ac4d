#![allow(non_snake_case)]

use super::*;
use crate::{
    error::FatalError,
    ports::{
        MockReceiver,
        MockSender,
    },
};
use btp_relay_types::{
    services::sender::TxStatus,
    BlockProof,
    ErrorCode,
    MessageProof,
    RevertCode,
};
use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use pretty_assertions::assert_eq;

const EVENT_SIZE: i64 = 10;

type Relays = Arc<SyncMutex<Vec<(RelayId, Bytes)>>>;

fn config() -> Config {
    Config::new(
        "btp://0x1.icon/cx0000000000000000000000000000000000000001"
            .parse()
            .unwrap(),
        "btp://0x61.bsc/0x0000000000000000000000000000000000000002"
            .parse()
            .unwrap(),
    )
}

fn message_proof(start_seq: i64, last_seq: i64) -> MessageProof {
    let events = usize::try_from((last_seq - start_seq + 1) * EVENT_SIZE).unwrap();
    MessageProof {
        start_seq,
        last_seq,
        payload: Bytes::from(vec![0; events]),
    }
}

/// Serializes the message proofs as `start-last` ranges.
fn describe(items: &[RelayMessageItem]) -> Bytes {
    let ranges: Vec<_> = items
        .iter()
        .filter_map(RelayMessageItem::as_message_proof)
        .map(|proof| format!("{}-{}", proof.start_seq, proof.last_seq))
        .collect();
    Bytes::from(ranges.join(","))
}

/// A receiver with events up to `last_event`, all emitted at height 100.
fn receiver(last_event: i64) -> MockReceiver {
    let mut receiver = MockReceiver::default();
    receiver
        .expect_build_block_updates()
        .returning(|_, _| Ok(Vec::new()));
    receiver.expect_height_for_seq().returning(|_| None);
    receiver
        .expect_build_block_proof()
        .returning(|_, _| Ok(None));
    receiver
        .expect_build_message_proof()
        .returning(move |status, limit| {
            let start_seq = status.rx_seq + 1;
            if start_seq > last_event {
                return Ok(None)
            }
            let last_seq = last_event.min(start_seq + (limit / EVENT_SIZE).max(1) - 1);
            Ok(Some(message_proof(start_seq, last_seq)))
        });
    receiver
        .expect_build_relay_message()
        .returning(|items| Ok(describe(items)));
    receiver
}

fn sender(limit: usize, relays: Relays) -> MockSender {
    let mut sender = MockSender::default();
    sender.expect_tx_size_limit().return_const(limit);
    sender.expect_margin_for_limit().return_const(0i64);
    sender.expect_relay().returning(move |id, message| {
        relays.lock().push((id, message.clone()));
        Ok(())
    });
    sender
        .expect_result()
        .returning(|_| Ok(TxStatus::Pending));
    sender
}

fn entry(id: u64, target: BmcLinkStatus, items: Vec<RelayMessageItem>) -> InFlight {
    let mut entry = InFlight::new(
        RelayId::new(id),
        target,
        items,
        Bytes::from_static(b"message"),
    );
    entry.mark_submitted(Instant::now());
    entry
}

fn relayed_ranges(relays: &Relays) -> Vec<Bytes> {
    relays
        .lock()
        .iter()
        .map(|(_, message)| message.clone())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn relay__splits_events_into_segments_of_the_limit() {
    // given
    let relays = Relays::default();
    let link = Link::new(
        config(),
        receiver(5),
        sender(3 * EVENT_SIZE as usize, relays.clone()),
    )
    .unwrap();
    let mut state = link.inner.state.write().await;
    state.reset(BmcLinkStatus::new(100, 0));
    state
        .receive_statuses
        .push(ReceiveStatus::new(100, 5))
        .unwrap();

    // when
    link.relay(&mut state).await.unwrap();

    // then
    assert_eq!(
        relayed_ranges(&relays),
        vec![Bytes::from("1-3"), Bytes::from("4-5")]
    );
    let targets: Vec<_> = state.window.iter().map(|e| e.target.clone()).collect();
    assert_eq!(
        targets,
        vec![BmcLinkStatus::new(100, 3), BmcLinkStatus::new(100, 5)]
    );
    assert_eq!(state.shadow, BmcLinkStatus::new(100, 5));
}

#[tokio::test(start_paused = true)]
async fn relay__max_size_tx_keeps_the_open_segment() {
    // given
    let relays = Relays::default();
    let mut config = config();
    config.max_size_tx = true;
    let link = Link::new(
        config,
        receiver(5),
        sender(3 * EVENT_SIZE as usize, relays.clone()),
    )
    .unwrap();
    let mut state = link.inner.state.write().await;
    state.reset(BmcLinkStatus::new(100, 0));
    state
        .receive_statuses
        .push(ReceiveStatus::new(100, 5))
        .unwrap();

    // when
    link.relay(&mut state).await.unwrap();

    // then
    assert_eq!(relayed_ranges(&relays), vec![Bytes::from("1-3")]);
    assert_eq!(state.accumulator.open_segment().size(), 2 * EVENT_SIZE);
}

#[tokio::test(start_paused = true)]
async fn relay__events_of_unverified_block_wait() {
    let relays = Relays::default();
    let link = Link::new(config(), receiver(5), sender(1000, relays.clone())).unwrap();
    let mut state = link.inner.state.write().await;
    state.reset(BmcLinkStatus::new(99, 0));
    state
        .receive_statuses
        .push(ReceiveStatus::new(100, 5))
        .unwrap();

    link.relay(&mut state).await.unwrap();

    assert!(relays.lock().is_empty());
    assert!(state.window.is_empty());
}

#[tokio::test(start_paused = true)]
async fn relay__failed_submission_holds_later_entries() {
    // given
    let mut sender = MockSender::default();
    sender
        .expect_tx_size_limit()
        .return_const(3 * EVENT_SIZE as usize);
    sender.expect_margin_for_limit().return_const(0i64);
    sender
        .expect_relay()
        .times(1)
        .returning(|_, _| Err(anyhow::anyhow!("connection refused")));
    let link = Link::new(config(), receiver(5), sender).unwrap();
    let mut state = link.inner.state.write().await;
    state.reset(BmcLinkStatus::new(100, 0));
    state
        .receive_statuses
        .push(ReceiveStatus::new(100, 5))
        .unwrap();

    // when
    link.relay(&mut state).await.unwrap();

    // then
    assert_eq!(state.window.len(), 2);
    assert_eq!(state.window.unsubmitted().len(), 2);
}

#[tokio::test]
async fn on_result__already_verified_discards_earlier_entries() {
    // given
    let mut sender = MockSender::default();
    sender.expect_tx_size_limit().return_const(1000usize);
    sender.expect_margin_for_limit().return_const(0i64);
    sender.expect_relay().never();
    let link = Link::new(config(), MockReceiver::default(), sender).unwrap();
    {
        let mut state = link.inner.state.write().await;
        state.reset(BmcLinkStatus::new(100, 20));
        for (id, rx_seq) in [(5, 30), (6, 40), (7, 50), (8, 60)] {
            let proof = message_proof(rx_seq - 9, rx_seq);
            state.window.submit(entry(
                id,
                BmcLinkStatus::new(100, rx_seq),
                vec![proof.into()],
            ));
        }
    }
    let result = RelayResult {
        id: RelayId::new(7),
        err: Some(RevertCode::BMVAlreadyVerified.code()),
    };

    // when
    link.on_result(result, None).await.unwrap();

    // then
    let state = link.inner.state.read().await;
    let ids: Vec<_> = state.window.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![RelayId::new(8)]);
}

#[tokio::test(start_paused = true)]
async fn relay__builds_on_the_target_of_verified_entries() {
    // given
    let relays = Relays::default();
    let link = Link::new(config(), receiver(5), sender(1000, relays.clone())).unwrap();
    let mut state = link.inner.state.write().await;
    state.reset(BmcLinkStatus::new(90, 0));
    state
        .receive_statuses
        .push(ReceiveStatus::new(100, 5))
        .unwrap();
    state.window.submit(entry(
        1,
        BmcLinkStatus::new(100, 3),
        vec![message_proof(1, 3).into()],
    ));
    state.rebase();
    state.discard_verified(RelayId::new(1));

    // when
    link.relay(&mut state).await.unwrap();

    // then
    assert_eq!(relayed_ranges(&relays), vec![Bytes::from("4-5")]);
    let targets: Vec<_> = state.window.iter().map(|e| e.target.clone()).collect();
    assert_eq!(targets, vec![BmcLinkStatus::new(100, 5)]);
}

#[tokio::test]
async fn on_result__already_verified_for_discarded_entry_is_a_no_op() {
    let mut sender = MockSender::default();
    sender.expect_tx_size_limit().return_const(1000usize);
    sender.expect_margin_for_limit().return_const(0i64);
    let link = Link::new(config(), MockReceiver::default(), sender).unwrap();
    {
        let mut state = link.inner.state.write().await;
        state.reset(BmcLinkStatus::new(100, 20));
        state.window.submit(entry(8, BmcLinkStatus::new(100, 30), Vec::new()));
    }
    let result = RelayResult {
        id: RelayId::new(7),
        err: Some(RevertCode::BMVAlreadyVerified.code()),
    };

    link.on_result(result, None).await.unwrap();
    link.on_result(result, None).await.unwrap();

    assert_eq!(link.inner.state.read().await.window.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn on_result__old_witness_rebuilds_the_block_proof_against_destination() {
    // given
    const LIMIT: usize = 100;
    let mut receiver = MockReceiver::default();
    receiver
        .expect_build_block_proof()
        .withf(|status, height| status.height() == 150 && *height == 200)
        .times(1)
        .returning(|_, height| {
            Ok(Some(BlockProof {
                proof_height: height,
                payload: Bytes::from_static(b"fresh witness"),
            }))
        });
    receiver
        .expect_build_relay_message()
        .returning(|_| Ok(Bytes::from_static(b"rebuilt")));
    let relays = Relays::default();
    let mut sender = sender(LIMIT, relays.clone());
    sender
        .expect_get_status()
        .returning(|| Ok(BmcLinkStatus::new(150, 10)));
    let link = Link::new(config(), receiver, sender).unwrap();
    {
        let mut state = link.inner.state.write().await;
        state.reset(BmcLinkStatus::new(140, 10));
        let proof = BlockProof {
            proof_height: 200,
            payload: Bytes::from_static(b"old witness"),
        };
        state.window.submit(entry(
            9,
            BmcLinkStatus::new(200, 12),
            vec![proof.into(), message_proof(11, 12).into()],
        ));
    }
    let result = RelayResult {
        id: RelayId::new(9),
        err: Some(RevertCode::BMVRevertInvalidBlockWitnessOld.code()),
    };

    // when
    link.on_result(result, None).await.unwrap();

    // then
    let state = link.inner.state.read().await;
    let entry = state.window.find(RelayId::new(9)).unwrap();
    let (_, proof) = entry.block_proof().unwrap();
    assert_eq!(proof.payload, Bytes::from_static(b"fresh witness"));
    assert_eq!(entry.message, Bytes::from_static(b"rebuilt"));
    assert_eq!(entry.attempt, 2);
    assert!(entry.size() <= LIMIT as i64);
    assert_eq!(
        relayed_ranges(&relays),
        vec![Bytes::from_static(b"rebuilt")]
    );
    assert_eq!(state.confirmed, BmcLinkStatus::new(150, 10));
}

/// A link holding entry 9, a block proof at height 200 and the events 11-12,
/// whose block proofs are rebuilt by `block_proof`.
async fn link_with_stale_witness(
    limit: usize,
    relays: Relays,
    block_proof: impl Fn() -> Option<BlockProof> + Send + 'static,
) -> Link<MockReceiver, MockSender> {
    let mut receiver = MockReceiver::default();
    receiver
        .expect_build_block_proof()
        .times(1)
        .returning(move |_, _| Ok(block_proof()));
    receiver
        .expect_build_block_updates()
        .returning(|_, _| Ok(Vec::new()));
    receiver.expect_height_for_seq().returning(|_| None);
    let mut sender = sender(limit, relays);
    sender
        .expect_get_status()
        .times(2)
        .returning(|| Ok(BmcLinkStatus::new(150, 10)));
    let link = Link::new(config(), receiver, sender).unwrap();
    {
        let mut state = link.inner.state.write().await;
        state.reset(BmcLinkStatus::new(140, 10));
        let proof = BlockProof {
            proof_height: 200,
            payload: Bytes::from_static(b"old witness"),
        };
        state.window.submit(entry(
            9,
            BmcLinkStatus::new(200, 12),
            vec![proof.into(), message_proof(11, 12).into()],
        ));
        state.rebase();
    }
    link
}

#[tokio::test(start_paused = true)]
async fn on_result__old_witness_rebuilt_too_large_supersedes_the_entry() {
    // given
    let relays = Relays::default();
    let link = link_with_stale_witness(60, relays.clone(), || {
        Some(BlockProof {
            proof_height: 200,
            payload: Bytes::from(vec![0; 55]),
        })
    })
    .await;
    let result = RelayResult {
        id: RelayId::new(9),
        err: Some(RevertCode::BMVRevertInvalidBlockWitnessOld.code()),
    };

    // when
    link.on_result(result, None).await.unwrap();

    // then
    let state = link.inner.state.read().await;
    assert!(state.window.is_empty());
    assert!(relays.lock().is_empty());
    assert_eq!(state.confirmed, BmcLinkStatus::new(150, 10));
    assert_eq!(state.shadow, BmcLinkStatus::new(150, 10));
}

#[tokio::test(start_paused = true)]
async fn on_result__old_witness_without_new_block_proof_supersedes_the_entry() {
    // given
    let relays = Relays::default();
    let link = link_with_stale_witness(1000, relays.clone(), || None).await;
    let result = RelayResult {
        id: RelayId::new(9),
        err: Some(RevertCode::BMVRevertInvalidBlockWitnessOld.code()),
    };

    // when
    link.on_result(result, None).await.unwrap();

    // then
    let state = link.inner.state.read().await;
    assert!(!state.window.contains(RelayId::new(9)));
    assert!(relays.lock().is_empty());
}

#[tokio::test]
async fn on_result__unreadable_destination_leaves_the_entry_unsubmitted() {
    // given
    let mut sender = MockSender::default();
    sender.expect_tx_size_limit().return_const(1000usize);
    sender.expect_margin_for_limit().return_const(0i64);
    sender
        .expect_get_status()
        .times(1)
        .returning(|| Err(anyhow::anyhow!("destination unreachable")));
    sender.expect_relay().never();
    let link = Link::new(config(), MockReceiver::default(), sender).unwrap();
    {
        let mut state = link.inner.state.write().await;
        state.reset(BmcLinkStatus::new(100, 0));
        state.window.submit(entry(
            9,
            BmcLinkStatus::new(100, 3),
            vec![message_proof(1, 3).into()],
        ));
    }
    let result = RelayResult {
        id: RelayId::new(9),
        err: Some(RevertCode::BMVNotVerifiable.code()),
    };

    // when
    let outcome = link.on_result(result, None).await;

    // then
    let err = outcome.unwrap_err();
    assert!(!err.is_fatal());
    let state = link.inner.state.read().await;
    let entry = state.window.find(RelayId::new(9)).unwrap();
    assert!(!entry.is_submitted());
    assert_eq!(state.window.unsubmitted(), vec![RelayId::new(9)]);
    assert_eq!(state.confirmed, BmcLinkStatus::new(100, 0));
}

#[tokio::test(start_paused = true)]
async fn on_result__not_verifiable_supersedes_the_entry_and_later_ones() {
    // given
    let relays = Relays::default();
    let mut sender = sender(3 * EVENT_SIZE as usize, relays.clone());
    sender
        .expect_get_status()
        .returning(|| Ok(BmcLinkStatus::new(100, 0)));
    let link = Link::new(config(), receiver(5), sender).unwrap();
    {
        let mut state = link.inner.state.write().await;
        state.reset(BmcLinkStatus::new(100, 0));
        state
            .receive_statuses
            .push(ReceiveStatus::new(100, 5))
            .unwrap();
        state.window.submit(entry(
            1,
            BmcLinkStatus::new(100, 3),
            vec![message_proof(1, 3).into()],
        ));
        state.window.submit(entry(
            2,
            BmcLinkStatus::new(100, 5),
            vec![message_proof(4, 5).into()],
        ));
        state.rebase();
    }
    let result = RelayResult {
        id: RelayId::new(1),
        err: Some(RevertCode::BMVNotVerifiable.code()),
    };

    // when
    link.on_result(result, None).await.unwrap();

    // then
    let state = link.inner.state.read().await;
    assert!(!state.window.contains(RelayId::new(1)));
    assert!(!state.window.contains(RelayId::new(2)));
    assert_eq!(state.window.len(), 2);
    assert_eq!(
        relayed_ranges(&relays),
        vec![Bytes::from("1-3"), Bytes::from("4-5")]
    );
}

#[tokio::test]
async fn on_result__unknown_verifier_state_is_fatal() {
    let mut sender = MockSender::default();
    sender.expect_tx_size_limit().return_const(1000usize);
    sender.expect_margin_for_limit().return_const(0i64);
    let link = Link::new(config(), MockReceiver::default(), sender).unwrap();
    let result = RelayResult {
        id: RelayId::new(3),
        err: Some(RevertCode::BMVUnknown.code()),
    };

    let err = link.on_result(result, None).await.unwrap_err();

    assert!(err.is_fatal());
    assert!(matches!(
        err,
        Error::Fatal(FatalError::UnknownVerifierState { .. })
    ));
}

#[tokio::test]
async fn on_result__result_of_a_previous_attempt_is_ignored() {
    let mut sender = MockSender::default();
    sender.expect_tx_size_limit().return_const(1000usize);
    sender.expect_margin_for_limit().return_const(0i64);
    let link = Link::new(config(), MockReceiver::default(), sender).unwrap();
    {
        let mut state = link.inner.state.write().await;
        let mut entry = entry(4, BmcLinkStatus::new(100, 30), Vec::new());
        entry.mark_submitted(Instant::now());
        state.window.submit(entry);
    }
    let result = RelayResult {
        id: RelayId::new(4),
        err: Some(ErrorCode::new(99)),
    };

    link.on_result(result, Some(1)).await.unwrap();

    assert!(link.on_result(result, Some(2)).await.is_err());
}

#[tokio::test]
async fn relay__serialization_failure_is_fatal() {
    // given
    let mut receiver = MockReceiver::default();
    receiver
        .expect_build_block_updates()
        .returning(|_, _| Ok(Vec::new()));
    receiver.expect_height_for_seq().returning(|_| None);
    receiver
        .expect_build_block_proof()
        .returning(|_, _| Ok(None));
    receiver
        .expect_build_message_proof()
        .returning(|status, _| {
            let start_seq = status.rx_seq + 1;
            Ok((start_seq == 1).then(|| message_proof(1, 2)))
        });
    receiver
        .expect_build_relay_message()
        .returning(|_| Err(anyhow::anyhow!("unsupported item")));
    let relays = Relays::default();
    let link = Link::new(config(), receiver, sender(1000, relays.clone())).unwrap();
    let mut state = link.inner.state.write().await;
    state.reset(BmcLinkStatus::new(100, 0));
    state
        .receive_statuses
        .push(ReceiveStatus::new(100, 2))
        .unwrap();

    // when
    let result = link.relay(&mut state).await;

    // then
    let err = result.unwrap_err();
    assert!(matches!(err, Error::Construction(_)));
    assert!(err.is_fatal());
    assert!(relays.lock().is_empty());
    assert!(state.window.is_empty());
}

#[test]
fn new__rejects_limit_without_room() {
    let mut sender = MockSender::default();
    sender.expect_tx_size_limit().return_const(64usize);
    sender.expect_margin_for_limit().return_const(64i64);

    let result = Link::new(config(), MockReceiver::default(), sender);

    assert!(matches!(result, Err(Error::InvalidSizeLimit { .. })));
}

#[tokio::test]
async fn run__second_call_is_rejected() {
    // given
    let mut receiver = MockReceiver::default();
    receiver
        .expect_start()
        .returning(|_| Ok(Box::pin(futures::stream::pending::<ReceiveStatus>())));
    receiver.expect_stop().return_const(());
    let mut sender = MockSender::default();
    sender.expect_tx_size_limit().return_const(1000usize);
    sender.expect_margin_for_limit().return_const(0i64);
    sender
        .expect_get_status()
        .returning(|| Ok(BmcLinkStatus::new(1, 0)));
    sender
        .expect_start()
        .returning(|| Ok(Box::pin(futures::stream::pending::<SenderMessage>())));
    sender.expect_stop().return_const(());
    let link = Link::new(config(), receiver, sender).unwrap();
    let running = tokio::spawn({
        let link = link.clone();
        async move { link.run().await }
    });
    tokio::task::yield_now().await;

    // when
    let second = link.run().await;

    // then
    assert!(matches!(second, Err(Error::AlreadyStarted)));
    link.stop();
    running.await.unwrap().unwrap();
}
