#![allow(non_snake_case)]

use super::*;
use btp_relay_types::MessageProof;
use proptest::prelude::*;

fn entry(id: u64, height: i64, rx_seq: i64) -> InFlight {
    let proof = MessageProof {
        start_seq: rx_seq,
        last_seq: rx_seq,
        payload: Bytes::from_static(b"proof"),
    };
    InFlight::new(
        RelayId::new(id),
        BmcLinkStatus::new(height, rx_seq),
        vec![proof.into()],
        Bytes::from_static(b"message"),
    )
}

fn window(entries: impl IntoIterator<Item = InFlight>) -> DeliveryWindow {
    let mut window = DeliveryWindow::new();
    for entry in entries {
        window.submit(entry);
    }
    window
}

fn ids(entries: &[InFlight]) -> Vec<u64> {
    entries.iter().map(|entry| entry.id.into()).collect()
}

#[test]
fn confirm__removes_reached_prefix() {
    // given
    let mut window = window([entry(1, 100, 3), entry(2, 100, 5), entry(3, 110, 8)]);

    // when
    let confirmed = window.confirm(&BmcLinkStatus::new(100, 5)).unwrap();

    // then
    assert_eq!(ids(&confirmed), vec![1, 2]);
    assert_eq!(window.len(), 1);
    assert!(window.contains(RelayId::new(3)));
}

#[test]
fn confirm__reached_entry_after_unreached_one_is_an_error() {
    // given
    let mut window = window([entry(1, 110, 3), entry(2, 100, 5)]);

    // when
    let result = window.confirm(&BmcLinkStatus::new(100, 5));

    // then
    assert!(matches!(result, Err(Error::WindowOrder { id, .. }) if id == RelayId::new(2)));
    assert_eq!(window.len(), 2);
}

#[test]
fn discard_through__removes_earlier_entries() {
    let mut window = window([entry(1, 100, 3), entry(7, 100, 50), entry(8, 100, 60)]);

    let discarded = window.discard_through(RelayId::new(7));

    assert_eq!(ids(&discarded), vec![1, 7]);
    assert_eq!(window.iter().map(|e| e.id).collect::<Vec<_>>(), vec![RelayId::new(8)]);
}

#[test]
fn discard_through__unknown_id_is_a_no_op() {
    let mut window = window([entry(1, 100, 3)]);

    assert!(window.discard_through(RelayId::new(7)).is_empty());
    assert_eq!(window.len(), 1);
}

#[test]
fn discard_from__removes_later_entries() {
    let mut window = window([entry(1, 100, 3), entry(2, 100, 4), entry(3, 100, 5)]);

    let discarded = window.discard_from(RelayId::new(2));

    assert_eq!(ids(&discarded), vec![2, 3]);
    assert_eq!(window.last_target(), Some(&BmcLinkStatus::new(100, 3)));
}

#[test]
fn discard__removes_only_the_entry() {
    let mut window = window([entry(1, 100, 3), entry(2, 100, 4), entry(3, 100, 5)]);

    let discarded = window.discard(RelayId::new(2));

    assert_eq!(discarded.map(|e| e.id), Some(RelayId::new(2)));
    assert_eq!(window.len(), 2);
}

#[test]
fn unsubmitted__lists_entries_in_window_order() {
    // given
    let mut window = window([entry(1, 100, 3), entry(2, 100, 4), entry(3, 100, 5)]);
    let now = Instant::now();
    for entry in window.entries.iter_mut() {
        entry.mark_submitted(now);
    }

    // when
    window.find_mut(RelayId::new(3)).unwrap().clear_submission();
    window.find_mut(RelayId::new(1)).unwrap().clear_submission();

    // then
    assert_eq!(window.unsubmitted(), vec![RelayId::new(1), RelayId::new(3)]);
}

#[test]
fn mark_submitted__counts_attempts() {
    let mut entry = entry(1, 100, 3);

    assert_eq!(entry.mark_submitted(Instant::now()), 1);
    entry.clear_submission();
    assert!(!entry.is_submitted());
    assert_eq!(entry.mark_submitted(Instant::now()), 2);
    assert_eq!(entry.summary().attempt, 2);
}

#[test]
fn next_id__skips_ids_in_use() {
    let window = window([entry(1, 100, 3)]);
    let mut rng = rand::thread_rng();

    let id = window.next_id(&mut rng);

    assert!(!window.contains(id));
}

proptest! {
    #[test]
    fn confirm__only_removes_reached_prefix(
        steps in prop::collection::vec((0i64..3, 0i64..3), 1..30),
        confirmed_height in 0i64..60,
        confirmed_seq in 0i64..60,
    ) {
        // given
        let mut height = 0;
        let mut rx_seq = 0;
        let mut window = DeliveryWindow::new();
        for (id, (dh, ds)) in steps.into_iter().enumerate() {
            height += dh;
            rx_seq += ds;
            window.submit(entry(id as u64, height, rx_seq));
        }
        let before: Vec<_> = window.iter().map(|e| e.target.clone()).collect();
        let status = BmcLinkStatus::new(confirmed_height, confirmed_seq);

        // when
        let confirmed = window.confirm(&status).unwrap();

        // then
        prop_assert!(confirmed.iter().all(|e| e.target.is_reached_by(&status)));
        prop_assert!(window.iter().all(|e| !e.target.is_reached_by(&status)));
        let after: Vec<_> = confirmed.iter().chain(window.iter()).map(|e| e.target.clone()).collect();
        prop_assert_eq!(before, after);
    }
}
