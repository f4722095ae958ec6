mod common;

use common::*;
use meetup_backend::database::{GroupStatus, GroupStore};
use meetup_backend::error::AppError;
use meetup_backend::realtime::ChangeKind;

#[tokio::test]
async fn fifth_join_fills_group_and_fires_once() {
    let mut h = harness();
    let group_id = h.group_founded_by("founder").await;

    for i in 0..3 {
        let receipt = h
            .ledger
            .join(&group_id, &format!("u{}", i), mitte())
            .await
            .unwrap();
        assert!(!receipt.filled);
        assert_eq!(receipt.group.status, GroupStatus::Waiting);
    }

    let last = h.ledger.join(&group_id, "u3", mitte()).await.unwrap();
    assert!(last.filled);
    assert_eq!(last.group.current_count, 5);
    assert_eq!(last.group.status, GroupStatus::Full);

    assert_eq!(h.notifier.filled_count(&group_id), 1);
    assert_eq!(h.filled_rx.recv().await.as_deref(), Some(group_id.as_str()));
    assert!(h.filled_rx.try_recv().is_err());
}

#[tokio::test]
async fn join_on_full_group_is_rejected_without_increment() {
    let h = harness();
    let group_id = h.group_founded_by("founder").await;
    h.fill_with(&group_id, "m", 4).await;

    let err = h.ledger.join(&group_id, "late", mitte()).await.unwrap_err();
    assert!(matches!(err, AppError::GroupFull(_)));

    let group = h.store.get_group(&group_id).await.unwrap().unwrap();
    assert_eq!(group.current_count, 5);
    assert_eq!(h.notifier.filled_count(&group_id), 1);
}

#[tokio::test]
async fn concurrent_joins_never_exceed_capacity() {
    let h = harness();
    let group_id = h.group_founded_by("founder").await;

    let mut tasks = Vec::new();
    for i in 0..12 {
        let ledger = h.ledger.clone();
        let group_id = group_id.clone();
        tasks.push(tokio::spawn(async move {
            ledger.join(&group_id, &format!("racer-{}", i), mitte()).await
        }));
    }

    let mut joined = 0;
    let mut full = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => joined += 1,
            Err(AppError::GroupFull(_)) => full += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(joined, 4);
    assert_eq!(full, 8);
    let group = h.store.get_group(&group_id).await.unwrap().unwrap();
    assert_eq!(group.current_count, group.capacity);
    assert_eq!(h.store.list_members(&group_id).await.unwrap().len(), 5);
    assert_eq!(h.notifier.filled_count(&group_id), 1);
}

#[tokio::test]
async fn user_holds_at_most_one_active_membership() {
    let h = harness();
    let first = h.group_founded_by("alice").await;
    let second = h.group_founded_by("bob").await;
    assert_ne!(first, second);

    let err = h.ledger.join(&second, "alice", mitte()).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyMember(_)));

    let membership = h.store.active_membership("alice").await.unwrap().unwrap();
    assert_eq!(membership.group_id, first);
}

#[tokio::test]
async fn completed_group_releases_its_members() {
    let h = harness();
    let first = h.group_founded_by("alice").await;
    let second = h.group_founded_by("bob").await;

    h.store.mark_completed(&first).await;
    h.ledger.join(&second, "alice", mitte()).await.unwrap();
}

#[tokio::test]
async fn sole_member_leaving_cancels_waiting_group() {
    let h = harness();
    let group_id = h.group_founded_by("alice").await;

    let receipt = h.ledger.leave(&group_id, "alice").await.unwrap();
    assert!(receipt.cancelled);
    assert_eq!(receipt.group.status, GroupStatus::Cancelled);
    assert_eq!(receipt.group.current_count, 0);
    assert_eq!(h.notifier.cancelled_count(&group_id), 1);
}

#[tokio::test]
async fn leaving_confirmed_group_keeps_the_record() {
    let h = harness();
    let group_id = h.group_founded_by("founder").await;
    h.fill_with(&group_id, "m", 4).await;

    let venue = meetup_backend::database::Venue {
        name: "Kneipe am Eck".into(),
        address: None,
        latitude: Some(52.52),
        longitude: Some(13.40),
        place_id: Some("p1".into()),
    };
    h.store
        .assign_venue(&group_id, &venue, chrono::Utc::now())
        .await
        .unwrap()
        .unwrap();

    let receipt = h.ledger.leave(&group_id, "m-0").await.unwrap();
    assert!(!receipt.cancelled);
    assert_eq!(receipt.group.status, GroupStatus::Confirmed);
    assert_eq!(receipt.group.current_count, 4);
    assert_eq!(receipt.group.venue_name.as_deref(), Some("Kneipe am Eck"));

    let stored = h.store.get_group(&group_id).await.unwrap().unwrap();
    assert_eq!(stored.status, GroupStatus::Confirmed);
}

#[tokio::test]
async fn leaving_without_membership_is_not_found() {
    let h = harness();
    let group_id = h.group_founded_by("alice").await;

    let err = h.ledger.leave(&group_id, "mallory").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn join_and_leave_are_published_on_the_bus() {
    let h = harness();
    let group_id = h.group_founded_by("alice").await;
    let mut sub = h.bus.subscribe(&group_id);

    h.ledger.join(&group_id, "bob", mitte()).await.unwrap();
    h.ledger.leave(&group_id, "bob").await.unwrap();

    let kinds: Vec<_> = [
        sub.next().await.unwrap(),
        sub.next().await.unwrap(),
        sub.next().await.unwrap(),
        sub.next().await.unwrap(),
    ]
    .iter()
    .map(|e| e.kind)
    .collect();
    assert_eq!(
        kinds,
        vec![
            ChangeKind::Insert,
            ChangeKind::Update,
            ChangeKind::Delete,
            ChangeKind::Update
        ]
    );
}

#[tokio::test]
async fn heartbeat_requires_membership() {
    let h = harness();
    let group_id = h.group_founded_by("alice").await;

    assert!(h.ledger.heartbeat(&group_id, "alice").await.is_ok());
    let err = h.ledger.heartbeat(&group_id, "bob").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
