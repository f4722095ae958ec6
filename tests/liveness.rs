mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::*;
use meetup_backend::database::{GroupStatus, GroupStore};
use meetup_backend::liveness::Reconciler;
use tokio::sync::mpsc;

fn reconciler(h: &Harness) -> Reconciler {
    Reconciler::new(h.ledger.clone(), h.config.liveness.inactivity_threshold())
}

#[tokio::test]
async fn stale_member_is_evicted_and_count_recomputed() {
    let h = harness();
    let group_id = h.group_founded_by("stale").await;
    h.fill_with(&group_id, "fresh", 2).await;

    let later = Utc::now() + Duration::minutes(6);
    for user in ["fresh-0", "fresh-1"] {
        h.store.touch_member(&group_id, user, later).await.unwrap();
    }
    assert_eq!(
        h.store.get_group(&group_id).await.unwrap().unwrap().current_count,
        3
    );

    let report = reconciler(&h).sweep_once(later).await.unwrap();
    assert_eq!(report.evicted, 1);
    assert!(report.drifted.is_empty());

    let group = h.store.get_group(&group_id).await.unwrap().unwrap();
    assert_eq!(group.current_count, 2);
    let members = h.store.list_members(&group_id).await.unwrap();
    assert!(members.iter().all(|m| m.user_id != "stale"));
}

#[tokio::test]
async fn drifted_count_is_corrected_from_member_rows() {
    let h = harness();
    let group_id = h.group_founded_by("stale").await;
    h.fill_with(&group_id, "fresh", 2).await;

    let later = Utc::now() + Duration::minutes(6);
    for user in ["fresh-0", "fresh-1"] {
        h.store.touch_member(&group_id, user, later).await.unwrap();
    }
    // 丢失了一次减一
    h.store.overwrite_count(&group_id, 4).await;

    let report = reconciler(&h).sweep_once(later).await.unwrap();
    assert_eq!(report.drifted, vec![group_id.clone()]);
    assert_eq!(report.recounted, vec![(group_id.clone(), 4, 2)]);
    assert_eq!(
        h.store.get_group(&group_id).await.unwrap().unwrap().current_count,
        2
    );
}

#[tokio::test]
async fn fresh_members_survive_the_sweep() {
    let h = harness();
    let group_id = h.group_founded_by("alice").await;

    let report = reconciler(&h)
        .sweep_once(Utc::now() + Duration::minutes(4))
        .await
        .unwrap();
    assert_eq!(report.evicted, 0);
    assert_eq!(h.store.list_members(&group_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn emptied_waiting_group_is_cancelled() {
    let h = harness();
    let group_id = h.group_founded_by("alice").await;

    let report = reconciler(&h)
        .sweep_once(Utc::now() + Duration::minutes(6))
        .await
        .unwrap();
    assert_eq!(report.cancelled, vec![group_id.clone()]);

    let group = h.store.get_group(&group_id).await.unwrap().unwrap();
    assert_eq!(group.status, GroupStatus::Cancelled);
    assert_eq!(group.current_count, 0);
    assert_eq!(h.notifier.cancelled_count(&group_id), 1);
}

#[tokio::test]
async fn full_groups_without_venue_are_requeued() {
    let mut h = harness();
    let group_id = h.group_founded_by("founder").await;
    h.fill_with(&group_id, "m", 4).await;
    // 满员时发出的信号
    assert_eq!(h.filled_rx.recv().await.as_deref(), Some(group_id.as_str()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reconciler = Arc::new(reconciler(&h).with_venue_retry(tx));

    let report = reconciler.sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report.venue_retries, 1);
    assert_eq!(rx.recv().await.as_deref(), Some(group_id.as_str()));
}

#[tokio::test]
async fn drift_without_evictions_is_healed() {
    let h = harness();
    let group_id = h.group_founded_by("alice").await;
    h.fill_with(&group_id, "fresh", 1).await;
    h.store.overwrite_count(&group_id, 4).await;

    let report = reconciler(&h)
        .sweep_once(Utc::now() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(report.evicted, 0);
    assert_eq!(report.drifted, vec![group_id.clone()]);
    assert_eq!(report.recounted, vec![(group_id.clone(), 4, 2)]);
    assert_eq!(
        h.store.get_group(&group_id).await.unwrap().unwrap().current_count,
        2
    );

    // 已经一致的群组不会再次出现在报告中
    let again = reconciler(&h)
        .sweep_once(Utc::now() + Duration::minutes(1))
        .await
        .unwrap();
    assert!(again.recounted.is_empty());
}

#[tokio::test]
async fn abandoned_full_group_is_cancelled_not_booked() {
    let mut h = harness();
    let group_id = h.group_founded_by("founder").await;
    h.fill_with(&group_id, "m", 4).await;
    assert_eq!(h.filled_rx.recv().await.as_deref(), Some(group_id.as_str()));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reconciler = reconciler(&h).with_venue_retry(tx);

    let report = reconciler
        .sweep_once(Utc::now() + Duration::minutes(6))
        .await
        .unwrap();
    assert_eq!(report.evicted, 5);
    assert_eq!(report.cancelled, vec![group_id.clone()]);
    assert_eq!(report.venue_retries, 0);
    assert!(rx.try_recv().is_err());

    let group = h.store.get_group(&group_id).await.unwrap().unwrap();
    assert_eq!(group.status, GroupStatus::Cancelled);
    assert!(!group.has_venue());
    assert_eq!(h.notifier.cancelled_count(&group_id), 1);
}

#[tokio::test]
async fn recount_writes_real_member_count_above_capacity() {
    let mut h = harness();
    let group_id = h.group_founded_by("founder").await;
    h.fill_with(&group_id, "m", 4).await;
    h.filled_rx.recv().await;
    h.store.force_member(&group_id, "extra", mitte()).await;

    let report = reconciler(&h).sweep_once(Utc::now()).await.unwrap();
    assert_eq!(report.recounted, vec![(group_id.clone(), 5, 6)]);
    assert_eq!(
        h.store.get_group(&group_id).await.unwrap().unwrap().current_count,
        6
    );
}
