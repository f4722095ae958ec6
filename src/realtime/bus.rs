use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::database::{Group, Participant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Groups,
    GroupMembers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// 订阅端丢失了事件，需要整体重新拉取
    Resync,
}

/// 变更事件
///
/// 事件只是"需要重新拉取"的信号，payload 可能过期或不完整，
/// 订阅方不能把它当作权威状态。事件之间不保证顺序，可能重复。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub group_id: String,
    pub table: Table,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    pub emitted_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn group(kind: ChangeKind, group: &Group) -> Self {
        Self {
            group_id: group.group_id.clone(),
            table: Table::Groups,
            kind,
            user_id: None,
            payload: serde_json::to_value(group).ok(),
            emitted_at: Utc::now(),
        }
    }

    pub fn member(kind: ChangeKind, participant: &Participant) -> Self {
        Self {
            group_id: participant.group_id.clone(),
            table: Table::GroupMembers,
            kind,
            user_id: Some(participant.user_id.clone()),
            payload: serde_json::to_value(participant).ok(),
            emitted_at: Utc::now(),
        }
    }

    pub fn member_removed(group_id: &str, user_id: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            table: Table::GroupMembers,
            kind: ChangeKind::Delete,
            user_id: Some(user_id.to_string()),
            payload: None,
            emitted_at: Utc::now(),
        }
    }

    pub fn resync(group_id: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
            table: Table::Groups,
            kind: ChangeKind::Resync,
            user_id: None,
            payload: None,
            emitted_at: Utc::now(),
        }
    }
}

/// 按群组划分的广播通道，另有一个接收所有群组事件的总线
pub struct ChangeBus {
    channels: DashMap<String, Sender<Arc<ChangeEvent>>>,
    firehose: Sender<Arc<ChangeEvent>>,
    capacity: usize,
}

impl ChangeBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (firehose, _) = broadcast::channel(capacity);
        ChangeBus {
            channels: DashMap::new(),
            firehose,
            capacity,
        }
    }

    #[instrument(skip(self))]
    pub fn subscribe(&self, group_id: &str) -> Subscription {
        let rx = self
            .channels
            .entry(group_id.to_string())
            .or_insert_with(|| {
                debug!("Creating broadcast channel for group");
                broadcast::channel(self.capacity).0
            })
            .subscribe();

        Subscription::new(group_id.to_string(), rx)
    }

    /// 所有群组的事件，供缓存失效等后台任务使用
    pub fn subscribe_all(&self) -> Receiver<Arc<ChangeEvent>> {
        self.firehose.subscribe()
    }

    /// 发布事件，返回该群组当前的订阅者数量
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let event = Arc::new(event);
        let _ = self.firehose.send(event.clone());

        let delivered = match self.channels.get(&event.group_id) {
            Some(tx) => tx.send(event.clone()).unwrap_or(0),
            None => 0,
        };

        if delivered == 0 {
            // 没有订阅者时回收通道
            self.channels
                .remove_if(&event.group_id, |_, tx| tx.receiver_count() == 0);
        }

        debug!(
            group_id = %event.group_id,
            kind = ?event.kind,
            receivers = delivered,
            "Change event published"
        );
        delivered
    }

    pub fn subscriber_count(&self, group_id: &str) -> usize {
        self.channels
            .get(group_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

/// 可取消的订阅句柄，产生带标签的变更事件流
pub struct Subscription {
    group_id: String,
    stream: BroadcastStream<Arc<ChangeEvent>>,
    cancel: CancellationToken,
}

impl Subscription {
    fn new(group_id: String, rx: Receiver<Arc<ChangeEvent>>) -> Self {
        Self {
            group_id,
            stream: BroadcastStream::new(rx),
            cancel: CancellationToken::new(),
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// 下一个事件；订阅被取消或通道关闭时返回 None
    pub async fn next(&mut self) -> Option<Arc<ChangeEvent>> {
        if self.cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.stream.next() => match item {
                Some(Ok(event)) => Some(event),
                Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                    debug!(
                        group_id = %self.group_id,
                        missed,
                        "Subscriber lagged, requesting resync"
                    );
                    Some(Arc::new(ChangeEvent::resync(&self.group_id)))
                }
                None => None,
            },
        }
    }

    /// 可交给其他任务用来取消本订阅
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_scoped_per_group() {
        let bus = ChangeBus::new(16);
        let mut a = bus.subscribe("a");
        let mut b = bus.subscribe("b");

        bus.publish(ChangeEvent::member_removed("a", "u1"));
        bus.publish(ChangeEvent::member_removed("b", "u2"));

        let ev = a.next().await.unwrap();
        assert_eq!(ev.group_id, "a");
        assert_eq!(ev.user_id.as_deref(), Some("u1"));
        let ev = b.next().await.unwrap();
        assert_eq!(ev.group_id, "b");
    }

    #[tokio::test]
    async fn cancelled_subscription_ends() {
        let bus = ChangeBus::new(16);
        let mut sub = bus.subscribe("a");
        let token = sub.cancel_token();
        token.cancel();

        bus.publish(ChangeEvent::resync("a"));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn lagging_subscriber_gets_resync() {
        let bus = ChangeBus::new(2);
        let mut sub = bus.subscribe("a");
        for _ in 0..5 {
            bus.publish(ChangeEvent::member_removed("a", "u1"));
        }

        let ev = sub.next().await.unwrap();
        assert_eq!(ev.kind, ChangeKind::Resync);
    }

    #[tokio::test]
    async fn channel_is_reclaimed_without_subscribers() {
        let bus = ChangeBus::new(4);
        let sub = bus.subscribe("a");
        assert_eq!(bus.subscriber_count("a"), 1);
        drop(sub);

        assert_eq!(bus.publish(ChangeEvent::resync("a")), 0);
        assert_eq!(bus.subscriber_count("a"), 0);
    }

    #[tokio::test]
    async fn firehose_sees_every_group() {
        let bus = ChangeBus::new(8);
        let mut all = bus.subscribe_all();
        bus.publish(ChangeEvent::resync("a"));
        bus.publish(ChangeEvent::resync("b"));

        assert_eq!(all.recv().await.unwrap().group_id, "a");
        assert_eq!(all.recv().await.unwrap().group_id, "b");
    }
}
