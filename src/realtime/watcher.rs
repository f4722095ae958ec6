// 客户端群组同步
// 订阅变更信号，按时间窗口合并后再拉取权威状态；本地乐观更新与权威状态分开保存

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep, sleep_until};

use super::bus::{ChangeBus, Subscription};
use crate::config::RealtimeConfig;
use crate::database::{Group, GroupStore, Participant};
use crate::error::AppError;

/// 群组的权威快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub group: Group,
    pub members: Vec<Participant>,
}

/// 权威状态的来源
#[async_trait]
pub trait GroupSource: Send + Sync {
    async fn fetch_group(&self, group_id: &str) -> Result<Option<GroupSnapshot>, AppError>;
}

#[async_trait]
impl GroupSource for Arc<dyn GroupStore> {
    async fn fetch_group(&self, group_id: &str) -> Result<Option<GroupSnapshot>, AppError> {
        let Some(group) = self.get_group(group_id).await? else {
            return Ok(None);
        };
        let members = self.list_members(group_id).await?;
        Ok(Some(GroupSnapshot { group, members }))
    }
}

/// 本地尚未确认的变更
#[derive(Debug, Clone, PartialEq)]
pub enum OptimisticChange {
    Joined(String),
    Left(String),
}

/// 等待第一个事件，然后在窗口期内吸收后续事件，返回合并的事件数。
/// 订阅结束时返回 None。
pub async fn next_coalesced(subscription: &mut Subscription, window: Duration) -> Option<usize> {
    subscription.next().await?;
    let deadline = Instant::now() + window;
    let mut merged = 1;

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => break,
            event = subscription.next() => match event {
                Some(_) => merged += 1,
                None => break,
            },
        }
    }

    Some(merged)
}

pub struct GroupWatcher {
    group_id: String,
    bus: Arc<ChangeBus>,
    source: Arc<dyn GroupSource>,
    window: Duration,
    subscription: Option<Subscription>,
    authoritative: Option<GroupSnapshot>,
    optimistic: Vec<OptimisticChange>,
    refetches: u64,
}

impl GroupWatcher {
    pub fn new(
        group_id: impl Into<String>,
        bus: Arc<ChangeBus>,
        source: Arc<dyn GroupSource>,
        window: Duration,
    ) -> Self {
        let group_id = group_id.into();
        let subscription = Some(bus.subscribe(&group_id));
        Self {
            group_id,
            bus,
            source,
            window,
            subscription,
            authoritative: None,
            optimistic: Vec::new(),
            refetches: 0,
        }
    }

    /// 合并窗口取自 REFETCH_WINDOW_SECS
    pub fn with_config(
        group_id: impl Into<String>,
        bus: Arc<ChangeBus>,
        source: Arc<dyn GroupSource>,
        config: &RealtimeConfig,
    ) -> Self {
        Self::new(group_id, bus, source, config.refetch_window())
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn refetch_count(&self) -> u64 {
        self.refetches
    }

    pub fn authoritative(&self) -> Option<&GroupSnapshot> {
        self.authoritative.as_ref()
    }

    /// 记录一次乐观更新，直到下一次权威拉取前有效
    pub fn apply_optimistic(&mut self, change: OptimisticChange) {
        self.optimistic.push(change);
    }

    /// 叠加乐观更新后的人数，仅用于展示
    pub fn displayed_count(&self) -> Option<i32> {
        let base = self.authoritative.as_ref()?.group.current_count;
        let delta: i32 = self
            .optimistic
            .iter()
            .map(|c| match c {
                OptimisticChange::Joined(_) => 1,
                OptimisticChange::Left(_) => -1,
            })
            .sum();
        Some((base + delta).max(0))
    }

    /// 拉取权威状态，并丢弃所有乐观更新
    pub async fn refresh(&mut self) -> Result<Option<&GroupSnapshot>, AppError> {
        let snapshot = self.source.fetch_group(&self.group_id).await?;
        self.refetches += 1;
        self.authoritative = snapshot;
        self.optimistic.clear();
        Ok(self.authoritative.as_ref())
    }

    /// 等待下一批变更并重新拉取。
    ///
    /// 订阅丢失时重新订阅；处于后台（没有订阅）时退化为按窗口轮询。
    pub async fn next_update(&mut self) -> Result<Option<&GroupSnapshot>, AppError> {
        match self.subscription.as_mut() {
            Some(subscription) => {
                if let Some(merged) = next_coalesced(subscription, self.window).await {
                    tracing::debug!(
                        group_id = %self.group_id,
                        merged,
                        "Refetching after change burst"
                    );
                } else {
                    tracing::info!(group_id = %self.group_id, "Subscription lost, resubscribing");
                    self.subscription = Some(self.bus.subscribe(&self.group_id));
                }
            }
            None => sleep(self.window).await,
        }
        self.refresh().await
    }

    /// 切到后台：取消订阅
    pub fn on_background(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }

    /// 回到前台：重新订阅并立即校验权威状态
    pub async fn on_foreground(&mut self) -> Result<Option<&GroupSnapshot>, AppError> {
        if let Some(old) = self.subscription.take() {
            old.cancel();
        }
        self.subscription = Some(self.bus.subscribe(&self.group_id));
        self.refresh().await
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }
}
