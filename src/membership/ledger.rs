use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

use crate::database::{
    Group, GroupStatus, GroupStore, JoinOutcome, LeaveOutcome, NewGroup, Participant,
};
use crate::error::AppError;
use crate::location::Coordinates;
use crate::notify::{GroupNotification, Notifier};
use crate::realtime::{ChangeBus, ChangeEvent, ChangeKind};

#[derive(Debug, Clone)]
pub struct JoinReceipt {
    pub group: Group,
    pub participant: Participant,
    /// 本次加入使群组满员
    pub filled: bool,
}

#[derive(Debug, Clone)]
pub struct LeaveReceipt {
    pub group: Group,
    /// 等待中的群组变空后被取消
    pub cancelled: bool,
}

/// 成员账本：加入/离开的状态机
///
/// 人数只通过存储层的条件更新修改。满员事件只由真正触发满员的那次加入发出，
/// 同时通过 `filled_tx` 交给场地分配任务。
pub struct MembershipLedger {
    store: Arc<dyn GroupStore>,
    bus: Arc<ChangeBus>,
    notifier: Arc<dyn Notifier>,
    filled_tx: Option<UnboundedSender<String>>,
}

impl MembershipLedger {
    pub fn new(
        store: Arc<dyn GroupStore>,
        bus: Arc<ChangeBus>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            bus,
            notifier,
            filled_tx: None,
        }
    }

    /// 满员的群组ID会发送到该通道
    pub fn with_filled_channel(mut self, tx: UnboundedSender<String>) -> Self {
        self.filled_tx = Some(tx);
        self
    }

    pub fn store(&self) -> &Arc<dyn GroupStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<ChangeBus> {
        &self.bus
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// 创建群组并让创建者成为第一个成员
    #[instrument(skip(self, group), fields(user_id = %user_id))]
    pub async fn found_group(
        &self,
        group: NewGroup,
        user_id: &str,
        location: Coordinates,
    ) -> Result<JoinReceipt, AppError> {
        let group = self
            .store
            .create_group_with_member(group, user_id, location)
            .await?;
        let participant = self
            .store
            .list_members(&group.group_id)
            .await?
            .into_iter()
            .find(|m| m.user_id == user_id)
            .ok_or_else(|| AppError::NotFound(format!("founder of group {}", group.group_id)))?;

        info!(group_id = %group.group_id, "Group created");
        self.bus.publish(ChangeEvent::group(ChangeKind::Insert, &group));
        self.bus
            .publish(ChangeEvent::member(ChangeKind::Insert, &participant));
        self.notifier
            .notify(GroupNotification::MemberJoined {
                group_id: group.group_id.clone(),
                user_id: user_id.to_string(),
            })
            .await;

        Ok(JoinReceipt {
            group,
            participant,
            filled: false,
        })
    }

    #[instrument(skip(self, location), fields(group_id = %group_id, user_id = %user_id))]
    pub async fn join(
        &self,
        group_id: &str,
        user_id: &str,
        location: Coordinates,
    ) -> Result<JoinReceipt, AppError> {
        let outcome = self
            .store
            .join_if_below_capacity(group_id, user_id, location)
            .await?;

        let (group, participant, filled) = match outcome {
            JoinOutcome::Joined {
                group,
                participant,
                filled,
            } => (group, participant, filled),
            JoinOutcome::Full => {
                debug!("Group is full");
                return Err(AppError::GroupFull(group_id.to_string()));
            }
            JoinOutcome::AlreadyMember => {
                debug!("User already holds an active membership");
                return Err(AppError::AlreadyMember(user_id.to_string()));
            }
            JoinOutcome::GroupMissing => {
                return Err(AppError::NotFound(format!("group {}", group_id)));
            }
        };

        info!(
            current_count = group.current_count,
            capacity = group.capacity,
            "User joined group"
        );
        self.bus
            .publish(ChangeEvent::member(ChangeKind::Insert, &participant));
        self.bus.publish(ChangeEvent::group(ChangeKind::Update, &group));
        self.notifier
            .notify(GroupNotification::MemberJoined {
                group_id: group_id.to_string(),
                user_id: user_id.to_string(),
            })
            .await;

        if filled {
            info!("Group filled");
            self.notifier
                .notify(GroupNotification::GroupFilled {
                    group_id: group_id.to_string(),
                })
                .await;
            if let Some(tx) = &self.filled_tx {
                if tx.send(group_id.to_string()).is_err() {
                    warn!("Venue worker is gone, group will be picked up by the sweep");
                }
            }
        }

        Ok(JoinReceipt {
            group,
            participant,
            filled,
        })
    }

    #[instrument(skip(self), fields(group_id = %group_id, user_id = %user_id))]
    pub async fn leave(&self, group_id: &str, user_id: &str) -> Result<LeaveReceipt, AppError> {
        let group = match self.store.remove_member(group_id, user_id).await? {
            LeaveOutcome::Left { group } => group,
            LeaveOutcome::NotMember => {
                return Err(AppError::NotFound(format!(
                    "membership of {} in group {}",
                    user_id, group_id
                )));
            }
        };

        info!(current_count = group.current_count, "User left group");
        self.announce_removed(group_id, user_id).await;
        self.bus.publish(ChangeEvent::group(ChangeKind::Update, &group));

        // 已满或已确认的群组不会因为离开而被删除或取消
        let cancelled = if group.status == GroupStatus::Waiting && group.current_count == 0 {
            self.cancel_empty(group_id).await?
        } else {
            false
        };

        let group = if cancelled {
            self.store.get_group(group_id).await?.unwrap_or(group)
        } else {
            group
        };

        Ok(LeaveReceipt { group, cancelled })
    }

    /// 成员被移除（主动离开或被清理）后的广播和通知
    pub async fn announce_removed(&self, group_id: &str, user_id: &str) {
        self.bus
            .publish(ChangeEvent::member_removed(group_id, user_id));
        self.notifier
            .notify(GroupNotification::MemberLeft {
                group_id: group_id.to_string(),
                user_id: user_id.to_string(),
            })
            .await;
    }

    /// 取消没有成员的群组（等待中，或已满但未订场），返回是否真的取消
    pub async fn cancel_empty(&self, group_id: &str) -> Result<bool, AppError> {
        if !self.store.cancel_if_empty(group_id).await? {
            return Ok(false);
        }

        info!(group_id = %group_id, "Empty group cancelled");
        if let Some(group) = self.store.get_group(group_id).await? {
            self.bus.publish(ChangeEvent::group(ChangeKind::Update, &group));
        }
        self.notifier
            .notify(GroupNotification::GroupCancelled {
                group_id: group_id.to_string(),
            })
            .await;
        Ok(true)
    }

    /// 服务端记录一次心跳
    #[instrument(skip(self), fields(group_id = %group_id, user_id = %user_id))]
    pub async fn heartbeat(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<DateTime<Utc>, AppError> {
        self.store
            .touch_member(group_id, user_id, Utc::now())
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("membership of {} in group {}", user_id, group_id))
            })
    }
}
