// 场地分配
// 群组满员后搜索附近场所，选出最佳候选并写回群组

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::provider::VenueProvider;
use super::scoring::{Assessment, pick_best};
use crate::config::VenueConfig;
use crate::database::{Group, GroupStatus, GroupStore};
use crate::error::AppError;
use crate::notify::{GroupNotification, Notifier};
use crate::realtime::{ChangeBus, ChangeEvent, ChangeKind};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub enum AssignOutcome {
    Assigned { group: Group, choice: Assessment },
    /// 已经有场地，或状态不是已满
    Skipped { status: GroupStatus },
    /// 没有合格的候选，群组保持已满状态等待重试
    Unassigned { candidates: usize },
}

pub struct VenueAssigner {
    store: Arc<dyn GroupStore>,
    provider: Arc<dyn VenueProvider>,
    bus: Arc<ChangeBus>,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
    search_radius_m: f64,
    meeting_lead: chrono::Duration,
}

impl VenueAssigner {
    pub fn new(
        store: Arc<dyn GroupStore>,
        provider: Arc<dyn VenueProvider>,
        bus: Arc<ChangeBus>,
        notifier: Arc<dyn Notifier>,
        config: &VenueConfig,
    ) -> Self {
        let retry = RetryPolicy::new(config.max_attempts, Duration::from_secs(1))
            .with_timeout(config.timeout());

        Self {
            store,
            provider,
            bus,
            notifier,
            retry,
            search_radius_m: config.search_radius_m,
            meeting_lead: chrono::Duration::minutes(config.meeting_lead_minutes),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 为群组分配场地。重复触发是安全的：写入前检查状态，已有场地时不覆盖。
    #[instrument(skip(self))]
    pub async fn assign(&self, group_id: &str) -> Result<AssignOutcome, AppError> {
        let group = self
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("group {}", group_id)))?;

        if group.status != GroupStatus::Full || group.has_venue() {
            return Ok(AssignOutcome::Skipped {
                status: group.status,
            });
        }

        let center = group.center();
        let radius = self.search_radius_m;
        let candidates = self
            .retry
            .run("venue search", || self.provider.search(center, radius))
            .await?;

        let Some(choice) = pick_best(&candidates) else {
            warn!(candidates = candidates.len(), "No acceptable venue found");
            return Ok(AssignOutcome::Unassigned {
                candidates: candidates.len(),
            });
        };

        let venue = choice.to_venue();
        let meeting_time = Utc::now() + self.meeting_lead;

        // 条件写入，并发的重复触发只有一个会成功
        let Some(updated) = self
            .store
            .assign_venue(group_id, &venue, meeting_time)
            .await?
        else {
            let status = self
                .store
                .get_group(group_id)
                .await?
                .map(|g| g.status)
                .unwrap_or(group.status);
            return Ok(AssignOutcome::Skipped { status });
        };

        info!(
            venue = %venue.name,
            score = choice.score,
            confidence = ?choice.confidence,
            "Venue assigned"
        );
        self.bus
            .publish(ChangeEvent::group(ChangeKind::Update, &updated));
        self.notifier
            .notify(GroupNotification::VenueAssigned {
                group_id: group_id.to_string(),
                venue,
                meeting_time,
            })
            .await;

        Ok(AssignOutcome::Assigned {
            group: updated,
            choice,
        })
    }

    /// 消费满员信号的后台任务
    pub fn spawn_worker(
        self: Arc<Self>,
        mut rx: UnboundedReceiver<String>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let group_id = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(group_id) => group_id,
                        None => break,
                    },
                };

                match self.assign(&group_id).await {
                    Ok(AssignOutcome::Unassigned { .. }) => {
                        info!(group_id = %group_id, "Group left unassigned, sweep will retry")
                    }
                    Ok(_) => {}
                    Err(e) => error!(group_id = %group_id, "Venue assignment failed: {}", e),
                }
            }
            info!("Venue worker stopped");
        })
    }
}
