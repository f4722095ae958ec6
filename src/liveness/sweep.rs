// 定时清理任务
// 删除长时间没有心跳的成员，并根据剩余成员重新计算人数

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::AppError;
use crate::membership::MembershipLedger;
use crate::realtime::{ChangeEvent, ChangeKind};

/// 一次清理的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub evicted: usize,
    /// (group_id, 记录的人数, 实际人数)
    pub recounted: Vec<(String, i32, i32)>,
    /// 扣除本次清理后仍对不上的群组
    pub drifted: Vec<String>,
    pub cancelled: Vec<String>,
    pub venue_retries: usize,
}

pub struct Reconciler {
    ledger: Arc<MembershipLedger>,
    threshold: chrono::Duration,
    venue_tx: Option<UnboundedSender<String>>,
}

impl Reconciler {
    pub fn new(ledger: Arc<MembershipLedger>, threshold: chrono::Duration) -> Self {
        Self {
            ledger,
            threshold,
            venue_tx: None,
        }
    }

    /// 已满但没有场地的群组会重新送入场地分配队列
    pub fn with_venue_retry(mut self, tx: UnboundedSender<String>) -> Self {
        self.venue_tx = Some(tx);
        self
    }

    #[instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let store = self.ledger.store();
        let mut report = SweepReport::default();

        let evicted = store.evict_stale(now - self.threshold).await?;
        report.evicted = evicted.len();

        let mut affected: BTreeMap<String, i32> = BTreeMap::new();
        for participant in &evicted {
            info!(
                group_id = %participant.group_id,
                user_id = %participant.user_id,
                last_seen = %participant.last_seen,
                "Evicting inactive participant"
            );
            *affected.entry(participant.group_id.clone()).or_default() += 1;
            self.ledger
                .announce_removed(&participant.group_id, &participant.user_id)
                .await;
        }

        // 没有成员被清理但计数已经对不上的群组也要重算
        match store.drifted_groups().await {
            Ok(ids) => {
                for group_id in ids {
                    affected.entry(group_id).or_default();
                }
            }
            Err(e) => error!("Failed to list drifted groups: {}", e),
        }

        for (group_id, removed) in affected {
            if let Err(e) = self.reconcile_group(&group_id, removed, &mut report).await {
                error!(group_id = %group_id, "Recount failed: {}", e);
            }
        }

        if let Some(tx) = &self.venue_tx {
            for group in store.full_groups_without_venue().await? {
                if tx.send(group.group_id).is_err() {
                    warn!("Venue worker is gone, skipping venue retries");
                    break;
                }
                report.venue_retries += 1;
            }
        }

        if report.evicted > 0 || !report.drifted.is_empty() {
            info!(
                evicted = report.evicted,
                drifted = report.drifted.len(),
                cancelled = report.cancelled.len(),
                "Sweep finished"
            );
        }
        Ok(report)
    }

    /// 按成员记录重算单个群组；removed 为本次清理从该群组删除的人数
    async fn reconcile_group(
        &self,
        group_id: &str,
        removed: i32,
        report: &mut SweepReport,
    ) -> Result<(), AppError> {
        let Some(recount) = self.ledger.store().recount(group_id).await? else {
            return Ok(());
        };

        // 只扣除本次清理的人数后仍不一致，说明计数曾经漂移
        let expected = (recount.recorded - removed).max(0);
        if recount.actual != expected {
            let drift = AppError::Consistency {
                group_id: group_id.to_string(),
                recorded: expected,
                actual: recount.actual,
            };
            warn!("{}, corrected", drift);
            report.drifted.push(group_id.to_string());
        }
        if recount.actual > recount.group.capacity {
            let overflow = AppError::Consistency {
                group_id: group_id.to_string(),
                recorded: recount.group.capacity,
                actual: recount.actual,
            };
            warn!("{}, members exceed capacity", overflow);
        }

        if recount.drifted() {
            self.ledger
                .bus()
                .publish(ChangeEvent::group(ChangeKind::Update, &recount.group));
        }
        report
            .recounted
            .push((group_id.to_string(), recount.recorded, recount.actual));

        // 成员全部失联：等待中或尚未订场的已满群组直接取消
        if recount.actual == 0
            && recount.group.is_abandonable()
            && self.ledger.cancel_empty(group_id).await?
        {
            report.cancelled.push(group_id.to_string());
        }
        Ok(())
    }

    /// 周期性执行清理，直到取消
    pub fn spawn(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Sweep task stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once(Utc::now()).await {
                            error!("Sweep failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}
