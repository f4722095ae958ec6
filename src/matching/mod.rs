// 撮合模块
// 为新到达的用户寻找附近可加入的群组，没有则新建

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::config::MatchingConfig;
use crate::database::{Group, NewGroup, Participant};
use crate::error::AppError;
use crate::location::{NormalizedLocation, search_radius};
use crate::membership::{JoinReceipt, MembershipLedger};

/// 候选群组及其与请求者的距离
#[derive(Debug, Clone)]
pub struct Candidate {
    pub group: Group,
    pub distance_m: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub group: Group,
    pub participant: Participant,
    /// 新建了群组
    pub created: bool,
    /// 本次加入使群组满员
    pub filled: bool,
}

impl MatchOutcome {
    fn from_receipt(receipt: JoinReceipt, created: bool) -> Self {
        Self {
            group: receipt.group,
            participant: receipt.participant,
            created,
            filled: receipt.filled,
        }
    }
}

/// 按距离排序，距离相同按创建时间，再按ID，保证顺序稳定
pub fn rank_candidates(location: &NormalizedLocation, groups: Vec<Group>) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = groups
        .into_iter()
        .filter(|g| g.is_open())
        .map(|group| {
            let distance_m = location.coordinates.distance_to(&group.center());
            Candidate { group, distance_m }
        })
        // 以群组自身的搜索半径为准
        .filter(|c| c.distance_m <= c.group.search_radius)
        .collect();

    candidates.sort_by(|a, b| {
        a.distance_m
            .partial_cmp(&b.distance_m)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.group.created_at.cmp(&b.group.created_at))
            .then_with(|| a.group.group_id.cmp(&b.group.group_id))
    });
    candidates
}

pub struct Matchmaker {
    ledger: Arc<MembershipLedger>,
    config: MatchingConfig,
}

impl Matchmaker {
    pub fn new(ledger: Arc<MembershipLedger>, config: MatchingConfig) -> Self {
        Self { ledger, config }
    }

    pub async fn candidates(
        &self,
        location: &NormalizedLocation,
    ) -> Result<Vec<Candidate>, AppError> {
        // 预筛用最大半径，精确判断在 rank_candidates 中按各群组自身半径完成
        let groups = self
            .ledger
            .store()
            .find_open_groups(location.coordinates, self.config.max_search_radius)
            .await?;
        Ok(rank_candidates(location, groups))
    }

    /// 先搜索后创建。
    ///
    /// 撮合只提出候选，容量由成员账本判定：候选在此期间被别人填满时尝试下一个，
    /// 全部失败才新建群组。
    #[instrument(
        skip(self, location),
        fields(user_id = %user_id, confidence = ?location.confidence)
    )]
    pub async fn find_or_create(
        &self,
        user_id: &str,
        location: &NormalizedLocation,
    ) -> Result<MatchOutcome, AppError> {
        let candidates = self.candidates(location).await?;
        debug!(count = candidates.len(), "Compatible groups found");

        for candidate in candidates {
            let group_id = candidate.group.group_id;
            match self
                .ledger
                .join(&group_id, user_id, location.coordinates)
                .await
            {
                Ok(receipt) => {
                    info!(
                        group_id = %group_id,
                        distance_m = candidate.distance_m,
                        "Matched into existing group"
                    );
                    return Ok(MatchOutcome::from_receipt(receipt, false));
                }
                // 被并发请求抢先填满或已取消
                Err(AppError::GroupFull(_)) | Err(AppError::NotFound(_)) => {
                    debug!(group_id = %group_id, "Candidate no longer available");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        let new_group = NewGroup {
            center: location.coordinates,
            capacity: self.config.group_capacity,
            search_radius: search_radius(location.confidence, &self.config),
        };
        let receipt = self
            .ledger
            .found_group(new_group, user_id, location.coordinates)
            .await?;
        Ok(MatchOutcome::from_receipt(receipt, true))
    }
}
