// 存储接口
// 撮合核心只通过该 trait 访问持久化数据

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::group::{Group, NewGroup, Participant, Venue};
use crate::error::AppError;
use crate::location::Coordinates;

/// 条件加入的结果
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Joined {
        group: Group,
        participant: Participant,
        /// 本次加入使群组满员（只有一次加入会得到 true）
        filled: bool,
    },
    Full,
    AlreadyMember,
    GroupMissing,
}

#[derive(Debug, Clone)]
pub enum LeaveOutcome {
    Left { group: Group },
    NotMember,
}

/// 重新统计人数的结果
#[derive(Debug, Clone)]
pub struct Recount {
    pub group: Group,
    pub recorded: i32,
    pub actual: i32,
}

impl Recount {
    pub fn drifted(&self) -> bool {
        self.recorded != self.actual
    }
}

#[async_trait]
pub trait GroupStore: Send + Sync {
    /// 包围盒内所有等待中且未满的群组（精确距离由调用方计算）
    async fn find_open_groups(
        &self,
        center: Coordinates,
        radius_m: f64,
    ) -> Result<Vec<Group>, AppError>;

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>, AppError>;

    /// 原子地创建群组及其第一个成员，失败时不留下空群组
    async fn create_group_with_member(
        &self,
        group: NewGroup,
        user_id: &str,
        location: Coordinates,
    ) -> Result<Group, AppError>;

    /// 插入成员并在人数未满时原子地加一，满员时同时切换状态
    async fn join_if_below_capacity(
        &self,
        group_id: &str,
        user_id: &str,
        location: Coordinates,
    ) -> Result<JoinOutcome, AppError>;

    /// 删除成员并将人数减一（最低为0）
    async fn remove_member(&self, group_id: &str, user_id: &str)
    -> Result<LeaveOutcome, AppError>;

    /// 空群组标记为取消：等待中，或已满但尚未分配场地
    async fn cancel_if_empty(&self, group_id: &str) -> Result<bool, AppError>;

    /// 用户在未结束群组中的确认成员记录
    async fn active_membership(&self, user_id: &str) -> Result<Option<Participant>, AppError>;

    async fn list_members(&self, group_id: &str) -> Result<Vec<Participant>, AppError>;

    async fn touch_member(
        &self,
        group_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AppError>;

    /// 删除 last_seen 早于 cutoff 的成员，返回被删除的记录
    async fn evict_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Participant>, AppError>;

    /// 未结束且记录人数与确认成员数不一致的群组
    async fn drifted_groups(&self) -> Result<Vec<String>, AppError>;

    /// 直接根据成员记录重新计算人数，按实际行数写入
    async fn recount(&self, group_id: &str) -> Result<Option<Recount>, AppError>;

    /// 仅当群组已满、尚有成员且未分配场地时写入场地，返回 None 表示未写入
    async fn assign_venue(
        &self,
        group_id: &str,
        venue: &Venue,
        meeting_time: DateTime<Utc>,
    ) -> Result<Option<Group>, AppError>;

    async fn full_groups_without_venue(&self) -> Result<Vec<Group>, AppError>;
}
