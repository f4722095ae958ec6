// 群组与成员实体
// 对应数据库中的 groups / group_members 表

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::location::Coordinates;

/// 群组状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "group_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Waiting,
    Full,
    Confirmed,
    Completed,
    Cancelled,
}

impl GroupStatus {
    /// 未结束的群组：等待中、已满、已确认场地
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            GroupStatus::Waiting | GroupStatus::Full | GroupStatus::Confirmed
        )
    }
}

/// 成员状态，只有 confirmed 计入人数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "participant_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Confirmed,
    Pending,
}

/// 群组实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub group_id: String,
    pub status: GroupStatus,
    pub capacity: i32,
    pub current_count: i32,
    pub latitude: f64,
    pub longitude: f64,
    /// 兼容半径（米）
    pub search_radius: f64,
    pub created_at: DateTime<Utc>,
    pub venue_name: Option<String>,
    pub venue_address: Option<String>,
    pub venue_latitude: Option<f64>,
    pub venue_longitude: Option<f64>,
    pub venue_place_id: Option<String>,
    pub meeting_time: Option<DateTime<Utc>>,
}

impl Group {
    pub fn center(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == GroupStatus::Waiting && self.current_count < self.capacity
    }

    pub fn has_venue(&self) -> bool {
        self.venue_name.is_some()
    }

    /// 人数归零后可以取消：等待中，或已满但还没订场地
    pub fn is_abandonable(&self) -> bool {
        match self.status {
            GroupStatus::Waiting => true,
            GroupStatus::Full => !self.has_venue(),
            _ => false,
        }
    }

    pub fn venue(&self) -> Option<Venue> {
        let name = self.venue_name.clone()?;
        Some(Venue {
            name,
            address: self.venue_address.clone(),
            latitude: self.venue_latitude,
            longitude: self.venue_longitude,
            place_id: self.venue_place_id.clone(),
        })
    }
}

/// 成员实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Participant {
    pub group_id: String,
    pub user_id: String,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// 加入时的位置
    pub latitude: f64,
    pub longitude: f64,
}

/// 已分配给群组的场地
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub name: String,
    pub address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub place_id: Option<String>,
}

/// 新建群组参数
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub center: Coordinates,
    pub capacity: i32,
    pub search_radius: f64,
}
