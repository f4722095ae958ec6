use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::{Group, GroupStatus, Participant, Venue};
use crate::error::AppError;
use crate::location::{Confidence, LocationSource, NormalizedLocation, normalize};
use crate::matching::MatchOutcome;
use crate::realtime::GroupSnapshot;

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: Option<String>,
}

impl MatchRequest {
    /// 经纬度必须同时提供或同时缺省
    pub fn normalize(&self) -> Result<NormalizedLocation, AppError> {
        if self.latitude.is_some() != self.longitude.is_some() {
            return Err(AppError::Validation(
                "latitude and longitude must be provided together".into(),
            ));
        }
        Ok(normalize(
            self.latitude,
            self.longitude,
            self.location_name.as_deref(),
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct GroupIdRequest {
    pub group_id: String,
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub group_id: String,
}

#[derive(Debug, Serialize)]
pub struct GroupInfo {
    pub group_id: String,
    pub status: GroupStatus,
    pub capacity: i32,
    pub current_count: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub search_radius: f64,
    pub created_at: DateTime<Utc>,
    pub venue: Option<Venue>,
    pub meeting_time: Option<DateTime<Utc>>,
}

impl From<Group> for GroupInfo {
    fn from(group: Group) -> Self {
        let venue = group.venue();
        Self {
            group_id: group.group_id,
            status: group.status,
            capacity: group.capacity,
            current_count: group.current_count,
            latitude: group.latitude,
            longitude: group.longitude,
            search_radius: group.search_radius,
            created_at: group.created_at,
            venue,
            meeting_time: group.meeting_time,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MemberInfo {
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl From<Participant> for MemberInfo {
    fn from(p: Participant) -> Self {
        Self {
            user_id: p.user_id,
            joined_at: p.joined_at,
            last_seen: p.last_seen,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GroupDetail {
    pub group: GroupInfo,
    pub members: Vec<MemberInfo>,
}

impl From<GroupSnapshot> for GroupDetail {
    fn from(snapshot: GroupSnapshot) -> Self {
        Self {
            group: snapshot.group.into(),
            members: snapshot.members.into_iter().map(MemberInfo::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub group: GroupInfo,
    pub created: bool,
    pub filled: bool,
    pub confidence: Confidence,
    pub location_source: LocationSource,
}

impl MatchResponse {
    pub fn new(outcome: MatchOutcome, location: NormalizedLocation) -> Self {
        Self {
            group: outcome.group.into(),
            created: outcome.created,
            filled: outcome.filled,
            confidence: location.confidence,
            location_source: location.source,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LeaveResponse {
    pub group: GroupInfo,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct KeepAliveResponse {
    pub last_active_time: DateTime<Utc>,
}
