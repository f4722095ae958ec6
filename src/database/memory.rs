// 内存存储
// 与 Postgres 实现保持相同语义，所有操作在同一把锁内完成，用于测试和本地开发

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::group::{Group, GroupStatus, NewGroup, Participant, ParticipantStatus, Venue};
use super::store::{GroupStore, JoinOutcome, LeaveOutcome, Recount};
use crate::error::AppError;
use crate::location::Coordinates;
use crate::utils::bounding_deltas;

#[derive(Default)]
struct Inner {
    groups: HashMap<String, Group>,
    members: HashMap<(String, String), Participant>,
}

impl Inner {
    fn has_active_membership(&self, user_id: &str) -> bool {
        self.members.values().any(|m| {
            m.user_id == user_id
                && m.status == ParticipantStatus::Confirmed
                && self
                    .groups
                    .get(&m.group_id)
                    .is_some_and(|g| g.status.is_active())
        })
    }

    fn confirmed_count(&self, group_id: &str) -> i32 {
        self.members
            .values()
            .filter(|m| m.group_id == group_id && m.status == ParticipantStatus::Confirmed)
            .count() as i32
    }
}

#[derive(Default)]
pub struct MemoryGroupStore {
    inner: Mutex<Inner>,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接改写记录的人数，模拟并发下丢失或重复的计数写入
    pub async fn overwrite_count(&self, group_id: &str, count: i32) {
        let mut inner = self.inner.lock().await;
        if let Some(group) = inner.groups.get_mut(group_id) {
            group.current_count = count;
        }
    }

    /// 绕过容量检查直接写入成员记录，模拟重复写入
    pub async fn force_member(&self, group_id: &str, user_id: &str, location: Coordinates) {
        let mut inner = self.inner.lock().await;
        inner.members.insert(
            (group_id.to_string(), user_id.to_string()),
            new_participant(group_id, user_id, location),
        );
    }

    /// 外部流程（聚会结束）把群组标记为完成
    pub async fn mark_completed(&self, group_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(group) = inner.groups.get_mut(group_id) {
            group.status = GroupStatus::Completed;
        }
    }
}

fn new_participant(group_id: &str, user_id: &str, location: Coordinates) -> Participant {
    let now = Utc::now();
    Participant {
        group_id: group_id.to_string(),
        user_id: user_id.to_string(),
        status: ParticipantStatus::Confirmed,
        joined_at: now,
        last_seen: now,
        latitude: location.latitude,
        longitude: location.longitude,
    }
}

#[async_trait]
impl GroupStore for MemoryGroupStore {
    async fn find_open_groups(
        &self,
        center: Coordinates,
        radius_m: f64,
    ) -> Result<Vec<Group>, AppError> {
        let (lat_range, lon_range) = bounding_deltas(center.latitude, radius_m);
        let inner = self.inner.lock().await;

        let mut groups: Vec<Group> = inner
            .groups
            .values()
            .filter(|g| g.is_open())
            .filter(|g| (g.latitude - center.latitude).abs() <= lat_range)
            .filter(|g| (g.longitude - center.longitude).abs() <= lon_range)
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        Ok(groups)
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>, AppError> {
        Ok(self.inner.lock().await.groups.get(group_id).cloned())
    }

    async fn create_group_with_member(
        &self,
        group: NewGroup,
        user_id: &str,
        location: Coordinates,
    ) -> Result<Group, AppError> {
        let mut inner = self.inner.lock().await;
        if inner.has_active_membership(user_id) {
            return Err(AppError::AlreadyMember(user_id.to_string()));
        }

        let group_id = Uuid::new_v4().to_string();
        let created = Group {
            group_id: group_id.clone(),
            status: GroupStatus::Waiting,
            capacity: group.capacity,
            current_count: 1,
            latitude: group.center.latitude,
            longitude: group.center.longitude,
            search_radius: group.search_radius,
            created_at: Utc::now(),
            venue_name: None,
            venue_address: None,
            venue_latitude: None,
            venue_longitude: None,
            venue_place_id: None,
            meeting_time: None,
        };

        inner.groups.insert(group_id.clone(), created.clone());
        inner.members.insert(
            (group_id.clone(), user_id.to_string()),
            new_participant(&group_id, user_id, location),
        );

        Ok(created)
    }

    async fn join_if_below_capacity(
        &self,
        group_id: &str,
        user_id: &str,
        location: Coordinates,
    ) -> Result<JoinOutcome, AppError> {
        let mut inner = self.inner.lock().await;
        if inner.has_active_membership(user_id) {
            return Ok(JoinOutcome::AlreadyMember);
        }

        let Some(group) = inner.groups.get_mut(group_id) else {
            return Ok(JoinOutcome::GroupMissing);
        };
        if !group.is_open() {
            return Ok(JoinOutcome::Full);
        }

        group.current_count += 1;
        let filled = group.current_count >= group.capacity;
        if filled {
            group.status = GroupStatus::Full;
        }
        let group = group.clone();

        let participant = new_participant(group_id, user_id, location);
        inner.members.insert(
            (group_id.to_string(), user_id.to_string()),
            participant.clone(),
        );

        Ok(JoinOutcome::Joined {
            group,
            participant,
            filled,
        })
    }

    async fn remove_member(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<LeaveOutcome, AppError> {
        let mut inner = self.inner.lock().await;
        let key = (group_id.to_string(), user_id.to_string());
        if inner.members.remove(&key).is_none() {
            return Ok(LeaveOutcome::NotMember);
        }

        match inner.groups.get_mut(group_id) {
            Some(group) => {
                group.current_count = (group.current_count - 1).max(0);
                Ok(LeaveOutcome::Left {
                    group: group.clone(),
                })
            }
            None => Err(AppError::NotFound(format!("group {}", group_id))),
        }
    }

    async fn cancel_if_empty(&self, group_id: &str) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().await;
        let remaining = inner.confirmed_count(group_id);

        match inner.groups.get_mut(group_id) {
            Some(group)
                if group.is_abandonable() && group.current_count == 0 && remaining == 0 =>
            {
                group.status = GroupStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn active_membership(&self, user_id: &str) -> Result<Option<Participant>, AppError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .members
            .values()
            .find(|m| {
                m.user_id == user_id
                    && m.status == ParticipantStatus::Confirmed
                    && inner
                        .groups
                        .get(&m.group_id)
                        .is_some_and(|g| g.status.is_active())
            })
            .cloned())
    }

    async fn list_members(&self, group_id: &str) -> Result<Vec<Participant>, AppError> {
        let inner = self.inner.lock().await;
        let mut members: Vec<Participant> = inner
            .members
            .values()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(members)
    }

    async fn touch_member(
        &self,
        group_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let mut inner = self.inner.lock().await;
        let key = (group_id.to_string(), user_id.to_string());
        Ok(inner.members.get_mut(&key).map(|m| {
            m.last_seen = m.last_seen.max(at);
            m.last_seen
        }))
    }

    async fn evict_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Participant>, AppError> {
        let mut inner = self.inner.lock().await;

        let stale_keys: Vec<(String, String)> = inner
            .members
            .iter()
            .filter(|(_, m)| m.last_seen < cutoff)
            .filter(|(_, m)| {
                inner
                    .groups
                    .get(&m.group_id)
                    .is_some_and(|g| g.status.is_active())
            })
            .map(|(key, _)| key.clone())
            .collect();

        Ok(stale_keys
            .into_iter()
            .filter_map(|key| inner.members.remove(&key))
            .collect())
    }

    async fn drifted_groups(&self) -> Result<Vec<String>, AppError> {
        let inner = self.inner.lock().await;
        let mut ids: Vec<String> = inner
            .groups
            .values()
            .filter(|g| g.status.is_active())
            .filter(|g| g.current_count != inner.confirmed_count(&g.group_id))
            .map(|g| g.group_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn recount(&self, group_id: &str) -> Result<Option<Recount>, AppError> {
        let mut inner = self.inner.lock().await;
        let actual = inner.confirmed_count(group_id);

        Ok(inner.groups.get_mut(group_id).map(|group| {
            let recorded = group.current_count;
            group.current_count = actual;
            Recount {
                group: group.clone(),
                recorded,
                actual,
            }
        }))
    }

    async fn assign_venue(
        &self,
        group_id: &str,
        venue: &Venue,
        meeting_time: DateTime<Utc>,
    ) -> Result<Option<Group>, AppError> {
        let mut inner = self.inner.lock().await;

        Ok(match inner.groups.get_mut(group_id) {
            Some(group)
                if group.status == GroupStatus::Full
                    && !group.has_venue()
                    && group.current_count > 0 =>
            {
                group.venue_name = Some(venue.name.clone());
                group.venue_address = venue.address.clone();
                group.venue_latitude = venue.latitude;
                group.venue_longitude = venue.longitude;
                group.venue_place_id = venue.place_id.clone();
                group.meeting_time = Some(meeting_time);
                group.status = GroupStatus::Confirmed;
                Some(group.clone())
            }
            _ => None,
        })
    }

    async fn full_groups_without_venue(&self) -> Result<Vec<Group>, AppError> {
        let inner = self.inner.lock().await;
        let mut groups: Vec<Group> = inner
            .groups
            .values()
            .filter(|g| g.status == GroupStatus::Full && !g.has_venue() && g.current_count > 0)
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_group(capacity: i32) -> NewGroup {
        NewGroup {
            center: Coordinates {
                latitude: 52.52,
                longitude: 13.40,
            },
            capacity,
            search_radius: 1_500.0,
        }
    }

    fn here() -> Coordinates {
        Coordinates {
            latitude: 52.52,
            longitude: 13.40,
        }
    }

    #[tokio::test]
    async fn create_counts_the_founder() {
        let store = MemoryGroupStore::new();
        let group = store
            .create_group_with_member(new_group(5), "u1", here())
            .await
            .unwrap();

        assert_eq!(group.current_count, 1);
        assert_eq!(group.status, GroupStatus::Waiting);
        assert_eq!(store.list_members(&group.group_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn join_stops_at_capacity() {
        let store = MemoryGroupStore::new();
        let group = store
            .create_group_with_member(new_group(2), "u1", here())
            .await
            .unwrap();

        let second = store
            .join_if_below_capacity(&group.group_id, "u2", here())
            .await
            .unwrap();
        assert!(matches!(second, JoinOutcome::Joined { filled: true, .. }));

        let third = store
            .join_if_below_capacity(&group.group_id, "u3", here())
            .await
            .unwrap();
        assert!(matches!(third, JoinOutcome::Full));

        let group = store.get_group(&group.group_id).await.unwrap().unwrap();
        assert_eq!(group.current_count, 2);
        assert_eq!(group.status, GroupStatus::Full);
    }

    #[tokio::test]
    async fn leave_floors_count_at_zero() {
        let store = MemoryGroupStore::new();
        let group = store
            .create_group_with_member(new_group(5), "u1", here())
            .await
            .unwrap();
        store.overwrite_count(&group.group_id, 0).await;

        let outcome = store.remove_member(&group.group_id, "u1").await.unwrap();
        match outcome {
            LeaveOutcome::Left { group } => assert_eq!(group.current_count, 0),
            LeaveOutcome::NotMember => panic!("u1 should have been a member"),
        }
    }

    #[tokio::test]
    async fn completed_groups_release_their_members() {
        let store = MemoryGroupStore::new();
        let group = store
            .create_group_with_member(new_group(5), "u1", here())
            .await
            .unwrap();
        assert!(store.active_membership("u1").await.unwrap().is_some());

        store.mark_completed(&group.group_id).await;
        assert!(store.active_membership("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn venue_is_written_only_once() {
        let store = MemoryGroupStore::new();
        let group = store
            .create_group_with_member(new_group(2), "u2", here())
            .await
            .unwrap();
        // 等待中的群组不能分配场地
        assert!(
            store
                .assign_venue(&group.group_id, &venue("A"), Utc::now())
                .await
                .unwrap()
                .is_none()
        );

        store
            .join_if_below_capacity(&group.group_id, "u3", here())
            .await
            .unwrap();

        let first = store
            .assign_venue(&group.group_id, &venue("A"), Utc::now())
            .await
            .unwrap();
        let second = store
            .assign_venue(&group.group_id, &venue("B"), Utc::now())
            .await
            .unwrap();

        assert_eq!(first.unwrap().venue_name.as_deref(), Some("A"));
        assert!(second.is_none());
        let stored = store.get_group(&group.group_id).await.unwrap().unwrap();
        assert_eq!(stored.venue_name.as_deref(), Some("A"));
        assert_eq!(stored.status, GroupStatus::Confirmed);
    }

    #[tokio::test]
    async fn drifted_groups_lists_count_mismatches() {
        let store = MemoryGroupStore::new();
        let healthy = store
            .create_group_with_member(new_group(5), "u1", here())
            .await
            .unwrap();
        let drifted = store
            .create_group_with_member(new_group(5), "u2", here())
            .await
            .unwrap();
        store.overwrite_count(&drifted.group_id, 3).await;

        let ids = store.drifted_groups().await.unwrap();
        assert_eq!(ids, vec![drifted.group_id.clone()]);
        assert!(!ids.contains(&healthy.group_id));

        let recount = store.recount(&drifted.group_id).await.unwrap().unwrap();
        assert_eq!((recount.recorded, recount.actual), (3, 1));
        assert!(store.drifted_groups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_full_group_gets_no_venue() {
        let store = MemoryGroupStore::new();
        let group = store
            .create_group_with_member(new_group(2), "u1", here())
            .await
            .unwrap();
        store
            .join_if_below_capacity(&group.group_id, "u2", here())
            .await
            .unwrap();
        store.overwrite_count(&group.group_id, 0).await;

        assert!(store.full_groups_without_venue().await.unwrap().is_empty());
        assert!(
            store
                .assign_venue(&group.group_id, &venue("A"), Utc::now())
                .await
                .unwrap()
                .is_none()
        );
    }

    fn venue(name: &str) -> Venue {
        Venue {
            name: name.to_string(),
            address: None,
            latitude: None,
            longitude: None,
            place_id: None,
        }
    }
}
