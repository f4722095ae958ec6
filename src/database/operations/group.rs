// 群组存储的 Postgres 实现
// 人数只通过条件更新或重新统计修改，不做读-改-写

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::group::{Group, GroupStatus, NewGroup, Participant, Venue};
use crate::database::store::{GroupStore, JoinOutcome, LeaveOutcome, Recount};
use crate::error::AppError;
use crate::location::Coordinates;
use crate::utils::bounding_deltas;

const GROUP_COLUMNS: &str = r#"
    group_id, status, capacity, current_count, latitude, longitude,
    search_radius, created_at, venue_name, venue_address, venue_latitude,
    venue_longitude, venue_place_id, meeting_time
"#;

const MEMBER_COLUMNS: &str = r#"
    group_id, user_id, status, joined_at, last_seen, latitude, longitude
"#;

/// 群组存储，处理所有与群组和成员相关的数据库操作
#[derive(Clone)]
pub struct PgGroupStore {
    db: PgPool,
}

impl PgGroupStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.db).await
    }

    /// 同一用户的加入/建群串行化，保证最多只有一个有效成员记录
    async fn lock_user(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(user_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn has_active_membership(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        user_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM group_members m
                JOIN groups g ON g.group_id = m.group_id
                WHERE m.user_id = $1
                  AND m.status = 'confirmed'
                  AND g.status IN ('waiting', 'full', 'confirmed')
            )
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl GroupStore for PgGroupStore {
    async fn find_open_groups(
        &self,
        center: Coordinates,
        radius_m: f64,
    ) -> Result<Vec<Group>, AppError> {
        let (lat_range, lon_range) = bounding_deltas(center.latitude, radius_m);

        let groups = sqlx::query_as::<_, Group>(&format!(
            r#"
            SELECT {GROUP_COLUMNS}
            FROM groups
            WHERE status = 'waiting'
              AND current_count < capacity
              AND latitude BETWEEN $1 - $3 AND $1 + $3
              AND longitude BETWEEN $2 - $4 AND $2 + $4
            ORDER BY created_at
            LIMIT 200
            "#
        ))
        .bind(center.latitude)
        .bind(center.longitude)
        .bind(lat_range)
        .bind(lon_range)
        .fetch_all(&self.db)
        .await?;

        Ok(groups)
    }

    async fn get_group(&self, group_id: &str) -> Result<Option<Group>, AppError> {
        let group = sqlx::query_as::<_, Group>(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups WHERE group_id = $1"
        ))
        .bind(group_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(group)
    }

    async fn create_group_with_member(
        &self,
        group: NewGroup,
        user_id: &str,
        location: Coordinates,
    ) -> Result<Group, AppError> {
        let group_id = Uuid::new_v4().to_string();

        // 群组和第一个成员在同一事务中创建，任何一步失败都会整体回滚
        let mut tx = self.db.begin().await?;
        Self::lock_user(&mut tx, user_id).await?;

        if Self::has_active_membership(&mut tx, user_id).await? {
            return Err(AppError::AlreadyMember(user_id.to_string()));
        }

        let created = sqlx::query_as::<_, Group>(&format!(
            r#"
            INSERT INTO groups (
                group_id, status, capacity, current_count,
                latitude, longitude, search_radius, created_at
            )
            VALUES ($1, 'waiting', $2, 1, $3, $4, $5, NOW())
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(&group_id)
        .bind(group.capacity)
        .bind(group.center.latitude)
        .bind(group.center.longitude)
        .bind(group.search_radius)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO group_members (
                group_id, user_id, status, joined_at, last_seen, latitude, longitude
            )
            VALUES ($1, $2, 'confirmed', NOW(), NOW(), $3, $4)
            "#,
        )
        .bind(&group_id)
        .bind(user_id)
        .bind(location.latitude)
        .bind(location.longitude)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn join_if_below_capacity(
        &self,
        group_id: &str,
        user_id: &str,
        location: Coordinates,
    ) -> Result<JoinOutcome, AppError> {
        let mut tx = self.db.begin().await?;
        Self::lock_user(&mut tx, user_id).await?;

        if Self::has_active_membership(&mut tx, user_id).await? {
            return Ok(JoinOutcome::AlreadyMember);
        }

        // 条件自增：只有等待中且未满时才会命中
        let updated = sqlx::query_as::<_, Group>(&format!(
            r#"
            UPDATE groups
            SET current_count = current_count + 1,
                status = CASE
                    WHEN current_count + 1 >= capacity THEN 'full'::group_status
                    ELSE status
                END
            WHERE group_id = $1
              AND status = 'waiting'
              AND current_count < capacity
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(group) = updated else {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM groups WHERE group_id = $1)")
                    .bind(group_id)
                    .fetch_one(&mut *tx)
                    .await?;
            return Ok(if exists {
                JoinOutcome::Full
            } else {
                JoinOutcome::GroupMissing
            });
        };

        let participant = sqlx::query_as::<_, Participant>(&format!(
            r#"
            INSERT INTO group_members (
                group_id, user_id, status, joined_at, last_seen, latitude, longitude
            )
            VALUES ($1, $2, 'confirmed', NOW(), NOW(), $3, $4)
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(group_id)
        .bind(user_id)
        .bind(location.latitude)
        .bind(location.longitude)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let filled = group.status == GroupStatus::Full;
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
        let mut tx = self.db.begin().await?;

        let deleted: Option<String> = sqlx::query_scalar(
            "DELETE FROM group_members WHERE group_id = $1 AND user_id = $2 RETURNING user_id",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        if deleted.is_none() {
            return Ok(LeaveOutcome::NotMember);
        }

        let group = sqlx::query_as::<_, Group>(&format!(
            r#"
            UPDATE groups
            SET current_count = GREATEST(current_count - 1, 0)
            WHERE group_id = $1
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(group_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(LeaveOutcome::Left { group })
    }

    async fn cancel_if_empty(&self, group_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE groups
            SET status = 'cancelled'
            WHERE group_id = $1
              AND (status = 'waiting' OR (status = 'full' AND venue_name IS NULL))
              AND current_count = 0
              AND NOT EXISTS (
                  SELECT 1 FROM group_members
                  WHERE group_id = $1 AND status = 'confirmed'
              )
            "#,
        )
        .bind(group_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn active_membership(&self, user_id: &str) -> Result<Option<Participant>, AppError> {
        let participant = sqlx::query_as::<_, Participant>(
            r#"
            SELECT m.group_id, m.user_id, m.status, m.joined_at, m.last_seen,
                   m.latitude, m.longitude
            FROM group_members m
            JOIN groups g ON g.group_id = m.group_id
            WHERE m.user_id = $1
              AND m.status = 'confirmed'
              AND g.status IN ('waiting', 'full', 'confirmed')
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(participant)
    }

    async fn list_members(&self, group_id: &str) -> Result<Vec<Participant>, AppError> {
        let members = sqlx::query_as::<_, Participant>(&format!(
            "SELECT {MEMBER_COLUMNS} FROM group_members WHERE group_id = $1 ORDER BY joined_at"
        ))
        .bind(group_id)
        .fetch_all(&self.db)
        .await?;

        Ok(members)
    }

    async fn touch_member(
        &self,
        group_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let last_seen: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            UPDATE group_members
            SET last_seen = GREATEST(last_seen, $3)
            WHERE group_id = $1 AND user_id = $2
            RETURNING last_seen
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(at)
        .fetch_optional(&self.db)
        .await?;

        Ok(last_seen)
    }

    async fn evict_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Participant>, AppError> {
        let evicted = sqlx::query_as::<_, Participant>(&format!(
            r#"
            DELETE FROM group_members
            WHERE last_seen < $1
              AND group_id IN (
                  SELECT group_id FROM groups
                  WHERE status IN ('waiting', 'full', 'confirmed')
              )
            RETURNING {MEMBER_COLUMNS}
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.db)
        .await?;

        Ok(evicted)
    }

    async fn drifted_groups(&self) -> Result<Vec<String>, AppError> {
        let ids = sqlx::query_scalar::<_, String>(
            r#"
            SELECT g.group_id
            FROM groups g
            LEFT JOIN (
                SELECT group_id, COUNT(*)::INT AS confirmed
                FROM group_members
                WHERE status = 'confirmed'
                GROUP BY group_id
            ) m ON m.group_id = g.group_id
            WHERE g.status IN ('waiting', 'full', 'confirmed')
              AND g.current_count <> COALESCE(m.confirmed, 0)
            ORDER BY g.group_id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(ids)
    }

    async fn recount(&self, group_id: &str) -> Result<Option<Recount>, AppError> {
        let mut tx = self.db.begin().await?;

        let recorded: Option<i32> =
            sqlx::query_scalar("SELECT current_count FROM groups WHERE group_id = $1 FOR UPDATE")
                .bind(group_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(recorded) = recorded else {
            return Ok(None);
        };

        let group = sqlx::query_as::<_, Group>(&format!(
            r#"
            UPDATE groups
            SET current_count = (
                SELECT COUNT(*)::INT FROM group_members
                WHERE group_id = $1 AND status = 'confirmed'
            )
            WHERE group_id = $1
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(group_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(Recount {
            actual: group.current_count,
            recorded,
            group,
        }))
    }

    async fn assign_venue(
        &self,
        group_id: &str,
        venue: &Venue,
        meeting_time: DateTime<Utc>,
    ) -> Result<Option<Group>, AppError> {
        let group = sqlx::query_as::<_, Group>(&format!(
            r#"
            UPDATE groups
            SET venue_name = $2,
                venue_address = $3,
                venue_latitude = $4,
                venue_longitude = $5,
                venue_place_id = $6,
                meeting_time = $7,
                status = 'confirmed'
            WHERE group_id = $1
              AND status = 'full'
              AND venue_name IS NULL
              AND current_count > 0
            RETURNING {GROUP_COLUMNS}
            "#
        ))
        .bind(group_id)
        .bind(&venue.name)
        .bind(&venue.address)
        .bind(venue.latitude)
        .bind(venue.longitude)
        .bind(&venue.place_id)
        .bind(meeting_time)
        .fetch_optional(&self.db)
        .await?;

        Ok(group)
    }

    async fn full_groups_without_venue(&self) -> Result<Vec<Group>, AppError> {
        let groups = sqlx::query_as::<_, Group>(&format!(
            r#"
            SELECT {GROUP_COLUMNS}
            FROM groups
            WHERE status = 'full' AND venue_name IS NULL AND current_count > 0
            ORDER BY created_at
            LIMIT 50
            "#
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(groups)
    }
}
