use std::sync::Arc;

use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient};

use crate::database::GroupStore;
use crate::error::AppError;
use crate::realtime::{GroupSnapshot, GroupSource};

/// 群组快照缓存的过期时间（秒）
pub const GROUP_CACHE_EXPIRE: u64 = 600; // 10分钟

/// 群组ID缓存键前缀
const GROUP_ID_PREFIX: &str = "group:id:";

/// 生成群组快照缓存键
pub fn group_id_key(group_id: &str) -> String {
    format!("{}{}", GROUP_ID_PREFIX, group_id)
}

fn encode_error(e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::IoError, "序列化错误", e.to_string()))
}

/// 群组快照缓存
pub struct GroupCache {
    redis_client: Arc<RedisClient>,
}

impl GroupCache {
    pub fn new(redis_client: Arc<RedisClient>) -> Self {
        Self { redis_client }
    }

    pub async fn cache_snapshot(&self, snapshot: &GroupSnapshot) -> Result<(), redis::RedisError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;

        let key = group_id_key(&snapshot.group.group_id);
        let json = serde_json::to_string(snapshot).map_err(encode_error)?;

        let _: () = conn.set_ex(key, json, GROUP_CACHE_EXPIRE).await?;
        Ok(())
    }

    pub async fn get_snapshot(
        &self,
        group_id: &str,
    ) -> Result<Option<GroupSnapshot>, redis::RedisError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;

        let result: Option<String> = conn.get(group_id_key(group_id)).await?;
        match result {
            Some(json) => match serde_json::from_str(&json) {
                Ok(snapshot) => Ok(Some(snapshot)),
                Err(e) => {
                    // 格式不兼容的旧数据直接丢弃
                    tracing::warn!(group_id = %group_id, "Dropping unreadable cache entry: {}", e);
                    let _: () = conn.del(group_id_key(group_id)).await?;
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn invalidate(&self, group_id: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(group_id_key(group_id)).await?;
        Ok(())
    }
}

/// 先读缓存，未命中时读数据库并回填
pub struct CachedGroupSource {
    cache: Arc<GroupCache>,
    store: Arc<dyn GroupStore>,
}

impl CachedGroupSource {
    pub fn new(cache: Arc<GroupCache>, store: Arc<dyn GroupStore>) -> Self {
        Self { cache, store }
    }
}

#[async_trait]
impl GroupSource for CachedGroupSource {
    async fn fetch_group(&self, group_id: &str) -> Result<Option<GroupSnapshot>, AppError> {
        match self.cache.get_snapshot(group_id).await {
            Ok(Some(snapshot)) => {
                tracing::debug!(group_id = %group_id, "Group cache hit");
                return Ok(Some(snapshot));
            }
            Ok(None) => {}
            // 缓存不可用时直接读数据库
            Err(e) => tracing::warn!("Group cache read failed: {}", e),
        }

        let snapshot = self.store.fetch_group(group_id).await?;
        if let Some(snapshot) = &snapshot {
            if let Err(e) = self.cache.cache_snapshot(snapshot).await {
                tracing::warn!("Group cache write failed: {}", e);
            }
        }
        Ok(snapshot)
    }
}
