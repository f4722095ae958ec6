// 缓存模块
// 群组快照的 Redis 缓存，以及基于变更事件的失效任务

pub mod group_cache;
pub mod invalidator;

pub use group_cache::{CachedGroupSource, GROUP_CACHE_EXPIRE, GroupCache, group_id_key};
pub use invalidator::spawn_invalidator;
