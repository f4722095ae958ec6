use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::group_cache::GroupCache;
use crate::realtime::ChangeBus;

/// 监听所有群组的变更，删除对应的缓存快照
pub fn spawn_invalidator(
    cache: Arc<GroupCache>,
    bus: &ChangeBus,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut events = bus.subscribe_all();

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(event) => {
                    if let Err(e) = cache.invalidate(&event.group_id).await {
                        tracing::warn!(
                            group_id = %event.group_id,
                            "Cache invalidation failed: {}",
                            e
                        );
                    }
                }
                // 丢失的事件无法得知对应群组，依赖过期时间兜底
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Cache invalidator lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::info!("Cache invalidator stopped");
    })
}
