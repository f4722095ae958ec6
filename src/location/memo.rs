use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::normalizer::{Confidence, NormalizedLocation, normalize};
use crate::config::Config;
use crate::error::AppError;
use crate::retry::RetryPolicy;

/// 设备上报的原始位置
#[derive(Debug, Clone, Default)]
pub struct RawPosition {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location_name: Option<String>,
}

/// 设备定位来源
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn current_position(&self) -> Result<RawPosition, AppError>;
}

/// 单个会话内的最近位置缓存，带过期时间
///
/// 每个会话持有自己的实例并通过调用上下文传递，不做进程级共享。
pub struct LocationMemo {
    ttl: Duration,
    slot: Mutex<Option<(NormalizedLocation, Instant)>>,
}

impl LocationMemo {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// 过期时间取自 LOCATION_MEMO_TTL_SECS
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.location_memo_ttl())
    }

    pub fn get(&self) -> Option<NormalizedLocation> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some((loc, stored_at)) if stored_at.elapsed() < self.ttl => Some(loc.clone()),
            Some(_) => {
                *slot = None;
                None
            }
            None => None,
        }
    }

    pub fn store(&self, location: NormalizedLocation) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some((location, Instant::now()));
    }

    pub fn clear(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}

/// 解析当前位置：优先使用未过期的缓存，否则重试获取设备位置后标准化。
///
/// 返回的 future 被丢弃时定位请求随之放弃。定位彻底失败时退回区域默认点，
/// 低可信度的结果不写入缓存。
pub async fn resolve_location(
    source: &dyn PositionSource,
    memo: &LocationMemo,
    policy: &RetryPolicy,
) -> NormalizedLocation {
    if let Some(cached) = memo.get() {
        tracing::debug!("Using memoized location");
        return cached;
    }

    let raw = match policy.run("position fetch", || source.current_position()).await {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Position fetch failed, using fallback: {}", e);
            RawPosition::default()
        }
    };

    let location = normalize(raw.latitude, raw.longitude, raw.location_name.as_deref());
    if location.confidence > Confidence::Low {
        memo.store(location.clone());
    }
    location
}
