// 客户端心跳
// 前台时按固定间隔上报 last_seen，后台暂停；连续失败达到上限后本会话不再发送

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LivenessConfig;
use crate::error::AppError;
use crate::membership::MembershipLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Foreground,
    Background,
}

/// 心跳的接收端
#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn beat(&self, group_id: &str, user_id: &str) -> Result<(), AppError>;
}

#[async_trait]
impl HeartbeatSink for MembershipLedger {
    async fn beat(&self, group_id: &str, user_id: &str) -> Result<(), AppError> {
        self.heartbeat(group_id, user_id).await.map(|_| ())
    }
}

/// 通过 HTTP 调用服务端 keep-alive 接口
pub struct HttpHeartbeatSink {
    client: Client,
    endpoint: String,
    token: String,
}

impl HttpHeartbeatSink {
    pub fn new(
        api_base_uri: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Provider(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/groups/keep-alive", api_base_uri.trim_end_matches('/')),
            token: token.into(),
        })
    }
}

#[async_trait]
impl HeartbeatSink for HttpHeartbeatSink {
    async fn beat(&self, group_id: &str, _user_id: &str) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({ "group_id": group_id }))
            .send()
            .await
            .map_err(|e| AppError::Provider(format!("keep-alive request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Provider(format!(
                "keep-alive rejected with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HeartbeatState {
    attempts: AtomicU64,
    consecutive_failures: AtomicU32,
    tripped: AtomicBool,
}

pub struct Heartbeat {
    sink: Arc<dyn HeartbeatSink>,
    group_id: String,
    user_id: String,
    interval: Duration,
    resume_delay: Duration,
    max_failures: u32,
}

impl Heartbeat {
    pub fn new(
        sink: Arc<dyn HeartbeatSink>,
        group_id: impl Into<String>,
        user_id: impl Into<String>,
        config: &LivenessConfig,
    ) -> Self {
        Self {
            sink,
            group_id: group_id.into(),
            user_id: user_id.into(),
            interval: config.heartbeat_interval(),
            resume_delay: config.resume_delay(),
            max_failures: config.heartbeat_max_failures.max(1),
        }
    }

    /// 在前台状态下启动心跳任务
    pub fn spawn(self) -> HeartbeatHandle {
        let (visibility_tx, visibility_rx) = watch::channel(Visibility::Foreground);
        let cancel = CancellationToken::new();
        let state = Arc::new(HeartbeatState::default());

        let task = tokio::spawn(self.run(visibility_rx, cancel.clone(), state.clone()));

        HeartbeatHandle {
            visibility: visibility_tx,
            cancel,
            state,
            task,
        }
    }

    async fn run(
        self,
        mut visibility: watch::Receiver<Visibility>,
        cancel: CancellationToken,
        state: Arc<HeartbeatState>,
    ) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *visibility.borrow_and_update() == Visibility::Background {
                debug!(group_id = %self.group_id, "Heartbeat suspended");
                if !wait_for_foreground(&mut visibility, &cancel).await {
                    return;
                }

                // 恢复前台后稍等片刻，避开可见性切换过程中的竞争
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = time::sleep(self.resume_delay) => {}
                }
                if *visibility.borrow() == Visibility::Background {
                    continue;
                }

                debug!(group_id = %self.group_id, "Heartbeat resumed");
                if !self.beat(&state).await {
                    return;
                }
                ticker.reset();
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = visibility.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    if !self.beat(&state).await {
                        return;
                    }
                }
            }
        }
    }

    /// 发送一次心跳，返回是否继续
    async fn beat(&self, state: &HeartbeatState) -> bool {
        state.attempts.fetch_add(1, Ordering::SeqCst);

        match self.sink.beat(&self.group_id, &self.user_id).await {
            Ok(()) => {
                state.consecutive_failures.store(0, Ordering::SeqCst);
                true
            }
            Err(e) => {
                let failures = state.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    group_id = %self.group_id,
                    failures,
                    "Heartbeat failed: {}", e
                );
                if failures >= self.max_failures {
                    state.tripped.store(true, Ordering::SeqCst);
                    info!(group_id = %self.group_id, "Heartbeat disabled for this session");
                    false
                } else {
                    true
                }
            }
        }
    }
}

async fn wait_for_foreground(
    visibility: &mut watch::Receiver<Visibility>,
    cancel: &CancellationToken,
) -> bool {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            changed = visibility.changed() => {
                if changed.is_err() {
                    return false;
                }
                if *visibility.borrow_and_update() == Visibility::Foreground {
                    return true;
                }
            }
        }
    }
}

/// 心跳任务句柄，丢弃后任务随之结束
pub struct HeartbeatHandle {
    visibility: watch::Sender<Visibility>,
    cancel: CancellationToken,
    state: Arc<HeartbeatState>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub fn set_visibility(&self, visibility: Visibility) {
        self.visibility.send_replace(visibility);
    }

    pub fn attempts(&self) -> u64 {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.consecutive_failures.load(Ordering::SeqCst)
    }

    /// 熔断后不再发送
    pub fn is_tripped(&self) -> bool {
        self.state.tripped.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}
