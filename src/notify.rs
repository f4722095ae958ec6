// 通知分发
// 撮合核心只产生语义事件，投递和格式化由外部通知层负责

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::database::Venue;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GroupNotification {
    MemberJoined {
        group_id: String,
        user_id: String,
    },
    MemberLeft {
        group_id: String,
        user_id: String,
    },
    GroupFilled {
        group_id: String,
    },
    VenueAssigned {
        group_id: String,
        venue: Venue,
        meeting_time: DateTime<Utc>,
    },
    GroupCancelled {
        group_id: String,
    },
}

impl GroupNotification {
    pub fn group_id(&self) -> &str {
        match self {
            GroupNotification::MemberJoined { group_id, .. }
            | GroupNotification::MemberLeft { group_id, .. }
            | GroupNotification::GroupFilled { group_id }
            | GroupNotification::VenueAssigned { group_id, .. }
            | GroupNotification::GroupCancelled { group_id } => group_id,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: GroupNotification);
}

/// 默认实现：写入结构化日志
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: GroupNotification) {
        match serde_json::to_string(&notification) {
            Ok(body) => tracing::info!(
                group_id = %notification.group_id(),
                notification = %body,
                "Group notification"
            ),
            Err(e) => tracing::warn!("Failed to serialize notification: {}", e),
        }
    }
}
