// 活跃度模块
// 客户端心跳与服务端清理

mod heartbeat;
mod sweep;

pub use heartbeat::{Heartbeat, HeartbeatHandle, HeartbeatSink, HttpHeartbeatSink, Visibility};
pub use sweep::{Reconciler, SweepReport};
