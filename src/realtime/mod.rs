//! 变更传播：按群组的发布/订阅通道，以及客户端的合并拉取逻辑

pub mod bus;
pub mod watcher;

pub use bus::{ChangeBus, ChangeEvent, ChangeKind, Subscription, Table};
pub use watcher::{
    GroupSnapshot, GroupSource, GroupWatcher, OptimisticChange, next_coalesced,
};
