// 数据库模块
// 包含实体定义、存储接口及其 Postgres / 内存实现

pub mod memory;
pub mod models;
pub mod operations;
pub mod store;

// 重新导出常用类型，方便其他模块使用
pub use memory::MemoryGroupStore;
pub use models::group::{Group, GroupStatus, NewGroup, Participant, ParticipantStatus, Venue};
pub use operations::group::PgGroupStore;
pub use store::{GroupStore, JoinOutcome, LeaveOutcome, Recount};
