// 成员模块
// 加入、离开、心跳记录

mod ledger;

pub use ledger::{JoinReceipt, LeaveReceipt, MembershipLedger};
