mod handler;
mod model;

pub use handler::{find_by_id, group_events, keep_alive, leave_group, match_group};
pub use model::{GroupDetail, GroupInfo, MatchRequest, MatchResponse};
