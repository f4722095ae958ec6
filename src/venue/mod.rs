// 场地模块
// 候选搜索、评分筛选、满员后的场地分配

mod assign;
mod provider;
mod scoring;

pub use assign::{AssignOutcome, VenueAssigner};
pub use provider::{BusinessStatus, PlacesClient, VenueCandidate, VenueProvider};
pub use scoring::{Assessment, MIN_SCORE, Rejection, accepts, assess, display_name, pick_best};
