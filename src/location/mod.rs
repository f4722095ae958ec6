// 位置模块
// 坐标校验、地标修正、可信度与搜索半径

mod memo;
mod normalizer;

pub use memo::{LocationMemo, PositionSource, RawPosition, resolve_location};
pub use normalizer::{
    Confidence, Coordinates, LocationSource, NormalizedLocation, REGIONAL_DEFAULT, normalize,
    search_radius,
};
