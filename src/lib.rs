use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use config::Config;
use database::GroupStore;
use matching::Matchmaker;
use membership::MembershipLedger;
use realtime::{ChangeBus, GroupSource};

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod liveness;
pub mod location;
pub mod matching;
pub mod membership;
pub mod middleware;
pub mod notify;
pub mod realtime;
pub mod retry;
pub mod routes;
pub mod utils;
pub mod venue;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn GroupStore>,
    pub bus: Arc<ChangeBus>,
    pub ledger: Arc<MembershipLedger>,
    pub matchmaker: Arc<Matchmaker>,
    /// 群组查询入口，生产环境带缓存
    pub groups: Arc<dyn GroupSource>,
}

impl AppState {
    /// 用给定的账本组装状态，群组查询直接走存储
    pub fn new(config: Config, ledger: Arc<MembershipLedger>) -> Self {
        let store = ledger.store().clone();
        let bus = ledger.bus().clone();
        let matchmaker = Arc::new(Matchmaker::new(ledger.clone(), config.matching.clone()));
        let groups: Arc<dyn GroupSource> = Arc::new(store.clone());

        Self {
            config,
            store,
            bus,
            ledger,
            matchmaker,
            groups,
        }
    }

    pub fn with_group_source(mut self, groups: Arc<dyn GroupSource>) -> Self {
        self.groups = groups;
        self
    }
}

/// 所有群组接口都需要登录
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/groups/match", post(routes::group::match_group))
        .route("/groups/leave", post(routes::group::leave_group))
        .route("/groups/keep-alive", post(routes::group::keep_alive))
        .route("/groups/by-id", get(routes::group::find_by_id))
        .route("/groups/events", get(routes::group::group_events))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let router = Router::new()
        .nest(&state.config.api_base_uri, protected_routes)
        .layer(axum::middleware::from_fn(middleware::log_errors));

    // 开发环境允许跨域
    #[cfg(debug_assertions)]
    let router = router.layer(tower_http::cors::CorsLayer::permissive());

    router.with_state(state)
}
