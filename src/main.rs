use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use meetup_backend::{
    AppState,
    cache::{CachedGroupSource, GroupCache, spawn_invalidator},
    config::Config,
    create_router,
    database::{GroupStore, PgGroupStore},
    liveness::Reconciler,
    membership::MembershipLedger,
    notify::{LogNotifier, Notifier},
    realtime::ChangeBus,
    venue::{PlacesClient, VenueAssigner},
};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    // 设置数据库连接池
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'meetup_backend';")
                    .await?;
                Ok(())
            })
        })
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to Postgres");

    let pg_store = PgGroupStore::new(pool);
    pg_store.migrate().await.expect("Failed to run migrations");
    let store: Arc<dyn GroupStore> = Arc::new(pg_store);

    // 设置 Redis 客户端
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Failed to create Redis client");
    let cache = Arc::new(GroupCache::new(Arc::new(redis_client)));

    let bus = Arc::new(ChangeBus::new(config.realtime.broadcast_capacity));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let shutdown = CancellationToken::new();

    // 满员信号交给场地分配任务
    let (filled_tx, filled_rx) = mpsc::unbounded_channel();
    let ledger = Arc::new(
        MembershipLedger::new(store.clone(), bus.clone(), notifier.clone())
            .with_filled_channel(filled_tx.clone()),
    );

    let provider =
        Arc::new(PlacesClient::new(&config.venue).expect("Failed to create venue client"));
    let assigner = Arc::new(VenueAssigner::new(
        store.clone(),
        provider,
        bus.clone(),
        notifier,
        &config.venue,
    ));
    let venue_worker = assigner.spawn_worker(filled_rx, shutdown.clone());

    let reconciler = Arc::new(
        Reconciler::new(ledger.clone(), config.liveness.inactivity_threshold())
            .with_venue_retry(filled_tx),
    );
    let sweeper = reconciler.spawn(config.liveness.sweep_interval(), shutdown.clone());

    let invalidator = spawn_invalidator(cache.clone(), &bus, shutdown.clone());

    let state = AppState::new(config.clone(), ledger)
        .with_group_source(Arc::new(CachedGroupSource::new(cache, store)));
    let app = create_router(state);

    // 启动服务器
    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");
    let signal = shutdown.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await
        .expect("Failed to start server");

    shutdown.cancel();
    let _ = tokio::join!(venue_worker, sweeper, invalidator);
}
