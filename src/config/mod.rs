use std::env;
use std::str::FromStr;
use std::time::Duration;

/// 撮合相关配置
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MatchingConfig {
    pub group_capacity: i32,
    pub radius_high_m: f64,
    pub radius_medium_m: f64,
    pub radius_low_m: f64,
    pub max_search_radius: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            group_capacity: 5,
            radius_high_m: 1_500.0,
            radius_medium_m: 3_000.0,
            radius_low_m: 8_000.0,
            max_search_radius: 10_000.0,
        }
    }
}

/// 心跳与清理任务配置
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LivenessConfig {
    pub heartbeat_interval_secs: u64,
    pub heartbeat_resume_delay_ms: u64,
    pub heartbeat_max_failures: u32,
    pub inactivity_threshold_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            heartbeat_resume_delay_ms: 500,
            heartbeat_max_failures: 3,
            inactivity_threshold_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

impl LivenessConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn resume_delay(&self) -> Duration {
        Duration::from_millis(self.heartbeat_resume_delay_ms)
    }

    pub fn inactivity_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.inactivity_threshold_secs as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RealtimeConfig {
    pub refetch_window_secs: u64,
    pub broadcast_capacity: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            refetch_window_secs: 5,
            broadcast_capacity: 128,
        }
    }
}

impl RealtimeConfig {
    pub fn refetch_window(&self) -> Duration {
        Duration::from_secs(self.refetch_window_secs)
    }
}

/// 场地搜索服务配置
#[derive(Debug, Clone, serde::Deserialize)]
pub struct VenueConfig {
    pub api_url: String,
    pub api_key: String,
    pub search_radius_m: f64,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub meeting_lead_minutes: i64,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            api_url: "https://maps.googleapis.com/maps/api/place/nearbysearch/json".into(),
            api_key: String::new(),
            search_radius_m: 1_500.0,
            timeout_secs: 20,
            max_attempts: 3,
            meeting_lead_minutes: 60,
        }
    }
}

impl VenueConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub jwt_expiration_secs: u64,
    pub temp_token_expiration_secs: u64,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub location_memo_ttl_secs: u64,
    pub matching: MatchingConfig,
    pub liveness: LivenessConfig,
    pub realtime: RealtimeConfig,
    pub venue: VenueConfig,
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let jwt_expiration = env::var("JWT_EXPIRATION")
            .unwrap_or_default()
            .trim_end_matches('h')
            .parse::<u64>()
            .unwrap_or(24);
        let temp_token_expiration = env::var("TEMP_TOKEN_EXPIRATION")
            .unwrap_or_default()
            .trim_end_matches('h')
            .parse::<u64>()
            .unwrap_or(1);

        let matching_defaults = MatchingConfig::default();
        let liveness_defaults = LivenessConfig::default();
        let realtime_defaults = RealtimeConfig::default();
        let venue_defaults = VenueConfig::default();

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_expiration_secs: jwt_expiration * 3600,
            temp_token_expiration_secs: temp_token_expiration * 3600,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "::".into()),
            server_port: var_or("SERVER_PORT", 3000),
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/api".into()),
            location_memo_ttl_secs: var_or("LOCATION_MEMO_TTL_SECS", 120),
            matching: MatchingConfig {
                group_capacity: var_or("GROUP_CAPACITY", matching_defaults.group_capacity),
                radius_high_m: var_or("RADIUS_HIGH_M", matching_defaults.radius_high_m),
                radius_medium_m: var_or("RADIUS_MEDIUM_M", matching_defaults.radius_medium_m),
                radius_low_m: var_or("RADIUS_LOW_M", matching_defaults.radius_low_m),
                max_search_radius: var_or(
                    "MAX_SEARCH_RADIUS",
                    matching_defaults.max_search_radius,
                ),
            },
            liveness: LivenessConfig {
                heartbeat_interval_secs: var_or(
                    "HEARTBEAT_INTERVAL_SECS",
                    liveness_defaults.heartbeat_interval_secs,
                ),
                heartbeat_resume_delay_ms: var_or(
                    "HEARTBEAT_RESUME_DELAY_MS",
                    liveness_defaults.heartbeat_resume_delay_ms,
                ),
                heartbeat_max_failures: var_or(
                    "HEARTBEAT_MAX_FAILURES",
                    liveness_defaults.heartbeat_max_failures,
                ),
                inactivity_threshold_secs: var_or(
                    "INACTIVITY_THRESHOLD_SECS",
                    liveness_defaults.inactivity_threshold_secs,
                ),
                sweep_interval_secs: var_or(
                    "SWEEP_INTERVAL_SECS",
                    liveness_defaults.sweep_interval_secs,
                ),
            },
            realtime: RealtimeConfig {
                refetch_window_secs: var_or(
                    "REFETCH_WINDOW_SECS",
                    realtime_defaults.refetch_window_secs,
                ),
                broadcast_capacity: var_or(
                    "BROADCAST_CAPACITY",
                    realtime_defaults.broadcast_capacity,
                ),
            },
            venue: VenueConfig {
                api_url: env::var("VENUE_API_URL").unwrap_or(venue_defaults.api_url),
                api_key: env::var("VENUE_API_KEY").unwrap_or_default(),
                search_radius_m: var_or("VENUE_SEARCH_RADIUS_M", venue_defaults.search_radius_m),
                timeout_secs: var_or("VENUE_TIMEOUT_SECS", venue_defaults.timeout_secs),
                max_attempts: var_or("VENUE_MAX_ATTEMPTS", venue_defaults.max_attempts),
                meeting_lead_minutes: var_or(
                    "MEETING_LEAD_MINUTES",
                    venue_defaults.meeting_lead_minutes,
                ),
            },
        })
    }

    /// 不依赖环境变量的配置，供测试和本地内存模式使用
    pub fn for_tests() -> Self {
        Config {
            database_url: String::new(),
            redis_url: "redis://127.0.0.1:6379".into(),
            jwt_secret: "test-secret-not-for-production".into(),
            jwt_expiration_secs: 24 * 3600,
            temp_token_expiration_secs: 3600,
            server_host: "127.0.0.1".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            location_memo_ttl_secs: 120,
            matching: MatchingConfig::default(),
            liveness: LivenessConfig::default(),
            realtime: RealtimeConfig::default(),
            venue: VenueConfig::default(),
        }
    }

    pub fn location_memo_ttl(&self) -> Duration {
        Duration::from_secs(self.location_memo_ttl_secs)
    }
}
