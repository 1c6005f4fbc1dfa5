use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub sync: SyncConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Local snapshot cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub database_url: String,
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Upper bound for a single remote call; `None` leaves timing to the transport.
    pub timeout_ms: Option<u64>,
    /// Artificial latency added by the in-memory backend, for exercising in-flight states.
    pub latency_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            cache: CacheConfig {
                database_url: "sqlite::memory:".to_string(),
                max_age_secs: 60 * 60,
            },
            sync: SyncConfig { interval_ms: 30_000 },
            gateway: GatewayConfig {
                timeout_ms: None,
                latency_ms: 0,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("SERVER_PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()
                    .unwrap_or(3000),
            },
            cache: CacheConfig {
                database_url: env::var("CACHE_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite:social_sync_cache.db?mode=rwc".to_string()),
                max_age_secs: env::var("CACHE_MAX_AGE_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .unwrap_or(3600),
            },
            sync: SyncConfig {
                interval_ms: env::var("SYNC_INTERVAL_MS")
                    .unwrap_or_else(|_| "30000".to_string())
                    .parse()
                    .unwrap_or(30_000),
            },
            gateway: GatewayConfig {
                timeout_ms: env::var("GATEWAY_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok()),
                latency_ms: env::var("GATEWAY_LATENCY_MS")
                    .unwrap_or_else(|_| "0".to_string())
                    .parse()
                    .unwrap_or(0),
            },
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache.max_age_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync.interval_ms)
    }

    pub fn gateway_timeout(&self) -> Option<Duration> {
        self.gateway.timeout_ms.map(Duration::from_millis)
    }
}
