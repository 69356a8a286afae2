//! Configuration loading: a base file layered with `APP__`-prefixed
//! environment overrides, validated once at startup.

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSourceConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsvSourceConfig {
    pub csv_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApisConfig {
    pub a: ApiSourceConfig,
    pub c: ApiSourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    pub b: CsvSourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_minute: f64,
    pub burst_capacity: f64,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordCapsConfig {
    pub a: usize,
    pub b: usize,
    pub c: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    pub interval_cron: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub mongodb: MongoConfig,
    pub apis: ApisConfig,
    pub sources: SourcesConfig,
    pub rate_limits: HashMap<String, RateLimitConfig>,
    pub batch_size: usize,
    pub fault_injection: bool,
    pub scheduler: SchedulerConfig,
    pub record_caps: RecordCapsConfig,
    pub static_aliases: HashMap<String, String>,
    pub http_timeout_secs: u64,
}

impl AppConfig {
    /// Load `config/default.toml`, then apply `APP__`-prefixed, `__`-nested
    /// environment variable overrides (e.g. `APP__BATCH_SIZE=10`).
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("batch_size", 5)?
            .set_default("fault_injection", false)?
            .set_default("http_timeout_secs", 10)?
            .set_default("scheduler.interval_cron", "0 */5 * * * *")?
            .set_default("record_caps.a", 10)?
            .set_default("record_caps.b", 5)?
            .set_default("record_caps.c", 3)?
            .set_default("rate_limits.a.requests_per_minute", 30.0)?
            .set_default("rate_limits.a.burst_capacity", 30.0)?
            .set_default("rate_limits.a.retry_backoff_ms", 1000)?
            .set_default("rate_limits.b.requests_per_minute", 60.0)?
            .set_default("rate_limits.b.burst_capacity", 60.0)?
            .set_default("rate_limits.b.retry_backoff_ms", 500)?
            .set_default("rate_limits.c.requests_per_minute", 3.0)?
            .set_default("rate_limits.c.burst_capacity", 3.0)?
            .set_default("rate_limits.c.retry_backoff_ms", 2000)?
            .set_default("mongodb.uri", "mongodb://localhost:27017")?
            .set_default("mongodb.database", "crypto_etl")?
            .set_default("apis.a.url", "https://example.invalid/api/a")?
            .set_default("apis.c.url", "https://example.invalid/api/c")?
            .set_default("sources.b.csv_path", "data/source_b.csv")?
            .set_default("static_aliases.time", "timestamp")?
            .set_default("static_aliases.ticker", "symbol")?
            .set_default("static_aliases.usd_price", "price_usd")?
            .set_default("static_aliases.tx_volume", "volume_24h")?
            .set_default("static_aliases.created_at", "timestamp")?
            .set_default("static_aliases.price_timestamp", "timestamp")?
            .build()?;

        let app_config: AppConfig = settings.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.batch_size >= 1, "batch_size must be >= 1");
        for (source, rl) in &self.rate_limits {
            anyhow::ensure!(
                rl.burst_capacity > 0.0,
                "rate_limits.{source}.burst_capacity must be > 0"
            );
            anyhow::ensure!(
                rl.requests_per_minute > 0.0,
                "rate_limits.{source}.requests_per_minute must be > 0"
            );
        }
        Ok(())
    }

    pub fn rate_limit_for(&self, source: &str) -> RateLimitConfig {
        self.rate_limits
            .get(&source.to_ascii_lowercase())
            .cloned()
            .unwrap_or(RateLimitConfig {
                requests_per_minute: 30.0,
                burst_capacity: 30.0,
                retry_backoff_ms: 1000,
            })
    }
}
