//! Configuration loading
//!
//! All settings come from environment variables (`.env` is loaded in main).
//! The parsed [`AppConfig`] is installed once into a process-wide `OnceLock`
//! and read through [`get_config`].

use std::env;
use std::sync::OnceLock;

mod structs;

pub use structs::*;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Parse the environment and install the global configuration.
///
/// Must be called exactly once, before any `get_config()` caller runs.
pub fn init_config() {
    let config = AppConfig::from_env();
    if CONFIG.set(config).is_err() {
        tracing::warn!("Configuration already initialized");
    }
}

/// Access the global configuration. Panics if `init_config` was not called.
pub fn get_config() -> &'static AppConfig {
    CONFIG
        .get()
        .expect("configuration not initialized; call init_config() first")
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or(default),
        Err(_) => default,
    }
}

impl AppConfig {
    /// Build the configuration from environment variables, falling back to
    /// the serde defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = AppConfig::default();

        config.server.host = env_or("SERVER_HOST", &config.server.host);
        config.server.port = env_parse("SERVER_PORT", config.server.port);
        config.server.public_base_url =
            env_or("PUBLIC_BASE_URL", &config.server.public_base_url);

        config.database.database_url = env_or("DATABASE_URL", &config.database.database_url);
        config.database.pool_size = env_parse("DATABASE_POOL_SIZE", config.database.pool_size);
        config.database.timeout = env_parse("DATABASE_TIMEOUT", config.database.timeout);

        config.cache.redis.url = env_or("REDIS_URL", &config.cache.redis.url);
        config.cache.redis.key_prefix = env_or("REDIS_KEY_PREFIX", &config.cache.redis.key_prefix);
        config.cache.memory.max_capacity =
            env_parse("CACHE_MEMORY_CAPACITY", config.cache.memory.max_capacity);
        config.cache.default_ttl = env_parse("CACHE_DEFAULT_TTL", config.cache.default_ttl);

        config.auth.issuer = env_or("OIDC_ISSUER", &config.auth.issuer);
        config.auth.audience = env_or("OIDC_AUDIENCE", &config.auth.audience);

        config.safe_browsing.api_key = env_or("SAFE_BROWSING_API_KEY", "");
        config.safe_browsing.endpoint =
            env_or("SAFE_BROWSING_ENDPOINT", &config.safe_browsing.endpoint);
        config.safe_browsing.timeout_ms =
            env_parse("SAFE_BROWSING_TIMEOUT_MS", config.safe_browsing.timeout_ms);

        config.minter.worker_id = env_parse("WORKER_ID", config.minter.worker_id);

        config.events.stream_key = env_or("CLICKS_STREAM_KEY", &config.events.stream_key);
        config.events.batch_size = env_parse("EVENTS_BATCH_SIZE", config.events.batch_size);
        config.events.flush_interval_ms =
            env_parse("EVENTS_FLUSH_INTERVAL_MS", config.events.flush_interval_ms);
        config.events.max_buffer_size =
            env_parse("EVENTS_MAX_BUFFER_SIZE", config.events.max_buffer_size);
        config.events.max_stream_len =
            env_parse("EVENTS_MAX_STREAM_LEN", config.events.max_stream_len);

        config.ingestor.group = env_or("INGESTOR_GROUP", &config.ingestor.group);
        config.ingestor.consumer = env_or("INGESTOR_CONSUMER", &config.ingestor.consumer);
        config.ingestor.batch_size = env_parse("INGESTOR_BATCH_SIZE", config.ingestor.batch_size);
        config.ingestor.block_ms = env_parse("INGESTOR_BLOCK_MS", config.ingestor.block_ms);
        config.ingestor.flush_interval_secs = env_parse(
            "INGESTOR_FLUSH_INTERVAL_SECS",
            config.ingestor.flush_interval_secs,
        );
        config.ingestor.pending_sweep_secs = env_parse(
            "INGESTOR_PENDING_SWEEP_SECS",
            config.ingestor.pending_sweep_secs,
        );
        config.ingestor.retry_max_backoff_ms = env_parse(
            "INGESTOR_RETRY_MAX_BACKOFF_MS",
            config.ingestor.retry_max_backoff_ms,
        );

        config.analytics.maxminddb_path = env_opt("MAXMINDDB_PATH");
        config.analytics.geoip_api_url = env_or("GEOIP_API_URL", &config.analytics.geoip_api_url);
        config.analytics.hmac_secret = env_or("VISITOR_HMAC_SECRET", "");

        config.rate_limit.per_user = env_parse("RATE_LIMIT_PER_USER", config.rate_limit.per_user);
        config.rate_limit.window_secs =
            env_parse("RATE_LIMIT_WINDOW_SECS", config.rate_limit.window_secs);

        config.logging.level = env_or("LOG_LEVEL", &config.logging.level);
        config.logging.format = env_or("LOG_FORMAT", &config.logging.format);
        config.logging.file = env_opt("LOG_FILE");

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.ingestor.flush_interval_secs, 5);
        assert_eq!(config.ingestor.pending_sweep_secs, 60);
        assert_eq!(config.events.stream_key, "clicks:events");
        assert!(config.cache.redis.key_prefix.ends_with(':'));
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        std::env::set_var("LINKHOP_TEST_BOGUS_PORT", "not-a-number");
        let port: u16 = env_parse("LINKHOP_TEST_BOGUS_PORT", 1234);
        assert_eq!(port, 1234);
        std::env::remove_var("LINKHOP_TEST_BOGUS_PORT");
    }
}
