/// Configuration loading.
///
/// The config is a YAML file whose path comes from `CONFIG_PATH`
/// (default `config/local.yaml`). Every field has a default so a partial
/// file works; durations are plain seconds.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use taskhive_shared::db::DatabaseConfig;
use taskhive_shared::kv::redis::RedisConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/local.yaml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub http: HttpConfig,
    pub database: DbConfig,
    pub redis: RedisSection,
    pub jwt: JwtConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub ratelimit: RateLimitConfig,
    pub idempotency: IdempotencyConfig,
    pub email: EmailConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub admin: AdminConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub addr: String,
    pub read_timeout: u64,
    pub write_timeout: u64,
    pub idle_timeout: u64,
    pub shutdown_timeout: u64,

    /// Per-request deadline applied to every handler, in seconds.
    pub request_timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            addr: ":8080".to_string(),
            read_timeout: 10,
            write_timeout: 10,
            idle_timeout: 60,
            shutdown_timeout: 10,
            request_timeout: 5,
        }
    }
}

impl HttpConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    /// Bind address; a bare `:port` binds all interfaces.
    pub fn bind_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub user: String,
    pub pass: String,
    pub max_open: u32,
    pub max_idle: u32,
    pub max_lifetime: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            db: "taskhive".to_string(),
            user: "taskhive".to_string(),
            pass: "taskhive".to_string(),
            max_open: 10,
            max_idle: 5,
            max_lifetime: 1800,
        }
    }
}

impl DbConfig {
    pub fn to_pool_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            host: self.host.clone(),
            port: self.port,
            db: self.db.clone(),
            user: self.user.clone(),
            pass: self.pass.clone(),
            max_open: self.max_open,
            max_idle: self.max_idle,
            max_lifetime_secs: self.max_lifetime,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedisSection {
    pub addr: String,
    pub pass: String,
    pub db: i64,
}

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            addr: "localhost:6379".to_string(),
            pass: String::new(),
            db: 0,
        }
    }
}

impl RedisSection {
    pub fn to_kv_config(&self) -> RedisConfig {
        RedisConfig {
            addr: self.addr.clone(),
            pass: self.pass.clone(),
            db: self.db,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JwtConfig {
    /// Access token lifetime in seconds.
    pub access_ttl: u64,

    /// Refresh token lifetime in seconds.
    pub refresh_ttl: u64,

    pub secret: String,
    pub issuer: String,

    /// Allowed clock skew in seconds when validating timestamps.
    pub clock_skew: u64,

    pub blacklist: BlacklistConfig,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            access_ttl: 15 * 60,
            refresh_ttl: 30 * 24 * 3600,
            secret: "change-me-please-change-me-please-32".to_string(),
            issuer: "taskhive".to_string(),
            clock_skew: 60,
            blacklist: BlacklistConfig::default(),
        }
    }
}

impl JwtConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_ttl)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlacklistConfig {
    pub enabled: bool,

    /// What to do when the blacklist store cannot answer: `true` admits
    /// the token (availability first), `false` rejects it.
    pub fail_open: bool,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_open: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// bcrypt cost; the auth service rejects values outside [10, 14].
    pub bcrypt_cost: u32,

    pub login_per_min: i64,
    pub refresh_per_min: i64,
    pub lockout: LockoutConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: 12,
            login_per_min: 5,
            refresh_per_min: 20,
            lockout: LockoutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockoutConfig {
    pub max_attempts: u32,

    /// Ban duration (and failure-counter TTL) in seconds.
    pub lock_ttl: u64,

    pub key_max_len: usize,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lock_ttl: 900,
            key_max_len: 128,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Task list cache TTL in seconds.
    pub task_ttl: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            task_ttl: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_seconds: u64,
    pub user_per_min: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 60,
            user_per_min: 100,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdempotencyConfig {
    pub enabled: bool,

    /// In-flight lock TTL in seconds.
    pub lock_ttl: u64,

    /// Stored response TTL in seconds.
    pub response_ttl: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock_ttl: 15,
            response_ttl: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmailConfig {
    pub base_url: String,

    /// Outbound request timeout in seconds.
    pub timeout: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            base_url: "http://email-mock:8081".to_string(),
            timeout: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    pub max_requests: u32,

    /// Rolling interval that clears failure counts while closed, seconds.
    pub interval: u64,

    /// How long the breaker stays open before probing, seconds.
    pub timeout: u64,

    pub failure_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_requests: 3,
            interval: 60,
            timeout: 30,
            failure_threshold: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AdminConfig {
    /// Users allowed to call the integrity endpoint.
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// debug | info | warn | error
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads the file named by `CONFIG_PATH`, falling back to
    /// `config/local.yaml`.
    pub fn load_from_env() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(&path)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("cannot parse config {}: {e}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_an_empty_document() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.http.addr, ":8080");
        assert_eq!(config.http.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.jwt.access_ttl(), Duration::from_secs(900));
        assert_eq!(config.jwt.refresh_ttl(), Duration::from_secs(2_592_000));
        assert!(config.jwt.blacklist.enabled);
        assert!(config.jwt.blacklist.fail_open);
        assert_eq!(config.auth.bcrypt_cost, 12);
        assert_eq!(config.ratelimit.user_per_min, 100);
        assert!(config.admin.user_ids.is_empty());
    }

    #[test]
    fn partial_sections_keep_sibling_defaults() {
        let config: Config = serde_yaml::from_str(
            "jwt:\n  secret: some-other-secret-that-is-32-bytes!\n  blacklist:\n    fail_open: false\nauth:\n  bcrypt_cost: 10\n",
        )
        .unwrap();
        assert_eq!(config.jwt.secret, "some-other-secret-that-is-32-bytes!");
        assert!(!config.jwt.blacklist.fail_open);
        assert!(config.jwt.blacklist.enabled, "sibling default survives");
        assert_eq!(config.auth.bcrypt_cost, 10);
        assert_eq!(config.auth.login_per_min, 5);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_yaml::from_str::<Config>("nonsense: 1\n").is_err());
    }
}
