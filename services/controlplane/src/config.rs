use crate::model::GroupTypeCatalogue;
use crate::store::DEFAULT_MAX_LEVEL;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

// Control plane configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub http_bind: SocketAddr,
    pub grpc_bind: SocketAddr,
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub cache: CacheBackend,
    /// `None` keeps key-to-id entries until the thing is removed or disabled.
    pub cache_identity_ttl: Option<Duration>,
    pub gateway_timeout: Duration,
    pub group_max_level: u64,
    pub group_types: GroupTypeCatalogue,
    pub platform_admins: Vec<String>,
    pub event_log_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct ControlPlaneConfigOverride {
    http_bind: Option<String>,
    grpc_bind: Option<String>,
    metrics_bind: Option<String>,
    storage: Option<String>,
    postgres_url: Option<String>,
    postgres_max_connections: Option<u32>,
    cache: Option<String>,
    cache_identity_ttl_secs: Option<u64>,
    gateway_timeout_ms: Option<u64>,
    group_max_level: Option<u64>,
    group_types: Option<String>,
    platform_admins: Option<Vec<String>>,
    event_log_capacity: Option<usize>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(name: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_or(name, default)
        .parse()
        .with_context(|| format!("parse {name}"))
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend {other:?}"),
        }
    }
}

impl CacheBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "disabled" | "none" => Ok(CacheBackend::Disabled),
            other => bail!("unknown cache backend {other:?}"),
        }
    }
}

fn ttl_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl ControlPlaneConfig {
    pub fn from_env() -> Result<Self> {
        let http_bind = parse_env("ARBITER_HTTP_BIND", "0.0.0.0:9000")?;
        let grpc_bind = parse_env("ARBITER_GRPC_BIND", "0.0.0.0:7000")?;
        let metrics_bind = parse_env("ARBITER_METRICS_BIND", "0.0.0.0:9090")?;
        let storage = StorageBackend::parse(&env_or("ARBITER_STORAGE", "memory"))
            .with_context(|| "parse ARBITER_STORAGE")?;
        let postgres = match std::env::var("ARBITER_POSTGRES_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: parse_env("ARBITER_POSTGRES_MAX_CONNECTIONS", "10")?,
                connect_timeout_ms: parse_env("ARBITER_POSTGRES_CONNECT_TIMEOUT_MS", "5000")?,
                acquire_timeout_ms: parse_env("ARBITER_POSTGRES_ACQUIRE_TIMEOUT_MS", "5000")?,
            }),
            Err(_) => None,
        };
        let cache = CacheBackend::parse(&env_or("ARBITER_CACHE", "memory"))
            .with_context(|| "parse ARBITER_CACHE")?;
        let cache_identity_ttl = ttl_from_secs(parse_env("ARBITER_CACHE_IDENTITY_TTL_SECS", "0")?);
        let gateway_timeout =
            Duration::from_millis(parse_env("ARBITER_GATEWAY_TIMEOUT_MS", "1000")?);
        let group_max_level = parse_env(
            "ARBITER_GROUP_MAX_LEVEL",
            &DEFAULT_MAX_LEVEL.to_string(),
        )?;
        let group_types = match std::env::var("ARBITER_GROUP_TYPES") {
            Ok(value) => {
                GroupTypeCatalogue::parse(&value).with_context(|| "parse ARBITER_GROUP_TYPES")?
            }
            Err(_) => GroupTypeCatalogue::default(),
        };
        let platform_admins = split_list(&env_or("ARBITER_PLATFORM_ADMINS", ""));
        let event_log_capacity = parse_env("ARBITER_EVENT_LOG_CAPACITY", "1024")?;

        Ok(Self {
            http_bind,
            grpc_bind,
            metrics_bind,
            storage,
            postgres,
            cache,
            cache_identity_ttl,
            gateway_timeout,
            group_max_level,
            group_types,
            platform_admins,
            event_log_capacity,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("ARBITER_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read ARBITER_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: ControlPlaneConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse control plane config yaml")?;
        if let Some(value) = override_cfg.http_bind {
            self.http_bind = value.parse().with_context(|| "parse http_bind")?;
        }
        if let Some(value) = override_cfg.grpc_bind {
            self.grpc_bind = value.parse().with_context(|| "parse grpc_bind")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = StorageBackend::parse(&value).with_context(|| "parse storage")?;
        }
        if let Some(url) = override_cfg.postgres_url {
            let pg = self.postgres.get_or_insert(PostgresConfig {
                url: String::new(),
                max_connections: 10,
                connect_timeout_ms: 5000,
                acquire_timeout_ms: 5000,
            });
            pg.url = url;
        }
        if let (Some(value), Some(pg)) = (override_cfg.postgres_max_connections, &mut self.postgres)
        {
            pg.max_connections = value;
        }
        if let Some(value) = override_cfg.cache {
            self.cache = CacheBackend::parse(&value).with_context(|| "parse cache")?;
        }
        if let Some(value) = override_cfg.cache_identity_ttl_secs {
            self.cache_identity_ttl = ttl_from_secs(value);
        }
        if let Some(value) = override_cfg.gateway_timeout_ms {
            self.gateway_timeout = Duration::from_millis(value);
        }
        if let Some(value) = override_cfg.group_max_level {
            self.group_max_level = value;
        }
        if let Some(value) = override_cfg.group_types {
            self.group_types =
                GroupTypeCatalogue::parse(&value).with_context(|| "parse group_types")?;
        }
        if let Some(value) = override_cfg.platform_admins {
            self.platform_admins = value;
        }
        if let Some(value) = override_cfg.event_log_capacity {
            self.event_log_capacity = value;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 10] = [
        "ARBITER_HTTP_BIND",
        "ARBITER_STORAGE",
        "ARBITER_POSTGRES_URL",
        "ARBITER_CACHE",
        "ARBITER_CACHE_IDENTITY_TTL_SECS",
        "ARBITER_GATEWAY_TIMEOUT_MS",
        "ARBITER_GROUP_MAX_LEVEL",
        "ARBITER_GROUP_TYPES",
        "ARBITER_PLATFORM_ADMINS",
        "ARBITER_CONFIG",
    ];

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn clean() -> Self {
            let saved = VARS
                .iter()
                .map(|name| (*name, std::env::var(name).ok()))
                .collect();
            for name in VARS {
                unsafe { std::env::remove_var(name) };
            }
            Self { saved }
        }

        fn set(&self, name: &str, value: &str) {
            unsafe { std::env::set_var(name, value) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(value) => unsafe { std::env::set_var(name, value) },
                    None => unsafe { std::env::remove_var(name) },
                }
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_without_env() {
        let _guard = EnvGuard::clean();
        let config = ControlPlaneConfig::from_env().expect("config");
        assert_eq!(config.http_bind.port(), 9000);
        assert_eq!(config.grpc_bind.port(), 7000);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert!(config.postgres.is_none());
        assert_eq!(config.cache, CacheBackend::Memory);
        assert_eq!(config.cache_identity_ttl, None);
        assert_eq!(config.gateway_timeout, Duration::from_millis(1000));
        assert_eq!(config.group_max_level, DEFAULT_MAX_LEVEL);
        assert_eq!(config.group_types.id_of("org"), Some(1));
        assert!(config.platform_admins.is_empty());
    }

    #[test]
    #[serial]
    fn env_overrides_are_parsed() {
        let guard = EnvGuard::clean();
        guard.set("ARBITER_STORAGE", "postgres");
        guard.set("ARBITER_POSTGRES_URL", "postgres://localhost/arbiter");
        guard.set("ARBITER_CACHE", "disabled");
        guard.set("ARBITER_CACHE_IDENTITY_TTL_SECS", "30");
        guard.set("ARBITER_GROUP_TYPES", "tenant=7");
        guard.set("ARBITER_PLATFORM_ADMINS", "root, ops ,");
        let config = ControlPlaneConfig::from_env().expect("config");
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(
            config.postgres.as_ref().map(|pg| pg.url.as_str()),
            Some("postgres://localhost/arbiter")
        );
        assert_eq!(config.cache, CacheBackend::Disabled);
        assert_eq!(config.cache_identity_ttl, Some(Duration::from_secs(30)));
        assert_eq!(config.group_types.id_of("tenant"), Some(7));
        assert_eq!(config.group_types.id_of("org"), None);
        assert_eq!(config.platform_admins, vec!["root", "ops"]);
    }

    #[test]
    #[serial]
    fn invalid_values_carry_context() {
        let guard = EnvGuard::clean();
        guard.set("ARBITER_HTTP_BIND", "not-an-addr");
        let err = ControlPlaneConfig::from_env().expect_err("bad bind");
        assert!(err.to_string().contains("ARBITER_HTTP_BIND"));

        guard.set("ARBITER_HTTP_BIND", "127.0.0.1:0");
        guard.set("ARBITER_STORAGE", "sqlite");
        let err = ControlPlaneConfig::from_env().expect_err("bad storage");
        assert!(err.to_string().contains("ARBITER_STORAGE"));
    }

    #[test]
    #[serial]
    fn yaml_file_overrides_env() {
        let guard = EnvGuard::clean();
        let path = std::env::temp_dir().join(format!("arbiter-config-{}.yaml", std::process::id()));
        fs::write(
            &path,
            "grpc_bind: 127.0.0.1:7100\ngroup_max_level: 3\nplatform_admins: [root]\ncache: disabled\n",
        )
        .expect("write yaml");
        guard.set("ARBITER_CONFIG", path.to_str().expect("utf8 path"));
        let config = ControlPlaneConfig::from_env_or_yaml().expect("config");
        let _ = fs::remove_file(&path);
        assert_eq!(config.grpc_bind.port(), 7100);
        assert_eq!(config.group_max_level, 3);
        assert_eq!(config.platform_admins, vec!["root"]);
        assert_eq!(config.cache, CacheBackend::Disabled);
    }

    #[test]
    #[serial]
    fn missing_yaml_file_is_an_error() {
        let guard = EnvGuard::clean();
        guard.set("ARBITER_CONFIG", "/nonexistent/arbiter.yaml");
        let err = ControlPlaneConfig::from_env_or_yaml().expect_err("missing file");
        assert!(err.to_string().contains("ARBITER_CONFIG"));
    }
}
