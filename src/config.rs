use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub brain: BrainConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cli: CliConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            brain: BrainConfig::default(),
            storage: StorageConfig::default(),
            cli: CliConfig::default(),
        }
    }
}

impl BotConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let config: Self = from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_str(s: &str) -> ConfigResult<Self> {
        let config: Self = from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".to_string()));
        }
        match self.storage.backend {
            StorageBackend::File if self.storage.path.is_none() => Err(ConfigError::Invalid(
                "storage.path is required for the file backend".to_string(),
            )),
            StorageBackend::Redis if self.storage.redis.addr.trim().is_empty() => Err(
                ConfigError::Invalid("storage.redis.addr must not be empty".to_string()),
            ),
            StorageBackend::Redis if self.storage.redis.key.is_empty() => Err(
                ConfigError::Invalid("storage.redis.key must not be empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrainConfig {
    /// Per handler invocation; zero disables the deadline.
    #[serde(default = "default_handler_timeout", with = "duration_ms")]
    pub handler_timeout: Duration,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            handler_timeout: default_handler_timeout(),
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub redis: RedisConfig,
}

/// Every value lives in one Redis hash named `key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_addr")]
    pub addr: String,

    #[serde(default = "default_redis_key")]
    pub key: String,

    /// Never written back out, so `check` does not print it.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default)]
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: default_redis_addr(),
            key: default_redis_key(),
            password: None,
            db: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default = "default_author")]
    pub author: String,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            author: default_author(),
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> ConfigResult<T> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> ConfigResult<T> {
    Ok(serde_json::from_str(s)?)
}

fn default_name() -> String {
    "Botty".to_string()
}
fn default_handler_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_redis_addr() -> String {
    "localhost:6379".to_string()
}
fn default_redis_key() -> String {
    "botty".to_string()
}
fn default_prefix() -> String {
    "> ".to_string()
}
fn default_author() -> String {
    "cli".to_string()
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = BotConfig::from_str("{}").unwrap();
        assert_eq!(config, BotConfig::default());
        assert_eq!(config.name, "Botty");
        assert_eq!(config.brain.handler_timeout, Duration::from_secs(60));
        assert_eq!(config.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn test_partial_override() {
        let config = BotConfig::from_str(
            r#"{
                "name": "Jarvis",
                "brain": { "handler_timeout": 0 },
                "storage": { "backend": "file", "path": "/tmp/botty.json" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.name, "Jarvis");
        assert!(config.brain.handler_timeout.is_zero());
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.cli, CliConfig::default());
    }

    #[test]
    fn test_file_backend_requires_path() {
        let err = BotConfig::from_str(r#"{ "storage": { "backend": "file" } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "cli": {{ "prefix": "$ " }} }}"#).unwrap();

        let config = BotConfig::from_file(file.path()).unwrap();
        assert_eq!(config.cli.prefix, "$ ");
        assert_eq!(config.cli.author, "cli");
    }

    #[test]
    fn test_roundtrip_keeps_milliseconds() {
        let mut config = BotConfig::default();
        config.brain.handler_timeout = Duration::from_millis(1500);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""handler_timeout":1500"#));
        assert_eq!(BotConfig::from_str(&json).unwrap(), config);
    }

    #[test]
    fn test_backend_parses_from_cli_strings() {
        assert_eq!("file".parse::<StorageBackend>().unwrap(), StorageBackend::File);
        assert_eq!("redis".parse::<StorageBackend>().unwrap(), StorageBackend::Redis);
        assert_eq!(StorageBackend::Memory.to_string(), "memory");
    }

    #[test]
    fn test_redis_settings() {
        let config = BotConfig::from_str(
            r#"{
                "storage": {
                    "backend": "redis",
                    "redis": { "addr": "cache:6380", "password": "hunter2", "db": 3 }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Redis);
        assert_eq!(config.storage.redis.addr, "cache:6380");
        assert_eq!(config.storage.redis.key, "botty");
        assert_eq!(config.storage.redis.password.as_deref(), Some("hunter2"));
        assert_eq!(config.storage.redis.db, 3);

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));

        let err = BotConfig::from_str(
            r#"{ "storage": { "backend": "redis", "redis": { "addr": "" } } }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
