//! # tb-configs
//!
//! Layered settings for the Tagboard binary: built-in defaults, then an
//! optional TOML file, then `TAGBOARD__SECTION__KEY` environment variables
//! (a `.env` file in the working directory is read first).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use tb_core::config::CoreConfig;

/// Environment variable naming the settings file.
pub const CONFIG_PATH_VAR: &str = "TAGBOARD_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "tagboard.toml";
/// Ten years.
pub const MAX_SESSION_LIFESPAN_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub owner: OwnerSettings,
    pub session: SessionSettings,
    pub limits: LimitSettings,
    pub timeouts: TimeoutSettings,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "sqlite://tagboard.db".to_string(),
            max_connections: 8,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OwnerSettings {
    pub username: String,
    /// Only needed the first time, to create the account.
    #[serde(deserialize_with = "secret")]
    pub password: Option<SecretString>,
}

impl Default for OwnerSettings {
    fn default() -> Self {
        Self {
            username: CoreConfig::default().owner_username,
            password: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub lifespan_secs: u64,
    pub renew_grace_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let core = CoreConfig::default();
        Self {
            lifespan_secs: core.session_lifespan.as_secs(),
            renew_grace_secs: core.renew_grace.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    pub max_token_uses: i64,
    pub max_page_count: u32,
    pub password_min_len: usize,
    pub max_tag_len: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        let core = CoreConfig::default();
        Self {
            max_token_uses: core.max_token_uses,
            max_page_count: core.max_page_count,
            password_min_len: core.password_min_len,
            max_tag_len: core.max_tag_len,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub hash_secs: u64,
    pub transaction_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        let core = CoreConfig::default();
        Self {
            hash_secs: core.hash_timeout.as_secs(),
            transaction_secs: core.transaction_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info,sqlx=warn".to_string(),
            json: false,
        }
    }
}

fn secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|s| !s.is_empty())
        .map(SecretString::from))
}

impl Settings {
    /// Reads `.env`, then the file named by `TAGBOARD_CONFIG` (default
    /// `tagboard.toml`, optional), then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_from(Path::new(&path))
    }

    /// Same as [`Settings::load`] without touching `.env`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix("TAGBOARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(invalid("database.max_connections", "must be at least 1"));
        }
        if let Err(e) = tb_core::validate::username(&self.owner.username) {
            return Err(invalid("owner.username", e));
        }
        if !(1..=MAX_SESSION_LIFESPAN_SECS).contains(&self.session.lifespan_secs) {
            return Err(invalid(
                "session.lifespan_secs",
                format!("must be between 1 and {MAX_SESSION_LIFESPAN_SECS}"),
            ));
        }
        if self.session.renew_grace_secs > self.session.lifespan_secs {
            return Err(invalid("session.renew_grace_secs", "must not exceed the lifespan"));
        }
        if self.limits.max_token_uses < 1 {
            return Err(invalid("limits.max_token_uses", "must be at least 1"));
        }
        if self.limits.max_page_count == 0 {
            return Err(invalid("limits.max_page_count", "must be at least 1"));
        }
        if self.timeouts.hash_secs == 0 || self.timeouts.transaction_secs == 0 {
            return Err(invalid("timeouts", "must be at least one second"));
        }
        Ok(())
    }

    /// The slice of settings the storage core consumes.
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            owner_username: self.owner.username.clone(),
            session_lifespan: Duration::from_secs(self.session.lifespan_secs),
            renew_grace: Duration::from_secs(self.session.renew_grace_secs),
            max_token_uses: self.limits.max_token_uses,
            max_page_count: self.limits.max_page_count,
            password_min_len: self.limits.password_min_len,
            max_tag_len: self.limits.max_tag_len,
            hash_timeout: Duration::from_secs(self.timeouts.hash_secs),
            transaction_timeout: Duration::from_secs(self.timeouts.transaction_secs),
        }
    }
}

fn invalid(key: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}
