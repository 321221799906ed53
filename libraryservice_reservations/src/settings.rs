use std::fmt;

use serde::Deserialize;

use crate::api::UserId;

/// Environment variables override files, e.g. `LIBRARYSERVICE__DATABASE__PASSWORD`
const ENV_PREFIX: &str = "LIBRARYSERVICE";
const SETTINGS_FILE: &str = "libraryservice";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    pub telemetry: TelemetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Used for requests that do not carry an identity header
    pub default_user_id: Option<UserId>,
    /// Rejects requests without an identity header, default_user_id is ignored
    pub require_identity: bool,
    pub use_in_memory_db: bool,
}

#[derive(Clone, Deserialize)]
pub struct DatabaseSettings {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetrySettings {
    pub jaeger_enabled: bool,
}

impl DatabaseSettings {
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.hostname)
            .port(self.port)
            .user(&self.username)
            .password(&self.password)
            .dbname(&self.database_name);
        config
    }
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database_name", &self.database_name)
            .finish()
    }
}

fn builder_with_defaults(
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    config::Config::builder()
        .set_default("application.host", "0.0.0.0")?
        .set_default("application.port", 8080)?
        .set_default("application.default_user_id", 1)?
        .set_default("application.require_identity", false)?
        .set_default("application.use_in_memory_db", false)?
        .set_default("database.hostname", "127.0.0.1")?
        .set_default("database.port", 5432)?
        .set_default("database.username", "postgres")?
        .set_default("database.password", "postgres")?
        .set_default("database.database_name", "postgres")?
        .set_default("telemetry.jaeger_enabled", true)
}

/// Loads settings from defaults, an optional `libraryservice.toml` and the environment
pub fn load_settings() -> Result<Settings, config::ConfigError> {
    builder_with_defaults()?
        .add_source(config::File::with_name(SETTINGS_FILE).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
