use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tokio::fs;

use super::{
    cli::CliArgs,
    types::{AccessMode, LogFormat, LogLevel},
};

// -----------------------------------------------------------------------------
// ----- Defaults --------------------------------------------------------------

const DEFAULT_LISTEN: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 4000);
const DEFAULT_PORT: u16 = 1433;
const DEFAULT_BASE_SIZE: usize = 10;
const DEFAULT_MAX_OVERFLOW: usize = 20;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_REQUESTS: usize = 60;
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_MAX_RESULT_ROWS: usize = 1000;

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    pub database: DatabaseConfig,
    pub gateway: GatewaySettings,
}

/// Where and as whom backend connections are opened.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: SecretString,
    pub trust_cert: bool,
}

impl DatabaseConfig {
    pub fn password_exposed(&self) -> &str {
        self.password.expose_secret()
    }
}

/// Everything the gateway itself consumes, independent of transport.
#[derive(Clone, Debug, Default)]
pub struct GatewaySettings {
    pub mode: AccessMode,
    pub pool: PoolConfig,
    pub limits: Limits,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub base_size: usize,
    pub max_overflow: usize,
    pub connect_timeout: Duration,
    pub checkout_timeout: Duration,
    pub query_timeout: Duration,
}

impl PoolConfig {
    /// Hard cap on simultaneously live connections.
    pub fn ceiling(&self) -> usize {
        self.base_size + self.max_overflow
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            base_size: DEFAULT_BASE_SIZE,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub max_requests_per_window: usize,
    #[serde(rename = "windowSeconds", serialize_with = "ser_secs")]
    pub window: Duration,
    pub max_result_rows: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_requests_per_window: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
            max_result_rows: DEFAULT_MAX_RESULT_ROWS,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Config: Static --------------------------------------------------------

impl Config {
    /// Reads the TOML file named on the command line and applies CLI
    /// overrides on top of it.
    pub async fn load(cli: &CliArgs) -> Result<Config, ConfigError> {
        let raw = Self::read_file(&cli.config_file).await?;
        let mut config = Self::from_toml(&raw)?;

        if let Some(listen_addr) = cli.listen_addr {
            config.listen_addr = listen_addr;
        }
        if let Some(mode) = cli.mode {
            config.gateway.mode = mode;
        }
        config.log_level = cli.log_level;
        config.log_format = cli.log_format;

        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Config, ConfigError> {
        let file: ConfigFile = toml::from_str(raw).map_err(|e| ConfigError::Toml { source: e })?;
        validate(&file)?;

        let ConfigFile {
            mode,
            server,
            database,
            pool,
            limits,
        } = file;

        Ok(Config {
            listen_addr: server.listen,
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
            database: DatabaseConfig {
                host: database.host,
                port: database.port,
                database: database.database,
                user: database.user,
                password: SecretString::new(database.password.into_boxed_str()),
                trust_cert: database.trust_cert,
            },
            gateway: GatewaySettings {
                mode,
                pool: PoolConfig {
                    base_size: pool.base_size,
                    max_overflow: pool.max_overflow,
                    connect_timeout: pool.connect_timeout,
                    checkout_timeout: pool.checkout_timeout,
                    query_timeout: limits.query_timeout,
                },
                limits: Limits {
                    max_requests_per_window: limits.max_requests_per_window,
                    window: limits.window,
                    max_result_rows: limits.max_result_rows,
                },
            },
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Config: Private -------------------------------------------------------

impl Config {
    async fn read_file(path: &Path) -> Result<String, ConfigError> {
        fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: On-disk format ----------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    mode: AccessMode,

    #[serde(default)]
    server: ServerSection,

    database: DatabaseSection,

    #[serde(default)]
    pool: PoolSection,

    #[serde(default)]
    limits: LimitsSection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerSection {
    listen: SocketAddr,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseSection {
    #[serde(alias = "server")]
    host: String,

    #[serde(default = "default_port")]
    port: u16,

    #[serde(default = "default_database")]
    database: String,

    #[serde(alias = "username")]
    user: String,

    #[serde(default)]
    password: String,

    #[serde(default = "default_true")]
    trust_cert: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PoolSection {
    base_size: usize,
    max_overflow: usize,
    #[serde(deserialize_with = "de_duration")]
    connect_timeout: Duration,
    #[serde(deserialize_with = "de_duration")]
    checkout_timeout: Duration,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            base_size: DEFAULT_BASE_SIZE,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            checkout_timeout: DEFAULT_CHECKOUT_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LimitsSection {
    #[serde(deserialize_with = "de_duration")]
    query_timeout: Duration,
    max_requests_per_window: usize,
    #[serde(deserialize_with = "de_duration")]
    window: Duration,
    max_result_rows: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            max_requests_per_window: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
            max_result_rows: DEFAULT_MAX_RESULT_ROWS,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_database() -> String {
    "master".to_string()
}

fn default_true() -> bool {
    true
}

fn validate(file: &ConfigFile) -> Result<(), ConfigError> {
    if file.database.host.trim().is_empty() {
        return Err(ConfigError::Invalid("database.host".into()));
    }
    if file.database.user.trim().is_empty() {
        return Err(ConfigError::Invalid("database.user".into()));
    }
    if file.pool.base_size + file.pool.max_overflow == 0 {
        return Err(ConfigError::Invalid(
            "pool.base_size + pool.max_overflow".into(),
        ));
    }
    if file.limits.max_requests_per_window == 0 {
        return Err(ConfigError::Invalid("limits.max_requests_per_window".into()));
    }
    if file.limits.window.is_zero() {
        return Err(ConfigError::Invalid("limits.window".into()));
    }
    if file.limits.max_result_rows == 0 {
        return Err(ConfigError::Invalid("limits.max_result_rows".into()));
    }
    if file.limits.query_timeout.is_zero() {
        return Err(ConfigError::Invalid("limits.query_timeout".into()));
    }
    Ok(())
}

/// Accepts either integer milliseconds or a humantime string ("30s", "1m 30s").
fn de_duration<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{Error, Unexpected, Visitor};
    use std::fmt;

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a duration like \"30s\" or integer milliseconds")
        }

        fn visit_u64<E: Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Duration::from_millis(v))
        }

        fn visit_i64<E: Error>(self, v: i64) -> Result<Self::Value, E> {
            if v < 0 {
                return Err(E::invalid_value(Unexpected::Signed(v), &self));
            }
            Ok(Duration::from_millis(v as u64))
        }

        fn visit_str<E: Error>(self, v: &str) -> Result<Self::Value, E> {
            humantime::parse_duration(v.trim())
                .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
        }
    }

    d.deserialize_any(DurationVisitor)
}

fn ser_secs<S>(value: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_f64(value.as_secs_f64())
}

// -----------------------------------------------------------------------------
// ----- Errors ----------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read error for {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("toml parse error: {source}")]
    Toml { source: toml::de::Error },

    #[error("invalid or missing field '{0}'")]
    Invalid(String),
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn cli_for(path: &Path) -> CliArgs {
        CliArgs {
            config_file: path.to_path_buf(),
            listen_addr: None,
            mode: None,
            log_level: LogLevel::Debug,
            log_format: LogFormat::Json,
        }
    }

    #[tokio::test]
    async fn load_full_file() {
        let toml = r#"
            mode = "full_access"

            [server]
            listen = "0.0.0.0:4100"

            [database]
            host = "db.internal"
            port = 14330
            database = "inventory"
            user = "gateway"
            password = "s3cret"
            trust_cert = false

            [pool]
            base_size = 4
            max_overflow = 2
            connect_timeout = "10s"
            checkout_timeout = 1500

            [limits]
            query_timeout = "45s"
            max_requests_per_window = 10
            window = "1m"
            max_result_rows = 250
        "#;

        let tmp = write_tmp(toml);
        let config = Config::load(&cli_for(tmp.path())).await.unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:4100".parse().unwrap());
        assert_eq!(config.database.host, "db.internal");
        assert_eq!(config.database.port, 14330);
        assert_eq!(config.database.database, "inventory");
        assert_eq!(config.database.password_exposed(), "s3cret");
        assert!(!config.database.trust_cert);
        assert_eq!(config.gateway.mode, AccessMode::FullAccess);

        let pool = config.gateway.pool;
        assert_eq!(pool.ceiling(), 6);
        assert_eq!(pool.connect_timeout, Duration::from_secs(10));
        assert_eq!(pool.checkout_timeout, Duration::from_millis(1500));
        assert_eq!(pool.query_timeout, Duration::from_secs(45));

        let limits = config.gateway.limits;
        assert_eq!(limits.max_requests_per_window, 10);
        assert_eq!(limits.window, Duration::from_secs(60));
        assert_eq!(limits.max_result_rows, 250);

        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config = Config::from_toml(
            r#"
            [database]
            host = "localhost"
            user = "sa"
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, DEFAULT_LISTEN);
        assert_eq!(config.database.port, 1433);
        assert_eq!(config.database.database, "master");
        assert!(config.database.trust_cert);
        assert_eq!(config.gateway.mode, AccessMode::ReadOnly);
        assert_eq!(config.gateway.pool, PoolConfig::default());
        assert_eq!(config.gateway.pool.ceiling(), 30);
        assert_eq!(config.gateway.limits, Limits::default());
    }

    #[tokio::test]
    async fn cli_overrides_file() {
        let tmp = write_tmp(
            r#"
            mode = "READ_ONLY"
            [database]
            host = "localhost"
            user = "sa"
            "#,
        );

        let mut cli = cli_for(tmp.path());
        cli.mode = Some(AccessMode::FullAccess);
        cli.listen_addr = Some("127.0.0.1:9999".parse().unwrap());

        let config = Config::load(&cli).await.unwrap();
        assert_eq!(config.gateway.mode, AccessMode::FullAccess);
        assert_eq!(config.listen_addr.port(), 9999);
    }

    #[test]
    fn rejects_zero_ceiling() {
        let err = Config::from_toml(
            r#"
            [database]
            host = "localhost"
            user = "sa"
            [pool]
            base_size = 0
            max_overflow = 0
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_duration_and_unknown_keys() {
        let bad_duration = Config::from_toml(
            r#"
            [database]
            host = "localhost"
            user = "sa"
            [limits]
            window = "soon"
            "#,
        );
        assert!(matches!(bad_duration, Err(ConfigError::Toml { .. })));

        let unknown = Config::from_toml(
            r#"
            [database]
            host = "localhost"
            user = "sa"
            shards = 4
            "#,
        );
        assert!(matches!(unknown, Err(ConfigError::Toml { .. })));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let cli = cli_for(Path::new("/definitely/not/here/sqlgate.toml"));
        let err = Config::load(&cli).await.unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn limits_serialize_window_in_seconds() {
        let json = serde_json::to_value(Limits::default()).unwrap();
        assert_eq!(json["windowSeconds"], 60.0);
        assert_eq!(json["maxRequestsPerWindow"], 60);
        assert_eq!(json["maxResultRows"], 1000);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
