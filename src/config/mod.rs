pub mod cli;
#[allow(clippy::module_inception)]
pub mod config;
pub mod types;

pub use cli::CliArgs;
pub use config::{Config, ConfigError, DatabaseConfig, GatewaySettings, Limits, PoolConfig};
pub use types::{AccessMode, LogFormat, LogLevel};
