use clap::Parser;
use std::{net::SocketAddr, path::PathBuf};

use super::types::{AccessMode, LogFormat, LogLevel};

// -----------------------------------------------------------------------------
// ----- CliArgs ---------------------------------------------------------------

#[derive(Parser, Clone, Debug)]
#[command(name = "sqlgate", version, about = "Mediated SQL Server gateway")]
pub struct CliArgs {
    // Must exist; no defaults.
    #[arg(long = "config", short = 'c', env = "SQLGATE_CONFIG_FILE")]
    pub config_file: PathBuf,

    // Overrides [server].listen from the file when given.
    #[arg(long = "listen", short = 'l', env = "SQLGATE_LISTEN")]
    pub listen_addr: Option<SocketAddr>,

    // Overrides `mode` from the file when given.
    #[arg(long = "mode", env = "SQLGATE_MODE")]
    pub mode: Option<AccessMode>,

    #[arg(long = "log", default_value = "info", env = "SQLGATE_LOG")]
    pub log_level: LogLevel,

    #[arg(long = "log-format", default_value = "text")]
    pub log_format: LogFormat,
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_overrides() {
        let args = CliArgs::try_parse_from([
            "sqlgate",
            "--config",
            "/etc/sqlgate.toml",
            "--listen",
            "0.0.0.0:4100",
            "--mode",
            "full-access",
            "--log-format",
            "json",
        ])
        .unwrap();

        assert_eq!(args.config_file, PathBuf::from("/etc/sqlgate.toml"));
        assert_eq!(args.listen_addr, Some("0.0.0.0:4100".parse().unwrap()));
        assert_eq!(args.mode, Some(AccessMode::FullAccess));
        assert_eq!(args.log_format, LogFormat::Json);
    }

    #[test]
    fn mode_accepts_snake_case_alias() {
        let args =
            CliArgs::try_parse_from(["sqlgate", "-c", "x.toml", "--mode", "read_only"]).unwrap();
        assert_eq!(args.mode, Some(AccessMode::ReadOnly));
        assert!(args.listen_addr.is_none());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
