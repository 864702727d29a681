use serde::{Deserialize, Serialize};

// -------------------------------------------------------------------------------------------------
// ---- LogLevel -----------------------------------------------------------------------------------

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

// -------------------------------------------------------------------------------------------------
// ---- LogFormat ----------------------------------------------------------------------------------

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

// -------------------------------------------------------------------------------------------------
// ---- AccessMode ---------------------------------------------------------------------------------

/// Decides which operations a gateway exposes. Fixed for the lifetime of a
/// gateway.
#[derive(
    clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    #[default]
    #[serde(alias = "read_only", alias = "readonly")]
    #[value(alias = "read_only", alias = "READ_ONLY")]
    ReadOnly,

    #[serde(alias = "full_access", alias = "full")]
    #[value(alias = "full_access", alias = "FULL_ACCESS")]
    FullAccess,
}

impl AccessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "READ_ONLY",
            AccessMode::FullAccess => "FULL_ACCESS",
        }
    }
}

// -------------------------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------
