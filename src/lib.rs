// Gateway orchestration lives in `gateway`; SQL Server specifics stay in `backend`.
pub mod analytics;
pub mod backend;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod registry;
pub mod server;
pub mod tools;

pub use config::{AccessMode, CliArgs, Config};
pub use gateway::{Gateway, ResultEnvelope};
