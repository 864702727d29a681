mod convert;
pub mod sqlserver;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::BackendError;

pub use sqlserver::SqlServerConnector;

/// One result row keyed by column name, in column order.
pub type Row = Map<String, Value>;

// -----------------------------------------------------------------------------
// ----- Connector -------------------------------------------------------------

/// Opens fresh backend sessions. Shared by the pool for its whole lifetime.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, BackendError>;

    /// Human-readable target, used in logs and health output. Never includes
    /// credentials.
    fn describe(&self) -> String;
}

// -----------------------------------------------------------------------------
// ----- BackendConnection -----------------------------------------------------

/// A single live session. Parameters are bound positionally to `@P1..@Pn`.
#[async_trait]
pub trait BackendConnection: Send {
    /// Cheap liveness check (`SELECT 1`).
    async fn ping(&mut self) -> Result<(), BackendError>;

    /// Runs a row-returning statement and collects its first result set.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, BackendError>;

    /// Runs a statement for its side effects and returns the affected row count.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, BackendError>;
}
