pub mod envelope;
pub mod pool;
pub mod rate_limiter;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::analytics::{GatewayStats, StatsSnapshot};
use crate::backend::{Connector, SqlServerConnector};
use crate::classifier::{self, Classification, QueryPolicy};
use crate::config::{AccessMode, Config, GatewaySettings, Limits};
use crate::errors::ErrorCode;
use crate::registry::{Capability, Registry, RegistryError, ToolDescriptor};
use crate::tools::{Arguments, ToolContext};

pub use envelope::{Payload, ResultEnvelope};
pub use pool::{ConnectionPool, PoolStats, PooledConnection};
pub use rate_limiter::RateLimiter;

const APP_NAME: &str = "sqlgate";

// -----------------------------------------------------------------------------
// ----- Gateway ---------------------------------------------------------------

/// One gateway instance: its mode, catalog, limiter, and connection pool.
/// Every invocation goes through `invoke`.
pub struct Gateway {
    settings: GatewaySettings,
    registry: Registry,
    policy: QueryPolicy,
    limiter: RateLimiter,
    pool: Arc<ConnectionPool>,
    context: ToolContext,
    stats: GatewayStats,
    running: AtomicBool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub database_reachable: bool,
    pub running: bool,
    pub mode: AccessMode,
    pub pool: PoolStats,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub mode: AccessMode,
    pub tool_count: usize,
    pub limits: Limits,
    pub running: bool,
    pub counters: StatsSnapshot,
    pub tracked_callers: usize,
    pub target: String,
}

// -----------------------------------------------------------------------------
// ----- Gateway: Static -------------------------------------------------------

impl Gateway {
    pub fn new(
        settings: GatewaySettings,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, RegistryError> {
        let registry = Registry::standard()?;
        let pool = ConnectionPool::new(connector, settings.pool);
        let limiter = RateLimiter::new(
            settings.limits.max_requests_per_window,
            settings.limits.window,
        );
        let context = ToolContext::new(Arc::clone(&pool), settings.limits.max_result_rows);

        Ok(Self {
            settings,
            registry,
            policy: QueryPolicy::restricted(),
            limiter,
            pool,
            context,
            stats: GatewayStats::default(),
            running: AtomicBool::new(false),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let connector = Arc::new(SqlServerConnector::new(&config.database));
        Self::new(config.gateway.clone(), connector)
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Public -------------------------------------------------------

impl Gateway {
    /// Opens the base connections. Returns how many came up; a backend that
    /// is down at start-up is reported, not fatal.
    pub async fn start(&self) -> usize {
        self.running.store(true, Ordering::SeqCst);
        let base = self.settings.pool.base_size;
        let opened = self.pool.warm(base).await;

        info!(
            "gateway started in {} mode: {opened}/{base} connection(s) to {}",
            self.settings.mode.as_str(),
            self.pool.target()
        );
        opened
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("gateway stopping");
        }
        self.pool.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn mode(&self) -> AccessMode {
        self.settings.mode
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn list_capabilities(&self, mode: AccessMode) -> Vec<&ToolDescriptor> {
        self.registry.list(mode)
    }

    /// Runs one operation for `caller` and always answers with an envelope.
    pub async fn invoke(&self, operation: &str, args: Arguments, caller: &str) -> ResultEnvelope {
        self.stats.record_call();
        let envelope = self.dispatch(operation, args, caller).await;

        match envelope.error_code {
            Some(code) => self.stats.record_failure(code),
            None => self.stats.record_success(),
        }
        envelope
    }

    /// Checks out a connection. Checkout already probes idle sessions and
    /// opens fresh ones, so a successful checkout proves the backend is up.
    pub async fn health_probe(&self) -> HealthReport {
        let outcome = self
            .pool
            .acquire()
            .await
            .map(drop)
            .map_err(|err| err.to_string());

        let reachable = outcome.is_ok();
        if let Err(err) = &outcome {
            warn!("health probe failed: {err}");
        }

        HealthReport {
            status: if reachable { "healthy" } else { "unhealthy" },
            database_reachable: reachable,
            running: self.is_running(),
            mode: self.settings.mode,
            pool: self.pool.stats(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            error: outcome.err(),
        }
    }

    pub fn info(&self) -> GatewayInfo {
        GatewayInfo {
            name: APP_NAME,
            version: env!("CARGO_PKG_VERSION"),
            mode: self.settings.mode,
            tool_count: self.registry.list(self.settings.mode).len(),
            limits: self.settings.limits,
            running: self.is_running(),
            counters: self.stats.snapshot(),
            tracked_callers: self.limiter.tracked_callers(),
            target: self.pool.target(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway: Private ------------------------------------------------------

impl Gateway {
    async fn dispatch(&self, operation: &str, args: Arguments, caller: &str) -> ResultEnvelope {
        let mode = self.settings.mode;

        if !self.limiter.admit(caller) {
            warn!(tool = operation, caller, "rate limit exceeded");
            let limits = &self.settings.limits;
            return ResultEnvelope::failure(
                operation,
                ErrorCode::RateLimitExceeded,
                format!(
                    "rate limit exceeded: at most {} call(s) per {}s",
                    limits.max_requests_per_window,
                    limits.window.as_secs_f64()
                ),
                Duration::ZERO,
            );
        }

        let Some(descriptor) = self.registry.lookup(operation, mode) else {
            warn!(tool = operation, caller, "unknown operation");
            return ResultEnvelope::failure(
                operation,
                ErrorCode::ToolNotFound,
                format!("operation '{operation}' is not available"),
                Duration::ZERO,
            );
        };

        if let Err(message) = descriptor.check_arguments(&args) {
            warn!(tool = operation, caller, "invalid arguments: {message}");
            return ResultEnvelope::failure(
                operation,
                ErrorCode::ValidationFailed,
                message,
                Duration::ZERO,
            );
        }

        if descriptor.takes_query_text
            && (mode == AccessMode::ReadOnly || descriptor.capability == Capability::Read)
        {
            let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
            if let Classification::Deny(violation) = classifier::classify(query, &self.policy) {
                warn!(tool = operation, caller, "query rejected: {violation}");
                return ResultEnvelope::failure(
                    operation,
                    ErrorCode::ValidationFailed,
                    format!("query rejected: {violation}"),
                    Duration::ZERO,
                );
            }
        }

        let tool = descriptor.tool;
        let ctx = self.context.clone();
        let started = Instant::now();

        // The handler owns its checkout; a caller that goes away mid-call
        // does not strand the connection.
        let outcome = tokio::spawn(async move { tool.run(&ctx, &args).await }).await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        match outcome {
            Ok(Ok(payload)) => {
                info!(tool = operation, caller, elapsed_ms, "call completed");
                ResultEnvelope::success(operation, payload, elapsed)
            }
            Ok(Err(err)) => {
                let code = err.code();
                if code == ErrorCode::ValidationFailed {
                    warn!(tool = operation, caller, elapsed_ms, "call rejected: {err}");
                } else {
                    error!(tool = operation, caller, elapsed_ms, "call failed: {err}");
                }
                ResultEnvelope::failure(operation, code, err.to_string(), elapsed)
            }
            Err(join) => {
                error!(tool = operation, caller, elapsed_ms, "handler aborted: {join}");
                let message = if join.is_panic() {
                    "operation failed unexpectedly".to_string()
                } else {
                    format!("operation aborted: {join}")
                };
                ResultEnvelope::failure(operation, ErrorCode::ExecutionError, message, elapsed)
            }
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
