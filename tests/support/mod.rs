#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::time::sleep;

use sqlgate::backend::{BackendConnection, Connector, Row};
use sqlgate::config::{GatewaySettings, Limits, PoolConfig};
use sqlgate::errors::BackendError;
use sqlgate::tools::Arguments;
use sqlgate::{AccessMode, Gateway};

// -----------------------------------------------------------------------------
// ----- FakeBackend -----------------------------------------------------------

/// Scripted in-memory stand-in for SQL Server. Every statement is logged with
/// its parameters.
#[derive(Default)]
pub struct FakeBackend {
    script: Mutex<Script>,
    log: Mutex<Vec<Statement>>,
    connects: AtomicUsize,
    pings: AtomicUsize,
}

#[derive(Default)]
struct Script {
    rows: Vec<Row>,
    affected: u64,
    latency: Duration,
    fail_queries: bool,
    fail_connects: bool,
    dead_before: usize,
    routes: Vec<Route>,
}

/// Overrides the canned behaviour for statements containing `marker`,
/// optionally only when `param` is among the bound values.
struct Route {
    marker: String,
    param: Option<Value>,
    reply: Reply,
}

#[derive(Clone)]
enum Reply {
    Rows(Vec<Row>),
    Fail,
    Stall,
}

impl Script {
    /// Routes bound to a parameter win over routes on the marker alone.
    fn route(&self, sql: &str, params: &[Value]) -> Option<Reply> {
        let matching = || self.routes.iter().filter(|r| sql.contains(&r.marker));
        matching()
            .find(|r| r.param.as_ref().is_some_and(|p| params.contains(p)))
            .or_else(|| matching().find(|r| r.param.is_none()))
            .map(|r| r.reply.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(FakeConnector {
            backend: Arc::clone(self),
        })
    }

    /// Canned result for every row-returning statement; `value` is a JSON
    /// array of objects.
    pub fn set_rows(&self, value: Value) {
        self.script.lock().rows = serde_json::from_value(value).expect("rows must be objects");
    }

    /// Rows for statements containing `marker`, ahead of the canned rows.
    pub fn route_rows(&self, marker: &str, value: Value) {
        let rows = serde_json::from_value(value).expect("rows must be objects");
        self.add_route(marker, None, Reply::Rows(rows));
    }

    /// Statements containing `marker` and binding `param` fail.
    pub fn route_failure(&self, marker: &str, param: Value) {
        self.add_route(marker, Some(param), Reply::Fail);
    }

    /// Statements containing `marker` and binding `param` never finish.
    pub fn route_stall(&self, marker: &str, param: Value) {
        self.add_route(marker, Some(param), Reply::Stall);
    }

    fn add_route(&self, marker: &str, param: Option<Value>, reply: Reply) {
        self.script.lock().routes.push(Route {
            marker: marker.to_string(),
            param,
            reply,
        });
    }

    pub fn statements_containing(&self, marker: &str) -> Vec<Statement> {
        self.log
            .lock()
            .iter()
            .filter(|s| s.sql.contains(marker))
            .cloned()
            .collect()
    }

    pub fn set_affected(&self, n: u64) {
        self.script.lock().affected = n;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.script.lock().latency = latency;
    }

    pub fn fail_queries(&self, fail: bool) {
        self.script.lock().fail_queries = fail;
    }

    pub fn fail_connects(&self, fail: bool) {
        self.script.lock().fail_connects = fail;
    }

    /// Every connection opened so far fails its next ping.
    pub fn kill_existing(&self) {
        self.script.lock().dead_before = self.connects();
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.log.lock().clone()
    }

    pub fn last_statement(&self) -> Statement {
        self.log
            .lock()
            .last()
            .cloned()
            .expect("no statement reached the backend")
    }
}

// -----------------------------------------------------------------------------
// ----- FakeConnector ---------------------------------------------------------

struct FakeConnector {
    backend: Arc<FakeBackend>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, BackendError> {
        if self.backend.script.lock().fail_connects {
            return Err(BackendError::Connect("connection refused".into()));
        }
        let id = self.backend.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            id,
            backend: Arc::clone(&self.backend),
        }))
    }

    fn describe(&self) -> String {
        "fake://test".to_string()
    }
}

struct FakeConnection {
    id: usize,
    backend: Arc<FakeBackend>,
}

impl FakeConnection {
    async fn run(&self, sql: &str, params: &[Value]) -> Result<(), BackendError> {
        self.backend.log.lock().push(Statement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        let (latency, fail, route) = {
            let script = self.backend.script.lock();
            (script.latency, script.fail_queries, script.route(sql, params))
        };
        if !latency.is_zero() {
            sleep(latency).await;
        }
        match route {
            Some(Reply::Stall) => sleep(Duration::from_secs(3600)).await,
            Some(Reply::Fail) => {
                return Err(BackendError::Query("Invalid object name 'missing'.".into()));
            }
            _ => {}
        }
        if fail {
            return Err(BackendError::Query("Invalid object name 'missing'.".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BackendConnection for FakeConnection {
    async fn ping(&mut self) -> Result<(), BackendError> {
        self.backend.pings.fetch_add(1, Ordering::SeqCst);
        if self.id < self.backend.script.lock().dead_before {
            return Err(BackendError::Query("connection reset".into()));
        }
        Ok(())
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, BackendError> {
        self.run(sql, params).await?;
        let rows = {
            let script = self.backend.script.lock();
            match script.route(sql, params) {
                Some(Reply::Rows(rows)) => rows,
                _ => script.rows.clone(),
            }
        };
        Ok(shape(rows, sql, params))
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, BackendError> {
        self.run(sql, params).await?;
        Ok(self.backend.script.lock().affected)
    }
}

/// Applies `TOP n` and `OFFSET @P1 ROWS FETCH NEXT @P2 ROWS ONLY` to the
/// canned rows.
fn shape(rows: Vec<Row>, sql: &str, params: &[Value]) -> Vec<Row> {
    if sql.contains("OFFSET @P1 ROWS FETCH NEXT @P2 ROWS ONLY") {
        let offset = params.first().and_then(Value::as_u64).unwrap_or(0) as usize;
        let limit = params.get(1).and_then(Value::as_u64).unwrap_or(0) as usize;
        return rows.into_iter().skip(offset).take(limit).collect();
    }

    let upper = sql.to_ascii_uppercase();
    let top = upper.split_whitespace().skip_while(|w| *w != "TOP").nth(1);
    match top.and_then(|n| n.parse::<usize>().ok()) {
        Some(n) => rows.into_iter().take(n).collect(),
        None => rows,
    }
}

// -----------------------------------------------------------------------------
// ----- Gateway helpers -------------------------------------------------------

pub fn pool_config(base_size: usize, max_overflow: usize) -> PoolConfig {
    PoolConfig {
        base_size,
        max_overflow,
        connect_timeout: Duration::from_secs(1),
        checkout_timeout: Duration::from_secs(1),
        query_timeout: Duration::from_secs(5),
    }
}

pub fn settings(mode: AccessMode) -> GatewaySettings {
    GatewaySettings {
        mode,
        pool: pool_config(1, 1),
        limits: Limits {
            max_requests_per_window: 100,
            window: Duration::from_secs(60),
            max_result_rows: 5,
        },
    }
}

pub fn gateway(settings: GatewaySettings, backend: &Arc<FakeBackend>) -> Gateway {
    Gateway::new(settings, backend.connector()).expect("standard registry builds")
}

pub fn args(value: Value) -> Arguments {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Ten rows of `{id, name}`.
pub fn user_rows() -> Value {
    Value::Array(
        (1..=10)
            .map(|i| serde_json::json!({"id": i, "name": format!("user{i}")}))
            .collect(),
    )
}
