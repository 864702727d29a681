use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{Instant, error::Elapsed, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::backend::{BackendConnection, Connector, Row};
use crate::config::PoolConfig;
use crate::errors::{BackendError, PoolError};

type Handle = Box<dyn BackendConnection>;

// -----------------------------------------------------------------------------
// ----- ConnectionPool --------------------------------------------------------

/// Bounded set of backend sessions shared by every invocation.
///
/// All bookkeeping lives in one mutex that is never held across an await.
/// `live` counts every session that exists or is being opened, so it never
/// exceeds the ceiling. Waiters queue in FIFO order and are woken by handing
/// them either a session or a freed slot directly.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    ceiling: usize,
    state: Mutex<PoolState>,
}

struct PoolState {
    idle: VecDeque<Handle>,
    live: usize,
    waiters: VecDeque<oneshot::Sender<Handoff>>,
    closed: bool,
}

/// What a released session or a freed slot turns into for the next waiter.
enum Handoff {
    Connection(Handle),
    Slot,
}

enum Checkout {
    Idle(Handle),
    Open,
    Wait(oneshot::Receiver<Handoff>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub ceiling: usize,
    pub live: usize,
    pub idle: usize,
    pub in_use: usize,
    pub waiting: usize,
    pub closed: bool,
}

// -----------------------------------------------------------------------------
// ----- ConnectionPool: Static ------------------------------------------------

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Arc<Self> {
        let ceiling = config.ceiling();
        Arc::new(Self {
            connector,
            config,
            ceiling,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(ceiling),
                live: 0,
                waiters: VecDeque::new(),
                closed: false,
            }),
        })
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionPool: Public ------------------------------------------------

impl ConnectionPool {
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn target(&self) -> String {
        self.connector.describe()
    }

    /// Checks a session out, waiting at most `checkout_timeout`.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, PoolError> {
        self.acquire_within(self.config.checkout_timeout).await
    }

    pub async fn acquire_within(
        self: &Arc<Self>,
        wait: Duration,
    ) -> Result<PooledConnection, PoolError> {
        let deadline = Instant::now() + wait;

        loop {
            let handoff = match self.next_checkout()? {
                Checkout::Idle(conn) => {
                    let mut pooled = self.wrap(conn);
                    match pooled.ping().await {
                        Ok(()) => return Ok(pooled),
                        Err(err) => {
                            // Dropping the failed handle frees its slot.
                            warn!("discarding idle connection that failed its probe: {err}");
                            drop(pooled);
                            continue;
                        }
                    }
                }
                Checkout::Open => Handoff::Slot,
                Checkout::Wait(rx) => {
                    let mut waiter = Waiter { pool: self, rx };
                    waiter.wait_until(deadline, wait).await?
                }
            };

            return match handoff {
                Handoff::Connection(conn) => Ok(self.wrap(conn)),
                Handoff::Slot => self.open_in_slot().await.map(|conn| self.wrap(conn)),
            };
        }
    }

    /// Opens sessions until `target` are idle or the ceiling is reached.
    /// Connect failures are logged and stop the warm-up early.
    pub async fn warm(self: &Arc<Self>, target: usize) -> usize {
        let mut opened = 0;

        while opened < target {
            let reserved = {
                let mut state = self.state.lock();
                if state.closed || state.live >= self.ceiling || state.idle.len() >= target {
                    false
                } else {
                    state.live += 1;
                    true
                }
            };
            if !reserved {
                break;
            }

            match self.open_in_slot().await {
                Ok(conn) => {
                    self.release(conn);
                    opened += 1;
                }
                Err(err) => {
                    warn!("pool warm-up stopped after {opened} connection(s): {err}");
                    break;
                }
            }
        }

        opened
    }

    /// Closes idle sessions and fails every waiter. Sessions still checked out
    /// are closed when they come back.
    pub fn shutdown(&self) {
        let (idle, waiters) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<Handle> = state.idle.drain(..).collect();
            state.live = state.live.saturating_sub(idle.len());
            (idle, std::mem::take(&mut state.waiters))
        };

        info!(
            "connection pool closed: {} idle connection(s) dropped, {} waiter(s) failed",
            idle.len(),
            waiters.len()
        );
        drop(idle);
        drop(waiters);
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        let idle = state.idle.len();
        PoolStats {
            ceiling: self.ceiling,
            live: state.live,
            idle,
            in_use: state.live.saturating_sub(idle),
            waiting: state.waiters.iter().filter(|tx| !tx.is_closed()).count(),
            closed: state.closed,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ConnectionPool: Private -----------------------------------------------

impl ConnectionPool {
    fn next_checkout(&self) -> Result<Checkout, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }
        if let Some(conn) = state.idle.pop_front() {
            return Ok(Checkout::Idle(conn));
        }
        if state.live < self.ceiling {
            state.live += 1;
            return Ok(Checkout::Open);
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        Ok(Checkout::Wait(rx))
    }

    /// Opens a session in a slot the caller already reserved. The slot is
    /// given back on failure or cancellation.
    async fn open_in_slot(&self) -> Result<Handle, PoolError> {
        let reservation = Reservation { pool: self };
        let limit = self.config.connect_timeout;

        let conn = match timeout(limit, self.connector.connect()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(err)) => return Err(PoolError::Connect(err)),
            Err(_) => return Err(PoolError::Connect(BackendError::Timeout(limit))),
        };

        reservation.keep();
        debug!("opened backend connection to {}", self.connector.describe());
        Ok(conn)
    }

    fn wrap(self: &Arc<Self>, conn: Handle) -> PooledConnection {
        PooledConnection {
            pool: Arc::clone(self),
            conn: Some(conn),
            query_timeout: self.config.query_timeout,
            probe_timeout: self.config.connect_timeout,
            in_flight: false,
            failed: false,
        }
    }

    /// Healthy session back: oldest live waiter first, else the idle set.
    fn release(&self, conn: Handle) {
        let mut state = self.state.lock();
        if state.closed {
            state.live = state.live.saturating_sub(1);
            drop(state);
            drop(conn);
            return;
        }
        if let Some(Handoff::Connection(conn)) = offer(&mut state, Handoff::Connection(conn)) {
            state.idle.push_back(conn);
        }
    }

    /// Session gone: its slot goes to the oldest live waiter, else `live` drops.
    fn forfeit_slot(&self) {
        let mut state = self.state.lock();
        if state.closed {
            state.live = state.live.saturating_sub(1);
            return;
        }
        if offer(&mut state, Handoff::Slot).is_some() {
            state.live = state.live.saturating_sub(1);
        }
    }

    fn discard(&self, conn: Handle) {
        drop(conn);
        self.forfeit_slot();
    }

    fn take_back(&self, handoff: Handoff) {
        match handoff {
            Handoff::Connection(conn) => self.release(conn),
            Handoff::Slot => self.forfeit_slot(),
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Waiter ----------------------------------------------------------------

/// A queued checkout. Whatever arrives after the waiter gave up goes back to
/// the pool when it is dropped.
struct Waiter<'a> {
    pool: &'a ConnectionPool,
    rx: oneshot::Receiver<Handoff>,
}

impl Waiter<'_> {
    async fn wait_until(&mut self, deadline: Instant, wait: Duration) -> Result<Handoff, PoolError> {
        match timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(handoff)) => Ok(handoff),
            Ok(Err(_)) => Err(PoolError::Closed),
            Err(_) => {
                // A handoff may have landed right at the deadline.
                self.rx.close();
                self.rx
                    .try_recv()
                    .map_err(|_| PoolError::Exhausted { waited: wait })
            }
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(handoff) = self.rx.try_recv() {
            self.pool.take_back(handoff);
        }
        self.pool
            .state
            .lock()
            .waiters
            .retain(|tx| !tx.is_closed());
    }
}

// -----------------------------------------------------------------------------
// ----- Reservation -----------------------------------------------------------

/// A slot counted in `live` with no session behind it yet.
struct Reservation<'a> {
    pool: &'a ConnectionPool,
}

impl Reservation<'_> {
    fn keep(self) {
        std::mem::forget(self);
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.pool.forfeit_slot();
    }
}

// -----------------------------------------------------------------------------
// ----- PooledConnection ------------------------------------------------------

/// A checked-out session. Dropping it returns the session to the pool, or
/// discards it if any call failed, timed out, or was abandoned mid-flight.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<Handle>,
    query_timeout: Duration,
    probe_timeout: Duration,
    in_flight: bool,
    failed: bool,
}

impl PooledConnection {
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, BackendError> {
        let limit = self.query_timeout;
        let conn = self.begin()?;
        let outcome = timeout(limit, conn.query(sql, params)).await;
        self.finish(outcome, limit)
    }

    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, BackendError> {
        let limit = self.query_timeout;
        let conn = self.begin()?;
        let outcome = timeout(limit, conn.execute(sql, params)).await;
        self.finish(outcome, limit)
    }

    pub async fn ping(&mut self) -> Result<(), BackendError> {
        let limit = self.probe_timeout;
        let conn = self.begin()?;
        let outcome = timeout(limit, conn.ping()).await;
        self.finish(outcome, limit)
    }

    fn begin(&mut self) -> Result<&mut Handle, BackendError> {
        let conn = self.conn.as_mut().ok_or(BackendError::Closed)?;
        self.in_flight = true;
        Ok(conn)
    }

    fn finish<T>(
        &mut self,
        outcome: Result<Result<T, BackendError>, Elapsed>,
        limit: Duration,
    ) -> Result<T, BackendError> {
        self.in_flight = false;
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                self.failed = true;
                Err(err)
            }
            Err(_) => {
                self.failed = true;
                Err(BackendError::Timeout(limit))
            }
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.failed || self.in_flight {
            debug!(
                "discarding backend connection (failed={}, in_flight={})",
                self.failed, self.in_flight
            );
            self.pool.discard(conn);
        } else {
            self.pool.release(conn);
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

/// Hands `handoff` to the oldest waiter still listening. Returns it when no
/// one is.
fn offer(state: &mut PoolState, mut handoff: Handoff) -> Option<Handoff> {
    while let Some(tx) = state.waiters.pop_front() {
        match tx.send(handoff) {
            Ok(()) => return None,
            Err(returned) => handoff = returned,
        }
    }
    Some(handoff)
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
