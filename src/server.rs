//! Newline-delimited JSON over TCP. Each request line gets exactly one
//! response line.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::gateway::Gateway;
use crate::tools::Arguments;

/// Longest request line accepted, newline excluded.
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

// -----------------------------------------------------------------------------
// ----- Request ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
enum Request {
    CallTool {
        tool: String,
        #[serde(default)]
        arguments: Arguments,
        #[serde(default)]
        client_id: Option<String>,
    },
    ListTools,
    Health,
    Info,
}

// -----------------------------------------------------------------------------
// ----- Serve -----------------------------------------------------------------

/// Accepts clients until `shutdown` resolves.
pub async fn serve<F>(gateway: Arc<Gateway>, listener: TcpListener, shutdown: F)
where
    F: Future,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("listener shutting down");
                break;
            }

            accept_res = listener.accept() => {
                let (stream, peer) = match accept_res {
                    Ok(v) => v,
                    Err(e) => { error!("accept error: {e}"); continue; }
                };

                let _ = stream.set_nodelay(true);

                let gateway = Arc::clone(&gateway);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(gateway, stream, peer).await {
                        error!("client {peer} error: {e}");
                    }
                });
            }
        }
    }
}

async fn handle_client(
    gateway: Arc<Gateway>,
    stream: TcpStream,
    peer: SocketAddr,
) -> std::io::Result<()> {
    debug!("client {peer} connected");
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        let response = match read_frame(&mut reader, &mut buf).await? {
            Frame::Closed => break,
            Frame::Oversized => {
                warn!("client {peer} sent a request over {MAX_REQUEST_BYTES} bytes");
                json!({
                    "success": false,
                    "error": format!("request exceeds {MAX_REQUEST_BYTES} bytes"),
                })
            }
            Frame::Request => {
                let line = String::from_utf8_lossy(&buf);
                if line.trim().is_empty() {
                    continue;
                }
                handle_line(&gateway, &line, &peer.ip().to_string()).await
            }
        };
        let mut out = response.to_string();
        out.push('\n');
        writer.write_all(out.as_bytes()).await?;
    }

    debug!("client {peer} disconnected");
    Ok(())
}

enum Frame {
    Request,
    Oversized,
    Closed,
}

/// Reads one request line into `buf`. A line longer than
/// `MAX_REQUEST_BYTES` is drained without being kept.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let limit = MAX_REQUEST_BYTES as u64 + 1;

    buf.clear();
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(Frame::Closed);
    }
    if buf.last() == Some(&b'\n') || n <= MAX_REQUEST_BYTES {
        return Ok(Frame::Request);
    }

    loop {
        buf.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
        if n == 0 || buf.last() == Some(&b'\n') {
            break;
        }
    }
    buf.clear();
    Ok(Frame::Oversized)
}

/// Answers one request line. `default_caller` is used for rate limiting when
/// the request names no client.
pub async fn handle_line(gateway: &Gateway, line: &str, default_caller: &str) -> Value {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            return json!({
                "success": false,
                "error": format!("invalid request: {e}"),
            });
        }
    };

    match request {
        Request::CallTool {
            tool,
            arguments,
            client_id,
        } => {
            let caller = client_id.as_deref().unwrap_or(default_caller);
            gateway.invoke(&tool, arguments, caller).await.to_json()
        }
        Request::ListTools => json!({
            "success": true,
            "mode": gateway.mode(),
            "tools": gateway.list_capabilities(gateway.mode()),
        }),
        Request::Health => json!(gateway.health_probe().await),
        Request::Info => json!(gateway.info()),
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
