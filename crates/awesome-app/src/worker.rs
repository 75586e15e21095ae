//! Framed request/response loop.
//!
//! Each frame is a little-endian `u32` length followed by a JSON envelope.
//! Requests are dispatched concurrently; responses carry the request id and
//! may be written out of order.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use awesome_web::{Method, Reply, Request, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, warn};

pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_MAX_QUEUE: usize = 64;
pub const BUSY_STATUS: u16 = 503;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub id: u64,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// A string is sent as the raw body; any other JSON value is encoded.
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    pub id: u64,
    pub status: u16,
    pub body: Value,
}

impl WireResponse {
    fn message(id: u64, status: u16, message: impl Into<String>) -> Self {
        Self {
            id,
            status,
            body: json!({ "message": message.into() }),
        }
    }
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let read = reader.read(&mut header[filled..]).await?;
        if read == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Truncated frame header",
            ));
        }
        filled += read;
    }
    let size = u32::from_le_bytes(header) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Frame exceeds max size",
        ));
    }
    let mut buf = vec![0u8; size];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let size = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "Frame exceeds max size"))?;
    writer.write_all(&size.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

fn to_request(wire: WireRequest) -> Result<Request, WireResponse> {
    let method: Method = wire
        .method
        .parse::<Method>()
        .map_err(|err| WireResponse::message(wire.id, 405, err.to_string()))?;
    let mut request = Request::new(method, &wire.path);
    for (name, value) in wire.headers {
        request = request.with_header(name, value);
    }
    match wire.body {
        None | Some(Value::Null) => {}
        Some(Value::String(raw)) => request = request.with_body(raw),
        Some(other) => request = request.with_json(&other),
    }
    Ok(request)
}

async fn handle(router: &Router, wire: WireRequest) -> WireResponse {
    let id = wire.id;
    let request = match to_request(wire) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match router.dispatch(request).await {
        Ok(reply) => {
            let body = reply.to_json();
            if !matches!(reply, Reply::Handler(_)) {
                debug!("request {id} rejected: {body}");
            }
            WireResponse {
                id,
                status: reply.status(),
                body,
            }
        }
        Err(err) => {
            if err.status() >= 500 {
                error!("request {id} failed: {err}");
            }
            WireResponse::message(id, err.status(), err.to_string())
        }
    }
}

/// Serves frames from `reader` until end of input, then drains in-flight
/// requests. Returns how many requests were answered.
///
/// At most `max_queue` requests are in flight; a request arriving while all
/// slots are taken is answered with [`BUSY_STATUS`] without being dispatched.
pub async fn serve<R, W>(
    router: Arc<Router>,
    mut reader: R,
    mut writer: W,
    max_queue: usize,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let max_queue = max_queue.max(1);
    let (response_tx, mut response_rx) = mpsc::channel::<WireResponse>(max_queue);
    let slots = Arc::new(Semaphore::new(max_queue));

    let write_loop = tokio::spawn(async move {
        let mut written = 0u64;
        while let Some(response) = response_rx.recv().await {
            let payload = serde_json::to_vec(&response)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            write_frame(&mut writer, &payload).await?;
            written += 1;
        }
        writer.shutdown().await?;
        Ok::<u64, io::Error>(written)
    });

    let mut read_result = Ok(());
    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                let response = WireResponse::message(0, 400, format!("Invalid input: {err}"));
                let _ = response_tx.send(response).await;
                read_result = Err(err);
                break;
            }
        };
        let wire = match serde_json::from_slice::<WireRequest>(&frame) {
            Ok(wire) => wire,
            Err(err) => {
                warn!("invalid request frame: {err}");
                let response = WireResponse::message(0, 400, format!("Invalid request: {err}"));
                if response_tx.send(response).await.is_err() {
                    break;
                }
                continue;
            }
        };
        let Ok(permit) = Arc::clone(&slots).try_acquire_owned() else {
            warn!("request {} rejected: queue full", wire.id);
            let response = WireResponse::message(wire.id, BUSY_STATUS, "Busy");
            if response_tx.send(response).await.is_err() {
                break;
            }
            continue;
        };
        let router = Arc::clone(&router);
        let response_tx = response_tx.clone();
        tokio::spawn(async move {
            let response = handle(&router, wire).await;
            drop(permit);
            let _ = response_tx.send(response).await;
        });
    }
    drop(response_tx);

    let written = write_loop
        .await
        .map_err(io::Error::other)??;
    read_result.map(|()| written)
}
