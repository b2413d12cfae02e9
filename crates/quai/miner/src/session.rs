//! Mining proxy session
//!
//! One persistent TCP connection carrying newline-delimited JSON-RPC 2.0.
//!
//! ```text
//!  connect ──► Connecting ──login──► Authenticated ──listen──► Listening
//! ```
//!
//! Requests are written by [`MinerSession`]; every inbound frame is read by
//! the [`SessionListener`], which forwards headers to the update channel and
//! resolves replies that a caller is waiting on. A lost connection ends the
//! listener with an error; there is no reconnect at this layer.

use crate::{
    methods::{GET_PENDING_HEADER, RECEIVE_MINED_HEADER, SUBMIT_LOGIN},
    metrics,
    retry::Transient,
};
use alloy_primitives::Address;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use quai_primitives::Header;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::HashMap,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::{
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc, oneshot},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError},
    sync::CancellationToken,
};
use tracing::{debug, info, warn};

/// Longest frame accepted from the proxy.
const MAX_FRAME_LENGTH: usize = 4 * 1024 * 1024;

const JSONRPC_VERSION: &str = "2.0";

/// Error object returned by the proxy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, thiserror::Error)]
#[error("code {code}: {message}")]
pub struct RpcError {
    /// JSON-RPC error code
    pub code: i64,
    /// Error message
    pub message: String,
}

/// Proxy session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The proxy could not be reached
    #[error("failed to connect to proxy {addr}: {source}")]
    Connect {
        /// Proxy address
        addr: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Reading or writing a frame failed
    #[error("proxy connection error: {0}")]
    Codec(#[from] LinesCodecError),

    /// A request could not be serialized
    #[error("failed to encode {method} request: {source}")]
    Encode {
        /// Method being encoded
        method: &'static str,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// The proxy closed the connection
    #[error("proxy connection closed")]
    ConnectionClosed,

    /// A request was issued before login
    #[error("session is not logged in")]
    NotAuthenticated,

    /// The proxy answered with an error object
    #[error("proxy rejected request: {0}")]
    Rpc(#[from] RpcError),

    /// The proxy answered without a header
    #[error("proxy reply carried no header")]
    EmptyReply,

    /// Nobody is consuming pending headers anymore
    #[error("update channel closed")]
    UpdatesClosed,
}

impl Transient for SessionError {
    fn is_transient(&self) -> bool {
        !matches!(self, Self::Encode { .. } | Self::NotAuthenticated | Self::UpdatesClosed)
    }
}

type Reply = Result<(), SessionError>;

#[derive(Debug, Serialize)]
struct Request<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

/// Any inbound frame: a response, or a notification pushed by the proxy.
#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

impl Frame {
    fn id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    /// Header carried in `result`, in `params[0]`, or in a subscription
    /// style `params.result`.
    fn header(&self) -> Option<Result<Header, serde_json::Error>> {
        let payload = match (&self.result, &self.params) {
            (Some(result), _) if !result.is_null() => result,
            (_, Some(Value::Array(params))) => params.first()?,
            (_, Some(params @ Value::Object(fields))) => fields.get("result").unwrap_or(params),
            _ => return None,
        };
        payload.is_object().then(|| Header::deserialize(payload))
    }
}

/// Request side of a proxy connection.
#[derive(Debug)]
pub struct MinerSession {
    addr: String,
    writer: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, LinesCodec>>,
    next_id: AtomicU64,
    logged_in: AtomicBool,
    waiters: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
}

impl MinerSession {
    /// Dial the proxy. Accepts `host:port` or `tcp://host:port`.
    pub async fn connect(addr: &str) -> Result<(Arc<Self>, SessionListener), SessionError> {
        let target = addr.strip_prefix("tcp://").unwrap_or(addr);
        let stream = TcpStream::connect(target)
            .await
            .map_err(|source| SessionError::Connect { addr: addr.to_string(), source })?;
        let (read, write) = stream.into_split();

        let session = Arc::new(Self {
            addr: addr.to_string(),
            writer: tokio::sync::Mutex::new(FramedWrite::new(write, LinesCodec::new())),
            next_id: AtomicU64::new(0),
            logged_in: AtomicBool::new(false),
            waiters: Mutex::new(HashMap::new()),
        });
        let listener = SessionListener {
            reader: FramedRead::new(read, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH)),
            session: Arc::clone(&session),
        };

        info!(target: "quai::session", addr, "Connected to mining proxy");
        Ok((session, listener))
    }

    /// Proxy address this session is connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether login has been sent.
    pub fn is_authenticated(&self) -> bool {
        self.logged_in.load(Ordering::Acquire)
    }

    /// Send the login request. No acknowledgement is awaited.
    pub async fn login(&self, address: Address, password: &str) -> Result<(), SessionError> {
        self.write_request(SUBMIT_LOGIN, (address, password), None).await?;
        self.logged_in.store(true, Ordering::Release);
        info!(target: "quai::session", %address, "Logged in to mining proxy");
        Ok(())
    }

    /// Ask for the current pending header and wait for the proxy's reply.
    ///
    /// The header itself reaches the update channel through the listener,
    /// like any pushed update, so it cannot be lost if it races with one.
    pub async fn fetch_pending_header(&self) -> Result<(), SessionError> {
        self.ensure_authenticated()?;
        let (tx, rx) = oneshot::channel();
        let _slot = self.write_request(GET_PENDING_HEADER, [(); 0], Some(tx)).await?;
        rx.await.unwrap_or(Err(SessionError::ConnectionClosed))
    }

    /// Submit a sealed header. No acknowledgement is awaited.
    pub async fn submit_mined_header(&self, header: &Header) -> Result<(), SessionError> {
        self.ensure_authenticated()?;
        self.write_request(RECEIVE_MINED_HEADER, [header], None).await?;
        Ok(())
    }

    fn ensure_authenticated(&self) -> Result<(), SessionError> {
        if self.is_authenticated() { Ok(()) } else { Err(SessionError::NotAuthenticated) }
    }

    /// Serialize and write one request. Ids are taken under the writer lock,
    /// so they reach the wire in increasing order.
    ///
    /// With `reply`, the returned slot keeps the waiter registered until it
    /// is dropped.
    async fn write_request<P: Serialize>(
        &self,
        method: &'static str,
        params: P,
        reply: Option<oneshot::Sender<Reply>>,
    ) -> Result<Option<ReplySlot<'_>>, SessionError> {
        let mut writer = self.writer.lock().await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&Request { jsonrpc: JSONRPC_VERSION, id, method, params })
            .map_err(|source| SessionError::Encode { method, source })?;

        let slot = reply.map(|reply| {
            self.waiters.lock().insert(id, reply);
            ReplySlot { session: self, id }
        });
        writer.send(frame).await?;

        debug!(target: "quai::session", id, method, "Sent request");
        Ok(slot)
    }

    fn resolve(&self, id: u64, reply: Reply) {
        if let Some(waiter) = self.waiters.lock().remove(&id) {
            let _ = waiter.send(reply);
        }
    }
}

/// Registered waiter for one request id, removed on drop.
#[derive(Debug)]
struct ReplySlot<'a> {
    session: &'a MinerSession,
    id: u64,
}

impl Drop for ReplySlot<'_> {
    fn drop(&mut self) {
        self.session.waiters.lock().remove(&self.id);
    }
}

/// Receive side of a proxy connection.
#[derive(Debug)]
pub struct SessionListener {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    session: Arc<MinerSession>,
}

impl SessionListener {
    /// Read frames until the connection drops or `shutdown` fires.
    ///
    /// Returns an error when the connection is lost.
    pub async fn run(
        mut self,
        updates: mpsc::Sender<Header>,
        shutdown: CancellationToken,
    ) -> Result<(), SessionError> {
        info!(target: "quai::session", addr = self.session.addr(), "Listening for proxy updates");
        // The reader yields a single `None` after a decode error before it
        // resumes reading.
        let mut skipped_frame = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                next = self.reader.next() => next,
            };

            match next {
                Some(Ok(line)) => {
                    skipped_frame = false;
                    self.handle_frame(&line, &updates).await?;
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(
                        target: "quai::session",
                        max_length = MAX_FRAME_LENGTH,
                        "Skipping oversized proxy frame"
                    );
                    skipped_frame = true;
                }
                Some(Err(err)) => return Err(err.into()),
                None if skipped_frame => skipped_frame = false,
                None => return Err(SessionError::ConnectionClosed),
            }
        }
    }

    async fn handle_frame(
        &self,
        line: &str,
        updates: &mpsc::Sender<Header>,
    ) -> Result<(), SessionError> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let frame: Frame = match serde_json::from_str(line) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(target: "quai::session", %err, "Ignoring malformed proxy frame");
                return Ok(());
            }
        };

        let mut reply = match &frame.error {
            Some(err) => {
                warn!(target: "quai::session", id = ?frame.id, %err, "Proxy returned an error");
                Err(SessionError::Rpc(err.clone()))
            }
            None => Err(SessionError::EmptyReply),
        };

        match frame.header() {
            Some(Ok(header)) => {
                metrics::record_pending_header();
                updates.send(header).await.map_err(|_| SessionError::UpdatesClosed)?;
                reply = Ok(());
            }
            Some(Err(err)) => warn!(target: "quai::session", %err, "Ignoring undecodable header"),
            None => debug!(
                target: "quai::session",
                id = ?frame.id,
                method = frame.method.as_deref(),
                "Frame carried no header"
            ),
        }

        if let Some(id) = frame.id() {
            self.session.resolve(id, reply);
        }
        Ok(())
    }
}
