//! Session
//!
//! Serves one accepted connection as an explicit state machine.
//!
//! ## State Machine
//! ```text
//!   ┌────────────────────────────────────────────────────────────┐
//!   ▼                                                            │
//! AwaitingFrameSize ──► AwaitingPayload ──► Dispatch             │
//!                                              │                 │
//!                                              ▼                 │
//!            WritingPayload ◄── WritingFrameSize ◄── EncodingResponse
//!                  │
//!                  └──────────────────────────────────────────────┘
//!
//! Any error ──► Closed, leaving the failed state for the log line.
//! ```
//!
//! Exactly one I/O operation is pending at a time, and the socket is not
//! read again until the previous response is fully written, so requests on
//! one connection are answered strictly in order.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;

use crate::error::{MapKvError, Result};
use crate::protocol::codec::{self, FRAME_HEADER_SIZE};
use crate::protocol::{ErrorCode, Operation, Request, Response};
use crate::stats::Stats;
use crate::storage::Store;

/// Where a session is in its read → dispatch → write cycle
#[derive(Debug)]
enum SessionState {
    AwaitingFrameSize,
    AwaitingPayload(usize),
    Dispatch,
    EncodingResponse(Response),
    WritingFrameSize(Bytes),
    WritingPayload(Bytes),
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingFrameSize => f.write_str("awaiting frame size"),
            Self::AwaitingPayload(size) => write!(f, "awaiting {} byte payload", size),
            Self::Dispatch => f.write_str("dispatching"),
            Self::EncodingResponse(_) => f.write_str("encoding response"),
            Self::WritingFrameSize(_) => f.write_str("writing frame size"),
            Self::WritingPayload(payload) => write!(f, "writing {} byte payload", payload.len()),
            Self::Closed => f.write_str("closed"),
        }
    }
}

/// One client connection
///
/// Owned by the task serving it; dropped (closing the socket) when the
/// peer disconnects, on any error, or on shutdown.
pub struct Session<S> {
    stream: BufStream<S>,
    peer: String,
    store: Arc<dyn Store>,
    stats: Arc<Stats>,
    state: SessionState,
    /// Payload of the request being served
    buf: Vec<u8>,
    cancel: CancellationToken,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        store: Arc<dyn Store>,
        stats: Arc<Stats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stream: BufStream::new(stream),
            peer: peer.into(),
            store,
            stats,
            state: SessionState::AwaitingFrameSize,
            buf: Vec::new(),
            cancel,
        }
    }

    /// Serve requests until the peer leaves, an error occurs, or shutdown
    pub async fn run(mut self) {
        let peer = self.peer.clone();
        tracing::debug!("Session opened for {}", peer);

        let cancel = self.cancel.clone();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Session for {} cancelled", peer);
                Ok(())
            }
            result = self.serve() => result,
        };

        match outcome {
            Ok(()) => {}
            Err(e) if e.is_disconnect() => {
                tracing::debug!("Client {} disconnected", peer);
            }
            Err(e) => {
                tracing::warn!("Session for {} failed while {}: {}", peer, self.state, e);
            }
        }
        self.state = SessionState::Closed;
    }

    async fn serve(&mut self) -> Result<()> {
        while !matches!(self.state, SessionState::Closed) {
            self.step().await?;
        }
        Ok(())
    }

    /// Run the current state to completion and move to the next one.
    ///
    /// On error the state is left where it failed, for logging.
    async fn step(&mut self) -> Result<()> {
        self.state = match &self.state {
            SessionState::AwaitingFrameSize => {
                let mut header = [0u8; FRAME_HEADER_SIZE];
                self.stream.read_exact(&mut header).await?;
                SessionState::AwaitingPayload(codec::decode_frame_size(header)?)
            }
            SessionState::AwaitingPayload(size) => {
                self.buf.resize(*size, 0);
                self.stream.read_exact(&mut self.buf).await?;
                SessionState::Dispatch
            }
            SessionState::Dispatch => {
                let request = codec::decode_request(&self.buf)?;
                SessionState::EncodingResponse(self.dispatch(&request)?)
            }
            SessionState::EncodingResponse(response) => {
                SessionState::WritingFrameSize(codec::encode_response(response)?)
            }
            SessionState::WritingFrameSize(payload) => {
                self.stream
                    .write_all(&codec::encode_frame_size(payload.len()))
                    .await?;
                SessionState::WritingPayload(payload.clone())
            }
            SessionState::WritingPayload(payload) => {
                self.stream.write_all(payload).await?;
                self.stream.flush().await?;
                SessionState::AwaitingFrameSize
            }
            SessionState::Closed => SessionState::Closed,
        };
        Ok(())
    }

    /// Validate, execute against the store, and record the outcome
    fn dispatch(&self, request: &Request) -> Result<Response> {
        tracing::debug!(peer = %self.peer, "{}", request);

        let response = match request.validate() {
            Ok(()) => blocking(|| self.execute(request))?,
            Err(MapKvError::InvalidKeyLength { .. }) => {
                Response::new(request.operation, ErrorCode::InvalidKeyLength)
            }
            Err(MapKvError::InvalidValueLength { .. }) => {
                Response::new(request.operation, ErrorCode::InvalidValueLength)
            }
            Err(e) => return Err(e),
        };

        self.stats.record(request.operation, response.error);
        tracing::trace!(peer = %self.peer, "{}", response);
        Ok(response)
    }

    fn execute(&self, request: &Request) -> Result<Response> {
        let error = match request.operation {
            Operation::Insert => self.store.insert(&request.key, &request.value)?,
            Operation::Update => self.store.update(&request.key, &request.value)?,
            Operation::Delete => self.store.delete(&request.key)?,
            Operation::Get => match self.store.get(&request.key)? {
                (ErrorCode::None, value) => return Ok(Response::found(value)),
                (error, _) => error,
            },
        };
        Ok(Response::new(request.operation, error))
    }
}

/// Run a store call, which may wait on another process's lock.
///
/// On a multi-thread runtime the worker hands its queue to another thread
/// first, so the wait never stalls other sessions or the accept loop.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}
