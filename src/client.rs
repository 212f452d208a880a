//! Blocking client
//!
//! Synchronous request/response façade over one reusable TCP connection.
//!
//! ## Responsibilities
//! - Reject out-of-range keys and values before touching the network
//! - Connect lazily, and again after a transport error or endpoint change
//! - One framed round trip per [`Client::send`]; no retries

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream};

use crate::error::{MapKvError, Result};
use crate::protocol::{codec, Request, Response};

/// Live socket to one endpoint
struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
    endpoint: SocketAddr,
}

impl Connection {
    fn open(endpoint: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(endpoint)?;
        stream.set_nodelay(true)?;
        let read_stream = stream.try_clone()?;

        tracing::debug!("Connected to {}", endpoint);
        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(stream),
            endpoint,
        })
    }

    fn round_trip(&mut self, payload: &[u8]) -> Result<Response> {
        codec::write_frame(&mut self.writer, payload)?;
        codec::decode_response(&codec::read_frame(&mut self.reader)?)
    }
}

/// mapkv client
///
/// Holds at most one connection. Not `Sync`: one call in flight at a time.
#[derive(Default)]
pub struct Client {
    last_endpoint: Option<SocketAddr>,
    connection: Option<Connection>,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `request` to `endpoint` and wait for its response.
    ///
    /// Length violations fail with `InvalidKeyLength`/`InvalidValueLength`
    /// before any I/O. Transport failures close the connection; the next
    /// call reconnects.
    pub fn send(&mut self, endpoint: SocketAddr, request: &Request) -> Result<Response> {
        request.validate()?;
        let payload = codec::encode_request(request)?;

        self.last_endpoint = Some(endpoint);
        let mut connection = match self.connection.take() {
            Some(conn) if conn.endpoint == endpoint => conn,
            stale => {
                if stale.is_some() {
                    tracing::debug!("Endpoint changed to {}, reconnecting", endpoint);
                }
                Connection::open(endpoint)?
            }
        };

        let response = connection.round_trip(&payload).map_err(|e| {
            tracing::debug!("Transport error with {}: {}", endpoint, e);
            e
        })?;

        if response.operation != request.operation {
            return Err(MapKvError::Protocol(format!(
                "response for {} to a {} request",
                response.operation, request.operation
            )));
        }

        self.connection = Some(connection);
        Ok(response)
    }

    /// Resend to the endpoint of the previous call
    pub fn send_to_last(&mut self, request: &Request) -> Result<Response> {
        let endpoint = self
            .last_endpoint
            .ok_or_else(|| MapKvError::Config("no endpoint used yet".into()))?;
        self.send(endpoint, request)
    }

    pub fn last_endpoint(&self) -> Option<SocketAddr> {
        self.last_endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Drop the connection, if any
    pub fn disconnect(&mut self) {
        self.connection = None;
    }
}
