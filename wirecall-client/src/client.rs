//! The synchronous call sequencer.

use crate::error::ClientError;
use std::time::{Duration, Instant};
use tracing::debug;
use wirecall_protocol::{frame, metadata, net, Code, Endpoint, Message, Metadata, Stream};

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// What a zero timeout normalizes to.
const UNBOUNDED_TIMEOUT: Duration = Duration::from_secs(3600);

/// A blocking RPC client owning a single connection.
///
/// A NACK or a handler-reported error leaves the connection open for
/// further calls; any transport or framing failure closes it, after which
/// every call fails with [`ClientError::NotConnected`] until a new client
/// is connected.
pub struct Client {
    stream: Option<Stream>,
    timeout: Duration,
}

impl Client {
    /// Connects to a server endpoint.
    pub fn connect(endpoint: &Endpoint) -> Result<Self, ClientError> {
        let stream = net::connect(endpoint)?;
        debug!("connected to {endpoint}");
        Ok(Self {
            stream: Some(stream),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Sets the per-call timeout. Zero means one hour.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Returns whether the connection is still usable.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Issues a call without metadata.
    pub fn call<Req, Resp>(&mut self, req: &Req) -> Result<Resp, ClientError>
    where
        Req: Message,
        Resp: Message,
    {
        self.call_with_metadata(req, &Metadata::new())
    }

    /// Issues a call with the given metadata map.
    pub fn call_with_metadata<Req, Resp>(
        &mut self,
        req: &Req,
        metadata: &Metadata,
    ) -> Result<Resp, ClientError>
    where
        Req: Message,
        Resp: Message,
    {
        let result = self.exchange(req, metadata);
        if let Err(ref err) = result {
            if err.is_fatal() {
                debug!("call failed fatally, closing connection: {err}");
                self.stream = None;
            }
        }
        result
    }

    /// Runs one request/response exchange against the wire.
    fn exchange<Req, Resp>(&mut self, req: &Req, md: &Metadata) -> Result<Resp, ClientError>
    where
        Req: Message,
        Resp: Message,
    {
        let stream = self.stream.as_ref().ok_or(ClientError::NotConnected)?;

        let timeout = if self.timeout.is_zero() {
            UNBOUNDED_TIMEOUT
        } else {
            self.timeout
        };
        // The deadline is absolute; every step below recomputes the
        // remaining budget from it.
        let deadline = Some(Instant::now() + timeout);

        let req_bytes = req.encode()?;

        frame::send_data(stream, Code::ReqName, Req::TYPE_NAME.as_bytes(), deadline)?;

        let code = frame::recv_code_raw(stream, deadline)?;
        if code == Code::Nack.as_u32() {
            let err = frame::recv_data(stream, Code::Err, deadline)?;
            return Err(ClientError::Rejected(
                String::from_utf8_lossy(&err).into_owned(),
            ));
        }
        if code != Code::Ack.as_u32() {
            return Err(wirecall_protocol::ProtocolError::UnexpectedCode {
                got: code,
                expected: Code::Ack,
            }
            .into());
        }

        frame::send_data(stream, Code::Req, &req_bytes, deadline)?;
        frame::send_data(stream, Code::Metadata, &metadata::encode(md), deadline)?;

        let resp_bytes = frame::recv_data(stream, Code::Resp, deadline)?;
        let err = frame::recv_data(stream, Code::Err, deadline)?;
        if !err.is_empty() {
            return Err(ClientError::Handler(
                String::from_utf8_lossy(&err).into_owned(),
            ));
        }

        Ok(Resp::decode(&resp_bytes)?)
    }
}
