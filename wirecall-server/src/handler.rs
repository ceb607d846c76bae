//! Handler registry and typed dispatch.
//!
//! Handlers are statically typed in their request and response; the
//! registry stores them behind a uniform bytes-in/bytes-out interface.
//! The per-type adapter decodes the request, invokes the user callback
//! with a per-call [`Context`], and encodes the response. Registration
//! happens only before the server starts, so lookups take no lock.

use crate::error::ServerError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use wirecall_protocol::{Message, Metadata};

/// Per-call view handed to a handler: read-only metadata plus an error
/// slot whose contents travel back to the client in the trailing ERR
/// frame.
pub struct Context<'a> {
    metadata: &'a Metadata,
    err: RefCell<String>,
}

impl<'a> Context<'a> {
    pub(crate) fn new(metadata: &'a Metadata) -> Self {
        Self {
            metadata,
            err: RefCell::new(String::new()),
        }
    }

    /// The metadata map sent with this call.
    pub fn metadata(&self) -> &Metadata {
        self.metadata
    }

    /// Looks up a single metadata value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Reports a call-level error to the client. An empty string means no
    /// error; the response payload is still delivered either way.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.err.borrow_mut() = message.into();
    }

    pub(crate) fn take_error(self) -> String {
        self.err.into_inner()
    }
}

/// Uniform form every typed handler is stored as.
pub(crate) type RawHandler = dyn Fn(&Context<'_>, &[u8]) -> Vec<u8> + Send + Sync;

/// Registry mapping request type names to handlers.
#[derive(Default)]
pub(crate) struct Handlers {
    map: HashMap<String, Arc<RawHandler>>,
}

impl Handlers {
    /// Binds a typed handler under `Req::TYPE_NAME`.
    ///
    /// Fails if the name is already bound; the first binding stays.
    pub(crate) fn bind<Req, Resp, F>(&mut self, handler: F) -> Result<(), ServerError>
    where
        Req: Message,
        Resp: Message,
        F: Fn(&Context<'_>, &Req) -> Resp + Send + Sync + 'static,
    {
        let name = Req::TYPE_NAME;
        if self.map.contains_key(name) {
            return Err(ServerError::DuplicateHandler(name.to_string()));
        }

        let adapter = move |ctx: &Context<'_>, req_bytes: &[u8]| -> Vec<u8> {
            let req = match Req::decode(req_bytes) {
                Ok(req) => req,
                Err(_) => {
                    ctx.set_error("Failed to read protobuf request message");
                    return Vec::new();
                }
            };
            let resp = handler(ctx, &req);
            match resp.encode() {
                Ok(bytes) => bytes,
                Err(_) => {
                    ctx.set_error("Failed to write protobuf response message");
                    Vec::new()
                }
            }
        };
        self.map.insert(name.to_string(), Arc::new(adapter));
        Ok(())
    }

    /// Finds the handler for a request name, or the error string the
    /// client receives with the NACK.
    pub(crate) fn lookup(&self, name: &str) -> Result<Arc<RawHandler>, String> {
        self.map
            .get(name)
            .cloned()
            .ok_or_else(|| format!("Unknown request: '{name}'"))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
