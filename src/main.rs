//! wirecall demo server.
//!
//! Serves a Ping handler over an abstract-namespace Unix socket (or TCP
//! when `WIRECALL_PORT` is set) until SIGINT/SIGTERM.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wirecall_protocol::{Endpoint, Message, ProtocolError};
use wirecall_server::{Server, ServerConfig};

#[derive(Debug, Serialize, Deserialize)]
struct PingRequest {
    from: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PingResponse {
    msg: String,
}

impl Message for PingRequest {
    const TYPE_NAME: &'static str = "test.PingRequest";

    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

impl Message for PingResponse {
    const TYPE_NAME: &'static str = "test.PingResponse";

    fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

const DEFAULT_SOCKET_NAME: &str = "wirecall.sock";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = ServerConfig::default();
    config.apply_env_overrides();

    let endpoint = match std::env::var("WIRECALL_PORT") {
        Ok(port) => Endpoint::tcp("0.0.0.0", port.parse()?),
        Err(_) => Endpoint::abstract_ns(
            std::env::var("WIRECALL_SOCKET").unwrap_or_else(|_| DEFAULT_SOCKET_NAME.to_string()),
        ),
    };

    tracing::info!("starting wirecall server");
    tracing::info!("  endpoint: {}", endpoint);
    tracing::info!("  worker threads: {}", config.threads);
    tracing::info!("  max connections: {}", config.max_connections);
    tracing::info!("  idle timeout: {:?}", config.idle_timeout);

    let mut server = Server::new(config);
    server.bind::<PingRequest, PingResponse, _>(|ctx, req| {
        tracing::debug!(
            "ping from '{}' (sessionId='{}', reportId='{}')",
            req.from,
            ctx.get("sessionId").unwrap_or(""),
            ctx.get("reportId").unwrap_or("")
        );
        PingResponse {
            msg: "Pong".to_string(),
        }
    })?;

    let server = Arc::new(server);
    let stopper = Arc::clone(&server);
    ctrlc::set_handler(move || {
        tracing::info!("received shutdown signal, stopping server");
        stopper.stop();
    })?;

    server.start(&endpoint)?;
    tracing::info!("server exited");
    Ok(())
}
