//! The epoll server.
//!
//! One acceptor thread runs the event loop and the idle sweeper; a fixed
//! worker pool executes per-descriptor callbacks. Client descriptors are
//! armed one-shot, so a descriptor is owned by at most one worker at a
//! time; after a successful read phase the worker re-arms for write, after
//! a successful write phase back to read.
//!
//! Worker-side I/O is blocking and deadline-less: the listener is the only
//! non-blocking socket, accepted descriptors stay in blocking mode, and
//! the one-shot ownership is what makes that safe. A peer that stalls
//! mid-frame parks one worker until the idle sweeper reclaims the
//! connection.

use crate::config::ServerConfig;
use crate::conn::{Conn, Exchange, Phase};
use crate::epoll::{self, Epoll};
use crate::error::ServerError;
use crate::handler::{Context, Handlers, RawHandler};
use crate::pool::ThreadPool;
use crate::registry::ConnectionRegistry;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use wirecall_protocol::{frame, Code, Endpoint, Listener, Message, ProtocolError};

/// Epoll wait bound; also the cadence at which the stop flag is polled.
const WAIT_TIMEOUT_MS: i32 = 100;

/// How often the idle sweeper may run.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// RPC server: bind handlers, then [`Server::start`].
///
/// `start` blocks the calling thread in the acceptor loop until
/// [`Server::stop`] is invoked from any thread or a fatal I/O error
/// occurs. Handlers can only be bound while the server is not running.
pub struct Server {
    config: ServerConfig,
    handlers: Arc<Handlers>,
    stop: AtomicBool,
    running: AtomicBool,
}

impl Server {
    /// Creates a server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            handlers: Arc::new(Handlers::default()),
            stop: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    /// Binds a typed handler under `Req::TYPE_NAME`.
    ///
    /// Fails with [`ServerError::DuplicateHandler`] if the name is taken
    /// and with [`ServerError::Running`] once the server has started.
    pub fn bind<Req, Resp, F>(&mut self, handler: F) -> Result<(), ServerError>
    where
        Req: Message,
        Resp: Message,
        F: Fn(&Context<'_>, &Req) -> Resp + Send + Sync + 'static,
    {
        let handlers = Arc::get_mut(&mut self.handlers).ok_or(ServerError::Running)?;
        handlers.bind::<Req, Resp, F>(handler)
    }

    /// Runs the acceptor loop until [`Server::stop`].
    pub fn start(&self, endpoint: &Endpoint) -> Result<(), ServerError> {
        self.config.validate()?;
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ServerError::Running);
        }
        let result = self.run(endpoint);
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Requests shutdown. Idempotent; callable from any thread.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Returns whether the acceptor loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn run(&self, endpoint: &Endpoint) -> Result<(), ServerError> {
        self.stop.store(false, Ordering::SeqCst);

        let listener = Listener::bind(endpoint, self.config.backlog)?;
        let listen_fd = listener.as_raw_fd();

        info!(
            "listening on {} with {} worker threads",
            endpoint, self.config.threads
        );
        if self.handlers.is_empty() {
            warn!("no handlers bound; every request will be refused");
        }

        let engine = Arc::new(Engine {
            config: self.config.clone(),
            handlers: Arc::clone(&self.handlers),
            registry: ConnectionRegistry::new(),
            epoll: Epoll::new()?,
            next_id: AtomicU64::new(1),
        });
        engine.epoll.add(listen_fd, epoll::LISTENER)?;

        let mut pool = ThreadPool::new(self.config.threads);
        let mut events =
            vec![libc::epoll_event { events: 0, u64: 0 }; self.config.max_events];
        let mut last_sweep = Instant::now();

        while !self.stop.load(Ordering::SeqCst) {
            let ready = match engine.epoll.wait(&mut events, WAIT_TIMEOUT_MS) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("epoll wait failed: {e}");
                    continue;
                }
            };

            if ready == 0 {
                if last_sweep.elapsed() >= IDLE_CHECK_INTERVAL {
                    engine.sweep_idle();
                    last_sweep = Instant::now();
                }
                continue;
            }

            for event in &events[..ready] {
                let fd = event.u64 as RawFd;
                let bits = event.events;
                if fd == listen_fd {
                    if epoll::is_read_event(bits) {
                        engine.accept_one(&listener);
                    }
                } else if epoll::is_read_event(bits) {
                    let engine = Arc::clone(&engine);
                    pool.submit(move || engine.handle_read(fd));
                } else if epoll::is_write_event(bits) {
                    let engine = Arc::clone(&engine);
                    pool.submit(move || engine.handle_write(fd));
                }
            }
        }

        info!("event loop finished, shutting down");
        pool.stop();
        pool.wait();
        for conn in engine.registry.drain() {
            let _ = engine.epoll.delete(conn.fd());
        }
        info!("server stopped");
        Ok(())
    }
}

/// Shared server state the workers operate on.
struct Engine {
    config: ServerConfig,
    handlers: Arc<Handlers>,
    registry: ConnectionRegistry,
    epoll: Epoll,
    next_id: AtomicU64,
}

impl Engine {
    /// Accepts one pending connection (runs on the acceptor thread).
    fn accept_one(&self, listener: &Listener) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if self.registry.len() >= self.config.max_connections {
                    error!("maximum connections reached, rejecting {peer}");
                    return;
                }
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let fd = stream.as_raw_fd();
                let conn = Arc::new(Conn::new(stream, id, peer));
                self.registry.insert(Arc::clone(&conn));

                if let Err(e) = self.epoll.add(fd, epoll::READ_ONESHOT) {
                    error!("failed to register fd {fd} with epoll: {e}");
                    self.registry.remove(fd);
                    return;
                }
                if self.config.verbose {
                    info!("connection {id} from {} accepted (fd {fd})", conn.peer);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => error!("accept failed: {e}"),
        }
    }

    /// Drives the read side of a connection's state machine.
    fn handle_read(&self, fd: RawFd) {
        let Some(conn) = self.registry.get(fd) else {
            warn!("no connection state for fd {fd} in read event");
            return;
        };

        if let Err(err) = self.on_read(&conn) {
            if matches!(err, ServerError::Protocol(ProtocolError::NotConnected)) {
                // The peer closed cleanly between requests.
                if self.config.verbose {
                    info!("connection {} closed by peer (fd {fd})", conn.id);
                }
            } else {
                error!("connection {} read failed: {err} (fd {fd})", conn.id);
            }
            self.teardown(fd);
            return;
        }

        self.registry.touch(fd);
        if let Err(e) = self.epoll.modify(fd, epoll::WRITE_ONESHOT) {
            error!("failed to re-arm fd {fd} for write: {e}");
            self.teardown(fd);
        }
    }

    /// Drives the write side of a connection's state machine.
    fn handle_write(&self, fd: RawFd) {
        let Some(conn) = self.registry.get(fd) else {
            warn!("no connection state for fd {fd} in write event");
            return;
        };

        if let Err(err) = self.on_write(&conn) {
            error!("connection {} write failed: {err} (fd {fd})", conn.id);
            self.teardown(fd);
            return;
        }

        self.registry.touch(fd);
        if let Err(e) = self.epoll.modify(fd, epoll::READ_ONESHOT) {
            error!("failed to re-arm fd {fd} for read: {e}");
            self.teardown(fd);
        }
    }

    fn on_read(&self, conn: &Conn) -> Result<(), ServerError> {
        match conn.phase() {
            Phase::ReadName => {
                let name_bytes = frame::recv_data(&conn.stream, Code::ReqName, None)?;
                let name = String::from_utf8(name_bytes).map_err(|_| {
                    ProtocolError::Decode("request name is not valid UTF-8".to_string())
                })?;

                match self.handlers.lookup(&name) {
                    Ok(handler) => conn.with_exchange(|ex| {
                        ex.handler = Some(handler);
                        ex.phase = Phase::SendAck;
                    }),
                    Err(lookup_err) => {
                        debug!("connection {}: {lookup_err}", conn.id);
                        conn.with_exchange(|ex| {
                            ex.err = lookup_err;
                            ex.phase = Phase::SendNack;
                        });
                    }
                }
                Ok(())
            }
            Phase::ReadReq => {
                let req = frame::recv_data(&conn.stream, Code::Req, None)?;
                let metadata = frame::recv_metadata(&conn.stream, None)?;

                let handler: Arc<RawHandler> = conn
                    .with_exchange(|ex| ex.handler.clone())
                    .ok_or(ServerError::UnexpectedState("reading"))?;

                let ctx = Context::new(&metadata);
                let resp = handler(&ctx, &req);
                let err = ctx.take_error();

                conn.with_exchange(|ex| {
                    ex.resp = resp;
                    ex.err = err;
                    ex.phase = Phase::SendResp;
                });
                Ok(())
            }
            _ => Err(ServerError::UnexpectedState("reading")),
        }
    }

    fn on_write(&self, conn: &Conn) -> Result<(), ServerError> {
        match conn.phase() {
            Phase::SendAck => {
                frame::send_code(&conn.stream, Code::Ack, None)?;
                conn.with_exchange(|ex| ex.phase = Phase::ReadReq);
                Ok(())
            }
            Phase::SendNack => {
                let err = conn.with_exchange(|ex| std::mem::take(&mut ex.err));
                frame::send_code(&conn.stream, Code::Nack, None)?;
                frame::send_data(&conn.stream, Code::Err, err.as_bytes(), None)?;
                conn.with_exchange(Exchange::reset);
                Ok(())
            }
            Phase::SendResp => {
                let (resp, err) = conn.with_exchange(|ex| {
                    (std::mem::take(&mut ex.resp), std::mem::take(&mut ex.err))
                });
                frame::send_data(&conn.stream, Code::Resp, &resp, None)?;
                frame::send_data(&conn.stream, Code::Err, err.as_bytes(), None)?;
                conn.with_exchange(Exchange::reset);
                Ok(())
            }
            _ => Err(ServerError::UnexpectedState("writing")),
        }
    }

    /// Tears a connection down: registry removal is the linearization
    /// point, so concurrent callers are harmless and only the one that
    /// got the record proceeds. The descriptor closes when the last
    /// `Arc<Conn>` drops.
    fn teardown(&self, fd: RawFd) {
        if let Some(conn) = self.registry.remove(fd) {
            if self.config.verbose {
                info!("closing connection {} (fd {fd})", conn.id);
            }
            if let Err(e) = self.epoll.delete(fd) {
                warn!("failed to remove fd {fd} from epoll: {e}");
            }
        }
    }

    /// Closes connections idle beyond the configured timeout.
    fn sweep_idle(&self) {
        for conn in self.registry.idle_candidates(self.config.idle_timeout) {
            if self.config.verbose {
                info!("closing idle connection {} (fd {})", conn.id, conn.fd());
            }
            self.teardown(conn.fd());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use wirecall_protocol::{metadata, Metadata, Stream};

    #[derive(Debug, PartialEq)]
    struct UpperRequest(String);

    #[derive(Debug, PartialEq)]
    struct UpperResponse(String);

    impl Message for UpperRequest {
        const TYPE_NAME: &'static str = "test.UpperRequest";

        fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
            Ok(self.0.clone().into_bytes())
        }

        fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
            Ok(UpperRequest(String::from_utf8_lossy(bytes).into_owned()))
        }
    }

    impl Message for UpperResponse {
        const TYPE_NAME: &'static str = "test.UpperResponse";

        fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
            Ok(self.0.clone().into_bytes())
        }

        fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
            Ok(UpperResponse(String::from_utf8_lossy(bytes).into_owned()))
        }
    }

    fn unique_abstract(tag: &str) -> Endpoint {
        use std::sync::atomic::AtomicU32;
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        Endpoint::abstract_ns(format!(
            "wirecall-server-{}-{}-{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ))
    }

    fn start_upper_server(endpoint: &Endpoint) -> (Arc<Server>, thread::JoinHandle<()>) {
        let mut server = Server::new(ServerConfig::new(2));
        server
            .bind::<UpperRequest, UpperResponse, _>(|_ctx, req| {
                UpperResponse(req.0.to_uppercase())
            })
            .unwrap();
        let server = Arc::new(server);

        let runner = Arc::clone(&server);
        let thread_endpoint = endpoint.clone();
        let handle = thread::spawn(move || {
            runner.start(&thread_endpoint).unwrap();
        });

        // Wait for the listener to come up.
        for _ in 0..100 {
            if wirecall_protocol::net::connect(&endpoint).is_ok() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        (server, handle)
    }

    fn raw_call(stream: &Stream, name: &str, payload: &[u8]) -> (u32, Vec<u8>, Vec<u8>) {
        frame::send_data(stream, Code::ReqName, name.as_bytes(), None).unwrap();
        let code = frame::recv_code_raw(stream, None).unwrap();
        if code == Code::Nack.as_u32() {
            let err = frame::recv_data(stream, Code::Err, None).unwrap();
            return (code, Vec::new(), err);
        }
        assert_eq!(code, Code::Ack.as_u32());
        frame::send_data(stream, Code::Req, payload, None).unwrap();
        frame::send_data(stream, Code::Metadata, &metadata::encode(&Metadata::new()), None)
            .unwrap();
        let resp = frame::recv_data(stream, Code::Resp, None).unwrap();
        let err = frame::recv_data(stream, Code::Err, None).unwrap();
        (code, resp, err)
    }

    #[test]
    fn test_exchange_and_nack_over_raw_frames() {
        let endpoint = unique_abstract("raw");
        let (server, handle) = start_upper_server(&endpoint);

        let stream = wirecall_protocol::net::connect(&endpoint).unwrap();

        // Successful exchange.
        let (code, resp, err) = raw_call(&stream, "test.UpperRequest", b"hello");
        assert_eq!(code, Code::Ack.as_u32());
        assert_eq!(resp, b"HELLO");
        assert!(err.is_empty());

        // Unknown request on the same connection.
        let (code, _, err) = raw_call(&stream, "nope", b"");
        assert_eq!(code, Code::Nack.as_u32());
        assert_eq!(err, b"Unknown request: 'nope'");

        // The connection survived the NACK.
        let (code, resp, _) = raw_call(&stream, "test.UpperRequest", b"again");
        assert_eq!(code, Code::Ack.as_u32());
        assert_eq!(resp, b"AGAIN");

        server.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_rebind_after_stop() {
        let endpoint = unique_abstract("rebind");
        let (server, handle) = start_upper_server(&endpoint);
        assert!(server.is_running());

        server.stop();
        handle.join().unwrap();
        assert!(!server.is_running());

        // Once the engine is gone the registry is writable again.
        let mut server = Arc::try_unwrap(server).ok().unwrap();
        server
            .bind::<UpperResponse, UpperRequest, _>(|_ctx, resp| UpperRequest(resp.0.clone()))
            .unwrap();
    }

    #[test]
    fn test_double_start_refused() {
        let endpoint = unique_abstract("double");
        let (server, handle) = start_upper_server(&endpoint);

        let err = server.start(&endpoint).unwrap_err();
        assert!(matches!(err, ServerError::Running));

        server.stop();
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let endpoint = unique_abstract("stop");
        let (server, handle) = start_upper_server(&endpoint);
        server.stop();
        server.stop();
        handle.join().unwrap();
        assert!(!server.is_running());
    }

    #[test]
    fn test_duplicate_bind_rejected() {
        let mut server = Server::new(ServerConfig::new(1));
        server
            .bind::<UpperRequest, UpperResponse, _>(|_ctx, req| UpperResponse(req.0.clone()))
            .unwrap();
        let err = server
            .bind::<UpperRequest, UpperResponse, _>(|_ctx, req| UpperResponse(req.0.clone()))
            .unwrap_err();
        assert!(matches!(err, ServerError::DuplicateHandler(_)));
    }

    #[test]
    fn test_invalid_config_refused() {
        let server = Server::new(ServerConfig::new(0));
        let err = server.start(&unique_abstract("cfg")).unwrap_err();
        assert!(matches!(err, ServerError::InvalidConfig(_)));
    }
}
