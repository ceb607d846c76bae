//! Listener and connector factories.
//!
//! Three endpoint families are supported: TCP v4, Unix domain sockets on a
//! filesystem path, and Unix domain sockets in the Linux abstract
//! namespace. Listeners are created non-blocking with a configurable
//! backlog; accepted sockets stay in blocking mode.
//!
//! Socket creation goes through `libc` because the std listener builders
//! hard-code the backlog and cannot express full-length abstract
//! addresses. Everything above the descriptor level is std types.

use crate::error::ProtocolError;
use crate::transport::Stream;
use std::fmt;
use std::io;
use std::mem;
use std::net::TcpListener;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

/// A server bind target or client connect target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP v4. Servers bind the wildcard address and ignore `host`;
    /// clients connect to `host:port`.
    Tcp { host: String, port: u16 },
    /// Unix domain socket bound to a filesystem path. Binding pre-unlinks
    /// any stale entry at the path.
    Unix { path: PathBuf },
    /// Unix domain socket in the abstract namespace (leading NUL byte,
    /// name NUL-padded to the full address length).
    Abstract { name: String },
}

impl Endpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Tcp {
            host: host.into(),
            port,
        }
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix { path: path.into() }
    }

    pub fn abstract_ns(name: impl Into<String>) -> Self {
        Endpoint::Abstract { name: name.into() }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Endpoint::Unix { path } => write!(f, "unix://{}", path.display()),
            Endpoint::Abstract { name } => write!(f, "abstract://{name}"),
        }
    }
}

/// A non-blocking listening socket for any endpoint family.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    /// Binds a listener for `endpoint` with the given backlog.
    pub fn bind(endpoint: &Endpoint, backlog: i32) -> Result<Self, ProtocolError> {
        match endpoint {
            Endpoint::Tcp { port, .. } => Ok(Listener::Tcp(bind_tcp(*port, backlog)?)),
            Endpoint::Unix { path } => {
                // A previous run may have left the socket file behind.
                let _ = std::fs::remove_file(path);
                let bytes = std::os::unix::ffi::OsStrExt::as_bytes(path.as_os_str());
                Ok(Listener::Unix(bind_unix(bytes, false, backlog)?))
            }
            Endpoint::Abstract { name } => {
                Ok(Listener::Unix(bind_unix(name.as_bytes(), true, backlog)?))
            }
        }
    }

    /// Accepts one pending connection.
    ///
    /// The accepted socket is in blocking mode; returns the stream and a
    /// printable peer description.
    pub fn accept(&self) -> io::Result<(Stream, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept()?;
                Ok((Stream::Tcp(stream), addr.to_string()))
            }
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept()?;
                Ok((Stream::Unix(stream), "unix-peer".to_string()))
            }
        }
    }
}

impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Listener::Tcp(l) => l.as_raw_fd(),
            Listener::Unix(l) => l.as_raw_fd(),
        }
    }
}

/// Connects to `endpoint`, returning a blocking stream socket.
pub fn connect(endpoint: &Endpoint) -> Result<Stream, ProtocolError> {
    match endpoint {
        Endpoint::Tcp { host, port } => {
            let stream = std::net::TcpStream::connect((host.as_str(), *port))?;
            stream.set_nodelay(true).ok();
            Ok(Stream::Tcp(stream))
        }
        Endpoint::Unix { path } => Ok(Stream::Unix(UnixStream::connect(path)?)),
        Endpoint::Abstract { name } => Ok(Stream::Unix(connect_abstract(name.as_bytes())?)),
    }
}

fn bind_tcp(port: u16, backlog: i32) -> Result<TcpListener, ProtocolError> {
    let fd = new_socket(libc::AF_INET)?;

    let reuse: libc::c_int = 1;
    // SAFETY: `fd` is a valid socket and `reuse` outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &reuse as *const _ as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(last_os_error());
    }

    let addr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr {
            s_addr: libc::INADDR_ANY.to_be(),
        },
        sin_zero: [0; 8],
    };
    // SAFETY: `addr` is a properly initialized sockaddr_in.
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(last_os_error());
    }

    listen(&fd, backlog)?;

    // SAFETY: `fd` is an owned, listening TCP socket; ownership transfers.
    Ok(unsafe { TcpListener::from_raw_fd(fd.into_raw_fd()) })
}

fn bind_unix(name: &[u8], abstract_ns: bool, backlog: i32) -> Result<UnixListener, ProtocolError> {
    let fd = new_socket(libc::AF_UNIX)?;
    let addr = unix_addr(name, abstract_ns)?;

    // SAFETY: `addr` is a properly initialized sockaddr_un; the full
    // structure length is passed so abstract names are NUL-padded to
    // sizeof(sun_path)-1, matching connecting peers.
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(last_os_error());
    }

    listen(&fd, backlog)?;

    // SAFETY: `fd` is an owned, listening Unix socket; ownership transfers.
    Ok(unsafe { UnixListener::from_raw_fd(fd.into_raw_fd()) })
}

fn connect_abstract(name: &[u8]) -> Result<UnixStream, ProtocolError> {
    // SAFETY: plain socket creation; the result is checked below.
    let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
    if raw < 0 {
        return Err(last_os_error());
    }
    // SAFETY: `raw` was just created and is owned by no one else.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let addr = unix_addr(name, true)?;
    // SAFETY: `addr` is a properly initialized sockaddr_un with the same
    // full-length form the listener bound.
    let rc = unsafe {
        libc::connect(
            fd.as_raw_fd(),
            &addr as *const _ as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(last_os_error());
    }

    // SAFETY: `fd` is an owned, connected Unix socket; ownership transfers.
    Ok(unsafe { UnixStream::from_raw_fd(fd.into_raw_fd()) })
}

/// Creates a non-blocking stream socket for the given family.
fn new_socket(family: libc::c_int) -> Result<OwnedFd, ProtocolError> {
    // SAFETY: plain socket creation; the result is checked below.
    let raw = unsafe {
        libc::socket(
            family,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if raw < 0 {
        return Err(last_os_error());
    }
    // SAFETY: `raw` was just created and is owned by no one else.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

fn listen(fd: &OwnedFd, backlog: i32) -> Result<(), ProtocolError> {
    // SAFETY: `fd` is a valid bound socket.
    let rc = unsafe { libc::listen(fd.as_raw_fd(), backlog) };
    if rc < 0 {
        return Err(last_os_error());
    }
    Ok(())
}

/// Builds a sockaddr_un for a path or abstract name.
fn unix_addr(name: &[u8], abstract_ns: bool) -> Result<libc::sockaddr_un, ProtocolError> {
    // SAFETY: sockaddr_un is plain old data; zeroed is a valid value.
    let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let path_len = addr.sun_path.len();
    if name.is_empty() {
        return Err(ProtocolError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty socket name",
        )));
    }
    let offset = usize::from(abstract_ns);
    if offset + name.len() >= path_len {
        return Err(ProtocolError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket name too long",
        )));
    }
    for (dst, src) in addr.sun_path[offset..].iter_mut().zip(name) {
        *dst = *src as libc::c_char;
    }
    Ok(addr)
}

fn last_os_error() -> ProtocolError {
    ProtocolError::Io(io::Error::last_os_error())
}
