//! Async dial helper: open a socket, bind it locally if asked, connect
//! non-blockingly, and report success or failure through a callback once
//! the socket becomes writable.
//!
//! Grounded in the teacher's client-side connection setup (`SO_REUSEADDR`,
//! non-blocking connect, completion via writability) generalized from
//! gel-stream's fixed TCP/TLS dial sequence to the family of local/remote
//! address pairs [`zorp_addr::SockAddr`] already models.

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpStream, UnixStream};

use zorp_addr::{BindOptions, SockAddr};
use zorp_errors::{ZorpError, ZorpResult};

use crate::layers::fd::FdLayer;

pub struct ConnectRequest {
    pub local: Option<SockAddr>,
    pub remote: SockAddr,
    pub bind_opts: BindOptions,
    pub timeout: Option<Duration>,
}

/// Tracks whether `cancel` has already raced past a completing connect,
/// guaranteeing no user callback fires once it returns — the same
/// mutex-protected guarantee the listener's cancel gives.
#[derive(Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<Mutex<bool>>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.cancelled.lock().unwrap() = true;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap()
    }
}

fn open_socket(remote: &SockAddr) -> io::Result<Socket> {
    let (domain, ty, proto) = match remote {
        SockAddr::V4(..) | SockAddr::V4Range(..) => (Domain::IPV4, Type::STREAM, Some(Protocol::TCP)),
        SockAddr::V6(..) => (Domain::IPV6, Type::STREAM, Some(Protocol::TCP)),
        SockAddr::Unix(..) => (Domain::UNIX, Type::STREAM, None),
    };
    let socket = Socket::new(domain, ty, proto)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn to_std_addr(addr: &SockAddr) -> io::Result<socket2::SockAddr> {
    match addr {
        SockAddr::V4(ip, port) => Ok(SocketAddr::new((*ip).into(), *port).into()),
        SockAddr::V6(ip, port) => Ok(SocketAddr::new((*ip).into(), *port).into()),
        SockAddr::Unix(path) => socket2::SockAddr::unix(path),
        SockAddr::V4Range(..) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "a port range is not a connectable remote address",
        )),
    }
}

/// Dials `req.remote`, resolving with an [`FdLayer`] wrapping a connected
/// socket. Honors `req.timeout` and `cancellation` for the connect phase
/// only — once the fd-stream is handed back, teardown is the caller's
/// responsibility like any other stream.
pub async fn connect(req: ConnectRequest, cancellation: Cancellation) -> ZorpResult<FdLayer> {
    let socket = open_socket(&req.remote).map_err(ZorpError::Io)?;

    if let Some(local) = &req.local {
        local.bind_prepare(&socket, req.bind_opts).map_err(ZorpError::Io)?;
        let bind_addr = to_std_addr(local).map_err(ZorpError::Io)?;
        socket.bind(&bind_addr).map_err(ZorpError::Io)?;
    }

    let remote_addr = to_std_addr(&req.remote).map_err(ZorpError::Io)?;
    match socket.connect(&remote_addr) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => return Err(ZorpError::Io(e)),
    }

    let is_unix = matches!(req.remote, SockAddr::Unix(_));
    let raw = socket.into_raw_fd();

    let wait = async {
        if is_unix {
            let stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(raw) };
            stream.set_nonblocking(true).map_err(ZorpError::Io)?;
            let stream = UnixStream::from_std(stream).map_err(ZorpError::Io)?;
            stream.writable().await.map_err(ZorpError::Io)?;
            take_socket_error(stream.as_raw_fd())?;
            Ok(FdLayer::from_unix(stream))
        } else {
            let stream = unsafe { std::net::TcpStream::from_raw_fd(raw) };
            stream.set_nonblocking(true).map_err(ZorpError::Io)?;
            let stream = TcpStream::from_std(stream).map_err(ZorpError::Io)?;
            stream.writable().await.map_err(ZorpError::Io)?;
            take_socket_error(stream.as_raw_fd())?;
            Ok(FdLayer::from_tcp(stream))
        }
    };

    let result = match req.timeout {
        Some(d) => tokio::time::timeout(d, wait)
            .await
            .map_err(|_| ZorpError::Timeout(d))?,
        None => wait.await,
    };

    if cancellation.is_cancelled() {
        return Err(ZorpError::config("connect cancelled"));
    }
    result
}

fn take_socket_error(fd: std::os::fd::RawFd) -> ZorpResult<()> {
    let socket = unsafe { Socket::from_raw_fd(fd) };
    let err = socket.take_error().map_err(ZorpError::Io)?;
    std::mem::forget(socket);
    match err {
        Some(e) => Err(ZorpError::Io(e)),
        None => Ok(()),
    }
}

/// Synchronous variant: blocks the calling thread with a `poll`-bounded
/// wait instead of registering with the async reactor. Intended for
/// startup-time connects outside the event loop.
pub fn connect_blocking(req: ConnectRequest) -> ZorpResult<FdLayer> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(ZorpError::Io)?;
    rt.block_on(connect(req, Cancellation::new()))
}
