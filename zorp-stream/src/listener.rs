//! Async accept helper. Binds (or adopts an externally-provided fd),
//! listens, and drives an accept loop that batches up to a fixed cap per
//! readability wakeup so one listener can't starve the rest of the
//! process during an accept storm.
//!
//! Grounded in the teacher's `server/acceptor.rs`: this crate keeps its
//! builder shape (options set before `start`) but drives the accept loop
//! itself instead of the teacher's single-connection `accept()` future,
//! since the specification calls for an explicit batching policy.

use std::io;
use std::os::fd::FromRawFd;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::poll_fn;
use futures::FutureExt;
use socket2::Socket;
use tokio::net::{TcpListener, UnixListener};

use zorp_addr::{BindOptions, SockAddr};
use zorp_errors::{ZorpError, ZorpResult};

use crate::connector::Cancellation;
use crate::layers::fd::FdLayer;

/// Cap on accepts drained from one readability wakeup, matching the
/// specification's "accept up to a fixed cap (~50)" policy.
const ACCEPT_BATCH: usize = 50;

pub enum Accepted {
    Tcp(FdLayer, std::net::SocketAddr),
    Unix(FdLayer),
}

/// What the per-connection callback returns: whether the listener should
/// keep accepting within this wakeup's batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptControl {
    Continue,
    Stop,
}

enum Inner {
    Tcp(TcpListener),
    Unix(UnixListener),
}

pub struct Listener {
    inner: Inner,
    suspended: bool,
    cancellation: Cancellation,
}

impl Listener {
    pub fn bind(addr: &SockAddr, opts: BindOptions) -> ZorpResult<Self> {
        let (socket, _port) = addr.bind(opts).map_err(ZorpError::Io)?;
        socket.listen(1024).map_err(ZorpError::Io)?;
        socket.set_nonblocking(true).map_err(ZorpError::Io)?;
        Self::from_socket(socket, addr)
    }

    /// Adopts a socket handed down by a supervisor across a fork/exec,
    /// already bound and listening.
    pub fn from_raw_fd(fd: std::os::fd::RawFd, unix: bool) -> ZorpResult<Self> {
        let socket = unsafe { Socket::from_raw_fd(fd) };
        socket.set_nonblocking(true).map_err(ZorpError::Io)?;
        let placeholder = if unix {
            SockAddr::unix("/")
        } else {
            SockAddr::v4(std::net::Ipv4Addr::UNSPECIFIED, 0)
        };
        Self::from_socket(socket, &placeholder)
    }

    fn from_socket(socket: Socket, addr: &SockAddr) -> ZorpResult<Self> {
        let unix = matches!(addr, SockAddr::Unix(_));
        let inner = if unix {
            let std_listener: std::os::unix::net::UnixListener = socket.into();
            Inner::Unix(UnixListener::from_std(std_listener).map_err(ZorpError::Io)?)
        } else {
            let std_listener: std::net::TcpListener = socket.into();
            Inner::Tcp(TcpListener::from_std(std_listener).map_err(ZorpError::Io)?)
        };
        Ok(Self {
            inner,
            suspended: false,
            cancellation: Cancellation::new(),
        })
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Runs until `on_accept` returns [`AcceptControl::Stop`] or the
    /// listener is cancelled, calling `on_accept` once per accepted
    /// connection and batching up to [`ACCEPT_BATCH`] accepts (or until
    /// the wall-clock second changes) per readability wakeup.
    pub async fn run(&mut self, mut on_accept: impl FnMut(Accepted) -> AcceptControl) -> ZorpResult<()> {
        loop {
            if self.cancellation_hit() {
                return Ok(());
            }
            if self.suspended {
                tokio::task::yield_now().await;
                continue;
            }

            // Blocks until at least one connection is ready.
            let first = self.accept_one().await.map_err(ZorpError::Io)?;

            let started_second = current_second();
            let mut accepted_this_wakeup = 0usize;
            let mut next = Some(first);
            loop {
                let Some(accepted) = next.take() else {
                    break;
                };
                accepted_this_wakeup += 1;
                if on_accept(accepted) == AcceptControl::Stop {
                    return Ok(());
                }
                if accepted_this_wakeup >= ACCEPT_BATCH || current_second() != started_second {
                    break;
                }
                // Non-blocking: only take another if one is already queued.
                next = self.try_accept_one()?;
            }
        }
    }

    fn cancellation_hit(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    async fn accept_one(&self) -> io::Result<Accepted> {
        match &self.inner {
            Inner::Tcp(l) => {
                let (stream, peer) = poll_fn(|cx| l.poll_accept(cx)).await?;
                Ok(Accepted::Tcp(FdLayer::from_tcp(stream), peer))
            }
            Inner::Unix(l) => {
                let (stream, _peer) = poll_fn(|cx| l.poll_accept(cx)).await?;
                Ok(Accepted::Unix(FdLayer::from_unix(stream)))
            }
        }
    }

    fn try_accept_one(&self) -> ZorpResult<Option<Accepted>> {
        match self.accept_one().now_or_never() {
            Some(Ok(accepted)) => Ok(Some(accepted)),
            Some(Err(e)) => Err(ZorpError::Io(e)),
            None => Ok(None),
        }
    }
}

fn current_second() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
