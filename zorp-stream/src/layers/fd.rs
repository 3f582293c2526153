//! The bottom of every stack: a raw file descriptor (TCP, Unix, or an
//! externally-provided fd) wrapped for non-blocking duplex I/O.
//!
//! `tokio`'s `AsyncRead`/`AsyncWrite` impls already retry on `EINTR` and
//! surface `WouldBlock` as `Poll::Pending`, which is exactly the
//! `G_IO_STATUS_AGAIN` contract this layer has to provide — so this layer
//! is mostly a thin pass-through plus the `ctrl` surface for fd-level
//! socket options.

use std::os::fd::{AsRawFd, RawFd};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UnixStream};

use zorp_buffer::PacketBuf;
use zorp_errors::{ZorpError, ZorpResult};

use crate::core::{ShutdownMode, Stream, StreamStats, Umbrella};
use crate::ctrl::{CtrlMsg, CtrlReply};

/// The concrete socket kinds an fd layer can wrap. An externally-provided
/// fd (e.g. handed down by a supervisor across a fork) is accepted as a
/// raw `TcpStream`/`UnixStream` built with `from_std`, so this enum does
/// not need a third "foreign fd" variant.
enum Inner {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Inner {
    fn raw_fd(&self) -> RawFd {
        match self {
            Inner::Tcp(s) => s.as_raw_fd(),
            Inner::Unix(s) => s.as_raw_fd(),
        }
    }
}

pub struct FdLayer {
    name: String,
    inner: Inner,
    stats: StreamStats,
}

impl FdLayer {
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            name: "fd".to_string(),
            inner: Inner::Tcp(stream),
            stats: StreamStats::default(),
        }
    }

    pub fn from_unix(stream: UnixStream) -> Self {
        Self {
            name: "fd".to_string(),
            inner: Inner::Unix(stream),
            stats: StreamStats::default(),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.inner.raw_fd()
    }

    fn set_keepalive(&self, on: bool) -> std::io::Result<()> {
        let fd = self.inner.raw_fd();
        let socket = unsafe { socket2::Socket::from_raw_fd(fd) };
        let result = socket.set_keepalive(on);
        // Don't let the `Socket` wrapper close the fd when it drops; tokio
        // still owns it.
        std::mem::forget(socket);
        result
    }
}

use std::os::fd::FromRawFd;

impl AsyncRead for FdLayer {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = match &mut self.inner {
            Inner::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Inner::Unix(s) => Pin::new(s).poll_read(cx, buf),
        };
        if poll.is_ready() {
            let produced = buf.filled().len().saturating_sub(before);
            self.stats.add_received(produced as u64);
        }
        poll
    }
}

impl AsyncWrite for FdLayer {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = match &mut self.inner {
            Inner::Tcp(s) => Pin::new(s).poll_write(cx, data),
            Inner::Unix(s) => Pin::new(s).poll_write(cx, data),
        };
        if let Poll::Ready(Ok(n)) = &poll {
            self.stats.add_sent(*n as u64);
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.inner {
            Inner::Tcp(s) => Pin::new(s).poll_flush(cx),
            Inner::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut self.inner {
            Inner::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Inner::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl Stream for FdLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> &StreamStats {
        &self.stats
    }

    fn umbrella_flags(&self) -> Umbrella {
        // The bottom layer never shadows anything above it; every layer
        // above decides its own umbrella state relative to this one.
        Umbrella::NONE
    }

    fn unget(&mut self, _data: PacketBuf) {
        // The fd layer keeps no read buffer of its own; a caller wanting
        // unget semantics pushes a `buf`/`line` layer on top, which is
        // where unget is actually implemented.
    }

    fn ctrl(&mut self, msg: CtrlMsg) -> ZorpResult<CtrlReply> {
        match msg {
            CtrlMsg::SetNonBlocking(_on) => {
                // tokio sockets are always non-blocking once registered
                // with the reactor; nothing to toggle.
                Ok(CtrlReply::Ack)
            }
            CtrlMsg::SetCloseOnExec(on) => {
                let fd = self.inner.raw_fd();
                set_cloexec(fd, on).map_err(ZorpError::Io)?;
                Ok(CtrlReply::Ack)
            }
            CtrlMsg::SetKeepAlive(on) => {
                self.set_keepalive(on).map_err(ZorpError::Io)?;
                Ok(CtrlReply::Ack)
            }
            CtrlMsg::GetRawFd => Ok(CtrlReply::RawFd(self.inner.raw_fd())),
            CtrlMsg::GetByteCounters => {
                let (sent, received) = self.stats.snapshot();
                Ok(CtrlReply::ByteCounters { sent, received })
            }
            CtrlMsg::SetTimeout(_) => Ok(CtrlReply::Ack),
            _ => Ok(CtrlReply::Ack),
        }
    }

    fn shutdown_mode(&mut self, mode: ShutdownMode) -> ZorpResult<()> {
        let how = match mode {
            ShutdownMode::Read => std::net::Shutdown::Read,
            ShutdownMode::Write => std::net::Shutdown::Write,
            ShutdownMode::Both => std::net::Shutdown::Both,
        };
        let fd = self.inner.raw_fd();
        let socket = unsafe { socket2::Socket::from_raw_fd(fd) };
        let result = socket.shutdown(how);
        std::mem::forget(socket);
        result.map_err(ZorpError::Io)
    }
}

#[cfg(unix)]
fn set_cloexec(fd: RawFd, on: bool) -> std::io::Result<()> {
    // SAFETY: `fd` is borrowed from a live tokio socket for the duration
    // of this call only; we never take ownership of it.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags < 0 {
            return Err(std::io::Error::last_os_error());
        }
        let flags = if on {
            flags | libc::FD_CLOEXEC
        } else {
            flags & !libc::FD_CLOEXEC
        };
        if libc::fcntl(fd, libc::F_SETFD, flags) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}
