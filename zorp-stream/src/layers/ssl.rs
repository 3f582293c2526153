//! Bridges a stream to a `rustls` session via a manual BIO-style bridge:
//! ciphertext read from the child is fed into the session with
//! `read_tls`/`process_new_packets`, plaintext is drained with
//! `reader()`, and outgoing plaintext handed to `writer()` is flushed
//! back out to the child with `write_tls`.
//!
//! Where the original relied on the library signalling "want write while
//! reading" (or the mirror) and remembering to retry on the next loop
//! iteration, here that retry is just `Poll::Pending` bubbling up through
//! the two futures-like helper methods below — the event loop this layer
//! assumes is tokio's reactor.

use std::collections::VecDeque;
use std::future::Future;
use std::io::{Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use rustls::{ClientConnection, ServerConnection};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

use zorp_buffer::PacketBuf;
use zorp_errors::{ZorpError, ZorpResult};

use crate::core::{ShutdownMode, Stream, StreamStats, Umbrella};
use crate::ctrl::{CtrlMsg, CtrlReply};
use crate::tls::TlsSessionConfig;

enum Conn {
    Client(ClientConnection),
    Server(ServerConnection),
}

impl Conn {
    fn wants_read(&self) -> bool {
        match self {
            Conn::Client(c) => c.wants_read(),
            Conn::Server(c) => c.wants_read(),
        }
    }

    fn read_tls(&mut self, rd: &mut dyn std::io::Read) -> std::io::Result<usize> {
        match self {
            Conn::Client(c) => c.read_tls(rd),
            Conn::Server(c) => c.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn std::io::Write) -> std::io::Result<usize> {
        match self {
            Conn::Client(c) => c.write_tls(wr),
            Conn::Server(c) => c.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> Result<(), rustls::Error> {
        match self {
            Conn::Client(c) => c.process_new_packets().map(|_| ()),
            Conn::Server(c) => c.process_new_packets().map(|_| ()),
        }
    }

    fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            Conn::Client(c) => c.reader(),
            Conn::Server(c) => c.reader(),
        }
    }

    fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            Conn::Client(c) => c.writer(),
            Conn::Server(c) => c.writer(),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            Conn::Client(c) => c.send_close_notify(),
            Conn::Server(c) => c.send_close_notify(),
        }
    }
}

pub struct SslLayer<C> {
    name: String,
    child: C,
    conn: Conn,
    send_buf: VecDeque<u8>,
    shutdown_timeout: Duration,
    shutdown_deadline: Option<Pin<Box<Sleep>>>,
    close_notify_sent: bool,
    stats: StreamStats,
}

impl<C: Stream> SslLayer<C> {
    pub fn new_client(child: C, cfg: &TlsSessionConfig, server_name: ServerName<'static>) -> ZorpResult<Self> {
        let config = cfg.client_config()?;
        let conn = ClientConnection::new(config, server_name).map_err(|e| ZorpError::config(e.to_string()))?;
        Ok(Self::wrap(child, Conn::Client(conn)))
    }

    pub fn new_server(child: C, cfg: &TlsSessionConfig) -> ZorpResult<Self> {
        let config = cfg.server_config(None)?;
        let conn = ServerConnection::new(config).map_err(|e| ZorpError::config(e.to_string()))?;
        Ok(Self::wrap(child, Conn::Server(conn)))
    }

    fn wrap(child: C, conn: Conn) -> Self {
        Self {
            name: "ssl".to_string(),
            child,
            conn,
            send_buf: VecDeque::new(),
            // "A short hard-wired timeout" for the close-notify handshake.
            shutdown_timeout: Duration::from_secs(5),
            shutdown_deadline: None,
            close_notify_sent: false,
            stats: StreamStats::default(),
        }
    }

    fn queue_outgoing_tls(&mut self) -> std::io::Result<()> {
        loop {
            let mut out = Vec::new();
            let n = self.conn.write_tls(&mut out)?;
            if n == 0 {
                return Ok(());
            }
            self.send_buf.extend(out);
        }
    }

    fn poll_flush_ciphertext(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.queue_outgoing_tls()?;
        while !self.send_buf.is_empty() {
            let front: Vec<u8> = self.send_buf.iter().copied().collect();
            match Pin::new(&mut self.child).poll_write(cx, &front) {
                Poll::Ready(Ok(n)) => {
                    self.stats.add_sent(n as u64);
                    self.send_buf.drain(..n);
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }

    /// Pulls one chunk of ciphertext from the child into the session and
    /// processes it. Returns `Ok(0)` on child EOF.
    fn poll_fill_from_child(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<usize>> {
        let mut scratch = [0u8; 4096];
        let mut rb = ReadBuf::new(&mut scratch);
        match Pin::new(&mut self.child).poll_read(cx, &mut rb) {
            Poll::Ready(Ok(())) => {
                let n = rb.filled().len();
                if n > 0 {
                    let mut cursor = rb.filled();
                    self.conn.read_tls(&mut cursor)?;
                    self.conn
                        .process_new_packets()
                        .map_err(std::io::Error::other)?;
                    self.stats.add_received(n as u64);
                }
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<C: Stream> AsyncRead for SslLayer<C> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            let mut scratch = vec![0u8; buf.remaining().max(1)];
            match self.conn.reader().read(&mut scratch) {
                Ok(n) => {
                    buf.put_slice(&scratch[..n]);
                    return Poll::Ready(Ok(()));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Poll::Ready(Err(e)),
            }

            if let Poll::Pending = self.as_mut().poll_flush_ciphertext(cx)? {
                return Poll::Pending;
            }

            if !self.conn.wants_read() {
                // No plaintext, nothing outstanding to read: true EOF.
                return Poll::Ready(Ok(()));
            }
            match self.as_mut().poll_fill_from_child(cx) {
                Poll::Ready(Ok(0)) => return Poll::Ready(Ok(())),
                Poll::Ready(Ok(_)) => continue,
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<C: Stream> AsyncWrite for SslLayer<C> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let n = self.conn.writer().write(data)?;
        // Best-effort opportunistic flush; a partial flush just leaves
        // bytes queued in `send_buf` for the next call.
        let _ = self.as_mut().poll_flush_ciphertext(cx);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.as_mut().poll_flush_ciphertext(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut self.child).poll_flush(cx),
            other => other,
        }
    }

    /// Sends `close_notify`, drains it to the child, then forwards the
    /// shutdown — bounded by a short deadline so a peer that never
    /// acknowledges can't wedge teardown forever.
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if !self.close_notify_sent {
            self.conn.send_close_notify();
            self.close_notify_sent = true;
            let timeout = self.shutdown_timeout;
            self.shutdown_deadline = Some(Box::pin(tokio::time::sleep(timeout)));
        }

        let timed_out = match self.shutdown_deadline.as_mut() {
            Some(sleep) => sleep.as_mut().poll(cx).is_ready(),
            None => false,
        };

        if !timed_out {
            if let Poll::Pending = self.as_mut().poll_flush_ciphertext(cx) {
                return Poll::Pending;
            }
        }

        Pin::new(&mut self.child).poll_shutdown(cx)
    }
}

impl<C: Stream> Stream for SslLayer<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> &StreamStats {
        &self.stats
    }

    fn umbrella_flags(&self) -> Umbrella {
        Umbrella::BOTH
    }

    fn unget(&mut self, data: PacketBuf) {
        self.child.unget(data);
    }

    fn ctrl(&mut self, msg: CtrlMsg) -> ZorpResult<CtrlReply> {
        match msg {
            CtrlMsg::SetSslShutdownTimeout(d) => {
                self.shutdown_timeout = d;
                Ok(CtrlReply::Ack)
            }
            other => {
                let forwards = other.forwards();
                let reply = self.child.ctrl(other)?;
                let _ = forwards;
                Ok(reply)
            }
        }
    }

    fn shutdown_mode(&mut self, mode: ShutdownMode) -> ZorpResult<()> {
        self.child.shutdown_mode(mode)
    }
}

