//! Write-side output buffering: `write` always reports success and copies
//! into an internal FIFO of packets; a background flush (driven by the
//! child's writability) drains them. If a prior flush failed, that error
//! is cached and returned on the next `write` instead of silently
//! swallowing it.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use zorp_buffer::PacketBuf;
use zorp_errors::{Sticky, ZorpError, ZorpResult};

use crate::core::{ShutdownMode, Stream, StreamStats, Umbrella};
use crate::ctrl::{CtrlMsg, CtrlReply};

pub struct BufLayer<C> {
    name: String,
    child: C,
    pending: VecDeque<Vec<u8>>,
    pending_bytes: usize,
    /// Advisory: `ctrl(SetWriteWatermark)` reporting threshold for
    /// "writable". Callers may still overrun it.
    watermark: usize,
    sticky: Sticky,
    stats: StreamStats,
}

impl<C: Stream> BufLayer<C> {
    pub fn new(child: C) -> Self {
        Self {
            name: "buf".to_string(),
            child,
            pending: VecDeque::new(),
            pending_bytes: 0,
            watermark: 64 * 1024,
            sticky: Sticky::new(),
            stats: StreamStats::default(),
        }
    }

    pub fn has_headroom(&self) -> bool {
        self.pending_bytes < self.watermark
    }

    /// Drains as much of the pending queue into the child as it will
    /// currently accept without blocking.
    fn drain(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        while let Some(front) = self.pending.front() {
            match Pin::new(&mut self.child).poll_write(cx, front) {
                Poll::Ready(Ok(n)) => {
                    self.stats.add_sent(n as u64);
                    self.pending_bytes -= n;
                    let front = self.pending.front_mut().unwrap();
                    if n == front.len() {
                        self.pending.pop_front();
                    } else {
                        front.drain(..n);
                    }
                }
                Poll::Ready(Err(e)) => {
                    let err = ZorpError::Io(std::io::Error::new(e.kind(), e.to_string()));
                    self.sticky.set(&err);
                    return Poll::Ready(Err(e));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<C: Stream> AsyncRead for BufLayer<C> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.child).poll_read(cx, buf)
    }
}

impl<C: Stream> AsyncWrite for BufLayer<C> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if let Err(e) = self.sticky.check() {
            return Poll::Ready(Err(e));
        }
        // Opportunistically push the queue forward first so a steady
        // writer doesn't grow `pending` without bound.
        let _ = self.as_mut().drain(cx);
        if let Err(e) = self.sticky.check() {
            return Poll::Ready(Err(e));
        }
        self.pending_bytes += data.len();
        self.pending.push_back(data.to_vec());
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.as_mut().drain(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut self.child).poll_flush(cx),
            other => other,
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.as_mut().drain(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut self.child).poll_shutdown(cx),
            other => other,
        }
    }
}

impl<C: Stream> Stream for BufLayer<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> &StreamStats {
        &self.stats
    }

    fn umbrella_flags(&self) -> Umbrella {
        Umbrella::WRITE
    }

    fn unget(&mut self, data: PacketBuf) {
        self.child.unget(data);
    }

    fn ctrl(&mut self, msg: CtrlMsg) -> ZorpResult<CtrlReply> {
        match msg {
            CtrlMsg::SetWriteWatermark(n) => {
                self.watermark = n;
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
