//! Duplicates one direction of traffic into a secondary stream: every
//! byte that passes through in the forked direction is also written to
//! the fork, and shutting down that direction shuts the fork down too.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use zorp_buffer::PacketBuf;
use zorp_errors::ZorpResult;

use crate::core::{ShutdownMode, Stream, StreamStats, Umbrella};
use crate::ctrl::{CtrlMsg, CtrlReply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeeDirection {
    Read,
    Write,
}

pub struct TeeLayer<C, F> {
    name: String,
    child: C,
    fork: F,
    direction: TeeDirection,
    stats: StreamStats,
}

impl<C: Stream, F: Stream> TeeLayer<C, F> {
    pub fn new(child: C, fork: F, direction: TeeDirection) -> Self {
        Self {
            name: "tee".to_string(),
            child,
            fork,
            direction,
            stats: StreamStats::default(),
        }
    }
}

impl<C: Stream, F: Stream> AsyncRead for TeeLayer<C, F> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.child).poll_read(cx, buf);
        if poll.is_ready() && self.direction == TeeDirection::Read {
            let produced = &buf.filled()[before..];
            if !produced.is_empty() {
                // Best-effort: a fork that can't currently accept the
                // bytes doesn't block or fail the primary read.
                let _ = Pin::new(&mut self.fork).poll_write(cx, produced);
            }
        }
        poll
    }
}

impl<C: Stream, F: Stream> AsyncWrite for TeeLayer<C, F> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let poll = Pin::new(&mut self.child).poll_write(cx, data);
        if let Poll::Ready(Ok(n)) = &poll {
            if self.direction == TeeDirection::Write && *n > 0 {
                let _ = Pin::new(&mut self.fork).poll_write(cx, &data[..*n]);
            }
        }
        poll
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let poll = Pin::new(&mut self.child).poll_flush(cx);
        if self.direction == TeeDirection::Write {
            let _ = Pin::new(&mut self.fork).poll_flush(cx);
        }
        poll
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let poll = Pin::new(&mut self.child).poll_shutdown(cx);
        if poll.is_ready() {
            let _ = Pin::new(&mut self.fork).poll_shutdown(cx);
        }
        poll
    }
}

impl<C: Stream, F: Stream> Stream for TeeLayer<C, F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> &StreamStats {
        &self.stats
    }

    fn umbrella_flags(&self) -> Umbrella {
        Umbrella::NONE
    }

    fn unget(&mut self, data: PacketBuf) {
        self.child.unget(data);
    }

    fn ctrl(&mut self, msg: CtrlMsg) -> ZorpResult<CtrlReply> {
        self.child.ctrl(msg)
    }

    fn shutdown_mode(&mut self, mode: ShutdownMode) -> ZorpResult<()> {
        let mode_matches = matches!(
            (mode, self.direction),
            (ShutdownMode::Both, _)
                | (ShutdownMode::Read, TeeDirection::Read)
                | (ShutdownMode::Write, TeeDirection::Write)
        );
        self.child.shutdown_mode(mode)?;
        if mode_matches {
            self.fork.shutdown_mode(ShutdownMode::Both)?;
        }
        Ok(())
    }
}
