//! A write-side spool layer backed by [`zorp_blob::Blob`]: bytes written
//! are appended into the blob (which the blob system may transparently
//! swap to disk under memory pressure) and drained into the child as it
//! becomes writable, the same shape as [`super::buf::BufLayer`] but with
//! overflow-to-disk instead of an unbounded in-process `VecDeque`.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use zorp_blob::{Blob, BlobSystem, Timeout as BlobTimeout};
use zorp_buffer::PacketBuf;
use zorp_errors::{Sticky, ZorpError, ZorpResult};

use crate::core::{ShutdownMode, Stream, StreamStats, Umbrella};
use crate::ctrl::{CtrlMsg, CtrlReply};

pub struct BlobLayer<C> {
    name: String,
    child: C,
    /// Kept alive only so the manager thread this blob depends on isn't
    /// torn down while the blob is still in use elsewhere in the process.
    system: BlobSystem,
    blob: Blob,
    /// Bytes of `blob` not yet drained into the child.
    read_pos: u64,
    write_pos: u64,
    /// Non-blocking mode maps onto a zero `zorp_blob::Timeout` (a single
    /// non-blocking attempt) rather than the infinite timeout a
    /// synchronous caller might want.
    blob_timeout: BlobTimeout,
    sticky: Sticky,
    stats: StreamStats,
}

impl<C: Stream> BlobLayer<C> {
    pub fn new(child: C, system: BlobSystem) -> ZorpResult<Self> {
        let blob = system
            .create_blob(0, BlobTimeout::Try)
            .map_err(|e| ZorpError::config(e.to_string()))?;
        Ok(Self {
            name: "blob".to_string(),
            child,
            system,
            blob,
            read_pos: 0,
            write_pos: 0,
            blob_timeout: BlobTimeout::Try,
            sticky: Sticky::new(),
            stats: StreamStats::default(),
        })
    }

    fn pending(&self) -> u64 {
        self.write_pos - self.read_pos
    }

    fn drain(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        while self.pending() > 0 {
            let chunk_len = (self.pending() as usize).min(64 * 1024);
            let chunk = self
                .blob
                .get_copy(self.read_pos, chunk_len, self.blob_timeout)
                .map_err(std::io::Error::other)?;
            match Pin::new(&mut self.child).poll_write(cx, &chunk) {
                Poll::Ready(Ok(n)) => {
                    self.stats.add_sent(n as u64);
                    self.read_pos += n as u64;
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

impl<C: Stream> AsyncRead for BlobLayer<C> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.child).poll_read(cx, buf)
    }
}

impl<C: Stream> AsyncWrite for BlobLayer<C> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if let Err(e) = self.sticky.check() {
            return Poll::Ready(Err(e));
        }
        let _ = self.as_mut().drain(cx);
        if let Err(e) = self.sticky.check() {
            return Poll::Ready(Err(e));
        }
        let pos = self.write_pos;
        self.blob
            .add_copy(pos, data, self.blob_timeout)
            .map_err(std::io::Error::other)?;
        self.write_pos += data.len() as u64;
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

impl<C: Stream> Stream for BlobLayer<C> {
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
            CtrlMsg::SetTimeout(Some(d)) => {
                self.blob_timeout = BlobTimeout::from_millis(d.as_millis() as i64);
                self.child.ctrl(CtrlMsg::SetTimeout(Some(d)))
            }
            CtrlMsg::SetTimeout(None) => {
                self.blob_timeout = BlobTimeout::Infinite;
                self.child.ctrl(CtrlMsg::SetTimeout(None))
            }
            other => self.child.ctrl(other),
        }
    }

    fn shutdown_mode(&mut self, mode: ShutdownMode) -> ZorpResult<()> {
        self.child.shutdown_mode(mode)
    }
}
