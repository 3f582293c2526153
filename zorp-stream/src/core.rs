//! The duplex stream contract every layer implements, plus the handful of
//! cross-cutting concerns (unget, umbrella direction, structure refcount,
//! context save/restore) that the original expressed as fields on a shared
//! base object and this crate expresses as a trait plus small owned types.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};

use zorp_buffer::PacketBuf;

use crate::ctrl::{CtrlMsg, CtrlReply};

/// A direction (or both) a layer may fully absorb. Mirrors `umbrella_flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Umbrella {
    pub read: bool,
    pub write: bool,
}

impl Umbrella {
    pub const NONE: Umbrella = Umbrella { read: false, write: false };
    pub const BOTH: Umbrella = Umbrella { read: true, write: true };
    pub const READ: Umbrella = Umbrella { read: true, write: false };
    pub const WRITE: Umbrella = Umbrella { read: false, write: true };

    /// `self` minus whatever `shadowed_by` (a layer above this one) already
    /// absorbs — the layer's *effective* umbrella state.
    pub fn minus(self, shadowed_by: Umbrella) -> Umbrella {
        Umbrella {
            read: self.read && !shadowed_by.read,
            write: self.write && !shadowed_by.write,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Read,
    Write,
    Both,
}

/// Byte counters every layer keeps, regardless of whether it transforms
/// the bytes passing through.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub sent: AtomicU64,
    pub received: AtomicU64,
}

impl StreamStats {
    pub fn add_sent(&self, n: u64) {
        self.sent.fetch_add(n, Ordering::Relaxed);
    }
    pub fn add_received(&self, n: u64) {
        self.received.fetch_add(n, Ordering::Relaxed);
    }
    pub fn snapshot(&self) -> (u64, u64) {
        (self.sent.load(Ordering::Relaxed), self.received.load(Ordering::Relaxed))
    }
}

/// Everything `save_context`/`restore_context` must preserve across a push
/// or pop so the prior owner cannot observe stale callbacks firing: the
/// open time is not included since it is set once at construction and
/// never restored.
#[derive(Debug, Default)]
pub struct SavedContext {
    pub timeout: Option<Duration>,
    pub wants_read: bool,
    pub wants_write: bool,
    pub wants_pri: bool,
    /// Opaque per-layer state produced by `extra_save`/consumed by
    /// `extra_restore` (e.g. the line layer's EOL mode, the fd layer's
    /// non-blocking flag).
    pub extra: Vec<u8>,
}

/// Uniform duplex-I/O contract across every concrete layer. Built on top of
/// `AsyncRead`/`AsyncWrite` so a stack composes the way the rest of the
/// ecosystem expects (pollable, usable with `tokio::io::copy` etc.), with
/// the additional control surface the original's stream base class
/// exposed: unget, typed ctrl, umbrella accounting, and structural
/// teardown.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {
    fn name(&self) -> &str;

    fn stats(&self) -> &StreamStats;

    /// Directions this layer fully absorbs from the caller's perspective.
    fn umbrella_flags(&self) -> Umbrella {
        Umbrella::NONE
    }

    /// Pushes `data` back so the next `poll_read` returns it before any
    /// new bytes from the child. Default: not supported at this layer
    /// (only layers that maintain a read buffer, e.g. `line`, override
    /// this meaningfully — others forward to their child if they have
    /// one).
    fn unget(&mut self, data: PacketBuf);

    /// Handles (or forwards) a control message. The default forwards
    /// every message verbatim to the child, matching "unknown local codes
    /// are forwarded to the child"; layers that understand a message
    /// override this and call `self.child_mut()` themselves if the
    /// message also carries the forward bit.
    fn ctrl(&mut self, msg: CtrlMsg) -> zorp_errors::ZorpResult<CtrlReply>;

    /// Initiates teardown for `mode`. Layers with no meaningful half-close
    /// (e.g. a line framer) simply forward.
    fn shutdown_mode(&mut self, mode: ShutdownMode) -> zorp_errors::ZorpResult<()>;

    /// Saves this layer's callbacks/want-flags/timeout plus any
    /// layer-specific extra state, and resets it to a quiescent state.
    fn save_context(&mut self) -> SavedContext {
        SavedContext::default()
    }

    /// Restores previously saved state.
    fn restore_context(&mut self, _ctx: SavedContext) {}
}

/// A shared handle to a boxed stream stack, used wherever something other
/// than plain ownership needs to keep the chain alive — principally a
/// poll-loop attachment. `Arc::strong_count` on the inner handle *is* the
/// "structure" reference count: one for the owner holding this
/// `StreamHandle`, plus one more for each `attach_source` still registered,
/// plus one for each in-flight clone taken for the duration of a callback.
#[derive(Clone)]
pub struct StreamHandle {
    inner: Arc<Mutex<Box<dyn Stream>>>,
}

impl StreamHandle {
    pub fn new(top: Box<dyn Stream>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(top)),
        }
    }

    /// Number of live structural references: callers, attached poll
    /// sources, and any in-flight clones taken for a callback.
    pub fn structure_refs(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn with_stream<R>(&self, f: impl FnOnce(&mut dyn Stream) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut **guard)
    }
}

impl AsyncRead for StreamHandle {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let mut guard = self.inner.lock();
        Pin::new(&mut **guard).poll_read(cx, buf)
    }
}

impl AsyncWrite for StreamHandle {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut guard = self.inner.lock();
        Pin::new(&mut **guard).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let mut guard = self.inner.lock();
        Pin::new(&mut **guard).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let mut guard = self.inner.lock();
        Pin::new(&mut **guard).poll_shutdown(cx)
    }
}
