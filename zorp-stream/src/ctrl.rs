//! The typed replacement for the integer-coded `ctrl(code, bytes, len)`
//! convention: one enum variant per control message, each carrying its own
//! payload type instead of an untyped byte span.
//!
//! A message whose code would have had the `FORWARD` bit set in the
//! original is applied at the current layer and then handed to the child
//! via [`CtrlMsg::forwarded`]; local-only messages stop at the layer that
//! understands them. A layer that does not recognize a message forwards it
//! unconditionally, mirroring "unknown local codes are forwarded to the
//! child".

use std::time::Duration;

/// Which direction(s) a shutdown or watch request concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
    Both,
}

/// A control message sent down a stream stack. `forward()` reports whether
/// the original protocol would have propagated this code past a layer that
/// applies it locally.
#[derive(Debug, Clone)]
pub enum CtrlMsg {
    /// fd layer: toggle O_NONBLOCK.
    SetNonBlocking(bool),
    /// fd layer: toggle FD_CLOEXEC.
    SetCloseOnExec(bool),
    /// fd layer: toggle SO_KEEPALIVE.
    SetKeepAlive(bool),
    /// fd layer: read-only access to the raw fd, for diagnostics.
    GetRawFd,
    /// buf layer: advisory high-water mark for "writable" reporting.
    SetWriteWatermark(usize),
    /// line layer: end-of-line convention and oversize policy.
    SetLineMode { eol: super::layers::line::Eol, oversize: super::layers::line::OversizePolicy },
    /// ssl layer: force the next shutdown's close-notify wait.
    SetSslShutdownTimeout(Duration),
    /// Applies to every layer: current read/write byte counters.
    GetByteCounters,
    /// Applies to every layer: the configured per-operation timeout.
    SetTimeout(Option<Duration>),
}

impl CtrlMsg {
    /// True if the original code for this message carried the `FORWARD`
    /// bit — i.e. it is applied locally (where understood) and then also
    /// handed to the child.
    pub fn forwards(&self) -> bool {
        matches!(
            self,
            CtrlMsg::GetByteCounters | CtrlMsg::SetTimeout(_)
        )
    }
}

/// What a layer hands back after handling (or forwarding) a [`CtrlMsg`].
#[derive(Debug, Clone, Default)]
pub enum CtrlReply {
    #[default]
    Ack,
    RawFd(std::os::raw::c_int),
    ByteCounters {
        sent: u64,
        received: u64,
    },
}
