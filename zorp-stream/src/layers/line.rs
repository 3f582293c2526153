//! Line framer over bytes: accumulates child reads into an internal
//! buffer and slices off complete lines according to a configurable EOL
//! convention and oversize-line policy.
//!
//! The line-splitting algorithm lives on [`LineFramer`], a plain struct
//! with no I/O of its own, so it can be exercised directly in tests; the
//! same struct is what [`LineLayer::poll_read`] drives as bytes actually
//! arrive from the child.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use zorp_buffer::PacketBuf;
use zorp_errors::{GIoStatus, ZorpError, ZorpResult};

use crate::core::{ShutdownMode, Stream, StreamStats, Umbrella};
use crate::ctrl::{CtrlMsg, CtrlReply};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eol {
    Lf,
    CrLf,
    Nul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OversizePolicy {
    Error,
    Truncate,
    Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NulPolicy {
    Fatal,
    Tolerant,
}

#[derive(Debug, Clone, Copy)]
pub struct LineConfig {
    pub eol: Eol,
    pub oversize: OversizePolicy,
    pub nul: NulPolicy,
    pub max_line: usize,
    pub keep_terminator: bool,
    pub single_read_per_call: bool,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            eol: Eol::Lf,
            oversize: OversizePolicy::Error,
            nul: NulPolicy::Fatal,
            max_line: 8192,
            keep_terminator: false,
            single_read_per_call: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineResult {
    pub data: Vec<u8>,
    pub status: GIoStatus,
}

/// Finds the first occurrence of `eol`'s terminator within `data`,
/// returning `(start_of_terminator, terminator_len)`.
fn find_terminator(data: &[u8], eol: Eol) -> Option<(usize, usize)> {
    match eol {
        Eol::Lf => data.iter().position(|&b| b == b'\n').map(|p| (p, 1)),
        Eol::Nul => data.iter().position(|&b| b == 0).map(|p| (p, 1)),
        Eol::CrLf => data.windows(2).position(|w| w == b"\r\n").map(|p| (p, 2)),
    }
}

/// The accumulation buffer and line-splitting state machine, with no
/// dependency on any concrete child stream.
pub struct LineFramer {
    cfg: LineConfig,
    buf: Vec<u8>,
    /// Set while a `Truncate`-policy overflow is being discarded up to the
    /// next terminator.
    discarding: bool,
}

impl LineFramer {
    pub fn new(cfg: LineConfig) -> Self {
        Self {
            cfg,
            buf: Vec::new(),
            discarding: false,
        }
    }

    pub fn set_mode(&mut self, eol: Eol, oversize: OversizePolicy) {
        self.cfg.eol = eol;
        self.cfg.oversize = oversize;
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Prepends `data` to the accumulation buffer, as if it had not yet
    /// been consumed, provided there is room under a generous bloat
    /// budget relative to the configured maximum line length.
    pub fn unget_packet(&mut self, data: &[u8]) -> bool {
        if self.buf.len() + data.len() > self.cfg.max_line * 4 {
            return false;
        }
        let mut combined = data.to_vec();
        combined.extend_from_slice(&self.buf);
        self.buf = combined;
        true
    }

    /// Slices one complete (or, under `Split`, one oversize-chunk) line
    /// off the accumulation buffer, or `None` if more input is needed.
    pub fn try_get_line(&mut self) -> Option<Result<LineResult, ZorpError>> {
        loop {
            if self.discarding {
                match find_terminator(&self.buf, self.cfg.eol) {
                    Some((pos, term_len)) => {
                        self.buf.drain(..pos + term_len);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.buf.clear();
                        return None;
                    }
                }
            }

            let search_len = self.buf.len().min(self.cfg.max_line);
            if let Some((pos, term_len)) = find_terminator(&self.buf[..search_len], self.cfg.eol) {
                if self.cfg.nul == NulPolicy::Fatal
                    && self.cfg.eol != Eol::Nul
                    && self.buf[..pos].contains(&0)
                {
                    self.buf.drain(..pos + term_len);
                    return Some(Err(ZorpError::protocol("embedded NUL in line")));
                }
                let mut data: Vec<u8> = self.buf.drain(..pos + term_len).collect();
                if !self.cfg.keep_terminator {
                    data.truncate(pos);
                }
                return Some(Ok(LineResult {
                    data,
                    status: GIoStatus::Normal,
                }));
            }

            if self.buf.len() < self.cfg.max_line {
                return None;
            }

            return Some(match self.cfg.oversize {
                OversizePolicy::Split => {
                    let data: Vec<u8> = self.buf.drain(..self.cfg.max_line).collect();
                    Ok(LineResult {
                        data,
                        status: GIoStatus::Again,
                    })
                }
                OversizePolicy::Truncate => {
                    let data: Vec<u8> = self.buf.drain(..self.cfg.max_line).collect();
                    self.discarding = true;
                    Ok(LineResult {
                        data,
                        status: GIoStatus::Again,
                    })
                }
                OversizePolicy::Error => {
                    self.buf.clear();
                    Err(ZorpError::protocol("line exceeds maximum length"))
                }
            });
        }
    }
}

pub struct LineLayer<C> {
    name: String,
    child: C,
    framer: LineFramer,
    single_read_per_call: bool,
    stats: StreamStats,
}

impl<C: Stream> LineLayer<C> {
    pub fn new(child: C, cfg: LineConfig) -> Self {
        Self {
            name: "line".to_string(),
            child,
            single_read_per_call: cfg.single_read_per_call,
            framer: LineFramer::new(cfg),
            stats: StreamStats::default(),
        }
    }

    fn fill_once(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<usize>> {
        let mut scratch = [0u8; 4096];
        let mut rb = ReadBuf::new(&mut scratch);
        match Pin::new(&mut self.child).poll_read(cx, &mut rb) {
            Poll::Ready(Ok(())) => {
                let n = rb.filled().len();
                self.framer.feed(rb.filled());
                self.stats.add_received(n as u64);
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<C: Stream> AsyncRead for LineLayer<C> {
    /// Delivers at most one line (or oversize chunk) per call, copying
    /// `min(buf.remaining(), line.len())` bytes and ungetting the rest via
    /// `unget_packet` if the caller's buffer was too small.
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            if let Some(result) = self.framer.try_get_line() {
                let line = result.map_err(std::io::Error::other)?;
                let take = line.data.len().min(buf.remaining());
                buf.put_slice(&line.data[..take]);
                if take < line.data.len() {
                    self.framer.unget_packet(&line.data[take..]);
                }
                return Poll::Ready(Ok(()));
            }
            match self.as_mut().fill_once(cx) {
                Poll::Ready(Ok(0)) => return Poll::Ready(Ok(())), // EOF, nothing buffered
                Poll::Ready(Ok(_)) => {
                    if self.single_read_per_call {
                        return Poll::Ready(Ok(()));
                    }
                    continue;
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<C: Stream> AsyncWrite for LineLayer<C> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.child).poll_write(cx, data)
    }
    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.child).poll_flush(cx)
    }
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.child).poll_shutdown(cx)
    }
}

impl<C: Stream> Stream for LineLayer<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> &StreamStats {
        &self.stats
    }

    fn umbrella_flags(&self) -> Umbrella {
        Umbrella::READ
    }

    fn unget(&mut self, data: PacketBuf) {
        self.framer.unget_packet(data.as_slice());
    }

    fn ctrl(&mut self, msg: CtrlMsg) -> ZorpResult<CtrlReply> {
        match msg {
            CtrlMsg::SetLineMode { eol, oversize } => {
                self.framer.set_mode(eol, oversize);
                Ok(CtrlReply::Ack)
            }
            other => {
                let _ = other.forwards();
                self.child.ctrl(other)
            }
        }
    }

    fn shutdown_mode(&mut self, mode: ShutdownMode) -> ZorpResult<()> {
        self.child.shutdown_mode(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(max_line: usize, oversize: OversizePolicy) -> LineConfig {
        LineConfig {
            eol: Eol::Lf,
            oversize,
            nul: NulPolicy::Tolerant,
            max_line,
            keep_terminator: false,
            single_read_per_call: false,
        }
    }

    /// Literal scenario: buffer size 16, mode SPLIT, input
    /// "AAAAAAAAAAAAAAAAAAAABB\n" (22 + 1 bytes). First call returns 16
    /// bytes of 'A' with status Again; second returns "AAAABB" with status
    /// Normal.
    #[test]
    fn oversize_split_then_normal_line() {
        let mut framer = LineFramer::new(cfg(16, OversizePolicy::Split));
        framer.feed(&[b'A'; 20]);
        framer.feed(b"BB\n");

        let first = framer.try_get_line().unwrap().unwrap();
        assert_eq!(first.data, vec![b'A'; 16]);
        assert_eq!(first.status, GIoStatus::Again);

        let second = framer.try_get_line().unwrap().unwrap();
        assert_eq!(second.data, b"AAAABB".to_vec());
        assert_eq!(second.status, GIoStatus::Normal);

        assert!(framer.try_get_line().is_none());
    }

    #[test]
    fn oversize_truncate_discards_remainder_of_logical_line() {
        let mut framer = LineFramer::new(cfg(8, OversizePolicy::Truncate));
        framer.feed(b"AAAAAAAAAAAAoverflow\nshort\n");

        let first = framer.try_get_line().unwrap().unwrap();
        assert_eq!(first.data, b"AAAAAAAA".to_vec());
        assert_eq!(first.status, GIoStatus::Again);

        // The remainder of that oversize line ("AAAAoverflow") is
        // discarded up to and including its terminator; only "short"
        // should come back next.
        let second = framer.try_get_line().unwrap().unwrap();
        assert_eq!(second.data, b"short".to_vec());
        assert_eq!(second.status, GIoStatus::Normal);
    }

    #[test]
    fn oversize_error_policy_fails() {
        let mut framer = LineFramer::new(cfg(4, OversizePolicy::Error));
        framer.feed(b"toolong\n");
        let result = framer.try_get_line().unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn crlf_terminator_is_stripped() {
        let mut framer = LineFramer::new(LineConfig {
            eol: Eol::CrLf,
            ..cfg(64, OversizePolicy::Error)
        });
        framer.feed(b"hello\r\nworld\r\n");
        let first = framer.try_get_line().unwrap().unwrap();
        assert_eq!(first.data, b"hello".to_vec());
    }

    #[test]
    fn unget_packet_prepends_within_budget() {
        let mut framer = LineFramer::new(cfg(64, OversizePolicy::Error));
        framer.feed(b"world\n");
        assert!(framer.unget_packet(b"hello "));
        let line = framer.try_get_line().unwrap().unwrap();
        assert_eq!(line.data, b"hello world".to_vec());
    }
}
