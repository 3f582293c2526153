//! Duplex gzip layer: deflates on write, inflates on read, and manages
//! the gzip file-format envelope (header + CRC32/ISIZE trailer) by hand
//! so the header fields (timestamp, original name, comment, extra) stay
//! individually readable and writable, the way `flate2`'s own
//! `GzEncoder`/`GzDecoder` wrappers don't expose them mid-stream.
//!
//! Uses `flate2::{Compress, Decompress}` — the raw deflate primitives —
//! rather than its I/O-wrapper types, for the same reason the ssl layer
//! drives `rustls` by hand: a byte-buffer-in, byte-buffer-out transform
//! composes naturally with this crate's poll-based layering.

use std::pin::Pin;
use std::task::{Context, Poll};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use zorp_buffer::PacketBuf;
use zorp_errors::{ZorpError, ZorpResult};

use crate::core::{ShutdownMode, Stream, StreamStats, Umbrella};
use crate::ctrl::{CtrlMsg, CtrlReply};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const DEFLATE_METHOD: u8 = 8;

#[derive(Debug, Clone, Default)]
pub struct GzipHeader {
    pub mtime: u32,
    pub original_name: Option<String>,
    pub comment: Option<String>,
    pub extra: Option<Vec<u8>>,
}

impl GzipHeader {
    fn encode(&self) -> Vec<u8> {
        let mut flags = 0u8;
        if self.extra.is_some() {
            flags |= 0x04;
        }
        if self.original_name.is_some() {
            flags |= 0x08;
        }
        if self.comment.is_some() {
            flags |= 0x10;
        }
        let mut out = vec![GZIP_MAGIC[0], GZIP_MAGIC[1], DEFLATE_METHOD, flags];
        out.extend_from_slice(&self.mtime.to_le_bytes());
        out.push(0); // extra flags
        out.push(0xff); // OS: unknown
        if let Some(extra) = &self.extra {
            out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
            out.extend_from_slice(extra);
        }
        if let Some(name) = &self.original_name {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        if let Some(comment) = &self.comment {
            out.extend_from_slice(comment.as_bytes());
            out.push(0);
        }
        out
    }

    /// Parses a header from the front of `data`, returning the header and
    /// how many bytes it consumed, or `None` if more input is needed.
    fn try_parse(data: &[u8]) -> ZorpResult<Option<(GzipHeader, usize)>> {
        if data.len() < 10 {
            return Ok(None);
        }
        if data[0..2] != GZIP_MAGIC || data[2] != DEFLATE_METHOD {
            return Err(ZorpError::protocol("not a gzip stream"));
        }
        let flags = data[3];
        let mtime = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let mut pos = 10;

        let extra = if flags & 0x04 != 0 {
            if data.len() < pos + 2 {
                return Ok(None);
            }
            let len = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
            pos += 2;
            if data.len() < pos + len {
                return Ok(None);
            }
            let e = data[pos..pos + len].to_vec();
            pos += len;
            Some(e)
        } else {
            None
        };

        let original_name = if flags & 0x08 != 0 {
            let Some(end) = data[pos..].iter().position(|&b| b == 0) else {
                return Ok(None);
            };
            let s = String::from_utf8_lossy(&data[pos..pos + end]).into_owned();
            pos += end + 1;
            Some(s)
        } else {
            None
        };

        let comment = if flags & 0x10 != 0 {
            let Some(end) = data[pos..].iter().position(|&b| b == 0) else {
                return Ok(None);
            };
            let s = String::from_utf8_lossy(&data[pos..pos + end]).into_owned();
            pos += end + 1;
            Some(s)
        } else {
            None
        };

        if flags & 0x02 != 0 {
            // FHCRC: a two-byte header CRC we don't validate.
            if data.len() < pos + 2 {
                return Ok(None);
            }
            pos += 2;
        }

        Ok(Some((
            GzipHeader {
                mtime,
                original_name,
                comment,
                extra,
            },
            pos,
        )))
    }
}

enum ReadState {
    AwaitingHeader(Vec<u8>),
    Streaming,
    Done,
}

pub struct GzipLayer<C> {
    name: String,
    child: C,
    compress: Compress,
    decompress: Decompress,
    header_out: GzipHeader,
    header_written: bool,
    header_in: Option<GzipHeader>,
    read_state: ReadState,
    crc_in: crc32fast::Hasher,
    crc_out: crc32fast::Hasher,
    bytes_out: u32,
    write_pending: Vec<u8>,
    read_raw: Vec<u8>,
    /// Inflated bytes produced but not yet delivered to the caller —
    /// also where `unget` prepends data.
    pending_plain: Vec<u8>,
    finished_write: bool,
    stats: StreamStats,
}

impl<C: Stream> GzipLayer<C> {
    pub fn new(child: C, header_out: GzipHeader) -> Self {
        Self {
            name: "gzip".to_string(),
            child,
            compress: Compress::new(Compression::default(), false),
            decompress: Decompress::new(false),
            header_out,
            header_written: false,
            header_in: None,
            read_state: ReadState::AwaitingHeader(Vec::new()),
            crc_in: crc32fast::Hasher::new(),
            crc_out: crc32fast::Hasher::new(),
            bytes_out: 0,
            write_pending: Vec::new(),
            read_raw: Vec::new(),
            pending_plain: Vec::new(),
            finished_write: false,
            stats: StreamStats::default(),
        }
    }

    pub fn fetch_header(&self) -> Option<&GzipHeader> {
        self.header_in.as_ref()
    }

    fn flush_pending(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        while !self.write_pending.is_empty() {
            match Pin::new(&mut self.child).poll_write(cx, &self.write_pending) {
                Poll::Ready(Ok(n)) => {
                    self.stats.add_sent(n as u64);
                    self.write_pending.drain(..n);
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
        Poll::Ready(Ok(()))
    }
}

impl<C: Stream> AsyncRead for GzipLayer<C> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            if !self.pending_plain.is_empty() {
                let take = self.pending_plain.len().min(buf.remaining());
                buf.put_slice(&self.pending_plain[..take]);
                self.pending_plain.drain(..take);
                return Poll::Ready(Ok(()));
            }

            if matches!(self.read_state, ReadState::Done) {
                return Poll::Ready(Ok(()));
            }

            if let ReadState::AwaitingHeader(_) = &self.read_state {
                let mut scratch = [0u8; 1024];
                let mut rb = ReadBuf::new(&mut scratch);
                match Pin::new(&mut self.child).poll_read(cx, &mut rb) {
                    Poll::Ready(Ok(())) => {
                        let n = rb.filled().len();
                        let ReadState::AwaitingHeader(acc) = &mut self.read_state else {
                            unreachable!()
                        };
                        if n == 0 && acc.is_empty() {
                            self.read_state = ReadState::Done;
                            return Poll::Ready(Ok(()));
                        }
                        acc.extend_from_slice(rb.filled());
                        match GzipHeader::try_parse(acc) {
                            Ok(Some((header, consumed))) => {
                                let remainder = acc[consumed..].to_vec();
                                self.header_in = Some(header);
                                self.read_raw = remainder;
                                self.read_state = ReadState::Streaming;
                            }
                            Ok(None) => continue,
                            Err(e) => return Poll::Ready(Err(e.into())),
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
                continue;
            }

            // Streaming: inflate whatever raw bytes we have, pulling more
            // from the child when the decompressor wants input.
            let before_out = self.decompress.total_out();
            let before_in = self.decompress.total_in();
            let mut scratch = vec![0u8; buf.remaining().max(64)];
            let status = self
                .decompress
                .decompress(&self.read_raw, &mut scratch, FlushDecompress::None)
                .map_err(std::io::Error::other)?;
            let produced = (self.decompress.total_out() - before_out) as usize;
            let consumed = (self.decompress.total_in() - before_in) as usize;
            self.read_raw.drain(..consumed);
            if produced > 0 {
                self.crc_in.update(&scratch[..produced]);
                self.pending_plain.extend_from_slice(&scratch[..produced]);
                continue;
            }
            if status == flate2::Status::StreamEnd {
                self.read_state = ReadState::Done;
                return Poll::Ready(Ok(()));
            }

            let mut raw = [0u8; 4096];
            let mut rb = ReadBuf::new(&mut raw);
            match Pin::new(&mut self.child).poll_read(cx, &mut rb) {
                Poll::Ready(Ok(())) => {
                    let n = rb.filled().len();
                    self.stats.add_received(n as u64);
                    if n == 0 {
                        self.read_state = ReadState::Done;
                        return Poll::Ready(Ok(()));
                    }
                    self.read_raw.extend_from_slice(rb.filled());
                }
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<C: Stream> AsyncWrite for GzipLayer<C> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if let Poll::Pending = self.as_mut().flush_pending(cx) {
            return Poll::Pending;
        }
        if !self.header_written {
            let header = self.header_out.encode();
            self.write_pending.extend_from_slice(&header);
            self.header_written = true;
        }

        self.crc_out.update(data);
        self.bytes_out = self.bytes_out.wrapping_add(data.len() as u32);
        let mut out = vec![0u8; data.len() + 64];
        let before = self.compress.total_out();
        self.compress
            .compress(data, &mut out, FlushCompress::None)
            .map_err(std::io::Error::other)?;
        let produced = (self.compress.total_out() - before) as usize;
        self.write_pending.extend_from_slice(&out[..produced]);

        let _ = self.as_mut().flush_pending(cx);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.as_mut().flush_pending(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut self.child).poll_flush(cx),
            other => other,
        }
    }

    /// Flushes the final deflate block plus the CRC32/ISIZE trailer
    /// before forwarding shutdown, writing an empty header first if
    /// nothing was ever written.
    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if !self.finished_write {
            if !self.header_written {
                let header = self.header_out.encode();
                self.write_pending.extend_from_slice(&header);
                self.header_written = true;
            }
            let mut out = vec![0u8; 256];
            let before = self.compress.total_out();
            self.compress
                .compress(&[], &mut out, FlushCompress::Finish)
                .map_err(std::io::Error::other)?;
            let produced = (self.compress.total_out() - before) as usize;
            self.write_pending.extend_from_slice(&out[..produced]);
            self.write_pending
                .extend_from_slice(&self.crc_out.clone().finalize().to_le_bytes());
            self.write_pending
                .extend_from_slice(&self.bytes_out.to_le_bytes());
            self.finished_write = true;
        }
        match self.as_mut().flush_pending(cx) {
            Poll::Ready(Ok(())) => Pin::new(&mut self.child).poll_shutdown(cx),
            other => other,
        }
    }
}

impl<C: Stream> Stream for GzipLayer<C> {
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
        self.pending_plain.splice(0..0, data.as_slice().iter().copied());
    }

    fn ctrl(&mut self, msg: CtrlMsg) -> ZorpResult<CtrlReply> {
        self.child.ctrl(msg)
    }

    fn shutdown_mode(&mut self, mode: ShutdownMode) -> ZorpResult<()> {
        self.child.shutdown_mode(mode)
    }
}
