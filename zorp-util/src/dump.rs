//! Hex + ASCII dump formatting, used by the stream core's data-dump
//! logging (fired only at the umbrella layer for a given direction, see
//! `zorp_stream::core`) and available standalone for diagnostics.

use std::fmt::Write as _;

/// Formats `data` as a classic 16-bytes-per-line hex dump with an ASCII
/// gutter, e.g.:
/// ```text
/// 00000000  68 65 6c 6c 6f 0a                                hello.
/// ```
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 4);
    for (offset, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", offset * 16);
        for i in 0..16 {
            if i < chunk.len() {
                let _ = write!(out, "{:02x} ", chunk[i]);
            } else {
                out.push_str("   ");
            }
            if i == 7 {
                out.push(' ');
            }
        }
        out.push_str(" ");
        for &b in chunk {
            let c = if (0x20..0x7f).contains(&b) { b as char } else { '.' };
            out.push(c);
        }
        out.push('\n');
    }
    out
}

/// Renders `data` as a single-line, non-destructive text form: printable
/// ASCII passes through, everything else becomes a `\xXX` escape. Used for
/// log lines where a multi-line hex dump would be too heavy.
pub fn text_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            0x20..=0x7e if b != b'\\' => out.push(b as char),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            _ => {
                let _ = write!(out, "\\x{b:02x}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_has_one_line_per_16_bytes() {
        let data = b"0123456789abcdefgh";
        let dump = hex_dump(data);
        assert_eq!(dump.lines().count(), 2);
        assert!(dump.lines().next().unwrap().ends_with("0123456789abcdef"));
    }

    #[test]
    fn text_dump_escapes_non_printable() {
        assert_eq!(text_dump(b"a\nb\x01"), "a\\nb\\x01");
    }
}
