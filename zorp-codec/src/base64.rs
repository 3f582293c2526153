//! Base64 encode/decode as a streaming [`Codec`](crate::Codec).
//!
//! The encoder tracks pending bits across `transform` calls so input may
//! arrive in arbitrary chunk sizes; the decoder is a small state machine
//! over a 256-entry classification table, since whitespace is ignored,
//! `=` marks the end of the payload, and anything else is illegal.

use crate::{Codec, CodecBuffer};

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

const IGNORED: i8 = -1;
const END_MARKER: i8 = -2;
const ILLEGAL: i8 = -3;

fn classify_table() -> [i8; 256] {
    let mut table = [ILLEGAL; 256];
    for (value, &byte) in ALPHABET.iter().enumerate() {
        table[byte as usize] = value as i8;
    }
    for &byte in b" \t\r\n" {
        table[byte as usize] = IGNORED;
    }
    table[b'=' as usize] = END_MARKER;
    table
}

/// Encoder phase: how many bytes of the current 3-byte group have been
/// seen so far (0, 1, or 2 pending bits' worth).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodePhase {
    Zero,
    One { pending: u8 },
    Two { pending: u16 },
}

pub struct Base64Encoder {
    buffer: CodecBuffer,
    phase: EncodePhase,
    line_length: usize,
    column: usize,
}

impl Base64Encoder {
    /// `line_length` of `0` disables line wrapping (a single unbroken run
    /// of base64 characters, the default for line-oriented protocols that
    /// do their own framing).
    pub fn new(line_length: usize) -> Self {
        Self {
            buffer: CodecBuffer::new(),
            phase: EncodePhase::Zero,
            line_length,
            column: 0,
        }
    }

    fn emit_char(&mut self, sextet: u8) {
        self.buffer.push_byte(ALPHABET[sextet as usize]);
        self.column += 1;
        if self.line_length > 0 && self.column == self.line_length {
            self.buffer.push(b"\r\n");
            self.column = 0;
        }
    }
}

impl Codec for Base64Encoder {
    fn transform(&mut self, input: &[u8]) {
        for &byte in input {
            self.phase = match self.phase {
                EncodePhase::Zero => {
                    self.emit_char(byte >> 2);
                    EncodePhase::One {
                        pending: (byte & 0b0000_0011) << 4,
                    }
                }
                EncodePhase::One { pending } => {
                    self.emit_char(pending | (byte >> 4));
                    EncodePhase::Two {
                        pending: ((byte & 0b0000_1111) as u16) << 2,
                    }
                }
                EncodePhase::Two { pending } => {
                    self.emit_char(pending as u8 | (byte >> 6));
                    self.emit_char(byte & 0b0011_1111);
                    EncodePhase::Zero
                }
            };
        }
    }

    fn finish(&mut self) {
        match self.phase {
            EncodePhase::Zero => {}
            EncodePhase::One { pending } => {
                self.emit_char(pending);
                self.buffer.push(b"==");
            }
            EncodePhase::Two { pending } => {
                self.emit_char(pending as u8);
                self.buffer.push(b"=");
            }
        }
        if self.column > 0 {
            self.buffer.push(b"\r\n");
        }
        self.phase = EncodePhase::Zero;
        self.column = 0;
    }

    fn buffer(&self) -> &CodecBuffer {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut CodecBuffer {
        &mut self.buffer
    }
}

/// Decoder phase: how many data sextets of the current 4-character group
/// have been consumed, plus a sub-state for the `=` padding tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodePhase {
    Zero,
    One { pending: u8 },
    Two { pending: u16 },
    Three { pending: u32 },
    /// Saw one `=`; a second `=` is the only legal next data byte.
    PadExpected,
}

pub struct Base64Decoder {
    buffer: CodecBuffer,
    table: [i8; 256],
    phase: DecodePhase,
    /// Set once a `=` terminator has been consumed; further data bytes
    /// are an error (or silently skipped in tolerant mode).
    end_seen: bool,
    tolerant: bool,
}

impl Base64Decoder {
    pub fn new(tolerant: bool) -> Self {
        Self {
            buffer: CodecBuffer::new(),
            table: classify_table(),
            phase: DecodePhase::Zero,
            end_seen: false,
            tolerant,
        }
    }

    fn fail(&mut self) {
        self.buffer.note_error();
    }

    fn end_of_data(&mut self) {
        self.end_seen = true;
        self.phase = DecodePhase::Zero;
    }

    fn consume_data(&mut self, value: u8) {
        self.phase = match self.phase {
            DecodePhase::Zero => DecodePhase::One { pending: value },
            DecodePhase::One { pending } => {
                self.buffer.push_byte((pending << 2) | (value >> 4));
                DecodePhase::Two {
                    pending: (value as u16 & 0b1111) << 4,
                }
            }
            DecodePhase::Two { pending } => {
                self.buffer.push_byte(pending as u8 | (value >> 2));
                DecodePhase::Three {
                    pending: ((value as u32) & 0b11) << 6,
                }
            }
            DecodePhase::Three { pending } => {
                self.buffer.push_byte(pending as u8 | value);
                DecodePhase::Zero
            }
            DecodePhase::PadExpected => {
                // a data byte where a second '=' was required
                self.fail();
                if self.tolerant {
                    DecodePhase::PadExpected
                } else {
                    DecodePhase::Zero
                }
            }
        };
    }

    fn consume_pad(&mut self) {
        match self.phase {
            DecodePhase::Zero | DecodePhase::One { .. } => {
                // '=' needs at least 2 preceding data chars in this group
                self.fail();
                self.end_of_data();
            }
            DecodePhase::Two { .. } => {
                // first of a required "==" pair
                self.phase = DecodePhase::PadExpected;
            }
            DecodePhase::Three { .. } => {
                // single '=' closes a 3-data-char group
                self.end_of_data();
            }
            DecodePhase::PadExpected => {
                // second '=' of a "==" pair closes the group
                self.end_of_data();
            }
        }
    }
}

impl Codec for Base64Decoder {
    fn transform(&mut self, input: &[u8]) {
        for &byte in input {
            match self.table[byte as usize] {
                v if v >= 0 => {
                    if self.end_seen {
                        self.fail();
                        if !self.tolerant {
                            continue;
                        }
                    }
                    self.consume_data(v as u8);
                }
                IGNORED => {}
                END_MARKER => {
                    if self.end_seen && !self.tolerant {
                        self.fail();
                        continue;
                    }
                    self.consume_pad();
                }
                _ => self.fail(),
            }
        }
    }

    fn finish(&mut self) {
        match self.phase {
            DecodePhase::Zero => {}
            DecodePhase::Two { .. } | DecodePhase::Three { .. } | DecodePhase::PadExpected => {
                // truncated group: missing required padding
                self.fail();
            }
            DecodePhase::One { .. } => {
                // a single leftover sextet can never be valid
                self.fail();
            }
        }
        self.phase = DecodePhase::Zero;
        self.end_seen = false;
    }

    fn buffer(&self) -> &CodecBuffer {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut CodecBuffer {
        &mut self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(input: &[u8], line_length: usize) -> Vec<u8> {
        let mut enc = Base64Encoder::new(line_length);
        enc.transform(input);
        enc.finish();
        enc.buffer.drain_all()
    }

    fn decode_all(input: &[u8], tolerant: bool) -> (Vec<u8>, usize) {
        let mut dec = Base64Decoder::new(tolerant);
        dec.transform(input);
        dec.finish();
        let errors = dec.error_count();
        (dec.buffer.drain_all(), errors)
    }

    #[test]
    fn scenario_one_round_trip() {
        let encoded = encode_all(b"ingyombingyom", 0);
        assert_eq!(encoded, b"aW5neW9tYmluZ3lvbQ==\r\n");
        let (decoded, errors) = decode_all(&encoded, false);
        assert_eq!(decoded, b"ingyombingyom");
        assert_eq!(errors, 0);
    }

    #[test]
    fn scenario_one_partial_chunk_reads_concatenate() {
        let mut enc = Base64Encoder::new(0);
        enc.transform(b"ingy");
        enc.transform(b"ombingyom");
        enc.finish();
        let out = enc.buffer.drain_all();
        assert_eq!(out, b"aW5neW9tYmluZ3lvbQ==\r\n");
    }

    #[test]
    fn scenario_one_with_line_wrapping_adds_crlf() {
        let encoded = encode_all(b"ingyombingyom", 4);
        assert_eq!(encoded, b"aW5n\r\neW9t\r\nYmlu\r\nZ3lv\r\nbQ==\r\n");
    }

    #[test]
    fn scenario_two_well_formed_padding_succeeds() {
        let (decoded, errors) = decode_all(b"AAA=", false);
        assert_eq!(errors, 0);
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn scenario_two_pad_then_data_fails() {
        let (_, errors) = decode_all(b"AA=A", false);
        assert!(errors > 0);
    }

    #[test]
    fn scenario_two_leading_pad_fails() {
        let (_, errors) = decode_all(b"A===", false);
        assert!(errors > 0);
    }

    #[test]
    fn scenario_two_pad_with_trailing_data_fails() {
        let (_, errors) = decode_all(b"AA==extra", false);
        assert!(errors > 0);
    }

    #[test]
    fn scenario_two_illegal_byte_fails() {
        let (_, errors) = decode_all(b"A!AA", false);
        assert!(errors > 0);
    }

    #[test]
    fn tolerant_mode_skips_illegal_bytes() {
        let (decoded, errors) = decode_all(&[b'A', b'A', b'A', 0xffu8, b'='], true);
        assert_eq!(errors, 1);
        assert_eq!(decoded.len(), 2);
    }
}
