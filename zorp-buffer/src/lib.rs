//! `PacketBuf`: the byte buffer passed between stream layers and the codec
//! pipeline.
//!
//! A buffer is either [`Owned`](Storage::Owned), in which case it may grow by
//! reallocating, or [`Borrowed`](Storage::Borrowed), a zero-copy view into a
//! shared parent produced by [`PacketBuf::part`]. A borrowed view can never
//! reallocate — the parent is not the owner's to grow.
//!
//! Positions and typed accessors operate relative to `position`, mirroring a
//! `Read + Seek` cursor, but the buffer is plain data rather than an I/O
//! object: seeking, resizing, and the `get_uN`/`put_uN` family are all
//! synchronous and infallible except for out-of-range conditions.

use std::io::SeekFrom;
use std::sync::Arc;

use derive_more::{Display, Error};

#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[display("seek target out of range")]
    SeekOutOfRange,
    #[display("read of {requested} bytes at {pos} exceeds buffer length {len}")]
    ReadOutOfRange {
        pos: usize,
        requested: usize,
        len: usize,
    },
    #[display("cannot grow a borrowed buffer")]
    BorrowedCannotGrow,
}

pub type BufferResult<T> = Result<T, BufferError>;

#[derive(Debug, Clone)]
enum Storage {
    Owned(Vec<u8>),
    /// A read-only zero-copy view into `parent[offset..offset+len]`.
    Borrowed {
        parent: Arc<Vec<u8>>,
        offset: usize,
        len: usize,
    },
}

/// Endianness for typed integer accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// A heap-backed byte sequence with a seek cursor, used as the unit of
/// exchange between stream layers, the blob store, and the codec pipeline.
///
/// Invariant: `position <= length() <= capacity()`.
#[derive(Debug, Clone)]
pub struct PacketBuf {
    storage: Storage,
    position: usize,
}

impl Default for PacketBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBuf {
    pub fn new() -> Self {
        Self {
            storage: Storage::Owned(Vec::new()),
            position: 0,
        }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            storage: Storage::Owned(Vec::with_capacity(cap)),
            position: 0,
        }
    }

    /// Takes ownership of `bytes` as the buffer's sole content.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            storage: Storage::Owned(bytes),
            position: 0,
        }
    }

    pub fn copy_from(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }

    /// A borrowed sub-view over `self[offset..offset+len]`. The view shares
    /// the parent's backing storage (promoted to a reference-counted
    /// allocation on first use) and can never grow: any attempt to resize a
    /// borrowed buffer fails with [`BufferError::BorrowedCannotGrow`].
    pub fn part(&mut self, offset: usize, len: usize) -> BufferResult<PacketBuf> {
        let parent_len = self.length();
        if offset.checked_add(len).map(|e| e > parent_len).unwrap_or(true) {
            return Err(BufferError::ReadOutOfRange {
                pos: offset,
                requested: len,
                len: parent_len,
            });
        }
        let parent = self.promote_to_shared();
        Ok(PacketBuf {
            storage: Storage::Borrowed {
                parent,
                offset,
                len,
            },
            position: 0,
        })
    }

    /// Ensures `self` is backed by an `Arc`, so it can be shared with
    /// borrowed views, and returns a clone of that `Arc`.
    fn promote_to_shared(&mut self) -> Arc<Vec<u8>> {
        match &self.storage {
            Storage::Owned(v) => {
                let shared = Arc::new(v.clone());
                self.storage = Storage::Borrowed {
                    parent: shared.clone(),
                    offset: 0,
                    len: shared.len(),
                };
                shared
            }
            Storage::Borrowed { parent, .. } => parent.clone(),
        }
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self.storage, Storage::Borrowed { .. })
    }

    pub fn length(&self) -> usize {
        match &self.storage {
            Storage::Owned(v) => v.len(),
            Storage::Borrowed { len, .. } => *len,
        }
    }

    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Owned(v) => v.capacity(),
            Storage::Borrowed { len, .. } => *len,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.storage {
            Storage::Owned(v) => v.as_slice(),
            Storage::Borrowed {
                parent,
                offset,
                len,
            } => &parent[*offset..*offset + *len],
        }
    }

    /// Replaces an owned buffer's contents with `bytes`. Borrowed buffers
    /// are logically read-only views and never accept new content.
    pub fn copy(&mut self, bytes: &[u8]) -> BufferResult<()> {
        let v = self.owned_mut()?;
        v.clear();
        v.extend_from_slice(bytes);
        self.position = self.position.min(v.len());
        Ok(())
    }

    /// Takes ownership of `bytes` as a fresh owned buffer.
    pub fn relocate(bytes: Vec<u8>) -> Self {
        Self::from_vec(bytes)
    }

    fn owned_mut(&mut self) -> BufferResult<&mut Vec<u8>> {
        match &mut self.storage {
            Storage::Owned(v) => Ok(v),
            Storage::Borrowed { .. } => Err(BufferError::BorrowedCannotGrow),
        }
    }

    pub fn resize(&mut self, n: usize) -> BufferResult<()> {
        let v = self.owned_mut()?;
        v.resize(n, 0);
        self.position = self.position.min(n);
        Ok(())
    }

    pub fn append(&mut self, bytes: &[u8]) -> BufferResult<()> {
        let v = self.owned_mut()?;
        v.extend_from_slice(bytes);
        Ok(())
    }

    pub fn insert(&mut self, pos: usize, bytes: &[u8]) -> BufferResult<()> {
        let len = self.length();
        if pos > len {
            return Err(BufferError::ReadOutOfRange {
                pos,
                requested: 0,
                len,
            });
        }
        let at_or_after = self.position >= pos;
        let v = self.owned_mut()?;
        v.splice(pos..pos, bytes.iter().copied());
        if at_or_after {
            self.position += bytes.len();
        }
        Ok(())
    }

    pub fn seek(&mut self, whence: SeekFrom) -> BufferResult<usize> {
        let len = self.length() as i64;
        let target = match whence {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => len + n,
            SeekFrom::Current(n) => self.position as i64 + n,
        };
        if target < 0 || target > len {
            return Err(BufferError::SeekOutOfRange);
        }
        self.position = target as usize;
        Ok(self.position)
    }

    fn check_read(&self, n: usize) -> BufferResult<()> {
        let len = self.length();
        if self.position + n > len {
            return Err(BufferError::ReadOutOfRange {
                pos: self.position,
                requested: n,
                len,
            });
        }
        Ok(())
    }

    /// Reads `n` bytes at the current position without advancing it.
    pub fn peek(&self, n: usize) -> BufferResult<&[u8]> {
        self.check_read(n)?;
        Ok(&self.as_slice()[self.position..self.position + n])
    }

    /// Reads `n` bytes at the current position and advances it.
    pub fn get_bytes(&mut self, n: usize) -> BufferResult<Vec<u8>> {
        self.check_read(n)?;
        let out = self.as_slice()[self.position..self.position + n].to_vec();
        self.position += n;
        Ok(out)
    }

    /// Writes `bytes` at the current position, overwriting in place if
    /// there is room and appending (for owned buffers) otherwise.
    pub fn put_bytes(&mut self, bytes: &[u8]) -> BufferResult<()> {
        if self.position == self.length() {
            self.append(bytes)?;
            self.position += bytes.len();
            return Ok(());
        }
        self.check_read(bytes.len())?;
        let pos = self.position;
        let v = self.owned_mut()?;
        v[pos..pos + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        Ok(())
    }

    pub fn get_u8(&mut self) -> BufferResult<u8> {
        Ok(self.get_bytes(1)?[0])
    }

    pub fn put_u8(&mut self, value: u8) -> BufferResult<()> {
        self.put_bytes(&[value])
    }

    pub fn get_boolean(&mut self) -> BufferResult<bool> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_boolean16(&mut self) -> BufferResult<bool> {
        Ok(self.get_u16(Endian::Big)? != 0)
    }
}

/// Generates the `get_uN`/`put_uN`/`get_uNs`/`put_uNs` family for N in
/// {16,32,64}. u8 is handled by hand above since it has no endianness.
macro_rules! impl_get_put {
    ($get:ident, $put:ident, $get_s:ident, $put_s:ident, $ty:ty, $n:literal) => {
        impl PacketBuf {
            pub fn $get(&mut self, endian: Endian) -> BufferResult<$ty> {
                let bytes = self.get_bytes($n)?;
                let arr: [u8; $n] = bytes.try_into().unwrap();
                Ok(match endian {
                    Endian::Little => <$ty>::from_le_bytes(arr),
                    Endian::Big => <$ty>::from_be_bytes(arr),
                })
            }

            pub fn $put(&mut self, endian: Endian, value: $ty) -> BufferResult<()> {
                let bytes = match endian {
                    Endian::Little => value.to_le_bytes(),
                    Endian::Big => value.to_be_bytes(),
                };
                self.put_bytes(&bytes)
            }

            pub fn $get_s(&mut self, endian: Endian, count: usize) -> BufferResult<Vec<$ty>> {
                (0..count).map(|_| self.$get(endian)).collect()
            }

            pub fn $put_s(&mut self, endian: Endian, values: &[$ty]) -> BufferResult<()> {
                for v in values {
                    self.$put(endian, *v)?;
                }
                Ok(())
            }
        }
    };
}

impl_get_put!(get_u16, put_u16, get_u16s, put_u16s, u16, 2);
impl_get_put!(get_u32, put_u32, get_u32s, put_u32s, u32, 4);
impl_get_put!(get_u64, put_u64, get_u64s, put_u64s, u64, 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_typed_accessors() {
        let mut b = PacketBuf::new();
        b.put_u32(Endian::Big, 0xdead_beef).unwrap();
        b.put_u16(Endian::Little, 0x1234).unwrap();
        b.seek(SeekFrom::Start(0)).unwrap();
        assert_eq!(b.get_u32(Endian::Big).unwrap(), 0xdead_beef);
        assert_eq!(b.get_u16(Endian::Little).unwrap(), 0x1234);
    }

    #[test]
    fn seek_out_of_range_fails() {
        let mut b = PacketBuf::from_vec(vec![1, 2, 3]);
        assert_eq!(b.seek(SeekFrom::Start(4)), Err(BufferError::SeekOutOfRange));
        assert_eq!(b.seek(SeekFrom::Current(-1)), Err(BufferError::SeekOutOfRange));
    }

    #[test]
    fn read_past_length_fails() {
        let mut b = PacketBuf::from_vec(vec![1, 2]);
        assert!(b.get_u32(Endian::Big).is_err());
    }

    #[test]
    fn part_is_a_zero_copy_view_that_cannot_grow() {
        let mut parent = PacketBuf::from_vec(vec![1, 2, 3, 4, 5]);
        let mut view = parent.part(1, 3).unwrap();
        assert_eq!(view.as_slice(), &[2, 3, 4]);
        assert!(view.is_borrowed());
        assert_eq!(view.append(&[9]), Err(BufferError::BorrowedCannotGrow));
    }

    #[test]
    fn insert_shifts_position_when_before_cursor() {
        let mut b = PacketBuf::from_vec(vec![1, 2, 3]);
        b.seek(SeekFrom::Start(3)).unwrap();
        b.insert(0, &[9, 9]).unwrap();
        assert_eq!(b.as_slice(), &[9, 9, 1, 2, 3]);
        assert_eq!(b.position(), 5);
    }
}
