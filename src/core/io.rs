//! Shared tag IO.

use crate::err::{DecodeError, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// An ergonomics layer around a byte slice.
///
/// Automates bounds checking and integer decoding when parsing a tag that has
/// already been read into memory. Exhaustion surfaces as
/// [`DecodeError::NotEnoughData`](DecodeError::NotEnoughData) so frame parsers
/// can propagate it with `?`.
#[derive(Clone)]
pub struct BufStream<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> BufStream<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.is_empty() {
            return Err(DecodeError::NotEnoughData.into());
        }

        self.pos += 1;

        Ok(self.src[self.pos - 1])
    }

    /// Reads this stream into an array of size `N`, erroring if it cannot
    /// be filled.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut arr = [0; N];

        if self.remaining() < N {
            return Err(DecodeError::NotEnoughData.into());
        }

        arr.copy_from_slice(&self.src[self.pos..self.pos + N]);
        self.pos += N;

        Ok(arr)
    }

    pub fn read_be_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_be_i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_array()?))
    }

    pub fn read_be_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_le_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Consumes the stream and returns a slice of size `n`.
    pub fn slice(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(DecodeError::NotEnoughData.into());
        }

        self.pos += n;

        Ok(&self.src[self.pos - n..self.pos])
    }

    /// Like [`slice`](BufStream::slice), but returns a new stream over the
    /// slice.
    pub fn slice_stream(&mut self, n: usize) -> Result<BufStream<'a>> {
        Ok(BufStream::new(self.slice(n)?))
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(DecodeError::NotEnoughData.into());
        }

        self.pos += n;

        Ok(())
    }

    /// Consumes the stream up to and including the next match of `needle` at
    /// a position aligned to the needle width, returning the data before the
    /// match. Without a match, the rest of the stream is returned.
    ///
    /// The alignment rule keeps a `0x00 0x00` terminator search from
    /// splitting a UTF-16 code unit down the middle.
    pub fn search(&mut self, needle: &[u8]) -> &'a [u8] {
        let width = needle.len();
        let start = self.pos;
        let mut at = self.pos;

        while at + width <= self.src.len() {
            if &self.src[at..at + width] == needle {
                self.pos = at + width;
                return &self.src[start..at];
            }

            at += width;
        }

        self.take_rest()
    }

    /// Consumes the rest of the stream.
    pub fn take_rest(&mut self) -> &'a [u8] {
        let rest = &self.src[self.pos..];
        self.pos = self.src.len();
        rest
    }

    pub fn len(&self) -> usize {
        self.src.len()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}

/// A caller-supplied seekable stream.
pub trait Handle: Read + Write + Seek {}

impl<T: Read + Write + Seek> Handle for T {}

enum Backing {
    File(File),
    Memory(Cursor<Vec<u8>>),
    Handle(Box<dyn Handle>),
}

/// A seekable byte source for the decoders.
///
/// Owns a file opened from a path, an in-memory buffer, or a boxed handle
/// borrowed from the caller. A borrowed handle has its position recorded at
/// acquisition and restored when the source is dropped, no matter how
/// decoding went.
pub struct Source {
    backing: Backing,
    restore: Option<u64>,
}

impl Source {
    /// Opens `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self {
            backing: Backing::File(File::open(path)?),
            restore: None,
        })
    }

    /// Opens `path` for reading and in-place writing.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            backing: Backing::File(file),
            restore: None,
        })
    }

    /// Wraps an in-memory byte buffer.
    pub fn memory(data: Vec<u8>) -> Self {
        Self {
            backing: Backing::Memory(Cursor::new(data)),
            restore: None,
        }
    }

    /// Borrows a caller-owned handle, recording its position for restore.
    pub fn handle(mut handle: Box<dyn Handle>) -> io::Result<Self> {
        let restore = handle.stream_position()?;

        Ok(Self {
            backing: Backing::Handle(handle),
            restore: Some(restore),
        })
    }

    fn stream(&mut self) -> &mut dyn Handle {
        match &mut self.backing {
            Backing::File(file) => file,
            Backing::Memory(cursor) => cursor,
            Backing::Handle(handle) => handle.as_mut(),
        }
    }

    pub fn len(&mut self) -> io::Result<u64> {
        match &mut self.backing {
            Backing::File(file) => file.metadata().map(|meta| meta.len()),
            Backing::Memory(cursor) => Ok(cursor.get_ref().len() as u64),
            Backing::Handle(handle) => {
                let pos = handle.stream_position()?;
                let end = handle.seek(SeekFrom::End(0))?;
                handle.seek(SeekFrom::Start(pos))?;
                Ok(end)
            }
        }
    }

    pub fn pos(&mut self) -> io::Result<u64> {
        self.stream().stream_position()
    }

    pub fn seek(&mut self, to: u64) -> io::Result<u64> {
        self.stream().seek(SeekFrom::Start(to))
    }

    /// Seeks `back` bytes from the end of the source.
    pub fn seek_end(&mut self, back: u64) -> io::Result<u64> {
        self.stream().seek(SeekFrom::End(-(back as i64)))
    }

    pub fn read_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.stream().read_exact(buf)
    }

    pub fn read_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut arr = [0; N];
        self.read_into(&mut arr)?;
        Ok(arr)
    }

    /// Reads exactly `amount` bytes.
    pub fn read_vec(&mut self, amount: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; amount];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    /// Reads up to `amount` bytes, stopping early at the end of the source.
    pub fn read_up_to(&mut self, amount: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; amount];
        let mut filled = 0;

        while filled < buf.len() {
            let n = self.stream().read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        buf.truncate(filled);
        Ok(buf)
    }

    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream().write_all(data)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.stream().flush()
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        if let Some(pos) = self.restore {
            // Restoring a borrowed handle is best-effort.
            let _ = self.stream().seek(SeekFrom::Start(pos));
        }
    }
}
