//! Sequential byte sources.

use std::io;

use crate::StreamingReader;

/// A sequential, non-seekable source of bytes.
///
/// `read` blocks until at least one byte is available and returns `Ok(0)`
/// only at end of input. `available` reports how many bytes can be read
/// without blocking; sources that cannot tell return 0.
pub trait ByteSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn available(&self) -> usize {
        0
    }
}

impl ByteSource for &[u8] {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.len());
        let (head, tail) = self.split_at(n);
        buf[..n].copy_from_slice(head);
        *self = tail;
        Ok(n)
    }

    fn available(&self) -> usize {
        self.len()
    }
}

impl<T: AsRef<[u8]>> ByteSource for io::Cursor<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn available(&self) -> usize {
        let len = self.get_ref().as_ref().len() as u64;
        len.saturating_sub(self.position()) as usize
    }
}

impl ByteSource for StreamingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.size());
        if n > 0 {
            buf[..n].copy_from_slice(self.subarray(0, n));
            self.skip(n).map_err(io::Error::other)?;
            self.consume();
        }
        Ok(n)
    }

    fn available(&self) -> usize {
        self.size()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn available(&self) -> usize {
        (**self).available()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn available(&self) -> usize {
        (**self).available()
    }
}

/// Adapts any [`std::io::Read`] (files, sockets, pipes) into a [`ByteSource`].
///
/// `available` is always 0 because `Read` cannot report it.
#[derive(Debug)]
pub struct IoSource<R> {
    inner: R,
}

impl<R: io::Read> IoSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: io::Read> ByteSource for IoSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.read(buf) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => return other,
            }
        }
    }
}
