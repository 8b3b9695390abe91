//! Polymorphic handles over byte sources and sinks.
//!
//! A [`Stream`] wraps either a kernel descriptor or an in-process reader,
//! writer, or duplex object behind one interface.  The spawn machinery
//! keys off a single question -- does the endpoint expose a descriptor?
//! -- to decide between wiring it straight into the child with `dup2` and
//! bridging it through a pipe with a transfer worker.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use crate::error::{PopenError, Result};
use crate::posix::{self, Access};
use crate::Bytes;

/// Default buffer size for `read_all` growth and full buffering, the
/// stdio `BUFSIZ` analog.
pub(crate) const DEFAULT_BUFSIZE: usize = 8192;

/// User-space buffering mode of a descriptor-backed stream.
///
/// Mirrors the `setvbuf` modes: the mode governs the granularity in which
/// [`Stream::write`] hands data to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufMode {
    /// Each write passes through whole.
    Unbuffered,
    /// Writes are issued line by line.
    Line,
    /// Writes are issued in chunks of the given size.
    Full(usize),
}

impl BufMode {
    /// Maps a numeric hint: `0` unbuffered, `1` line buffered, above `1`
    /// fully buffered with that chunk size, negative fully buffered with
    /// the default size.
    pub fn from_hint(hint: isize) -> BufMode {
        match hint {
            0 => BufMode::Unbuffered,
            1 => BufMode::Line,
            n if n > 1 => BufMode::Full(n as usize),
            _ => BufMode::Full(DEFAULT_BUFSIZE),
        }
    }
}

/// In-process bidirectional stream, as accepted by [`Stream::from_duplex`].
///
/// Blanket-implemented for everything that is `Read + Write + Send`.
pub trait ReadWrite: Read + Write + Send {}

impl<T: Read + Write + Send> ReadWrite for T {}

struct FdStream {
    file: Option<File>,
    access: Access,
    owned: bool,
    bufmode: BufMode,
}

impl Drop for FdStream {
    fn drop(&mut self) {
        if !self.owned {
            if let Some(file) = self.file.take() {
                // the descriptor belongs to the caller and must stay open
                let _ = file.into_raw_fd();
            }
        }
    }
}

struct ReaderStream {
    reader: Box<dyn Read + Send>,
    eof: bool,
}

struct WriterStream {
    writer: Box<dyn Write + Send>,
}

struct DuplexStream {
    stream: Box<dyn ReadWrite>,
    eof: bool,
}

enum Inner {
    Fd(FdStream),
    Reader(ReaderStream),
    Writer(WriterStream),
    Duplex(DuplexStream),
}

impl Inner {
    fn bufmode(&self) -> Option<BufMode> {
        match self {
            Inner::Fd(fd) => Some(fd.bufmode),
            _ => None,
        }
    }
}

impl Read for Inner {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Inner::Fd(fd) => match fd.file.as_mut() {
                Some(file) => file.read(buf),
                None => Err(io::Error::other("stream is closed")),
            },
            Inner::Reader(r) => {
                let n = r.reader.read(buf)?;
                if n == 0 && !buf.is_empty() {
                    r.eof = true;
                }
                Ok(n)
            }
            Inner::Duplex(d) => {
                let n = d.stream.read(buf)?;
                if n == 0 && !buf.is_empty() {
                    d.eof = true;
                }
                Ok(n)
            }
            Inner::Writer(_) => Err(io::Error::other("stream is not readable")),
        }
    }
}

impl Write for Inner {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Inner::Fd(fd) => match fd.file.as_mut() {
                Some(file) => file.write(buf),
                None => Err(io::Error::other("stream is closed")),
            },
            Inner::Writer(w) => w.writer.write(buf),
            Inner::Duplex(d) => d.stream.write(buf),
            Inner::Reader(_) => Err(io::Error::other("stream is not writable")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Inner::Fd(fd) => match fd.file.as_mut() {
                Some(file) => file.flush(),
                None => Ok(()),
            },
            Inner::Writer(w) => w.writer.flush(),
            Inner::Duplex(d) => d.stream.flush(),
            Inner::Reader(_) => Ok(()),
        }
    }
}

fn closed() -> PopenError {
    PopenError::Io(io::Error::other("stream is closed"))
}

fn not_readable() -> PopenError {
    PopenError::Io(io::Error::other("stream is not readable"))
}

fn not_writable() -> PopenError {
    PopenError::Io(io::Error::other("stream is not writable"))
}

/// A byte source and/or sink: a kernel descriptor or an in-process
/// reader, writer, or duplex object.
///
/// Descriptor-backed streams carry the access mode read from the
/// descriptor's status flags and a `setvbuf`-style buffering mode.
/// In-process streams have no descriptor; when used as a child's
/// endpoint they are bridged through a pipe by a transfer worker.
pub struct Stream {
    inner: Option<Inner>,
}

impl Stream {
    /// Wraps a raw descriptor without taking ownership; the descriptor is
    /// never closed by this crate.
    ///
    /// Fails if the descriptor's status flags cannot be queried.
    pub fn from_fd(fd: RawFd) -> Result<Stream> {
        let access = posix::access_mode(fd)
            .map_err(|e| PopenError::os(e, "failed to query descriptor flags"))?;
        let file = unsafe { File::from_raw_fd(fd) };
        Ok(Stream::fd_stream(file, access, false))
    }

    /// Wraps an open file, taking ownership; closing the stream closes the
    /// file.
    pub fn from_file(file: File) -> Result<Stream> {
        let access = posix::access_mode(file.as_raw_fd())
            .map_err(|e| PopenError::os(e, "failed to query descriptor flags"))?;
        Ok(Stream::fd_stream(file, access, true))
    }

    /// Wraps an in-process byte source.
    pub fn from_reader(reader: impl Read + Send + 'static) -> Stream {
        Stream {
            inner: Some(Inner::Reader(ReaderStream {
                reader: Box::new(reader),
                eof: false,
            })),
        }
    }

    /// Wraps an in-process byte sink.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Stream {
        Stream {
            inner: Some(Inner::Writer(WriterStream {
                writer: Box::new(writer),
            })),
        }
    }

    /// Wraps an in-process bidirectional stream.
    pub fn from_duplex(stream: impl Read + Write + Send + 'static) -> Stream {
        Stream {
            inner: Some(Inner::Duplex(DuplexStream {
                stream: Box::new(stream),
                eof: false,
            })),
        }
    }

    /// An owned file whose access mode is already known, e.g. a pipe end.
    pub(crate) fn from_owned_file(file: File, access: Access) -> Stream {
        Stream::fd_stream(file, access, true)
    }

    fn fd_stream(file: File, access: Access, owned: bool) -> Stream {
        Stream {
            inner: Some(Inner::Fd(FdStream {
                file: Some(file),
                access,
                owned,
                bufmode: BufMode::Full(DEFAULT_BUFSIZE),
            })),
        }
    }

    /// The underlying descriptor, if this stream has one.
    pub fn fileno(&self) -> Option<RawFd> {
        match self.inner.as_ref() {
            Some(Inner::Fd(fd)) => fd.file.as_ref().map(|f| f.as_raw_fd()),
            _ => None,
        }
    }

    /// Whether the stream is still usable.
    pub fn is_open(&self) -> bool {
        match self.inner.as_ref() {
            Some(Inner::Fd(fd)) => fd.file.is_some(),
            Some(_) => true,
            None => false,
        }
    }

    /// Whether the stream can be read from.  For in-process sources this
    /// becomes false once end-of-input has been observed.
    pub fn is_readable(&self) -> bool {
        match self.inner.as_ref() {
            Some(Inner::Fd(fd)) => fd.file.is_some() && fd.access.readable(),
            Some(Inner::Reader(r)) => !r.eof,
            Some(Inner::Duplex(d)) => !d.eof,
            Some(Inner::Writer(_)) | None => false,
        }
    }

    /// Whether the stream can be written to.
    pub fn is_writable(&self) -> bool {
        match self.inner.as_ref() {
            Some(Inner::Fd(fd)) => fd.file.is_some() && fd.access.writable(),
            Some(Inner::Writer(_)) | Some(Inner::Duplex(_)) => true,
            Some(Inner::Reader(_)) | None => false,
        }
    }

    /// Reads up to `n` bytes; fewer are returned only at end-of-input.
    pub fn read(&mut self, n: usize) -> Result<Bytes> {
        if !self.is_open() {
            return Err(closed());
        }
        if !self.is_readable() {
            return Err(not_readable());
        }
        let inner = self.inner.as_mut().unwrap();
        let mut buf = vec![0u8; n];
        let mut total = 0;
        while total < n {
            match inner.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(k) => total += k,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PopenError::Io(e)),
            }
        }
        buf.truncate(total);
        Ok(buf)
    }

    /// Reads until end-of-input, growing the buffer geometrically and
    /// shrinking the result to the bytes actually consumed.
    pub fn read_all(&mut self) -> Result<Bytes> {
        if !self.is_open() {
            return Err(closed());
        }
        if !self.is_readable() {
            return Err(not_readable());
        }
        let inner = self.inner.as_mut().unwrap();
        let mut buf = vec![0u8; DEFAULT_BUFSIZE];
        let mut total = 0;
        loop {
            if total == buf.len() {
                let grown = buf.len() * 2;
                buf.resize(grown, 0);
            }
            match inner.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(k) => total += k,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PopenError::Io(e)),
            }
        }
        buf.truncate(total);
        buf.shrink_to_fit();
        Ok(buf)
    }

    /// Writes the whole buffer, looping on short writes, and flushes
    /// user-space buffers before returning the byte count.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.is_open() {
            return Err(closed());
        }
        if !self.is_writable() {
            return Err(not_writable());
        }
        let inner = self.inner.as_mut().unwrap();
        match inner.bufmode() {
            Some(BufMode::Full(size)) => {
                for chunk in data.chunks(size.max(1)) {
                    inner.write_all(chunk)?;
                }
            }
            Some(BufMode::Line) => {
                for line in data.split_inclusive(|&b| b == b'\n') {
                    inner.write_all(line)?;
                }
            }
            Some(BufMode::Unbuffered) | None => inner.write_all(data)?,
        }
        inner.flush()?;
        Ok(data.len())
    }

    /// Closes the stream.  Only resources this crate opened are released;
    /// for borrowed descriptors and in-process objects this is equivalent
    /// to [`release`].  Closing twice is a no-op, and errors from the
    /// underlying close are ignored.
    ///
    /// [`release`]: Stream::release
    pub fn close(&mut self) {
        // FdStream::drop closes owned files and leaks borrowed ones
        self.inner.take();
    }

    /// Severs the association with the underlying resource without
    /// closing it.  An owned descriptor is deliberately leaked.
    pub fn release(&mut self) {
        if let Some(inner) = self.inner.take() {
            if let Inner::Fd(mut fd) = inner {
                if let Some(file) = fd.file.take() {
                    let _ = file.into_raw_fd();
                }
            }
        }
    }

    /// Selects the buffering mode from a `setvbuf`-style numeric hint, as
    /// described on [`BufMode::from_hint`].
    ///
    /// Only descriptor-backed streams carry a buffering mode.
    pub fn set_bufsize(&mut self, hint: isize) -> Result<()> {
        match self.inner.as_mut() {
            Some(Inner::Fd(fd)) => {
                fd.bufmode = BufMode::from_hint(hint);
                Ok(())
            }
            Some(_) => Err(PopenError::InvalidArgument(
                "buffering mode applies only to descriptor-backed streams".to_owned(),
            )),
            None => Err(closed()),
        }
    }

    pub(crate) fn set_bufmode(&mut self, mode: BufMode) {
        if let Some(Inner::Fd(fd)) = self.inner.as_mut() {
            fd.bufmode = mode;
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.read(buf),
            None => Err(io::Error::other("stream is closed")),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.write(buf),
            None => Err(io::Error::other("stream is closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.as_ref() {
            Some(Inner::Fd(fd)) => match fd.file.as_ref() {
                Some(file) => write!(f, "Stream(fd {})", file.as_raw_fd()),
                None => write!(f, "Stream(closed)"),
            },
            Some(Inner::Reader(_)) => write!(f, "Stream(reader)"),
            Some(Inner::Writer(_)) => write!(f, "Stream(writer)"),
            Some(Inner::Duplex(_)) => write!(f, "Stream(duplex)"),
            None => write!(f, "Stream(closed)"),
        }
    }
}
