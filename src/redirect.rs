//! Endpoint descriptors for the child's standard channels.
//!
//! Each of stdin, stdout and stderr gets one descriptor telling the spawn
//! machinery how to wire that channel: inherit it, connect it to a pipe,
//! discard it, hand it an existing descriptor or file, bridge it to an
//! in-process stream, or open a filesystem path.  Constructing a
//! descriptor is where pipes get allocated and files get opened.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::RawFd;
use std::path::Path;

use crate::error::{OsError, PopenError, Result};
use crate::posix::{self, Access};
use crate::stream::Stream;

const DEV_NULL: &str = "/dev/null";

pub(crate) fn pipe_pair() -> Result<(Stream, Stream)> {
    let (read, write) = posix::pipe().map_err(|e| PopenError::os(e, "failed to create pipe"))?;
    Ok((
        Stream::from_owned_file(read, Access::Read),
        Stream::from_owned_file(write, Access::Write),
    ))
}

fn open_read(path: &Path) -> Result<Stream> {
    if !path.exists() {
        return Err(PopenError::InvalidArgument(format!(
            "file does not exist: {}",
            path.display()
        )));
    }
    let file = File::open(path)
        .map_err(|e| PopenError::Os(OsError::with_path(e, "failed to open file", path)))?;
    Ok(Stream::from_owned_file(file, Access::Read))
}

fn open_write(path: &Path) -> Result<Stream> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| PopenError::Os(OsError::with_path(e, "failed to open file", path)))?;
    Ok(Stream::from_owned_file(file, Access::Write))
}

fn open_devnull(access: Access) -> Result<Stream> {
    let file = match access {
        Access::Read => File::open(DEV_NULL),
        _ => OpenOptions::new().write(true).open(DEV_NULL),
    }
    .map_err(|e| PopenError::Os(OsError::with_path(e, "failed to open the null device", DEV_NULL)))?;
    Ok(Stream::from_owned_file(file, access))
}

/// How the child's standard input is wired.
///
/// The default is [`inherit`](StdinRedirect::inherit).
#[derive(Debug, Default)]
pub struct StdinRedirect {
    /// What the caller wants the child to read from, when not a pipe.
    pub(crate) source: Option<Stream>,
    /// Pipe end installed into the child.
    pub(crate) pipe_reader: Option<Stream>,
    /// Pipe end kept by the parent (or its transfer worker).
    pub(crate) pipe_writer: Option<Stream>,
}

impl StdinRedirect {
    /// The child inherits the parent's standard input.
    pub fn inherit() -> StdinRedirect {
        StdinRedirect::default()
    }

    /// Connects the child's stdin to a new pipe; the parent keeps the
    /// write end, available through `Popen::stdin_pipe`.
    pub fn pipe() -> Result<StdinRedirect> {
        let (reader, writer) = pipe_pair()?;
        Ok(StdinRedirect {
            source: None,
            pipe_reader: Some(reader),
            pipe_writer: Some(writer),
        })
    }

    /// The child reads immediate end-of-input from the null device.
    pub fn discard() -> Result<StdinRedirect> {
        Ok(StdinRedirect {
            source: Some(open_devnull(Access::Read)?),
            ..StdinRedirect::default()
        })
    }

    /// The child reads from an existing descriptor, which is borrowed and
    /// never closed by this crate.
    pub fn from_fd(fd: RawFd) -> Result<StdinRedirect> {
        Ok(StdinRedirect {
            source: Some(Stream::from_fd(fd)?),
            ..StdinRedirect::default()
        })
    }

    /// The child reads from an open file; ownership transfers to the
    /// spawn.
    pub fn from_file(file: File) -> Result<StdinRedirect> {
        Ok(StdinRedirect {
            source: Some(Stream::from_file(file)?),
            ..StdinRedirect::default()
        })
    }

    /// Feeds the child from an in-process byte source.
    ///
    /// The source has no descriptor the child could use, so a pipe pair is
    /// allocated here and a transfer worker bridges the source to the
    /// pipe's write end for the lifetime of the child.
    pub fn from_reader(reader: impl Read + Send + 'static) -> Result<StdinRedirect> {
        let (pipe_reader, pipe_writer) = pipe_pair()?;
        Ok(StdinRedirect {
            source: Some(Stream::from_reader(reader)),
            pipe_reader: Some(pipe_reader),
            pipe_writer: Some(pipe_writer),
        })
    }

    /// The child reads from the named file, which must exist.
    pub fn from_path(path: impl AsRef<Path>) -> Result<StdinRedirect> {
        Ok(StdinRedirect {
            source: Some(open_read(path.as_ref())?),
            ..StdinRedirect::default()
        })
    }
}

/// How the child's standard output is wired.
///
/// The default is [`inherit`](StdoutRedirect::inherit).
#[derive(Debug, Default)]
pub struct StdoutRedirect {
    /// What the caller wants the child to write to, when not a pipe.
    pub(crate) destination: Option<Stream>,
    /// Pipe end kept by the parent (or its transfer worker).
    pub(crate) pipe_reader: Option<Stream>,
    /// Pipe end installed into the child.
    pub(crate) pipe_writer: Option<Stream>,
}

impl StdoutRedirect {
    /// The child inherits the parent's standard output.
    pub fn inherit() -> StdoutRedirect {
        StdoutRedirect::default()
    }

    /// Connects the child's stdout to a new pipe; the parent keeps the
    /// read end, available through `Popen::stdout_pipe`.
    pub fn pipe() -> Result<StdoutRedirect> {
        let (reader, writer) = pipe_pair()?;
        Ok(StdoutRedirect {
            destination: None,
            pipe_reader: Some(reader),
            pipe_writer: Some(writer),
        })
    }

    /// The child's output is discarded into the null device.
    pub fn discard() -> Result<StdoutRedirect> {
        Ok(StdoutRedirect {
            destination: Some(open_devnull(Access::Write)?),
            ..StdoutRedirect::default()
        })
    }

    /// The child writes to an existing descriptor, which is borrowed and
    /// never closed by this crate.
    pub fn from_fd(fd: RawFd) -> Result<StdoutRedirect> {
        Ok(StdoutRedirect {
            destination: Some(Stream::from_fd(fd)?),
            ..StdoutRedirect::default()
        })
    }

    /// The child writes to an open file; ownership transfers to the
    /// spawn.
    pub fn from_file(file: File) -> Result<StdoutRedirect> {
        Ok(StdoutRedirect {
            destination: Some(Stream::from_file(file)?),
            ..StdoutRedirect::default()
        })
    }

    /// Drains the child's output into an in-process byte sink.
    ///
    /// A pipe pair is allocated here and a transfer worker bridges the
    /// pipe's read end to the sink for the lifetime of the child.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Result<StdoutRedirect> {
        let (pipe_reader, pipe_writer) = pipe_pair()?;
        Ok(StdoutRedirect {
            destination: Some(Stream::from_writer(writer)),
            pipe_reader: Some(pipe_reader),
            pipe_writer: Some(pipe_writer),
        })
    }

    /// The child writes to the named file, created or truncated as
    /// needed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<StdoutRedirect> {
        Ok(StdoutRedirect {
            destination: Some(open_write(path.as_ref())?),
            ..StdoutRedirect::default()
        })
    }
}

/// How the child's standard error is wired.
///
/// The default is [`inherit`](StderrRedirect::inherit).  Unlike the other
/// channels, stderr can also be [merged into
/// stdout](StderrRedirect::merge_stdout).
#[derive(Debug, Default)]
pub struct StderrRedirect {
    /// What the caller wants the child to write to, when not a pipe.
    pub(crate) destination: Option<Stream>,
    /// Pipe end kept by the parent (or its transfer worker).
    pub(crate) pipe_reader: Option<Stream>,
    /// Pipe end installed into the child.
    pub(crate) pipe_writer: Option<Stream>,
    /// Share stdout's descriptor instead of having one of our own.
    pub(crate) merge: bool,
}

impl StderrRedirect {
    /// The child inherits the parent's standard error.
    pub fn inherit() -> StderrRedirect {
        StderrRedirect::default()
    }

    /// Connects the child's stderr to a new pipe; the parent keeps the
    /// read end, available through `Popen::stderr_pipe`.
    pub fn pipe() -> Result<StderrRedirect> {
        let (reader, writer) = pipe_pair()?;
        Ok(StderrRedirect {
            pipe_reader: Some(reader),
            pipe_writer: Some(writer),
            ..StderrRedirect::default()
        })
    }

    /// The child's error output is discarded into the null device.
    pub fn discard() -> Result<StderrRedirect> {
        Ok(StderrRedirect {
            destination: Some(open_devnull(Access::Write)?),
            ..StderrRedirect::default()
        })
    }

    /// The child's stderr shares whatever stdout was wired to, the `2>&1`
    /// of the shell.
    pub fn merge_stdout() -> StderrRedirect {
        StderrRedirect {
            merge: true,
            ..StderrRedirect::default()
        }
    }

    /// The child writes errors to an existing descriptor, which is
    /// borrowed and never closed by this crate.
    pub fn from_fd(fd: RawFd) -> Result<StderrRedirect> {
        Ok(StderrRedirect {
            destination: Some(Stream::from_fd(fd)?),
            ..StderrRedirect::default()
        })
    }

    /// The child writes errors to an open file; ownership transfers to
    /// the spawn.
    pub fn from_file(file: File) -> Result<StderrRedirect> {
        Ok(StderrRedirect {
            destination: Some(Stream::from_file(file)?),
            ..StderrRedirect::default()
        })
    }

    /// Drains the child's error output into an in-process byte sink via a
    /// pipe and a transfer worker.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Result<StderrRedirect> {
        let (pipe_reader, pipe_writer) = pipe_pair()?;
        Ok(StderrRedirect {
            destination: Some(Stream::from_writer(writer)),
            pipe_reader: Some(pipe_reader),
            pipe_writer: Some(pipe_writer),
            ..StderrRedirect::default()
        })
    }

    /// The child writes errors to the named file, created or truncated as
    /// needed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<StderrRedirect> {
        Ok(StderrRedirect {
            destination: Some(open_write(path.as_ref())?),
            ..StderrRedirect::default()
        })
    }
}
