//! Bridging byte streams, synchronously or on a background worker.

use std::fmt;
use std::io;
use std::thread;

use log::trace;

use crate::error::{OsError, PopenError, Result};
use crate::stream::{Stream, DEFAULT_BUFSIZE};

fn check_bridge(src: &Stream, dst: &Stream) -> Result<()> {
    if !src.is_open() {
        return Err(PopenError::Io(io::Error::other("source stream is closed")));
    }
    if !dst.is_open() {
        return Err(PopenError::Io(io::Error::other(
            "destination stream is closed",
        )));
    }
    if !src.is_readable() {
        return Err(PopenError::Io(io::Error::other(
            "source stream is not readable",
        )));
    }
    if !dst.is_writable() {
        return Err(PopenError::Io(io::Error::other(
            "destination stream is not writable",
        )));
    }
    Ok(())
}

/// Copies every byte from `src` to `dst` and returns the number
/// transferred.
///
/// Both streams must be open and of the right capability.  A broken pipe
/// on the write side means the consumer has gone away and is treated as
/// end-of-stream, not as an error.
pub fn communicate(src: &mut Stream, dst: &mut Stream) -> Result<u64> {
    check_bridge(src, dst)?;
    let mut total = 0u64;
    loop {
        let chunk = src.read(DEFAULT_BUFSIZE)?;
        if chunk.is_empty() {
            break;
        }
        match dst.write(&chunk) {
            Ok(n) => total += n as u64,
            Err(PopenError::Io(ref e)) if e.kind() == io::ErrorKind::BrokenPipe => break,
            Err(e) => return Err(e),
        }
        // a short read is how the stream signals end-of-input
        if chunk.len() < DEFAULT_BUFSIZE {
            break;
        }
    }
    Ok(total)
}

/// Handle to a background transfer worker, joined during reap.
pub struct Transfer {
    handle: thread::JoinHandle<Result<u64>>,
}

impl Transfer {
    /// Waits for the worker and returns the transferred byte count, or
    /// the error the worker ran into.
    pub fn join(self) -> Result<u64> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(PopenError::Io(io::Error::other(
                "transfer worker panicked",
            ))),
        }
    }

    /// True once the worker has finished, without blocking.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transfer(finished: {})", self.is_finished())
    }
}

/// Runs [`communicate`] on a dedicated worker thread.
///
/// Both endpoints move into the worker, which owns them exclusively and
/// closes them once the copy ends.  When the destination is the write end
/// of a child's stdin pipe, that close is what delivers end-of-input to
/// the child.
pub fn communicate_async(mut src: Stream, mut dst: Stream) -> Result<Transfer> {
    check_bridge(&src, &dst)?;
    let handle = thread::Builder::new()
        .name("stream-transfer".to_owned())
        .spawn(move || {
            let result = communicate(&mut src, &mut dst);
            src.close();
            dst.close();
            if let Ok(count) = result {
                trace!("transfer worker done after {} bytes", count);
            }
            result
        })
        .map_err(|e| PopenError::Os(OsError::new(e, "failed to spawn transfer worker")))?;
    Ok(Transfer { handle })
}
