//! Execution of child processes with flexible stream plumbing.
//!
//! The entry point is the [`Popen`] struct, built from a [`PopenConfig`]
//! describing the argument vector and how each of the child's standard
//! channels should be wired: inherited, piped, discarded, attached to an
//! existing descriptor or file, bridged to an in-process [`Read`]/[`Write`]
//! object, or opened from a filesystem path.  Endpoints that have no
//! kernel descriptor of their own are serviced by background transfer
//! workers, so any combination of endpoints stays deadlock-free.
//!
//! # Examples
//!
//! Spawn a process with piped stdin and stdout and exchange data with it:
//!
//! ```ignore
//! let mut p = Popen::create(
//!     PopenConfig::new()
//!         .args(["/bin/sh", "-c", "cat"])?
//!         .stdin(StdinRedirect::pipe()?)?
//!         .stdout(StdoutRedirect::pipe()?)?,
//! )?;
//!
//! let (out, _err) = p.communicate(b"Hello World!", 3.0)?;
//! assert_eq!(out.as_deref(), Some(&b"Hello World!"[..]));
//! assert_eq!(p.returncode(), Some(0));
//! ```
//!
//! Feed a child from an in-process source and check how it exited:
//!
//! ```ignore
//! let mut p = Popen::create(
//!     PopenConfig::new()
//!         .args(["/bin/sh", "-c", "wc -c"])?
//!         .stdin(StdinRedirect::from_reader(io::Cursor::new(data))?)?
//!         .stdout(StdoutRedirect::discard()?)?,
//! )?;
//! match p.wait(-1.0)? {
//!     0 => println!("done"),
//!     code if code < 0 => println!("killed by signal {}", -code),
//!     code => println!("exited with {}", code),
//! }
//! ```
//!
//! [`Read`]: std::io::Read
//! [`Write`]: std::io::Write

#![warn(missing_docs)]

mod comm;
mod error;
mod popen;
mod posix;
mod redirect;
mod stream;

pub use crate::comm::{communicate, communicate_async, Transfer};
pub use crate::error::{OsError, PopenError, Result};
pub use crate::popen::{Popen, PopenConfig, PreexecFn};
pub use crate::posix::{ResourceUsage, SIGKILL, SIGTERM};
pub use crate::redirect::{StderrRedirect, StdinRedirect, StdoutRedirect};
pub use crate::stream::{BufMode, ReadWrite, Stream};

/// Owned byte buffer used for stream reads and writes.
pub type Bytes = Vec<u8>;

#[cfg(test)]
mod tests {
    mod common;
    mod comm;
    mod popen;
    mod redirect;
    mod stream;
}
