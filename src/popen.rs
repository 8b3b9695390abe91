//! Spawn configuration and the live process handle.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Read};
use std::os::unix::io::{AsRawFd, RawFd};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::comm::{self, Transfer};
use crate::error::{OsError, PopenError, Result};
use crate::posix::{self, CVec, ResourceUsage};
use crate::redirect::{StderrRedirect, StdinRedirect, StdoutRedirect};
use crate::stream::{BufMode, Stream};
use crate::Bytes;

/// Hook run in the child between `fork` and `exec`.
pub type PreexecFn = Box<dyn FnMut() -> io::Result<()> + Send>;

/// Builder-style description of a spawn: the argument vector, the three
/// channel endpoints, a buffering hint and a pre-exec hook.
///
/// Every field can be supplied at most once; a second assignment is an
/// [`InvalidArgument`](PopenError::InvalidArgument) error.  `args` is the
/// only required field.  The configuration is consumed by
/// [`Popen::create`].
#[derive(Default)]
pub struct PopenConfig {
    args: Option<Vec<OsString>>,
    bufsize: Option<isize>,
    stdin: Option<StdinRedirect>,
    stdout: Option<StdoutRedirect>,
    stderr: Option<StderrRedirect>,
    preexec: Option<PreexecFn>,
}

fn already_set(field: &str) -> PopenError {
    PopenError::InvalidArgument(format!("'{}' supplied more than once", field))
}

impl PopenConfig {
    /// Creates an empty configuration.
    pub fn new() -> PopenConfig {
        PopenConfig::default()
    }

    /// Sets the argument vector.  Element 0 is the path of the executable,
    /// passed to `execv` without any PATH search.
    pub fn args<S: AsRef<OsStr>>(
        mut self,
        args: impl IntoIterator<Item = S>,
    ) -> Result<PopenConfig> {
        if self.args.is_some() {
            return Err(already_set("args"));
        }
        self.args = Some(args.into_iter().map(|a| a.as_ref().to_owned()).collect());
        Ok(self)
    }

    /// Buffering hint applied to the parent-side pipe ends, interpreted
    /// as by [`BufMode::from_hint`].  Defaults to `-1`, full buffering
    /// with the default size.
    pub fn bufsize(mut self, hint: isize) -> Result<PopenConfig> {
        if self.bufsize.is_some() {
            return Err(already_set("bufsize"));
        }
        self.bufsize = Some(hint);
        Ok(self)
    }

    /// Wires the child's standard input.  Defaults to inherit.
    pub fn stdin(mut self, stdin: StdinRedirect) -> Result<PopenConfig> {
        if self.stdin.is_some() {
            return Err(already_set("stdin"));
        }
        self.stdin = Some(stdin);
        Ok(self)
    }

    /// Wires the child's standard output.  Defaults to inherit.
    pub fn stdout(mut self, stdout: StdoutRedirect) -> Result<PopenConfig> {
        if self.stdout.is_some() {
            return Err(already_set("stdout"));
        }
        self.stdout = Some(stdout);
        Ok(self)
    }

    /// Wires the child's standard error.  Defaults to inherit.
    pub fn stderr(mut self, stderr: StderrRedirect) -> Result<PopenConfig> {
        if self.stderr.is_some() {
            return Err(already_set("stderr"));
        }
        self.stderr = Some(stderr);
        Ok(self)
    }

    /// Runs `hook` in the child after the descriptors are rewired, right
    /// before `exec`.
    ///
    /// # Safety
    ///
    /// The hook runs between `fork` and `exec`, where only
    /// async-signal-safe operations are sound.  In particular it must not
    /// allocate or take locks that another thread of the parent might
    /// hold.  Upholding this is the caller's responsibility.
    pub unsafe fn preexec<F>(mut self, hook: F) -> Result<PopenConfig>
    where
        F: FnMut() -> io::Result<()> + Send + 'static,
    {
        if self.preexec.is_some() {
            return Err(already_set("preexec"));
        }
        self.preexec = Some(Box::new(hook));
        Ok(self)
    }
}

impl fmt::Debug for PopenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopenConfig")
            .field("args", &self.args)
            .field("bufsize", &self.bufsize)
            .finish_non_exhaustive()
    }
}

/// A spawned child process.
///
/// Holds the child's PID, the parent-side pipe ends, and the transfer
/// workers bridging any in-process endpoints.  The exit code and resource
/// usage become available once termination has been observed by
/// [`poll`](Popen::poll), [`wait`](Popen::wait) or
/// [`communicate`](Popen::communicate), and are stable from then on.
///
/// Dropping a running handle neither kills nor reaps the child; reaping
/// when needed is the caller's job.
pub struct Popen {
    args: Vec<OsString>,
    pid: u32,
    returncode: Option<i32>,
    usage: Option<ResourceUsage>,
    stdin_writer: Option<Stream>,
    stdout_reader: Option<Stream>,
    stderr_reader: Option<Stream>,
    workers: Vec<Transfer>,
}

impl Popen {
    /// Spawns the child described by `config`, consuming it.
    ///
    /// Failures anywhere on the spawn path, including an `exec` that
    /// fails inside the child, surface here and leave no zombie behind.
    pub fn create(config: PopenConfig) -> Result<Popen> {
        let PopenConfig {
            args,
            bufsize,
            stdin,
            stdout,
            stderr,
            mut preexec,
        } = config;
        let args =
            args.ok_or_else(|| PopenError::InvalidArgument("missing required 'args'".to_owned()))?;
        if args.is_empty() {
            return Err(PopenError::InvalidArgument(
                "'args' must not be empty".to_owned(),
            ));
        }
        let mut stdin = stdin.unwrap_or_default();
        let mut stdout = stdout.unwrap_or_default();
        let mut stderr = stderr.unwrap_or_default();

        // The argv block is prepared before forking; between fork and exec
        // the child only performs raw syscalls.
        let argv = CVec::new(&args).map_err(|_| {
            PopenError::InvalidArgument("argument contains an interior NUL byte".to_owned())
        })?;

        let bufmode = BufMode::from_hint(bufsize.unwrap_or(-1));
        for end in [
            stdin.pipe_writer.as_mut(),
            stdout.pipe_reader.as_mut(),
            stderr.pipe_reader.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            end.set_bufmode(bufmode);
        }

        let (mut fail_read, fail_write) =
            posix::pipe().map_err(|e| PopenError::os(e, "failed to create pipe"))?;
        posix::set_cloexec(&fail_read)
            .map_err(|e| PopenError::os(e, "failed to set close-on-exec"))?;
        posix::set_cloexec(&fail_write)
            .map_err(|e| PopenError::os(e, "failed to set close-on-exec"))?;

        // Child-side targets: a direct descriptor wins, otherwise the pipe
        // end destined for the child, otherwise the channel is inherited.
        let child_stdin = stdin
            .source
            .as_ref()
            .and_then(Stream::fileno)
            .or_else(|| stdin.pipe_reader.as_ref().and_then(Stream::fileno));
        let child_stdout = stdout
            .destination
            .as_ref()
            .and_then(Stream::fileno)
            .or_else(|| stdout.pipe_writer.as_ref().and_then(Stream::fileno));
        let mut child_stderr = stderr
            .destination
            .as_ref()
            .and_then(Stream::fileno)
            .or_else(|| stderr.pipe_writer.as_ref().and_then(Stream::fileno));
        if stderr.merge {
            child_stderr = child_stdout;
        }
        let child_dups = [child_stdin, child_stdout, child_stderr];

        let parent_fds: Vec<RawFd> = [
            stdin.pipe_writer.as_ref(),
            stdout.pipe_reader.as_ref(),
            stderr.pipe_reader.as_ref(),
        ]
        .into_iter()
        .flatten()
        .filter_map(Stream::fileno)
        .collect();

        let mut child_close: Vec<RawFd> = child_dups
            .iter()
            .flatten()
            .copied()
            .filter(|&fd| fd > 2)
            .collect();
        child_close.sort_unstable();
        child_close.dedup();

        let pid = posix::fork().map_err(|e| PopenError::os(e, "failed to fork"))?;
        if pid == 0 {
            // Child.  Nothing here may allocate or take locks.
            for &fd in &parent_fds {
                let _ = posix::close(fd);
            }
            let _ = posix::close(fail_read.as_raw_fd());
            let err = do_child(&child_dups, &child_close, preexec.as_mut(), &argv);
            posix::write_errno(fail_write.as_raw_fd(), err);
            posix::_exit(127);
        }
        trace!("forked child pid {} for {:?}", pid, args[0]);

        // The child keeps its own copies of these ends; ours must go so
        // that EOF propagates.
        for end in [
            stdin.pipe_reader.take(),
            stdout.pipe_writer.take(),
            stderr.pipe_writer.take(),
        ]
        .iter_mut()
        {
            if let Some(stream) = end {
                stream.close();
            }
        }

        drop(fail_write);
        let mut report = Vec::new();
        fail_read
            .read_to_end(&mut report)
            .map_err(|e| PopenError::os(e, "failed to read exec status"))?;
        if report.len() >= 4 {
            let errno = i32::from_ne_bytes([report[0], report[1], report[2], report[3]]);
            // The child has already exited; reap it so no zombie is left.
            let _ = posix::wait4(pid, 0);
            return Err(PopenError::Os(OsError::with_path(
                io::Error::from_raw_os_error(errno),
                "failed to execute",
                &args[0],
            )));
        }

        let (workers, stdin_writer, stdout_reader, stderr_reader) =
            match launch_workers(stdin, stdout, stderr) {
                Ok(parts) => parts,
                Err(e) => {
                    // Undo the spawn rather than leak a running child.
                    let _ = posix::kill(pid, posix::SIGKILL);
                    let _ = posix::wait4(pid, 0);
                    return Err(e);
                }
            };

        Ok(Popen {
            args,
            pid,
            returncode: None,
            usage: None,
            stdin_writer,
            stdout_reader,
            stderr_reader,
            workers,
        })
    }

    /// The argument vector the child was spawned with.
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Process ID of the child.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The child's exit code: `Some` once termination has been observed,
    /// stable afterwards.  Non-negative is a normal exit status, negative
    /// is the negated number of the terminating signal.
    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    /// Resource usage of the child, available once termination has been
    /// observed.
    pub fn usage(&self) -> Option<ResourceUsage> {
        self.usage
    }

    /// Write end of the stdin pipe, present when stdin was configured as
    /// a pipe without an in-process source and has not been closed.
    pub fn stdin_pipe(&mut self) -> Option<&mut Stream> {
        self.stdin_writer.as_mut().filter(|s| s.is_open())
    }

    /// Read end of the stdout pipe, present when stdout was configured as
    /// a pipe without an in-process sink and has not been closed.
    pub fn stdout_pipe(&mut self) -> Option<&mut Stream> {
        self.stdout_reader.as_mut().filter(|s| s.is_open())
    }

    /// Read end of the stderr pipe, present when stderr was configured as
    /// a pipe without an in-process sink and has not been closed.
    pub fn stderr_pipe(&mut self) -> Option<&mut Stream> {
        self.stderr_reader.as_mut().filter(|s| s.is_open())
    }

    /// Checks for termination without blocking.
    ///
    /// Returns `Some(code)` once the child has exited.  Observing the
    /// exit also joins the transfer workers (bounded by the time they
    /// need to drain already-closed descriptors) and captures resource
    /// usage; an error a worker ran into is surfaced here, once.
    pub fn poll(&mut self) -> Result<Option<i32>> {
        if self.returncode.is_some() {
            return Ok(self.returncode);
        }
        let (waited, status, usage) = posix::wait4(self.pid, posix::WNOHANG)
            .map_err(|e| PopenError::os(e, "failed to wait for child"))?;
        if waited != self.pid {
            return Ok(None);
        }
        let worker_error = self.join_workers();
        let code = posix::decode_wait_status(status).ok_or(PopenError::BadStatus(status))?;
        debug!("child {} terminated with code {}", self.pid, code);
        self.returncode = Some(code);
        self.usage = Some(usage);
        if let Some(e) = worker_error {
            return Err(e);
        }
        Ok(self.returncode)
    }

    fn join_workers(&mut self) -> Option<PopenError> {
        let mut first_error = None;
        for worker in self.workers.drain(..) {
            match worker.join() {
                Ok(count) => trace!("joined transfer worker, {} bytes", count),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        first_error
    }

    /// Waits for the child to terminate and returns its exit code.
    ///
    /// `timeout` is in seconds; negative means wait forever, zero means
    /// poll once.  On overrun the child is left running and
    /// [`TimeoutExpired`](PopenError::TimeoutExpired) reports the elapsed
    /// time.
    pub fn wait(&mut self, timeout: f64) -> Result<i32> {
        const POLL_INTERVAL: Duration = Duration::from_millis(10);
        if timeout.is_nan() {
            return Err(PopenError::InvalidArgument(
                "timeout must not be NaN".to_owned(),
            ));
        }
        let limit = if timeout < 0.0 {
            None
        } else {
            Duration::try_from_secs_f64(timeout).ok()
        };
        let start = Instant::now();
        loop {
            if let Some(code) = self.poll()? {
                return Ok(code);
            }
            let elapsed = start.elapsed();
            match limit {
                Some(limit) if elapsed >= limit => {
                    return Err(PopenError::TimeoutExpired {
                        message: "process did not terminate".to_owned(),
                        elapsed,
                    })
                }
                Some(limit) => thread::sleep(POLL_INTERVAL.min(limit - elapsed)),
                None => thread::sleep(POLL_INTERVAL),
            }
        }
    }

    /// Feeds `input` to the child and collects its piped output.
    ///
    /// Requires stdin to be connected to a pipe.  The whole input is
    /// written, the write end is closed so the child sees end-of-input
    /// (also for an empty `input`), the child is awaited with `timeout`,
    /// and whatever piped stdout/stderr produced is read to end-of-input.
    /// Channels that are not pipe-based come back as `None`.
    ///
    /// Writing all of the input first and only then reading is what makes
    /// this immune to the both-sides-blocked pipe deadlock for children
    /// that consume their input before producing the bulk of their
    /// output.
    pub fn communicate(
        &mut self,
        input: &[u8],
        timeout: f64,
    ) -> Result<(Option<Bytes>, Option<Bytes>)> {
        match self.stdin_writer.as_mut() {
            Some(writer) if writer.is_open() => {
                if !input.is_empty() {
                    match writer.write(input) {
                        Ok(_) => (),
                        // the child exited without consuming everything;
                        // not an error
                        Err(PopenError::Io(ref e)) if e.kind() == io::ErrorKind::BrokenPipe => (),
                        Err(e) => return Err(e),
                    }
                }
                writer.close();
            }
            _ => {
                return Err(PopenError::Io(io::Error::other(
                    "stdin is not connected to a pipe",
                )))
            }
        }

        self.wait(timeout)?;

        let stdout_data = match self.stdout_reader.as_mut() {
            Some(reader) if reader.is_open() => {
                let data = reader.read_all()?;
                reader.close();
                Some(data)
            }
            _ => None,
        };
        let stderr_data = match self.stderr_reader.as_mut() {
            Some(reader) if reader.is_open() => {
                let data = reader.read_all()?;
                reader.close();
                Some(data)
            }
            _ => None,
        };
        Ok((stdout_data, stderr_data))
    }

    /// Sends `signal` to the child.
    ///
    /// Once termination has been observed this is a no-op rather than an
    /// error: the PID may already belong to an unrelated process.
    pub fn send_signal(&self, signal: i32) -> Result<()> {
        if self.returncode.is_some() {
            return Ok(());
        }
        posix::kill(self.pid, signal).map_err(|e| PopenError::os(e, "failed to send signal"))
    }

    /// Sends SIGTERM to the child.
    pub fn terminate(&self) -> Result<()> {
        self.send_signal(posix::SIGTERM)
    }

    /// Sends SIGKILL to the child.
    pub fn kill(&self) -> Result<()> {
        self.send_signal(posix::SIGKILL)
    }
}

impl fmt::Debug for Popen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Popen")
            .field("args", &self.args)
            .field("pid", &self.pid)
            .field("returncode", &self.returncode)
            .finish_non_exhaustive()
    }
}

/// Runs in the forked child; returns the errno of the first failure.  On
/// success `execv` does not return.
fn do_child(
    dups: &[Option<RawFd>; 3],
    close_fds: &[RawFd],
    preexec: Option<&mut PreexecFn>,
    argv: &CVec,
) -> i32 {
    fn errno_of(e: io::Error) -> i32 {
        e.raw_os_error().unwrap_or(-1)
    }

    if let Err(e) = posix::reset_sigpipe() {
        return errno_of(e);
    }
    for (target, fd) in dups.iter().enumerate() {
        if let Some(fd) = *fd {
            if let Err(e) = posix::dup2(fd, target as RawFd) {
                return errno_of(e);
            }
        }
    }
    for &fd in close_fds {
        let _ = posix::close(fd);
    }
    if let Some(hook) = preexec {
        if let Err(e) = hook() {
            return errno_of(e);
        }
    }
    errno_of(posix::execv(argv))
}

type ParentEnds = (Vec<Transfer>, Option<Stream>, Option<Stream>, Option<Stream>);

/// Starts a transfer worker for every channel that pairs an in-process
/// stream with a pipe, and hands back the pipe ends the parent keeps.
fn launch_workers(
    mut stdin: StdinRedirect,
    mut stdout: StdoutRedirect,
    mut stderr: StderrRedirect,
) -> Result<ParentEnds> {
    let mut workers = Vec::new();
    let mut stdin_writer = None;
    let mut stdout_reader = None;
    let mut stderr_reader = None;

    match (stdin.source.take(), stdin.pipe_writer.take()) {
        // an in-process source feeds the pipe through a worker
        (Some(source), Some(writer)) => workers.push(comm::communicate_async(source, writer)?),
        (None, Some(writer)) => stdin_writer = Some(writer),
        // a direct descriptor was wired with dup2; our copy closes on drop
        _ => (),
    }
    match (stdout.destination.take(), stdout.pipe_reader.take()) {
        (Some(dest), Some(reader)) => workers.push(comm::communicate_async(reader, dest)?),
        (None, Some(reader)) => stdout_reader = Some(reader),
        _ => (),
    }
    match (stderr.destination.take(), stderr.pipe_reader.take()) {
        (Some(dest), Some(reader)) => workers.push(comm::communicate_async(reader, dest)?),
        (None, Some(reader)) => stderr_reader = Some(reader),
        _ => (),
    }
    if !workers.is_empty() {
        debug!("launched {} transfer worker(s)", workers.len());
    }
    Ok((workers, stdin_writer, stdout_reader, stderr_reader))
}
