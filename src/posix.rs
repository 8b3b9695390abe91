use std::ffi::{CString, OsStr};
use std::fs::File;
use std::io::{Error, Result};
use std::iter;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::ptr;
use std::time::Duration;

pub use libc::{SIGKILL, SIGTERM};

pub const WNOHANG: i32 = libc::WNOHANG;

fn check_err<T: Ord + Default>(num: T) -> Result<T> {
    if num < T::default() {
        return Err(Error::last_os_error());
    }
    Ok(num)
}

pub fn pipe() -> Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    check_err(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    Ok(unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) })
}

pub fn fork() -> Result<u32> {
    check_err(unsafe { libc::fork() }).map(|pid| pid as u32)
}

pub fn dup2(oldfd: RawFd, newfd: RawFd) -> Result<()> {
    check_err(unsafe { libc::dup2(oldfd, newfd) })?;
    Ok(())
}

pub fn close(fd: RawFd) -> Result<()> {
    check_err(unsafe { libc::close(fd) })?;
    Ok(())
}

pub fn _exit(status: u8) -> ! {
    unsafe { libc::_exit(status as libc::c_int) }
}

/// Write `errno` to `fd` as raw native-endian bytes.  Used by the child to
/// report exec failure; must stay async-signal-safe.
pub fn write_errno(fd: RawFd, errno: i32) {
    let bytes = errno.to_ne_bytes();
    unsafe {
        libc::write(fd, bytes.as_ptr() as *const libc::c_void, bytes.len());
    }
}

fn os_to_cstring(s: &OsStr) -> Result<CString> {
    let bytes = s.as_bytes();
    if bytes.iter().any(|&b| b == 0) {
        return Err(Error::from_raw_os_error(libc::EINVAL));
    }
    // not expected to fail on Unix, as Unix paths *are* C strings
    Ok(CString::new(bytes).expect("converting Unix path to C string"))
}

fn cstring_ptr(s: &CString) -> *const libc::c_char {
    s.as_bytes_with_nul().as_ptr() as _
}

/// A NUL-terminated argument vector in the layout `execv` expects.
///
/// Built in the parent before forking, so the child never allocates.
#[derive(Debug)]
pub struct CVec {
    // Individual C strings.  They are not unused as rustc thinks, they
    // are pointed to by elements of self.ptrs.
    #[allow(dead_code)]
    strings: Vec<CString>,

    // nullptr-terminated vector of pointers into self.strings
    ptrs: Vec<*const libc::c_char>,
}

impl CVec {
    pub fn new<S>(slice: &[S]) -> Result<CVec>
    where
        S: AsRef<OsStr>,
    {
        let strings = slice
            .iter()
            .map(|x| os_to_cstring(x.as_ref()))
            .collect::<Result<Vec<CString>>>()?;
        let ptrs: Vec<_> = strings
            .iter()
            .map(cstring_ptr)
            .chain(iter::once(ptr::null()))
            .collect();
        Ok(CVec { strings, ptrs })
    }

    fn program(&self) -> *const libc::c_char {
        self.ptrs[0]
    }

    fn as_c_vec(&self) -> *const *const libc::c_char {
        self.ptrs.as_ptr()
    }
}

/// Replace the process image; returns only on failure.
pub fn execv(argv: &CVec) -> Error {
    unsafe {
        libc::execv(argv.program(), argv.as_c_vec());
    }
    Error::last_os_error()
}

pub fn wait4(pid: u32, flags: i32) -> Result<(u32, i32, ResourceUsage)> {
    let mut status = 0 as libc::c_int;
    let mut rusage = MaybeUninit::<libc::rusage>::zeroed();
    let waited = check_err(unsafe {
        libc::wait4(
            pid as libc::pid_t,
            &mut status as *mut libc::c_int,
            flags as libc::c_int,
            rusage.as_mut_ptr(),
        )
    })?;
    let rusage = unsafe { rusage.assume_init() };
    Ok((waited as u32, status, ResourceUsage::from_raw(&rusage)))
}

/// Exit code from a wait status word: the exit status for a normal exit,
/// the negated signal number for a signal death, `None` otherwise.
pub fn decode_wait_status(status: i32) -> Option<i32> {
    if libc::WIFEXITED(status) {
        Some(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        Some(-libc::WTERMSIG(status))
    } else {
        None
    }
}

pub fn kill(pid: u32, signal: i32) -> Result<()> {
    check_err(unsafe { libc::kill(pid as libc::pid_t, signal) })?;
    Ok(())
}

/// Access mode of an open descriptor, from its `O_ACCMODE` status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        !matches!(self, Access::Write)
    }

    pub fn writable(self) -> bool {
        !matches!(self, Access::Read)
    }
}

pub fn access_mode(fd: RawFd) -> Result<Access> {
    let flags = check_err(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;
    match flags & libc::O_ACCMODE {
        libc::O_RDONLY => Ok(Access::Read),
        libc::O_WRONLY => Ok(Access::Write),
        libc::O_RDWR => Ok(Access::ReadWrite),
        _ => Err(Error::from_raw_os_error(libc::EINVAL)),
    }
}

pub fn set_cloexec(f: &File) -> Result<()> {
    let fd = f.as_raw_fd();
    let old = check_err(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;
    check_err(unsafe { libc::fcntl(fd, libc::F_SETFD, old | libc::FD_CLOEXEC) })?;
    Ok(())
}

/// Restore default SIGPIPE handling and clear the signal mask.
///
/// Called in the child after forking.  libstd ignores SIGPIPE and
/// signal-handling libraries often set a mask; child processes inherit
/// both, and most Unix programs do not reset them on their own.
pub fn reset_sigpipe() -> Result<()> {
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::uninit();
        check_err(libc::sigemptyset(set.as_mut_ptr()))?;
        let rc = libc::pthread_sigmask(libc::SIG_SETMASK, set.as_ptr(), ptr::null_mut());
        if rc != 0 {
            return Err(Error::from_raw_os_error(rc));
        }
        if libc::signal(libc::SIGPIPE, libc::SIG_DFL) == libc::SIG_ERR {
            return Err(Error::last_os_error());
        }
    }
    Ok(())
}

/// Resource usage of a terminated child, captured by `wait4`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    /// Time spent executing user code.
    pub user_time: Duration,
    /// Time spent in the kernel on behalf of the process.
    pub system_time: Duration,
    /// Peak resident set size, in the platform's `ru_maxrss` units
    /// (kilobytes on Linux).
    pub max_rss: i64,
}

impl ResourceUsage {
    fn from_raw(rusage: &libc::rusage) -> ResourceUsage {
        fn timeval(tv: libc::timeval) -> Duration {
            Duration::new(tv.tv_sec.max(0) as u64, tv.tv_usec.max(0) as u32 * 1000)
        }
        ResourceUsage {
            user_time: timeval(rusage.ru_utime),
            system_time: timeval(rusage.ru_stime),
            max_rss: rusage.ru_maxrss as i64,
        }
    }
}
