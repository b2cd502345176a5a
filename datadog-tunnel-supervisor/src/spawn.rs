// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::exec::{PreparedExec, PreparedExecError};
use crate::terminate::{terminate, terminate_with_grace};
use crate::wait::{wait_child, ExitOutcome};
use nix::errno::Errno;
use nix::unistd::Pid;
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Exit status of a child whose descriptor remap failed before exec.
pub const REMAP_FAILED_EXIT_CODE: i32 = 126;

/// Exit status of a child whose image replacement failed.
pub const EXEC_FAILED_EXIT_CODE: i32 = 127;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error(transparent)]
    Prepare(#[from] PreparedExecError),
    #[error("Failed to convert log path to CString: {0}")]
    LogPath(std::ffi::NulError),
    #[error("Failed to fork tunnel child: {0}")]
    Fork(#[source] std::io::Error),
}

enum Fork {
    Parent(libc::pid_t),
    Child,
}

/// # Safety
///
/// When forking a multithreaded process, nothing between this call and exec
/// may allocate or take locks in the child: another thread may have held the
/// allocator lock at the fork point, and in the child it will never release
/// it.
unsafe fn fork() -> Result<Fork, std::io::Error> {
    match libc::fork() {
        -1 => Err(std::io::Error::last_os_error()),
        0 => Ok(Fork::Child),
        pid => Ok(Fork::Parent(pid)),
    }
}

/// Builder for the tunnel bridge child process.
///
/// The bridge consumes a pre-opened endpoint through a fixed descriptor
/// slot, so plain `std::process::Command` is not enough: the inherited
/// descriptor must be duplicated onto the slot number the bridge was told to
/// use, between fork and exec.
///
/// ```no_run
/// use datadog_tunnel_supervisor::TunnelCommand;
///
/// let child = TunnelCommand::new("/data/app/lib/bridge")
///     .args(["-device", "fd://3", "-loglevel", "info"])
///     .pass_fd(10, 3)
///     .log_file("/data/app/files/bridge.log")
///     .spawn()?;
/// # Ok::<(), datadog_tunnel_supervisor::SpawnError>(())
/// ```
#[derive(Debug, Clone)]
pub struct TunnelCommand {
    path: String,
    process_name: Option<String>,
    args: Vec<String>,
    remap: Option<(RawFd, RawFd)>,
    log_path: Option<PathBuf>,
}

impl TunnelCommand {
    pub fn new<S: Into<String>>(path: S) -> Self {
        Self {
            path: path.into(),
            process_name: None,
            args: vec![],
            remap: None,
            log_path: None,
        }
    }

    /// Overrides argv[0], which otherwise repeats the executable path.
    pub fn process_name<S: Into<String>>(&mut self, process_name: S) -> &mut Self {
        self.process_name = Some(process_name.into());
        self
    }

    pub fn arg<S: Into<String>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Duplicates `inherited` onto descriptor `slot` in the child before
    /// exec, then closes the original there. The parent's copy of
    /// `inherited` is untouched and remains the caller's to close.
    pub fn pass_fd(&mut self, inherited: RawFd, slot: RawFd) -> &mut Self {
        self.remap = Some((inherited, slot));
        self
    }

    /// Captures the child's stdout and stderr into `path`, truncating any
    /// previous contents when the child starts.
    pub fn log_file<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.log_path = Some(path.as_ref().to_path_buf());
        self
    }

    fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(
            self.process_name
                .clone()
                .unwrap_or_else(|| self.path.clone()),
        );
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Forks and execs the bridge, returning its handle.
    ///
    /// Only marshalling and fork failures surface here. A nonexistent or
    /// non-executable target is a child-side failure: it shows up as exit
    /// status 127 from [`TunnelChild::wait`] plus a diagnostic line in the
    /// log file, never as an error from this call.
    pub fn spawn(&self) -> Result<TunnelChild, SpawnError> {
        let prepared = PreparedExec::new(&self.path, &self.argv())?;
        let log_path = match &self.log_path {
            Some(path) => {
                Some(CString::new(path.as_os_str().as_bytes()).map_err(SpawnError::LogPath)?)
            }
            None => None,
        };
        let remap = self.remap;

        // No allocations in the child process should happen past this point.
        match unsafe { fork() }.map_err(SpawnError::Fork)? {
            Fork::Parent(pid) => {
                debug!(pid, path = self.path.as_str(), "spawned tunnel child");
                Ok(TunnelChild {
                    pid: Pid::from_raw(pid),
                })
            }
            Fork::Child => run_tunnel_child(&prepared, log_path.as_deref(), remap),
        }
    }
}

/// Child branch between fork and exec. Raw libc only; see the safety note on
/// [`fork`].
fn run_tunnel_child(
    prepared: &PreparedExec,
    log_path: Option<&CStr>,
    remap: Option<(RawFd, RawFd)>,
) -> ! {
    if let Some((inherited, slot)) = remap {
        if inherited != slot {
            if unsafe { libc::dup2(inherited, slot) } < 0 {
                write_child_diag(log_path, libc::O_TRUNC, b"dup2 failed", Errno::last_raw());
                unsafe { libc::_exit(REMAP_FAILED_EXIT_CODE) };
            }
            unsafe { libc::close(inherited) };
        }
    }

    if let Some(path) = log_path {
        let logfd = unsafe {
            libc::open(
                path.as_ptr(),
                libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
                0o644 as libc::c_uint,
            )
        };
        // A log that cannot be opened loses the redirection, nothing else.
        if logfd >= 0 {
            unsafe {
                libc::dup2(logfd, libc::STDOUT_FILENO);
                libc::dup2(logfd, libc::STDERR_FILENO);
                libc::close(logfd);
            }
        }
    }

    let errno = prepared.exec();
    write_child_diag(log_path, libc::O_APPEND, b"exec failed", errno as i32);
    unsafe { libc::_exit(EXEC_FAILED_EXIT_CODE) }
}

/// Writes one `<what>: <strerror> (errno=<n>)` line into the log, assembled
/// in a stack buffer. Runs post-fork, so: no heap, no locks, libc only.
fn write_child_diag(log_path: Option<&CStr>, open_disposition: libc::c_int, what: &[u8], errno: i32) {
    fn push(buf: &mut [u8; 256], len: &mut usize, bytes: &[u8]) {
        let n = bytes.len().min(buf.len() - *len);
        buf[*len..*len + n].copy_from_slice(&bytes[..n]);
        *len += n;
    }

    let path = match log_path {
        Some(path) => path,
        None => return,
    };
    let fd = unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_WRONLY | libc::O_CREAT | open_disposition,
            0o644 as libc::c_uint,
        )
    };
    if fd < 0 {
        return;
    }

    let mut buf = [0u8; 256];
    let mut len = 0usize;
    push(&mut buf, &mut len, what);
    push(&mut buf, &mut len, b": ");
    let msg = unsafe { libc::strerror(errno) };
    if !msg.is_null() {
        push(&mut buf, &mut len, unsafe { CStr::from_ptr(msg) }.to_bytes());
    }
    push(&mut buf, &mut len, b" (errno=");
    let mut digits = [0u8; 12];
    let mut i = digits.len();
    if errno < 0 {
        push(&mut buf, &mut len, b"-");
    }
    let mut value = (errno as i64).unsigned_abs();
    loop {
        i -= 1;
        digits[i] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    push(&mut buf, &mut len, &digits[i..]);
    push(&mut buf, &mut len, b")\n");

    unsafe {
        libc::write(fd, buf.as_ptr().cast(), len);
        libc::close(fd);
    }
}

/// Handle to a spawned bridge process.
///
/// The terminal operations consume `self`: the kernel-side exit status can
/// be collected exactly once, and the ownership move keeps a second wait on
/// the same handle from compiling.
#[derive(Debug)]
pub struct TunnelChild {
    pid: Pid,
}

impl TunnelChild {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Releases the handle to callers that track the raw pid themselves,
    /// e.g. across an FFI boundary. Such callers take over the obligation to
    /// wait exactly once.
    pub fn into_pid(self) -> Pid {
        self.pid
    }

    /// Blocks until the child reaches a terminal state. See [`wait_child`].
    pub fn wait(self) -> ExitOutcome {
        wait_child(self.pid)
    }

    /// Two-phase shutdown with the contract grace period. See [`terminate`].
    pub fn terminate(self) {
        terminate(self.pid)
    }

    /// Two-phase shutdown with an explicit grace period.
    pub fn terminate_with_grace(self, grace: Duration) {
        terminate_with_grace(self.pid, grace)
    }
}
