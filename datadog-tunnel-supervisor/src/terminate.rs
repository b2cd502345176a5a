// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Grace window between the polite and the forced phase of [`terminate`].
/// Existing callers depend on this exact duration; entry points that want a
/// different window take it explicitly.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_millis(500);

/// Two-phase shutdown with the contract grace period.
pub fn terminate(pid: Pid) {
    terminate_with_grace(pid, DEFAULT_GRACE_PERIOD)
}

/// SIGTERM, wait out `grace` on the calling thread, SIGKILL regardless, then
/// one attempt to reap the zombie.
///
/// Best effort throughout: a non-positive pid is a no-op, signals to an
/// already-exited child are harmless and ignored, and a child that has not
/// become reapable by the time of the reap attempt is left to the caller's
/// own wait. No outcome is reported; callers that need one must wait
/// themselves, accepting that this call's reap may have consumed it first.
pub fn terminate_with_grace(pid: Pid, grace: Duration) {
    if pid.as_raw() <= 0 {
        return;
    }
    let _ = kill(pid, Signal::SIGTERM);
    thread::sleep(grace);
    force_kill_and_reap(pid);
}

fn force_kill_and_reap(pid: Pid) {
    let _ = kill(pid, Signal::SIGKILL);
    match reap_nonblocking(pid) {
        Ok(reaped) => debug!(pid = pid.as_raw(), reaped, "forced termination"),
        Err(errno) => debug!(pid = pid.as_raw(), %errno, "reap after forced termination failed"),
    }
}

/// Single non-blocking reap attempt.
///
/// `Ok(true)` means the terminal status was consumed here. `Ok(false)` means
/// the child is still running, or there was nothing of ours to reap
/// (ECHILD): another wait got there first.
pub fn reap_nonblocking(pid: Pid) -> Result<bool, Errno> {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => Ok(false),
        Ok(_) => Ok(true),
        Err(Errno::ECHILD) => Ok(false),
        Err(errno) => Err(errno),
    }
}

/// Signal-0 liveness probe.
///
/// Useful right after a spawn to catch a bridge that died on startup before
/// anything has read its log. A zombie still counts as alive until it is
/// reaped.
pub fn is_alive(pid: Pid) -> bool {
    pid.as_raw() > 0 && kill(pid, None).is_ok()
}

/// Forced-termination phase scheduled off the calling thread.
///
/// Armed by [`terminate_deferred`]. When the grace period lapses the timer
/// thread delivers SIGKILL and attempts a non-blocking reap; cancelling
/// first disarms the forced phase entirely. Dropping the handle without
/// calling either also disarms it, so hold on to the timer until the child's
/// fate is decided.
#[derive(Debug)]
pub struct KillTimer {
    disarm: Sender<()>,
    thread: JoinHandle<()>,
}

impl KillTimer {
    /// Disarms the forced phase, e.g. after the caller's own wait observed
    /// the child exiting within the grace period.
    pub fn cancel(self) {
        let _ = self.disarm.send(());
        let _ = self.thread.join();
    }

    /// Blocks until the timer fired or was disarmed.
    pub fn join(self) {
        let _ = self.thread.join();
    }
}

/// The deferred flavor of [`terminate_with_grace`]: SIGTERM is sent
/// immediately on the calling thread, and the SIGKILL-plus-reap phase runs
/// on a named timer thread once `grace` lapses, unless the returned
/// [`KillTimer`] is cancelled first.
///
/// The timer thread's reap can race a concurrent [`wait_child`] on the same
/// pid; the kernel hands the terminal status to exactly one of them and the
/// other observes ECHILD.
///
/// [`wait_child`]: crate::wait_child
pub fn terminate_deferred(pid: Pid, grace: Duration) -> io::Result<KillTimer> {
    if pid.as_raw() > 0 {
        let _ = kill(pid, Signal::SIGTERM);
    }
    let (disarm, deadline) = mpsc::channel();
    let thread = thread::Builder::new()
        .name("tunnel-kill-timer".into())
        .spawn(move || {
            if deadline.recv_timeout(grace) == Err(RecvTimeoutError::Timeout) && pid.as_raw() > 0 {
                force_kill_and_reap(pid);
            }
        })?;
    Ok(KillTimer { disarm, thread })
}
