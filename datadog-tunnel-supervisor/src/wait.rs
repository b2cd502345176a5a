// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use tracing::error;

/// Terminal state of a supervised child, decoded from the kernel wait
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The child ran to completion and returned this exit code.
    Exited(i32),
    /// The child was killed by an unhandled signal.
    Signaled(Signal),
    /// The wait call itself failed: the pid is unknown, already reaped, or
    /// not a child of this process.
    WaitFailed(Errno),
}

/// Blocks until `pid` reaches a terminal state and decodes it.
///
/// The kernel-side exit status is consumed by a successful call: a handle
/// admits exactly one wait, and every later attempt reports `WaitFailed`.
/// There is no timeout and no cancellation; the only way to unblock a
/// pending wait from outside is to terminate the target, which resolves the
/// wait with the corresponding outcome.
pub fn wait_child(pid: Pid) -> ExitOutcome {
    match waitpid(pid, None) {
        Err(errno) => {
            error!(pid = pid.as_raw(), %errno, "waitpid failed");
            ExitOutcome::WaitFailed(errno)
        }
        Ok(WaitStatus::Exited(_, code)) => ExitOutcome::Exited(code),
        Ok(WaitStatus::Signaled(_, signal, _)) => ExitOutcome::Signaled(signal),
        Ok(status) => {
            // Stopped/continued are not requested from waitpid, so this arm
            // is unreachable short of a kernel-level surprise.
            debug_assert!(false, "unexpected wait status: {status:?}");
            ExitOutcome::WaitFailed(Errno::EINVAL)
        }
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exit code {code}"),
            ExitOutcome::Signaled(signal) => {
                write!(f, "killed by {} ({})", signal.as_str(), *signal as i32)
            }
            ExitOutcome::WaitFailed(errno) => write!(f, "wait failed: {errno}"),
        }
    }
}
