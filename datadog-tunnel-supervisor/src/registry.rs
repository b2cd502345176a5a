// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::spawn::{SpawnError, TunnelCommand};
use crate::terminate::terminate_with_grace;
use crate::wait::{wait_child, ExitOutcome};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Arena of live child handles.
///
/// The raw spawn/wait/terminate calls do not serialize access to a pid;
/// callers that share handles across threads can route them through a
/// `Supervisor` instead, which claims a pid out of the arena before any
/// terminal operation so each handle admits exactly one.
#[derive(Debug, Default)]
pub struct Supervisor {
    live: Mutex<HashSet<i32>>,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    #[error("process {0} is not supervised here (never spawned, or already claimed)")]
    UnknownProcess(i32),
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns through `command` and registers the child in the arena.
    pub fn spawn(&self, command: &TunnelCommand) -> Result<Pid, SpawnError> {
        let pid = command.spawn()?.into_pid();
        self.live.lock().unwrap().insert(pid.as_raw());
        Ok(pid)
    }

    /// Claims the handle and blocks for its terminal state.
    pub fn wait(&self, pid: Pid) -> Result<ExitOutcome, SupervisorError> {
        self.claim(pid)?;
        Ok(wait_child(pid))
    }

    /// Claims the handle and runs the two-phase shutdown, reap attempt
    /// included. If that reap attempt loses the race with process death the
    /// zombie stays in the process table; a direct [`wait_child`] on the pid
    /// remains possible for callers that keep the raw value around.
    pub fn terminate(&self, pid: Pid, grace: Duration) -> Result<(), SupervisorError> {
        self.claim(pid)?;
        terminate_with_grace(pid, grace);
        Ok(())
    }

    pub fn is_supervised(&self, pid: Pid) -> bool {
        self.live.lock().unwrap().contains(&pid.as_raw())
    }

    fn claim(&self, pid: Pid) -> Result<(), SupervisorError> {
        if self.live.lock().unwrap().remove(&pid.as_raw()) {
            debug!(pid = pid.as_raw(), "claimed supervised process");
            Ok(())
        } else {
            Err(SupervisorError::UnknownProcess(pid.as_raw()))
        }
    }
}
