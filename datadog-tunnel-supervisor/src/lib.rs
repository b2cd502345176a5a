// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg(unix)]

//! Supervision core for a tunnel bridge child process.
//!
//! Three independent operations share a process identifier: spawning the
//! bridge with an inherited descriptor remapped onto a fixed slot and its
//! console output captured to a log file ([`TunnelCommand`]), blocking until
//! it reaches a terminal state ([`wait_child`]), and two-phase shutdown that
//! escalates from graceful to forced ([`terminate`]). [`Supervisor`]
//! optionally serializes
//! handle ownership for callers that share pids across threads, and
//! [`boundary`] holds the packed integer encoding the pre-existing managed
//! caller consumes.
//!
//! Every pid returned by a spawn must eventually reach exactly one terminal
//! wait — a direct [`wait_child`] or the reap attempt inside [`terminate`] —
//! or its process-table entry is leaked until this process exits.

mod exec;
mod registry;
mod spawn;
mod terminate;
mod wait;

pub mod boundary;

pub use exec::{PreparedExec, PreparedExecError};
pub use registry::{Supervisor, SupervisorError};
pub use spawn::{
    SpawnError, TunnelChild, TunnelCommand, EXEC_FAILED_EXIT_CODE, REMAP_FAILED_EXIT_CODE,
};
pub use terminate::{
    is_alive, reap_nonblocking, terminate, terminate_deferred, terminate_with_grace, KillTimer,
    DEFAULT_GRACE_PERIOD,
};
pub use wait::{wait_child, ExitOutcome};
