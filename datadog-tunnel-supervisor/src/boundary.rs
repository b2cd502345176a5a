// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Integer encoding consumed by the managed caller on the far side of the
//! FFI boundary. The values are load-bearing: deployed callers decode them
//! bit-for-bit, so they must not change.

use crate::wait::ExitOutcome;

/// Sentinel reported when the wait call itself failed.
pub const WAIT_FAILED_CODE: i32 = -999;

/// Offset added to a fatal signal number before negation, keeping the
/// signal range well clear of ordinary negative sentinels.
pub const SIGNAL_CODE_BASE: i32 = 1000;

/// Packs an outcome into the single integer channel: non-negative exit
/// codes pass through unchanged, a fatal signal `s` becomes `-(1000 + s)`,
/// and a failed wait becomes `-999`.
pub fn encode_exit_outcome(outcome: ExitOutcome) -> i32 {
    match outcome {
        ExitOutcome::Exited(code) => code,
        ExitOutcome::Signaled(signal) => -(SIGNAL_CODE_BASE + signal as i32),
        ExitOutcome::WaitFailed(_) => WAIT_FAILED_CODE,
    }
}
