// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0
// Integration tests driving real system binaries through the supervision
// core: spawn with descriptor remap and log capture, wait, terminate.

#![cfg(unix)]

use datadog_tunnel_supervisor::boundary::encode_exit_outcome;
use datadog_tunnel_supervisor::{
    is_alive, terminate, terminate_deferred, terminate_with_grace, wait_child, ExitOutcome,
    Supervisor, SupervisorError, TunnelCommand, DEFAULT_GRACE_PERIOD, EXEC_FAILED_EXIT_CODE,
    REMAP_FAILED_EXIT_CODE,
};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use std::fs;
use std::io::Read;
use std::os::unix::io::{FromRawFd, RawFd};
use std::time::{Duration, Instant};

#[test]
fn exit_code_passes_through() {
    let child = TunnelCommand::new("/bin/sh")
        .args(["-c", "exit 42"])
        .spawn()
        .expect("spawn failed");
    assert_eq!(child.wait(), ExitOutcome::Exited(42));
}

#[test]
fn missing_binary_exits_127_with_log_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("bridge.log");

    let child = TunnelCommand::new("/nonexistent/tunnel-bridge")
        .log_file(&log)
        .spawn()
        .expect("fork itself must succeed");
    assert_eq!(child.wait(), ExitOutcome::Exited(EXEC_FAILED_EXIT_CODE));

    let contents = fs::read_to_string(&log).unwrap();
    assert!(contents.contains("exec failed"), "log: {contents:?}");
    assert!(
        contents.contains("No such file or directory"),
        "log: {contents:?}"
    );
    assert!(contents.contains("(errno=2)"), "log: {contents:?}");
}

#[test]
fn argv_round_trips_through_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("args.log");
    // Stale content longer than the expected output, to prove the child
    // truncates rather than appends.
    fs::write(&log, "stale content that must disappear entirely\n").unwrap();

    let child = TunnelCommand::new("/bin/sh")
        .args([
            "-c",
            r#"printf '%s\n' "$@""#,
            "sh",
            "first",
            "arg with spaces",
            "",
            "last",
        ])
        .log_file(&log)
        .spawn()
        .unwrap();
    assert_eq!(child.wait(), ExitOutcome::Exited(0));

    let contents = fs::read_to_string(&log).unwrap();
    assert_eq!(contents, "first\narg with spaces\n\nlast\n");
}

#[test]
fn inherited_descriptor_is_remapped_onto_the_slot() {
    let mut pipe_fds = [0 as RawFd; 2];
    assert_eq!(unsafe { libc::pipe(pipe_fds.as_mut_ptr()) }, 0, "pipe failed");
    let (read_fd, write_fd) = (pipe_fds[0], pipe_fds[1]);
    // Keep the write end out of unrelated children forked by parallel tests;
    // the dup2 onto the slot clears the flag on the child's copy.
    unsafe { libc::fcntl(write_fd, libc::F_SETFD, libc::FD_CLOEXEC) };

    let child = TunnelCommand::new("/bin/sh")
        .args(["-c", "echo tunneled >&7"])
        .pass_fd(write_fd, 7)
        .spawn()
        .unwrap();

    // The child owns its copy now; closing ours must not disturb it.
    unsafe { libc::close(write_fd) };

    let mut output = Vec::new();
    let mut reader = unsafe { fs::File::from_raw_fd(read_fd) };
    reader.read_to_end(&mut output).unwrap();
    assert_eq!(String::from_utf8_lossy(&output), "tunneled\n");
    assert_eq!(child.wait(), ExitOutcome::Exited(0));
}

#[test]
fn failed_remap_exits_126_with_log_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("remap.log");

    // fd 971 is comfortably above anything this test process has open.
    let child = TunnelCommand::new("/bin/sh")
        .args(["-c", ":"])
        .pass_fd(971, 7)
        .log_file(&log)
        .spawn()
        .unwrap();
    assert_eq!(child.wait(), ExitOutcome::Exited(REMAP_FAILED_EXIT_CODE));

    let contents = fs::read_to_string(&log).unwrap();
    assert!(contents.contains("dup2 failed"), "log: {contents:?}");
    assert!(contents.contains("(errno=9)"), "log: {contents:?}");
}

#[test]
fn fatal_signal_is_reported_and_encoded() {
    let child = TunnelCommand::new("/bin/sh")
        .args(["-c", "kill -KILL $$"])
        .spawn()
        .unwrap();
    let outcome = child.wait();
    assert_eq!(outcome, ExitOutcome::Signaled(Signal::SIGKILL));
    assert_eq!(encode_exit_outcome(outcome), -1009);
}

#[test]
fn terminate_reaps_a_sleeping_child() {
    let child = TunnelCommand::new("/bin/sleep").args(["30"]).spawn().unwrap();
    let pid = child.into_pid();
    assert!(is_alive(pid));

    let started = Instant::now();
    terminate(pid);
    assert!(started.elapsed() >= DEFAULT_GRACE_PERIOD);

    // The zombie was collected inside terminate, so the status is gone and
    // the liveness probe no longer sees the pid.
    assert_eq!(wait_child(pid), ExitOutcome::WaitFailed(Errno::ECHILD));
    assert!(!is_alive(pid));
}

#[test]
fn terminate_on_an_already_reaped_pid_is_a_noop() {
    let child = TunnelCommand::new("/bin/sh").args(["-c", ":"]).spawn().unwrap();
    let pid = child.into_pid();
    assert_eq!(wait_child(pid), ExitOutcome::Exited(0));

    // Handle already consumed; both phases and the reap must tolerate it.
    terminate_with_grace(pid, Duration::from_millis(50));
}

#[test]
fn kill_timer_escalates_when_graceful_shutdown_is_ignored() {
    let child = TunnelCommand::new("/bin/sh")
        .args(["-c", "trap '' TERM; sleep 30"])
        .spawn()
        .unwrap();
    let pid = child.pid();

    let timer = terminate_deferred(pid, Duration::from_millis(200)).unwrap();
    let outcome = child.wait();
    // The timer thread's reap may win the race against this wait; the kernel
    // hands the terminal status to exactly one of the two.
    assert!(
        outcome == ExitOutcome::Signaled(Signal::SIGKILL)
            || outcome == ExitOutcome::WaitFailed(Errno::ECHILD),
        "unexpected outcome: {outcome:?}"
    );
    timer.join();
}

#[test]
fn kill_timer_cancelled_after_a_voluntary_exit_never_fires() {
    let child = TunnelCommand::new("/bin/sleep").args(["30"]).spawn().unwrap();
    let pid = child.pid();

    // sleep dies on the phase-1 SIGTERM well inside the generous grace.
    let timer = terminate_deferred(pid, Duration::from_secs(30)).unwrap();
    assert_eq!(child.wait(), ExitOutcome::Signaled(Signal::SIGTERM));

    let started = Instant::now();
    timer.cancel();
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn supervisor_admits_exactly_one_terminal_operation_per_handle() {
    let supervisor = Supervisor::new();
    let mut command = TunnelCommand::new("/bin/sh");
    command.args(["-c", "exit 3"]);

    let pid = supervisor.spawn(&command).unwrap();
    assert!(supervisor.is_supervised(pid));

    assert_eq!(supervisor.wait(pid), Ok(ExitOutcome::Exited(3)));
    assert!(!supervisor.is_supervised(pid));
    assert_eq!(
        supervisor.wait(pid),
        Err(SupervisorError::UnknownProcess(pid.as_raw()))
    );
    assert_eq!(
        supervisor.terminate(pid, Duration::from_millis(10)),
        Err(SupervisorError::UnknownProcess(pid.as_raw()))
    );
}

#[test]
fn supervisor_terminate_claims_the_handle() {
    let supervisor = Supervisor::new();
    let mut command = TunnelCommand::new("/bin/sleep");
    command.arg("30");

    let pid = supervisor.spawn(&command).unwrap();
    assert_eq!(supervisor.terminate(pid, Duration::from_millis(50)), Ok(()));
    assert_eq!(
        supervisor.wait(pid),
        Err(SupervisorError::UnknownProcess(pid.as_raw()))
    );
}
