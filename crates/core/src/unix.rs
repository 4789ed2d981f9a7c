// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-group plumbing shared by the pipe-based runners.

use std::io;
use std::process::ExitStatus;

use nix::libc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Arrange for the child to become its own process group leader, so the
/// whole descendant tree can be signalled with `kill(-pid)`. On Linux the
/// child additionally receives SIGTERM if this process dies first.
#[allow(unsafe_code)]
pub fn own_process_group(cmd: &mut tokio::process::Command) {
    // SAFETY: the closure only calls async-signal-safe functions.
    unsafe {
        cmd.pre_exec(group_leader_setup);
    }
}

#[allow(unsafe_code)]
fn group_leader_setup() -> io::Result<()> {
    // SAFETY: setpgid/prctl are async-signal-safe syscalls.
    unsafe {
        if libc::setpgid(0, 0) != 0 {
            return Err(io::Error::last_os_error());
        }
        #[cfg(target_os = "linux")]
        {
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
        }
    }
    Ok(())
}

/// Signal a whole process group; falls back to the single process when the
/// group is already gone.
pub fn signal_group(pid: i32, sig: Signal) {
    if kill(Pid::from_raw(-pid), sig).is_err() {
        let _ = kill(Pid::from_raw(pid), sig);
    }
}

/// Signal a single process.
pub fn signal_pid(pid: i32, sig: Signal) {
    let _ = kill(Pid::from_raw(pid), sig);
}

/// Whether a process with the given pid still exists.
pub fn is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Map an exit status to the conventional shell code: the verbatim exit
/// code, or `128 + signal` for signal deaths.
pub fn exit_code_of(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}
