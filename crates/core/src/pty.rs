// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY allocation and non-blocking master I/O.
//!
//! The child is spawned on the slave end with its own session (`setsid`),
//! the slave as controlling terminal, and — on Linux — SIGTERM requested on
//! parent death. Closing the master delivers SIGHUP to the foreground
//! process group.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use std::process::Stdio;

use anyhow::Context;
use nix::libc;
use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::unix::AsyncFd;
use tokio::process::{Child, Command};

/// Newtype around the master `OwnedFd` for use with `AsyncFd`.
#[derive(Debug)]
struct MasterFd(OwnedFd);

impl AsRawFd for MasterFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

/// A spawned PTY child and its master side.
pub struct Pty {
    master: AsyncFd<MasterFd>,
    child_pid: Pid,
}

impl std::fmt::Debug for Pty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pty").field("child_pid", &self.child_pid).finish()
    }
}

impl Pty {
    /// Spawn `argv` on a fresh PTY with the given dimensions.
    ///
    /// `argv` must have at least one element. The child inherits the parent
    /// environment with `env` overlaid and `TERM` set.
    // pre_exec and the session-setup ioctls require unsafe
    #[allow(unsafe_code)]
    pub fn spawn(
        argv: &[String],
        workdir: &Path,
        env: &[(String, String)],
        term: &str,
        cols: u16,
        rows: u16,
    ) -> anyhow::Result<(Self, Child)> {
        anyhow::ensure!(!argv.is_empty(), "pty spawn requires a non-empty argv");

        let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        let OpenptyResult { master, slave } = openpty(&winsize, None).context("openpty")?;

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(workdir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("TERM", term)
            .stdin(Stdio::from(slave.try_clone().context("dup pty slave")?))
            .stdout(Stdio::from(slave.try_clone().context("dup pty slave")?))
            .stderr(Stdio::from(slave));

        // SAFETY: child_session_setup only calls async-signal-safe functions.
        unsafe {
            cmd.pre_exec(child_session_setup);
        }

        let child = cmd.spawn().context("spawn pty child")?;
        let child_pid = child
            .id()
            .map(|id| Pid::from_raw(id as i32))
            .context("pty child has no pid")?;

        set_nonblocking(&master)?;
        let master = AsyncFd::new(MasterFd(master)).context("register pty master")?;

        Ok((Self { master, child_pid }, child))
    }

    pub fn child_pid(&self) -> i32 {
        self.child_pid.as_raw()
    }

    /// Read one chunk from the master. Returns 0 at EOF.
    ///
    /// An `EIO` after the child exits is normal on Linux and is mapped to an
    /// EOF-style `Ok(0)` by the caller's loop, not here.
    #[allow(unsafe_code)]
    pub async fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.master.readable().await?;
            let result = guard.try_io(|inner| {
                let fd = inner.as_raw_fd();
                // SAFETY: buf is valid for writes of buf.len() bytes.
                let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match result {
                Ok(io_result) => return io_result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write all bytes to the master.
    #[allow(unsafe_code)]
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            let mut guard = self.master.writable().await?;
            let result = guard.try_io(|inner| {
                let fd = inner.as_raw_fd();
                let rest = &data[offset..];
                // SAFETY: rest is valid for reads of rest.len() bytes.
                let n = unsafe { libc::write(fd, rest.as_ptr().cast(), rest.len()) };
                if n < 0 {
                    Err(io::Error::last_os_error())
                } else {
                    Ok(n as usize)
                }
            });
            match result {
                Ok(Ok(n)) => offset += n,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Resize the PTY. The kernel delivers SIGWINCH to the child.
    #[allow(unsafe_code)]
    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        // SAFETY: TIOCSWINSZ with a properly initialised Winsize.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            anyhow::bail!("TIOCSWINSZ failed: {}", io::Error::last_os_error());
        }
        Ok(())
    }

    /// Deliver a signal to the child process.
    pub fn signal(&self, sig: Signal) -> anyhow::Result<()> {
        kill(self.child_pid, sig).context("kill pty child")
    }

    /// Deliver a signal to the child's whole process group.
    pub fn signal_group(&self, sig: Signal) -> anyhow::Result<()> {
        kill(Pid::from_raw(-self.child_pid.as_raw()), sig).context("kill pty process group")
    }
}

/// Whether a read error means the PTY is gone (child exited, master closed).
pub fn is_pty_closed(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EIO)
}

/// Post-fork, pre-exec child setup: new session, controlling tty, and (on
/// Linux) SIGTERM on parent death.
#[allow(unsafe_code)]
fn child_session_setup() -> io::Result<()> {
    // SAFETY: setsid/ioctl/prctl are async-signal-safe syscalls.
    unsafe {
        if libc::setsid() < 0 {
            return Err(io::Error::last_os_error());
        }
        // stdin already is the PTY slave; adopt it as controlling tty.
        if libc::ioctl(0, libc::TIOCSCTTY as _, 0) < 0 {
            return Err(io::Error::last_os_error());
        }
        #[cfg(target_os = "linux")]
        {
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
        }
    }
    Ok(())
}

/// Set the file descriptor to non-blocking mode.
#[allow(unsafe_code)]
fn set_nonblocking(fd: &impl AsRawFd) -> anyhow::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: plain fcntl flag manipulation on an owned descriptor.
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags < 0 {
        anyhow::bail!("F_GETFL failed: {}", io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        anyhow::bail!("F_SETFL failed: {}", io::Error::last_os_error());
    }
    Ok(())
}
