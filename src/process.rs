//! Process and process-group liveness probes.
//!
//! Liveness is the signal-zero test: delivery of "no signal" succeeds only
//! when the target exists. `EPERM` still means the target exists (it belongs
//! to someone else), so it counts as alive.

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;

/// Whether a process with this PID exists.
pub fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Whether a process group with this PGID has any live member.
pub fn pgid_alive(pgid: i32) -> bool {
    if pgid <= 0 {
        return false;
    }
    match killpg(Pid::from_raw(pgid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Terminate a whole process group, ignoring an already-gone group.
pub fn kill_group(pgid: i32, signal: Signal) {
    if pgid > 0 {
        let _ = killpg(Pid::from_raw(pgid), signal);
    }
}
