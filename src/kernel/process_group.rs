//! Process-group termination.
//!
//! Sandboxed processes are spawned as leaders of their own process group so a
//! single signal reaches every descendant that stayed in the group.

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag};
use nix::unistd::Pid;

/// What a forced termination reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The whole group was signalled
    Group,
    /// Group signal failed; only the leader was signalled
    LeaderOnly,
    /// Nothing left to signal
    AlreadyGone,
}

/// SIGKILL the group led by `leader`, falling back to the leader alone.
pub fn kill_process_group(leader: u32) -> KillOutcome {
    let pid = Pid::from_raw(leader as i32);
    match killpg(pid, Signal::SIGKILL) {
        Ok(()) => KillOutcome::Group,
        Err(Errno::ESRCH) => KillOutcome::AlreadyGone,
        Err(group_err) => match kill(pid, Signal::SIGKILL) {
            Ok(()) => {
                log::warn!(
                    "group SIGKILL for {} failed ({}), signalled leader only",
                    leader,
                    group_err
                );
                KillOutcome::LeaderOnly
            }
            Err(Errno::ESRCH) => KillOutcome::AlreadyGone,
            Err(e) => {
                log::warn!("failed to SIGKILL process {}: {}", leader, e);
                KillOutcome::AlreadyGone
            }
        },
    }
}

/// Block until `leader` has exited, leaving it unreaped.
///
/// The zombie keeps its pid, and with it the group id, reserved until the
/// caller reaps it, so a sweep issued in between cannot hit a reused group.
pub fn wait_exited_unreaped(leader: u32) -> nix::Result<()> {
    let pid = Pid::from_raw(leader as i32);
    loop {
        match waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT) {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}
