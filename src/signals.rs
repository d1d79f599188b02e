use std::io;

use nix::sys::signal::{kill, signal, SigHandler, Signal};
use nix::unistd::Pid;

/// Signals a host shell commonly ignores; children must get them back.
const JOB_SIGNALS: [Signal; 6] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGPIPE,
];

/// Restore default signal handlers in a freshly forked child.
///
/// Runs between `fork` and `exec`, so it only calls `signal(2)`.
pub fn restore_default() -> io::Result<()> {
    for sig in JOB_SIGNALS {
        unsafe { signal(sig, SigHandler::SigDfl) }.map_err(io::Error::from)?;
    }
    Ok(())
}

/// Ask a process to stop with `SIGTERM`.
pub fn terminate(pid: u32) -> io::Result<()> {
    let pid = i32::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_terminate_stops_sleeping_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        terminate(child.id()).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
