use std::io;
use std::process::ExitStatus;

use tokio::process::{Child, Command};

#[cfg(unix)]
pub(super) fn apply_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(super) fn apply_process_group(_cmd: &mut Command) {}

/// Sends `SIGKILL` to the process group led by the fragment's shell.
///
/// `pgid` is the pid recorded at spawn. The group id stays reserved while any
/// member is alive, so it still reaches background jobs after the shell itself
/// has been reaped; an empty group reports `ESRCH`, which counts as done.
#[cfg(unix)]
pub(super) fn kill_process_group(child: &mut Child, pgid: Option<u32>) -> io::Result<()> {
    let Some(pgid) = pgid else {
        return Ok(());
    };
    let pgid = i32::try_from(pgid).map_err(|_| io::Error::other("pid out of range"))?;
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    let _ = child.start_kill();
    Ok(())
}

#[cfg(not(unix))]
pub(super) fn kill_process_group(child: &mut Child, _pgid: Option<u32>) -> io::Result<()> {
    match child.start_kill() {
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => Ok(()),
        other => other,
    }
}

/// Exit caused by `SIGKILL`, whoever sent it.
#[cfg(unix)]
pub(super) fn killed_by_signal(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(libc::SIGKILL)
}

#[cfg(not(unix))]
pub(super) fn killed_by_signal(_status: &ExitStatus) -> bool {
    false
}

pub(super) fn describe_exit(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit status {code}"),
        None => status.to_string(),
    }
}
