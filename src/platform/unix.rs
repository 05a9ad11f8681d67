use crate::logging::debug;

/// Check whether `pid` names a running process.
///
/// Sends signal 0, which performs the permission and existence checks
/// without delivering anything. EPERM still means the process exists.
pub fn process_alive(pid: u32) -> bool {
    // 0 and values that turn negative as pid_t address process groups
    let Ok(c_pid) = libc::pid_t::try_from(pid) else {
        return true;
    };
    if c_pid <= 0 {
        return true;
    }

    match send_signal(c_pid, 0) {
        Ok(()) => true,
        Err(errno) => {
            if errno != libc::EPERM {
                debug(format!("pid={pid} not alive (errno {errno})"));
            }
            errno == libc::EPERM
        }
    }
}

fn send_signal(pid: libc::pid_t, signal: libc::c_int) -> Result<(), libc::c_int> {
    // SAFETY: kill has no memory-safety preconditions; pid is positive so
    // only that single process is addressed.
    let result = unsafe { libc::kill(pid, signal) };
    if result == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::ESRCH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[test]
    fn test_unprobeable_pids_count_as_alive() {
        assert!(process_alive(0));
        assert!(process_alive(u32::MAX));
    }

    #[test]
    fn test_reaped_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!process_alive(pid));
    }
}
