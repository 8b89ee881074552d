use crate::pw::log::EventLog;
use std::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    Stopped,
}

/// Classify a PID from the process table. An absent /proc entry is the normal
/// "process exited" signal, not an error; zombies count as exited because the
/// supervisor reaps its own children. A suspended process (stopped by signal)
/// is alive: it is reported RUNNING with a warning and is not auto-restarted.
pub fn probe(log: &EventLog, pid: i32) -> Liveness {
    match read_stat_state(pid) {
        None => Liveness::Stopped,
        Some('Z') | Some('X') | Some('x') => Liveness::Stopped,
        Some('T') | Some('t') => {
            log.warn(
                "probe",
                format!("pid={pid} state=suspended (stopped by signal, still alive)"),
            );
            Liveness::Running
        }
        Some(_) => Liveness::Running,
    }
}

fn read_stat_state(pid: i32) -> Option<char> {
    if pid <= 0 {
        return None;
    }
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The comm field may itself contain spaces and parens; the state char is
    // the first field after the last ')'.
    let rparen = stat.rfind(')')?;
    let after = stat.get(rparen + 2..)?;
    after.chars().next()
}

/// Short executable name, as the kernel records it. Used to tell a genuine
/// competing supervisor apart from an unrelated process that reused the PID.
pub fn comm_of(pid: i32) -> Option<String> {
    if pid <= 0 {
        return None;
    }
    let s = fs::read_to_string(format!("/proc/{pid}/comm")).ok()?;
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn own_pid_is_running() {
        let log = EventLog::stderr_only();
        let pid = std::process::id() as i32;
        assert_eq!(probe(&log, pid), Liveness::Running);
    }

    #[test]
    fn absent_pid_is_stopped() {
        let log = EventLog::stderr_only();
        // PID_MAX_LIMIT is 2^22; nothing can sit above it.
        assert_eq!(probe(&log, 0x7f00_0000), Liveness::Stopped);
        assert_eq!(probe(&log, -1), Liveness::Stopped);
    }

    #[test]
    fn unreaped_child_is_stopped() {
        let log = EventLog::stderr_only();
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        // Give it a moment to exit; it stays a zombie until waited on.
        std::thread::sleep(std::time::Duration::from_millis(200));
        assert_eq!(probe(&log, pid), Liveness::Stopped);
        let _ = child.wait();
    }

    #[test]
    fn comm_of_known_process() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let pid = child.id() as i32;
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert_eq!(comm_of(pid).as_deref(), Some("sleep"));
        let _ = child.kill();
        let _ = child.wait();
    }
}
