use crate::pw::channel::{CommandChannel, FileChannel};
use crate::pw::counters::{Counter, CounterStore};
use crate::pw::guard;
use crate::pw::log::EventLog;
use crate::pw::probe::{self, Liveness};
use crate::pw::store::{self, StateStore};
use std::path::Path;

/// One-shot operator commands. They talk to the supervisor only through the
/// shared files: markers are the writes, records and counters the reads.
/// Every outcome (including a rejection) is a plain text response.

pub fn do_start(dir: &Path) -> String {
    let Some((store, channel)) = open(dir) else {
        return missing_dir(dir);
    };
    let log = EventLog::stderr_only();
    match store.read_pid() {
        Some(pid) => {
            if probe::probe(&log, pid) == Liveness::Running {
                if channel.stop_requested() || channel.abort_requested() {
                    "rejected: stop in progress; retry once the process has fully stopped"
                        .to_string()
                } else {
                    format!("process is already running (pid {pid})")
                }
            } else {
                // A lingering pid record means the supervisor has not
                // finished the current transition; let it settle.
                "rejected: previous transition still completing; retry shortly".to_string()
            }
        }
        None => match channel.clear_stop() {
            Ok(()) => "start requested; the supervisor will start the process".to_string(),
            Err(e) => format!("start failed: {e:#}"),
        },
    }
}

pub fn do_stop(dir: &Path) -> String {
    let Some((_, channel)) = open(dir) else {
        return missing_dir(dir);
    };
    if channel.stop_requested() || channel.abort_requested() {
        return "rejected: a stop or abort is already pending".to_string();
    }
    match channel.post_stop() {
        Ok(()) => "stop requested".to_string(),
        Err(e) => format!("stop failed: {e:#}"),
    }
}

pub fn do_abort(dir: &Path) -> String {
    let Some((_, channel)) = open(dir) else {
        return missing_dir(dir);
    };
    if channel.stop_requested() || channel.abort_requested() {
        return "rejected: a stop or abort is already pending".to_string();
    }
    match channel.post_abort() {
        Ok(()) => "abort requested".to_string(),
        Err(e) => format!("abort failed: {e:#}"),
    }
}

pub fn do_status(dir: &Path) -> String {
    let Some((store, channel)) = open(dir) else {
        return missing_dir(dir);
    };
    let log = EventLog::stderr_only();
    let stop = channel.stop_requested();
    let abort = channel.abort_requested();
    match store.read_pid() {
        Some(pid) if probe::probe(&log, pid) == Liveness::Running => {
            if abort {
                format!("ABORTING (pid {pid})")
            } else if stop {
                format!("STOPPING (pid {pid})")
            } else {
                let up = store
                    .read_process_started_ms()
                    .map(|ts| format!(", up {}", format_duration_ms(store::now_ms() - ts)))
                    .unwrap_or_default();
                format!("RUNNING (pid {pid}{up})")
            }
        }
        Some(_) => {
            if abort {
                "ABORTING".to_string()
            } else if stop {
                "STOPPING".to_string()
            } else {
                "STOPPED (restart pending)".to_string()
            }
        }
        None => "STOPPED".to_string(),
    }
}

/// Works whether or not a daemon is attached: counters and timestamps are
/// read from their persisted files either way.
pub fn do_statistics(dir: &Path) -> String {
    if !dir.is_dir() {
        return missing_dir(dir);
    }
    let store = StateStore::new(dir);
    let counters = CounterStore::new(dir);
    let log = EventLog::stderr_only();

    let own_comm = probe::comm_of(std::process::id() as i32);
    let supervisor_line = match guard::lock_owner(dir) {
        Some(pid) if guard::holder_is_live(&log, pid, own_comm.as_deref()) => {
            let up = store
                .read_supervisor_started_ms()
                .map(|ts| format!(", up {}", format_duration_ms(store::now_ms() - ts)))
                .unwrap_or_default();
            format!("supervisor: running (pid {pid}{up})")
        }
        _ => "supervisor: not running (reporting last persisted values)".to_string(),
    };

    let mut out = vec![supervisor_line];
    for counter in Counter::ALL {
        out.push(format!(
            "{}: {}",
            counter.as_str().replace('_', " "),
            counters.read(counter)
        ));
    }
    out.join("\n")
}

fn open(dir: &Path) -> Option<(StateStore, FileChannel)> {
    if !dir.is_dir() {
        return None;
    }
    Some((StateStore::new(dir), FileChannel::new(dir)))
}

fn missing_dir(dir: &Path) -> String {
    format!("no such supervisor directory: {}", dir.display())
}

fn format_duration_ms(ms: i64) -> String {
    let total = (ms.max(0)) / 1000;
    let (d, rem) = (total / 86_400, total % 86_400);
    let (h, rem) = (rem / 3_600, rem % 3_600);
    let (m, s) = (rem / 60, rem % 60);
    let mut out = String::new();
    if d > 0 {
        out.push_str(&format!("{d}d"));
    }
    if h > 0 || !out.is_empty() {
        out.push_str(&format!("{h}h"));
    }
    if m > 0 || !out.is_empty() {
        out.push_str(&format!("{m}m"));
    }
    out.push_str(&format!("{s}s"));
    out
}
