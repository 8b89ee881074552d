use crate::pw::log::EventLog;
use crate::pw::probe::{self, Liveness};
use crate::pw::store::{self, LOCK_FILE};
use anyhow::Context;
use std::fs;
use std::path::Path;

/// One supervisor per directory. The lock record holds the owner PID; it is
/// only honored when that PID is a live process with our own executable
/// identity.
pub fn acquire(dir: &Path, log: &EventLog) -> anyhow::Result<()> {
    let path = dir.join(LOCK_FILE);
    let own = std::process::id() as i32;

    if !path.exists() {
        store::write_atomic(&path, format!("{own}\n").as_bytes())?;
        return Ok(());
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("unreadable lock record {}", path.display()))?;
    let recorded: i32 = raw.trim().parse().map_err(|_| {
        anyhow::anyhow!(
            "lock record {} is empty or corrupt; refusing to guess ownership",
            path.display()
        )
    })?;

    if recorded == own {
        return Ok(());
    }

    if holder_is_live(log, recorded, probe::comm_of(own).as_deref()) {
        anyhow::bail!(
            "another supervisor (pid {recorded}) is already running in {}",
            dir.display()
        );
    }

    log.info("guard", format!("reclaimed stale lock pid={recorded}"));
    store::write_atomic(&path, format!("{own}\n").as_bytes())?;
    Ok(())
}

/// Live means: the PID exists in the process table AND its comm matches the
/// expected executable identity. A live PID with a different comm is an
/// unrelated process that reused the number.
pub fn holder_is_live(log: &EventLog, pid: i32, expected_comm: Option<&str>) -> bool {
    if probe::probe(log, pid) != Liveness::Running {
        return false;
    }
    match (probe::comm_of(pid), expected_comm) {
        (Some(theirs), Some(ours)) => theirs == ours,
        _ => false,
    }
}

/// The recorded owner PID, if the record exists and parses. Used by
/// STATISTICS to tell whether a daemon is currently attached.
pub fn lock_owner(dir: &Path) -> Option<i32> {
    let raw = fs::read_to_string(dir.join(LOCK_FILE)).ok()?;
    raw.trim().parse().ok().filter(|pid| *pid > 0)
}
