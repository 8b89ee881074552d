use anyhow::Context;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub const COMMAND_FILE: &str = "command";
pub const PID_FILE: &str = "pid";
pub const LOCK_FILE: &str = "supervisor.lock";
pub const SUPERVISOR_STARTED_FILE: &str = "supervisor.started";
pub const PROCESS_STARTED_FILE: &str = "process.started";
pub const LOG_FILE: &str = "supervisor.log";
pub const OUTPUT_FILE: &str = "process.out";

/// Write-then-rename so readers in other processes never observe a partial
/// record. Atomic replace on POSIX.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("record");
    let tmp = parent.join(format!(".{name}.tmp.{}", std::process::id()));
    fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))
}

pub fn now_ms() -> i64 {
    chrono::Local::now().timestamp_millis()
}

/// The persisted records of one supervised directory, counters excepted.
/// The supervisor loop is the only writer; STATUS/STATISTICS invocations read.
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.join(OUTPUT_FILE)
    }

    /// The exact command line to spawn, whitespace-tokenized into argv.
    pub fn read_command(&self) -> anyhow::Result<Vec<String>> {
        let path = self.dir.join(COMMAND_FILE);
        let raw = fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read command file {}: {e}", path.display()))?;
        let argv: Vec<String> = raw.split_whitespace().map(|s| s.to_string()).collect();
        anyhow::ensure!(!argv.is_empty(), "command file {} is empty", path.display());
        Ok(argv)
    }

    /// A garbled record reads as "no process", the same as an absent one;
    /// the probe settles the truth either way.
    pub fn read_pid(&self) -> Option<i32> {
        let raw = fs::read_to_string(self.dir.join(PID_FILE)).ok()?;
        let pid: i32 = raw.trim().parse().ok()?;
        if pid > 0 {
            Some(pid)
        } else {
            None
        }
    }

    pub fn write_pid(&self, pid: i32) -> anyhow::Result<()> {
        write_atomic(&self.dir.join(PID_FILE), format!("{pid}\n").as_bytes())
    }

    pub fn clear_pid(&self) -> anyhow::Result<()> {
        match fs::remove_file(self.dir.join(PID_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::anyhow!("failed to remove pid record: {e}")),
        }
    }

    pub fn stamp_supervisor_started(&self) -> anyhow::Result<()> {
        write_atomic(
            &self.dir.join(SUPERVISOR_STARTED_FILE),
            format!("{}\n", now_ms()).as_bytes(),
        )
    }

    pub fn stamp_process_started(&self) -> anyhow::Result<()> {
        write_atomic(
            &self.dir.join(PROCESS_STARTED_FILE),
            format!("{}\n", now_ms()).as_bytes(),
        )
    }

    pub fn read_supervisor_started_ms(&self) -> Option<i64> {
        read_ms(&self.dir.join(SUPERVISOR_STARTED_FILE))
    }

    pub fn read_process_started_ms(&self) -> Option<i64> {
        read_ms(&self.dir.join(PROCESS_STARTED_FILE))
    }
}

fn read_ms(path: &Path) -> Option<i64> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse().ok()
}
