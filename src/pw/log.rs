use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only supervisor event log. One logical message per line; embedded
/// newlines become tab-indented continuation lines. Every line is mirrored to
/// stderr so operators can watch live.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: Option<PathBuf>,
}

impl EventLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    /// Used in command mode and before the working directory is validated:
    /// the daemon is the only writer of the log file.
    pub fn stderr_only() -> Self {
        Self { path: None }
    }

    pub fn event(&self, sev: Severity, component: &str, msg: impl AsRef<str>) {
        let ts = Local::now().format("%Y-%m-%d_%H:%M:%S%.3f");
        let mut line = format!("{ts} {sev} [{component}]");
        for (i, part) in msg.as_ref().lines().enumerate() {
            if i == 0 {
                line.push(' ');
            } else {
                line.push('\n');
                line.push('\t');
            }
            line.push_str(part);
        }
        eprintln!("{line}");
        if let Some(path) = &self.path {
            // Best-effort; stderr already has the line.
            let _ = append_line(path, &line);
        }
    }

    pub fn info(&self, component: &str, msg: impl AsRef<str>) {
        self.event(Severity::Info, component, msg);
    }

    pub fn warn(&self, component: &str, msg: impl AsRef<str>) {
        self.event(Severity::Warning, component, msg);
    }

    pub fn critical(&self, component: &str, msg: impl AsRef<str>) {
        self.event(Severity::Critical, component, msg);
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(line.as_bytes())?;
    f.write_all(b"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn multiline_messages_use_tab_continuations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("supervisor.log");
        let log = EventLog::new(path.clone());
        log.warn("probe", "first line\nsecond line\nthird line");
        let raw = fs::read_to_string(&path).unwrap();
        let mut lines = raw.lines();
        let head = lines.next().unwrap();
        assert!(head.contains("WARNING [probe] first line"), "head={head}");
        assert_eq!(lines.next().unwrap(), "\tsecond line");
        assert_eq!(lines.next().unwrap(), "\tthird line");
        assert!(lines.next().is_none());
    }

    #[test]
    fn appends_instead_of_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("supervisor.log");
        let log = EventLog::new(path.clone());
        log.info("daemon", "one");
        log.info("daemon", "two");
        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn stderr_only_never_touches_disk() {
        let log = EventLog::stderr_only();
        log.info("ctl", "no file backing");
    }
}
