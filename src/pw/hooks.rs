use crate::pw::log::EventLog;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Side-effect hook fired when a lifecycle transition completes. Hooks run
/// detached; nothing waits on them and their failures never propagate.
pub trait ActionHook: Send {
    fn fire(&self, state: &str);
}

/// Looks up `on-<state>` in the supervised directory. Absent or
/// non-executable entries are silently skipped.
pub struct DirHooks {
    dir: PathBuf,
    log: EventLog,
}

impl DirHooks {
    pub fn new(dir: &Path, log: EventLog) -> Self {
        Self {
            dir: dir.to_path_buf(),
            log,
        }
    }

    pub fn hook_name(state: &str) -> String {
        format!("on-{}", state.to_ascii_lowercase())
    }
}

impl ActionHook for DirHooks {
    fn fire(&self, state: &str) {
        let name = Self::hook_name(state);
        let path = self.dir.join(&name);
        let Ok(meta) = fs::metadata(&path) else {
            return;
        };
        if !meta.is_file() || meta.permissions().mode() & 0o111 == 0 {
            return;
        }
        let spawned = Command::new(&path)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            // The child is reaped by the supervisor's per-tick drain.
            Ok(child) => self
                .log
                .info("hook", format!("fired hook={name} pid={}", child.id())),
            Err(e) => self
                .log
                .warn("hook", format!("hook={name} spawn failed err={e}")),
        }
    }
}

/// Default when no hooks are wanted (and for tests).
pub struct NullHook;

impl ActionHook for NullHook {
    fn fire(&self, _state: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_hook(dir: &Path, name: &str, body: &str, executable: bool) {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mode = if executable { 0o755 } else { 0o644 };
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn executable_hook_fires_detached() {
        let dir = tempfile::tempdir().unwrap();
        write_hook(dir.path(), "on-running", "touch fired.running", true);
        let hooks = DirHooks::new(dir.path(), EventLog::stderr_only());
        hooks.fire("RUNNING");
        // Fire-and-forget: poll briefly for the side effect.
        let witness = dir.path().join("fired.running");
        for _ in 0..50 {
            if witness.exists() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("hook did not run");
    }

    #[test]
    fn non_executable_hook_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_hook(dir.path(), "on-stopped", "touch fired.stopped", false);
        let hooks = DirHooks::new(dir.path(), EventLog::stderr_only());
        hooks.fire("STOPPED");
        std::thread::sleep(Duration::from_millis(200));
        assert!(!dir.path().join("fired.stopped").exists());
    }

    #[test]
    fn absent_hook_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = DirHooks::new(dir.path(), EventLog::stderr_only());
        hooks.fire("ABORTING");
    }

    #[test]
    fn hook_names_are_lowercased_states() {
        assert_eq!(DirHooks::hook_name("STARTING"), "on-starting");
        assert_eq!(DirHooks::hook_name("STOPPED"), "on-stopped");
    }
}
