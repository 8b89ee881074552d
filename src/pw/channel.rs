use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

pub const STOP_MARKER: &str = "stop.request";
pub const ABORT_MARKER: &str = "abort.request";

/// Operator intent mailbox. The CLI is the only poster, the supervisor loop
/// the only consumer; each marker has exactly one designated writer by
/// protocol, so plain create/remove is sufficient.
pub trait CommandChannel: Send {
    fn post_stop(&self) -> anyhow::Result<()>;
    fn post_abort(&self) -> anyhow::Result<()>;
    fn clear_stop(&self) -> anyhow::Result<()>;
    /// A confirmed abort escalates into a stop so the process stays down.
    /// Sets the stop marker before clearing the abort marker; there is no
    /// window in which neither intent is visible.
    fn clear_abort_escalate_to_stop(&self) -> anyhow::Result<()>;
    fn stop_requested(&self) -> bool;
    fn abort_requested(&self) -> bool;
}

/// Marker files in the supervised directory.
pub struct FileChannel {
    dir: PathBuf,
}

impl FileChannel {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

fn touch(path: &Path) -> anyhow::Result<()> {
    // Re-posting an already pending intent is a no-op for the reader.
    OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map_err(|e| anyhow::anyhow!("failed to post marker {}: {e}", path.display()))?;
    Ok(())
}

fn untouch(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::anyhow!(
            "failed to clear marker {}: {e}",
            path.display()
        )),
    }
}

impl CommandChannel for FileChannel {
    fn post_stop(&self) -> anyhow::Result<()> {
        touch(&self.marker(STOP_MARKER))
    }

    fn post_abort(&self) -> anyhow::Result<()> {
        touch(&self.marker(ABORT_MARKER))
    }

    fn clear_stop(&self) -> anyhow::Result<()> {
        untouch(&self.marker(STOP_MARKER))
    }

    fn clear_abort_escalate_to_stop(&self) -> anyhow::Result<()> {
        touch(&self.marker(STOP_MARKER))?;
        untouch(&self.marker(ABORT_MARKER))
    }

    fn stop_requested(&self) -> bool {
        self.marker(STOP_MARKER).exists()
    }

    fn abort_requested(&self) -> bool {
        self.marker(ABORT_MARKER).exists()
    }
}

/// In-memory channel for exercising the state machine without a filesystem.
#[derive(Default)]
pub struct MemoryChannel {
    stop: AtomicBool,
    abort: AtomicBool,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandChannel for MemoryChannel {
    fn post_stop(&self) -> anyhow::Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn post_abort(&self) -> anyhow::Result<()> {
        self.abort.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn clear_stop(&self) -> anyhow::Result<()> {
        self.stop.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn clear_abort_escalate_to_stop(&self) -> anyhow::Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        self.abort.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn abort_requested(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impls(dir: &Path) -> Vec<Box<dyn CommandChannel>> {
        vec![
            Box::new(FileChannel::new(dir)),
            Box::new(MemoryChannel::new()),
        ]
    }

    #[test]
    fn posting_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        for ch in impls(dir.path()) {
            assert!(!ch.stop_requested());
            ch.post_stop().unwrap();
            ch.post_stop().unwrap();
            assert!(ch.stop_requested());
            ch.clear_stop().unwrap();
            assert!(!ch.stop_requested());
            // Clearing an already clear marker is also a no-op.
            ch.clear_stop().unwrap();
        }
    }

    #[test]
    fn abort_escalates_to_stop() {
        let dir = tempfile::tempdir().unwrap();
        for ch in impls(dir.path()) {
            ch.post_abort().unwrap();
            assert!(ch.abort_requested());
            assert!(!ch.stop_requested());
            ch.clear_abort_escalate_to_stop().unwrap();
            assert!(!ch.abort_requested());
            assert!(ch.stop_requested());
        }
    }

    #[test]
    fn markers_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        for ch in impls(dir.path()) {
            ch.post_stop().unwrap();
            assert!(!ch.abort_requested());
            ch.post_abort().unwrap();
            ch.clear_stop().unwrap();
            assert!(ch.abort_requested());
        }
    }

    #[test]
    fn file_markers_are_visible_to_a_second_channel() {
        let dir = tempfile::tempdir().unwrap();
        let poster = FileChannel::new(dir.path());
        let reader = FileChannel::new(dir.path());
        poster.post_stop().unwrap();
        assert!(reader.stop_requested());
    }
}
