use crate::pw::store::write_atomic;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    ManualStarts,
    AutoStarts,
    Stops,
    Aborts,
}

impl Counter {
    pub const ALL: [Counter; 4] = [
        Counter::ManualStarts,
        Counter::AutoStarts,
        Counter::Stops,
        Counter::Aborts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::ManualStarts => "manual_starts",
            Counter::AutoStarts => "auto_starts",
            Counter::Stops => "stops",
            Counter::Aborts => "aborts",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Counter::ManualStarts => "count.manual_starts",
            Counter::AutoStarts => "count.auto_starts",
            Counter::Stops => "count.stops",
            Counter::Aborts => "count.aborts",
        }
    }
}

impl std::fmt::Display for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file per counter so each survives independently. Counters belong to
/// one supervisor lifetime: the daemon zeroes them at startup, and STATISTICS
/// reads whatever is persisted, running daemon or not.
pub struct CounterStore {
    dir: PathBuf,
}

impl CounterStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Missing or garbled files read as zero.
    pub fn read(&self, counter: Counter) -> u64 {
        fs::read_to_string(self.dir.join(counter.file_name()))
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn increment(&self, counter: Counter) -> anyhow::Result<u64> {
        let next = self.read(counter).saturating_add(1);
        self.write(counter, next)?;
        Ok(next)
    }

    pub fn reset_all(&self) -> anyhow::Result<()> {
        for counter in Counter::ALL {
            self.write(counter, 0)?;
        }
        Ok(())
    }

    fn write(&self, counter: Counter, value: u64) -> anyhow::Result<()> {
        write_atomic(
            &self.dir.join(counter.file_name()),
            format!("{value}\n").as_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_files_read_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let counters = CounterStore::new(dir.path());
        for c in Counter::ALL {
            assert_eq!(counters.read(c), 0);
        }
    }

    #[test]
    fn increment_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let counters = CounterStore::new(dir.path());
            assert_eq!(counters.increment(Counter::Stops).unwrap(), 1);
            assert_eq!(counters.increment(Counter::Stops).unwrap(), 2);
            assert_eq!(counters.increment(Counter::AutoStarts).unwrap(), 1);
        }
        let reopened = CounterStore::new(dir.path());
        assert_eq!(reopened.read(Counter::Stops), 2);
        assert_eq!(reopened.read(Counter::AutoStarts), 1);
        assert_eq!(reopened.read(Counter::ManualStarts), 0);
    }

    #[test]
    fn reset_zeroes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let counters = CounterStore::new(dir.path());
        counters.increment(Counter::Aborts).unwrap();
        counters.increment(Counter::ManualStarts).unwrap();
        counters.reset_all().unwrap();
        for c in Counter::ALL {
            assert_eq!(counters.read(c), 0);
        }
    }

    #[test]
    fn garbled_counter_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(Counter::Stops.file_name()), "banana\n").unwrap();
        let counters = CounterStore::new(dir.path());
        assert_eq!(counters.read(Counter::Stops), 0);
        // And increments from there.
        assert_eq!(counters.increment(Counter::Stops).unwrap(), 1);
    }
}
