use anyhow::Context;
use nix::sys::signal::Signal;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Optional per-directory overrides; everything has a default.
pub const CONFIG_FILE: &str = "supervisor.yaml";

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// The supervised working directory; all records live directly inside it.
    pub dir: PathBuf,
    pub poll_interval_ms: u64,
    pub start_grace_ms: u64,
    pub stop_grace_ms: u64,
    pub term_signal: Signal,
    pub abort_signal: Signal,
    /// After this many unconfirmed stop/abort retries, switch to SIGKILL.
    /// None (the default) retries the configured signal indefinitely.
    pub escalate_to_kill_after: Option<u32>,
    pub core_dump_max_bytes: u64,
}

impl SupervisorConfig {
    pub fn defaults_for(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            poll_interval_ms: default_poll_interval_ms(),
            start_grace_ms: default_start_grace_ms(),
            stop_grace_ms: default_stop_grace_ms(),
            term_signal: Signal::SIGTERM,
            abort_signal: Signal::SIGABRT,
            escalate_to_kill_after: None,
            core_dump_max_bytes: default_core_dump_max_bytes(),
        }
    }
}

// -------- YAML file schema (strict) --------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(
        default = "default_poll_interval_ms",
        deserialize_with = "deserialize_duration_ms"
    )]
    poll_interval: u64,
    #[serde(
        default = "default_start_grace_ms",
        deserialize_with = "deserialize_duration_ms"
    )]
    start_grace: u64,
    #[serde(
        default = "default_stop_grace_ms",
        deserialize_with = "deserialize_duration_ms"
    )]
    stop_grace: u64,
    #[serde(default = "default_term_signal")]
    term_signal: String,
    #[serde(default = "default_abort_signal")]
    abort_signal: String,
    #[serde(default)]
    escalate_to_kill_after: Option<u32>,
    #[serde(default = "default_core_dump_max_bytes")]
    core_dump_max_bytes: u64,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval_ms(),
            start_grace: default_start_grace_ms(),
            stop_grace: default_stop_grace_ms(),
            term_signal: default_term_signal(),
            abort_signal: default_abort_signal(),
            escalate_to_kill_after: None,
            core_dump_max_bytes: default_core_dump_max_bytes(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}
fn default_start_grace_ms() -> u64 {
    1000
}
fn default_stop_grace_ms() -> u64 {
    1000
}
fn default_term_signal() -> String {
    "SIGTERM".to_string()
}
fn default_abort_signal() -> String {
    "SIGABRT".to_string()
}
fn default_core_dump_max_bytes() -> u64 {
    // 1 GiB
    1 << 30
}

pub fn load(dir: &Path) -> anyhow::Result<SupervisorConfig> {
    anyhow::ensure!(
        dir.is_dir(),
        "supervisor directory {} does not exist",
        dir.display()
    );

    let path = dir.join(CONFIG_FILE);
    let file_cfg: ConfigFile = if path.is_file() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("failed to parse config {}: {e}", path.display()))?
    } else {
        ConfigFile::default()
    };

    anyhow::ensure!(file_cfg.poll_interval > 0, "poll_interval must be > 0");

    Ok(SupervisorConfig {
        dir: dir.to_path_buf(),
        poll_interval_ms: file_cfg.poll_interval,
        start_grace_ms: file_cfg.start_grace,
        stop_grace_ms: file_cfg.stop_grace,
        term_signal: parse_signal(&file_cfg.term_signal)?,
        abort_signal: parse_signal(&file_cfg.abort_signal)?,
        escalate_to_kill_after: file_cfg.escalate_to_kill_after,
        core_dump_max_bytes: file_cfg.core_dump_max_bytes,
    })
}

pub fn parse_signal(s: &str) -> anyhow::Result<Signal> {
    let raw = s.trim().to_uppercase();
    let name = raw.strip_prefix("SIG").unwrap_or(&raw);
    let sig = match name {
        "TERM" => Signal::SIGTERM,
        "KILL" => Signal::SIGKILL,
        "INT" => Signal::SIGINT,
        "HUP" => Signal::SIGHUP,
        "QUIT" => Signal::SIGQUIT,
        "ABRT" => Signal::SIGABRT,
        "ALRM" => Signal::SIGALRM,
        "USR1" => Signal::SIGUSR1,
        "USR2" => Signal::SIGUSR2,
        _ => anyhow::bail!("unsupported signal: {s}"),
    };
    Ok(sig)
}

fn deserialize_duration_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error as _;
    let v = serde_yaml::Value::deserialize(deserializer)?;
    match v {
        serde_yaml::Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom("duration must be a positive integer (ms)")),
        serde_yaml::Value::String(s) => parse_duration_str(&s).map_err(D::Error::custom),
        _ => Err(D::Error::custom(
            "duration must be an integer milliseconds or string like \"500ms\"",
        )),
    }
}

fn parse_duration_str(s: &str) -> Result<u64, String> {
    let t = s.trim();
    if t.is_empty() {
        return Err("empty duration".to_string());
    }
    // e.g. 500ms, 10s, 1m, 2h
    let mut idx = 0usize;
    for (i, ch) in t.char_indices() {
        if !(ch.is_ascii_digit() || ch == '.') {
            idx = i;
            break;
        }
    }
    if idx == 0 {
        return Err(format!("invalid duration: {s}"));
    }
    let (num_s, unit_s) = t.split_at(idx);
    let num: f64 = num_s
        .parse()
        .map_err(|e| format!("invalid duration number: {e}"))?;
    if num < 0.0 {
        return Err("duration must be >= 0".to_string());
    }
    let unit = unit_s.trim().to_ascii_lowercase();
    let mult: f64 = match unit.as_str() {
        "ms" => 1.0,
        "s" => 1000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        _ => return Err(format!("unknown duration unit {unit_s:?} (use ms/s/m/h)")),
    };
    Ok((num * mult).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_when_no_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load(dir.path()).unwrap();
        assert_eq!(cfg.poll_interval_ms, 500);
        assert_eq!(cfg.term_signal, Signal::SIGTERM);
        assert_eq!(cfg.abort_signal, Signal::SIGABRT);
        assert!(cfg.escalate_to_kill_after.is_none());
    }

    #[test]
    fn missing_directory_is_fatal() {
        let err = load(Path::new("/nonexistent/procwarden-test")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn overrides_and_duration_strings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "poll_interval: 100ms\nstop_grace: 2s\nterm_signal: int\nescalate_to_kill_after: 3\n",
        )
        .unwrap();
        let cfg = load(dir.path()).unwrap();
        assert_eq!(cfg.poll_interval_ms, 100);
        assert_eq!(cfg.stop_grace_ms, 2000);
        assert_eq!(cfg.term_signal, Signal::SIGINT);
        assert_eq!(cfg.escalate_to_kill_after, Some(3));
        // Untouched fields keep defaults.
        assert_eq!(cfg.start_grace_ms, 1000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "pollinterval: 100\n").unwrap();
        assert!(load(dir.path()).is_err());
    }

    #[test]
    fn signal_names_are_forgiving() {
        assert_eq!(parse_signal("term").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("SIGKILL").unwrap(), Signal::SIGKILL);
        assert_eq!(parse_signal(" usr1 ").unwrap(), Signal::SIGUSR1);
        assert!(parse_signal("SIGBOGUS").is_err());
    }

    #[test]
    fn duration_parsing() {
        assert!(parse_duration_str("1500").is_err(), "bare numbers only valid as YAML numbers");
        assert_eq!(parse_duration_str("1500ms").unwrap(), 1500);
        assert_eq!(parse_duration_str("1.5s").unwrap(), 1500);
        assert_eq!(parse_duration_str("2m").unwrap(), 120_000);
        assert!(parse_duration_str("10d").is_err());
    }
}
