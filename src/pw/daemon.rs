use crate::pw::build_info;
use crate::pw::channel::{CommandChannel, FileChannel};
use crate::pw::config::SupervisorConfig;
use crate::pw::counters::{Counter, CounterStore};
use crate::pw::guard;
use crate::pw::hooks::{ActionHook, DirHooks};
use crate::pw::log::EventLog;
use crate::pw::probe::{self, Liveness};
use crate::pw::store::StateStore;
use anyhow::Context;
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::fs::OpenOptions;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal as unix_signal, SignalKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    Starting,
    Running,
    Stopping,
    Aborting,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Stopped => "STOPPED",
            Phase::Starting => "STARTING",
            Phase::Running => "RUNNING",
            Phase::Stopping => "STOPPING",
            Phase::Aborting => "ABORTING",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The supervisory state machine. One instance per daemon; the tick is the
/// unit of progress. Each tick reconciles operator intent (markers) against
/// observed process state (probe) and drives at most one transition, which
/// may remain in flight (STOPPING/ABORTING) across ticks until confirmed.
pub struct Supervisor {
    cfg: SupervisorConfig,
    store: StateStore,
    counters: CounterStore,
    channel: Box<dyn CommandChannel>,
    hooks: Box<dyn ActionHook>,
    log: EventLog,
    phase: Phase,
    takedown_retries: u32,
}

impl Supervisor {
    pub fn new(
        cfg: SupervisorConfig,
        channel: Box<dyn CommandChannel>,
        hooks: Box<dyn ActionHook>,
        log: EventLog,
    ) -> Self {
        let store = StateStore::new(&cfg.dir);
        let counters = CounterStore::new(&cfg.dir);
        Self {
            cfg,
            store,
            counters,
            channel,
            hooks,
            log,
            phase: Phase::Stopped,
            takedown_retries: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Poll until the shutdown flag is raised. The loop itself never blocks
    /// beyond the fixed grace waits and the poll-interval sleep.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) {
        self.log.info(
            "daemon",
            format!(
                "supervising dir={} poll_interval_ms={} start_grace_ms={} stop_grace_ms={}",
                self.cfg.dir.display(),
                self.cfg.poll_interval_ms,
                self.cfg.start_grace_ms,
                self.cfg.stop_grace_ms
            ),
        );
        loop {
            if shutdown.load(Ordering::Relaxed) {
                self.log.info("daemon", "shutdown requested; exiting");
                break;
            }
            self.tick().await;
            tokio::time::sleep(Duration::from_millis(self.cfg.poll_interval_ms)).await;
        }
    }

    pub async fn tick(&mut self) {
        reap_exited_children(&self.log);

        let stop = self.channel.stop_requested();
        let abort = self.channel.abort_requested();

        match self.store.read_pid() {
            Some(pid) if probe::probe(&self.log, pid) == Liveness::Running => {
                self.tick_alive(pid, stop, abort).await;
            }
            record => self.tick_down(record.is_some(), stop, abort).await,
        }
    }

    async fn tick_alive(&mut self, pid: i32, stop: bool, abort: bool) {
        if abort {
            // Abort outranks stop when both are pending.
            if self.phase != Phase::Aborting {
                self.transition(Phase::Aborting, "abort requested");
            } else {
                self.log.warn(
                    "daemon",
                    format!(
                        "abort unconfirmed pid={pid} retry={}; re-sending signal",
                        self.takedown_retries
                    ),
                );
            }
            self.send_signal(pid, self.takedown_signal(self.cfg.abort_signal));
            tokio::time::sleep(Duration::from_millis(self.cfg.stop_grace_ms)).await;
            if probe::probe(&self.log, pid) == Liveness::Stopped {
                self.confirm_abort();
            } else {
                self.takedown_retries += 1;
            }
        } else if stop {
            if self.phase != Phase::Stopping {
                self.transition(Phase::Stopping, "stop requested");
            } else {
                self.log.warn(
                    "daemon",
                    format!(
                        "stop unconfirmed pid={pid} retry={}; re-sending signal",
                        self.takedown_retries
                    ),
                );
            }
            self.send_signal(pid, self.takedown_signal(self.cfg.term_signal));
            tokio::time::sleep(Duration::from_millis(self.cfg.stop_grace_ms)).await;
            if probe::probe(&self.log, pid) == Liveness::Stopped {
                self.confirm_stop();
            } else {
                self.takedown_retries += 1;
            }
        } else if self.phase != Phase::Running {
            // First observation of a live process: a confirmed start from
            // this instance never lands here, so this is adoption of a
            // process inherited from a prior supervisor.
            self.transition(Phase::Running, format!("observed running pid={pid}"));
        }
    }

    async fn tick_down(&mut self, stale_record: bool, stop: bool, abort: bool) {
        match self.phase {
            Phase::Stopping => self.confirm_stop(),
            Phase::Aborting => self.confirm_abort(),
            Phase::Running | Phase::Starting => {
                // The pid record stays in place: the stale record marks the
                // respawn as crash recovery rather than a manual start.
                self.log.warn("daemon", "process exited unexpectedly");
                self.transition(Phase::Stopped, "crash detected");
            }
            Phase::Stopped => {
                if stop || abort {
                    // Intent pending with nothing running: stay down.
                    return;
                }
                self.start_process(stale_record).await;
            }
        }
    }

    /// STOPPED -> STARTING -> RUNNING (or back to STOPPED on failure,
    /// retried next tick).
    async fn start_process(&mut self, auto_restart: bool) {
        let argv = match self.store.read_command() {
            Ok(argv) => argv,
            Err(e) => {
                self.log
                    .warn("daemon", format!("cannot start: {e:#}; retrying next tick"));
                return;
            }
        };

        self.transition(
            Phase::Starting,
            if auto_restart {
                "crash recovery"
            } else {
                "manual start"
            },
        );

        let pid = match self.spawn_monitored(&argv) {
            Ok(pid) => pid,
            Err(e) => {
                self.log.warn(
                    "daemon",
                    format!("spawn failed argv={argv:?} err={e:#}; retrying next tick"),
                );
                self.transition(Phase::Stopped, "spawn failed");
                return;
            }
        };

        if let Err(e) = self.store.write_pid(pid) {
            self.log.warn("daemon", format!("pid record write failed: {e:#}"));
        }
        if let Err(e) = self.store.stamp_process_started() {
            self.log
                .warn("daemon", format!("start timestamp write failed: {e:#}"));
        }

        tokio::time::sleep(Duration::from_millis(self.cfg.start_grace_ms)).await;

        if probe::probe(&self.log, pid) == Liveness::Running {
            let counter = if auto_restart {
                Counter::AutoStarts
            } else {
                Counter::ManualStarts
            };
            self.bump(counter);
            self.transition(Phase::Running, format!("start confirmed pid={pid}"));
        } else {
            self.log.warn(
                "daemon",
                format!("pid={pid} exited within start grace; retrying next tick"),
            );
            self.transition(Phase::Stopped, "start not confirmed");
        }
    }

    fn spawn_monitored(&self, argv: &[String]) -> anyhow::Result<i32> {
        let out_path = self.store.output_path();
        let out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&out_path)
            .with_context(|| format!("open capture file {}", out_path.display()))?;
        let err = out.try_clone().context("clone capture handle")?;
        let child = std::process::Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(self.store.dir())
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .spawn()
            .with_context(|| format!("spawn {:?}", argv[0]))?;
        // Not waited on here; the per-tick reap drain collects it on exit.
        Ok(child.id() as i32)
    }

    fn confirm_stop(&mut self) {
        self.bump(Counter::Stops);
        if let Err(e) = self.store.clear_pid() {
            self.log.warn("daemon", format!("{e:#}"));
        }
        self.transition(Phase::Stopped, "stop confirmed");
    }

    fn confirm_abort(&mut self) {
        self.bump(Counter::Aborts);
        // Keep the process down afterwards: the abort intent becomes a stop
        // intent that only an operator START clears.
        if let Err(e) = self.channel.clear_abort_escalate_to_stop() {
            self.log
                .warn("daemon", format!("abort-to-stop escalation failed: {e:#}"));
        }
        if let Err(e) = self.store.clear_pid() {
            self.log.warn("daemon", format!("{e:#}"));
        }
        self.transition(Phase::Stopped, "abort confirmed");
    }

    fn takedown_signal(&self, base: Signal) -> Signal {
        match self.cfg.escalate_to_kill_after {
            Some(limit) if self.takedown_retries >= limit => Signal::SIGKILL,
            _ => base,
        }
    }

    fn send_signal(&self, pid: i32, sig: Signal) {
        self.log
            .info("daemon", format!("signal sig={sig} pid={pid}"));
        if let Err(e) = kill(Pid::from_raw(pid), sig) {
            // Not fatal for the transition; the next tick re-probes and
            // re-sends until the probe confirms the exit.
            self.log.warn(
                "daemon",
                format!("signal delivery failed pid={pid} sig={sig} err={e}"),
            );
        }
    }

    fn transition(&mut self, next: Phase, why: impl AsRef<str>) {
        if self.phase == next {
            return;
        }
        self.log.info(
            "daemon",
            format!("phase {} -> {} ({})", self.phase, next, why.as_ref()),
        );
        self.phase = next;
        if matches!(next, Phase::Stopping | Phase::Aborting) {
            self.takedown_retries = 0;
        }
        self.hooks.fire(next.as_str());
    }

    fn bump(&self, counter: Counter) {
        match self.counters.increment(counter) {
            Ok(v) => self.log.info("daemon", format!("counter {counter}={v}")),
            Err(e) => self
                .log
                .warn("daemon", format!("counter {counter} update failed: {e:#}")),
        }
    }
}

/// Collect every exited child (monitored process, hooks) without blocking.
fn reap_exited_children(log: &EventLog) {
    loop {
        match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(WaitStatus::Exited(pid, code)) => {
                log.info("reap", format!("pid={pid} exit_code={code}"));
            }
            Ok(WaitStatus::Signaled(pid, sig, _)) => {
                log.info("reap", format!("pid={pid} signal={sig}"));
            }
            Ok(_) => continue,
            // ECHILD: nothing left to reap.
            Err(_) => break,
        }
    }
}

pub fn run_daemon(cfg: SupervisorConfig) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    rt.block_on(run_daemon_async(cfg))
}

pub async fn run_daemon_async(cfg: SupervisorConfig) -> anyhow::Result<()> {
    let store = StateStore::new(&cfg.dir);
    let log = EventLog::new(store.log_path());
    log.info("daemon", build_info::banner());

    if let Err(e) = guard::acquire(&cfg.dir, &log) {
        log.critical("guard", format!("{e:#}"));
        return Err(e);
    }

    clamp_core_limit(&cfg, &log);

    let counters = CounterStore::new(&cfg.dir);
    if let Err(e) = counters.reset_all() {
        log.critical("daemon", format!("counter reset failed: {e:#}"));
        return Err(e);
    }
    store
        .stamp_supervisor_started()
        .context("stamp supervisor start")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    start_signal_listener(Arc::clone(&shutdown));

    let channel = Box::new(FileChannel::new(&cfg.dir));
    let hooks = Box::new(DirHooks::new(&cfg.dir, log.clone()));
    let mut supervisor = Supervisor::new(cfg, channel, hooks, log);
    supervisor.run(shutdown).await;
    Ok(())
}

/// Aborted processes may dump core into the working directory; the size cap
/// is applied once at startup and logged.
fn clamp_core_limit(cfg: &SupervisorConfig, log: &EventLog) {
    match setrlimit(
        Resource::RLIMIT_CORE,
        cfg.core_dump_max_bytes,
        cfg.core_dump_max_bytes,
    ) {
        Ok(()) => log.info(
            "daemon",
            format!("core dump limit set max_bytes={}", cfg.core_dump_max_bytes),
        ),
        Err(e) => log.warn(
            "daemon",
            format!(
                "core dump limit not applied max_bytes={} err={e}",
                cfg.core_dump_max_bytes
            ),
        ),
    }
}

fn start_signal_listener(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut term = unix_signal(SignalKind::terminate()).expect("SIGTERM handler");
        let mut int = unix_signal(SignalKind::interrupt()).expect("SIGINT handler");
        tokio::select! {
            _ = term.recv() => { flag.store(true, Ordering::Relaxed); }
            _ = int.recv() => { flag.store(true, Ordering::Relaxed); }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pw::config::SupervisorConfig;

    #[test]
    fn phase_names() {
        assert_eq!(Phase::Stopped.as_str(), "STOPPED");
        assert_eq!(Phase::Aborting.to_string(), "ABORTING");
    }

    #[test]
    fn escalation_switches_to_sigkill_after_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SupervisorConfig::defaults_for(dir.path());
        cfg.escalate_to_kill_after = Some(2);
        let mut sup = Supervisor::new(
            cfg,
            Box::new(crate::pw::channel::MemoryChannel::new()),
            Box::new(crate::pw::hooks::NullHook),
            EventLog::stderr_only(),
        );
        assert_eq!(sup.takedown_signal(Signal::SIGTERM), Signal::SIGTERM);
        sup.takedown_retries = 1;
        assert_eq!(sup.takedown_signal(Signal::SIGTERM), Signal::SIGTERM);
        sup.takedown_retries = 2;
        assert_eq!(sup.takedown_signal(Signal::SIGTERM), Signal::SIGKILL);
    }

    #[test]
    fn no_escalation_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SupervisorConfig::defaults_for(dir.path());
        let mut sup = Supervisor::new(
            cfg,
            Box::new(crate::pw::channel::MemoryChannel::new()),
            Box::new(crate::pw::hooks::NullHook),
            EventLog::stderr_only(),
        );
        sup.takedown_retries = 1000;
        assert_eq!(sup.takedown_signal(Signal::SIGABRT), Signal::SIGABRT);
    }
}
