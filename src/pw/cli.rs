use crate::pw::{config, ctl, daemon};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "procwarden", version, about = "single-process supervisor")]
pub struct Args {
    /// Supervised working directory (command file, records, markers, hooks)
    pub dir: PathBuf,

    /// Operator command: start | stop | abort | status | statistics.
    /// Without one, procwarden runs as the supervisor daemon.
    pub command: Option<String>,
}

pub fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    match args.command {
        None => {
            let cfg = config::load(&args.dir)?;
            daemon::run_daemon(cfg)
        }
        Some(cmd) => {
            // Command mode always exits 0; failures and rejections are text.
            let msg = match cmd.trim().to_ascii_lowercase().as_str() {
                "start" => ctl::do_start(&args.dir),
                "stop" => ctl::do_stop(&args.dir),
                "abort" => ctl::do_abort(&args.dir),
                "status" => ctl::do_status(&args.dir),
                "statistics" => ctl::do_statistics(&args.dir),
                other => format!(
                    "unknown command: {other} (expected start|stop|abort|status|statistics)"
                ),
            };
            println!("{}", msg.trim_end());
            Ok(())
        }
    }
}
