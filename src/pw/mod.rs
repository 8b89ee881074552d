pub mod build_info;
pub mod channel;
pub mod cli;
pub mod config;
pub mod counters;
pub mod ctl;
pub mod daemon;
pub mod guard;
pub mod hooks;
pub mod log;
pub mod probe;
pub mod store;

pub fn main() -> anyhow::Result<()> {
    cli::run()
}
