use chrono::Local;
use env_logger::{Env, Target};
use log::LevelFilter;
use std::io::Write;

use crate::config::cmd::CmdArgs;
use crate::config::AppConfig;
use crate::error::Result;

/// Process start-up: logging first, then the resolved configuration.
pub fn init(cmd_args: &CmdArgs) -> Result<AppConfig> {
    log_init();
    AppConfig::resolve(cmd_args)
}

/// Logs go to stderr; stdout carries the streamed build output.
fn log_init() {
    let env = Env::default().default_filter_or("info");
    env_logger::Builder::from_env(env)
        .target(Target::Stderr)
        .filter_module("reqwest", LevelFilter::Warn)
        .filter_module("hyper_util", LevelFilter::Warn)
        .format(|fmt, record| {
            writeln!(
                fmt,
                "[{} {:<5}] {}",
                Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .init();
}
