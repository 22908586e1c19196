use std::process::exit;

use log::debug;

use crate::config::cmd::CmdArgs;
use crate::error::Result;
use crate::exec::SystemRunner;
use crate::registry::HttpProbe;
use crate::request::BuildRequest;
use crate::subcmd::build::BuildCommand;
use crate::subcmd::export::ExportCommand;
use crate::util::file::expand_home;

mod buildlog;
mod config;
mod const_data;
mod context;
mod error;
mod exec;
mod init;
mod registry;
mod request;
mod subcmd;
mod util;

fn main() {
    let exit_code = match run() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            err.report();
            err.exit_code()
        }
    };
    exit(exit_code)
}

/// Returns the build tool's exit status, or 0 after an export.
fn run() -> Result<i32> {
    let cmd_args = CmdArgs::parse_args()?;
    let config = init::init(&cmd_args)?;
    let request = BuildRequest::from_args(&cmd_args, &config.distros, std::env::consts::ARCH)?;
    debug!("Build request: {:?}", request);

    if let Some(output_dir) = &cmd_args.output_dir {
        ExportCommand::run(&request, &config, &expand_home(output_dir))?;
        return Ok(0);
    }

    let probe = HttpProbe::new()?;
    let report = BuildCommand::run(&request, &config, &SystemRunner, &probe)?;
    debug!("Visited stages: {:?}", report.stages);
    Ok(report.exit_code)
}
