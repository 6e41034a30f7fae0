mod cli;

use std::process::ExitCode;

use clap::Parser;
use log::error;

use crate::cli::{Cli, init_logging};
use femtoship::{error::ShipError, shipper::Shipper};

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_filter.as_deref());

    let config = match cli.shipper_config() {
        Ok(config) => config,
        Err(err) => {
            let err = ShipError::from(err);
            error!("{err}");
            return exit_code(err.exit_code());
        }
    };
    match Shipper::new(config).run() {
        Ok(report) => exit_code(report.exit_code()),
        Err(err) => {
            error!("{err}");
            exit_code(err.exit_code())
        }
    }
}
