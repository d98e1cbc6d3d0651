use std::process::ExitCode;

use clap::Parser;
use ntem_cli::{render_error, run_cli, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.options();

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", render_error(&err, &options));
            ExitCode::FAILURE
        }
    }
}
