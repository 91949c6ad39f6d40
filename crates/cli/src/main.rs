// couchctl CLI entry point.

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod config;
mod exit_code;
mod output;

use exit_code::ExitCode;
use output::OutputFormat;

/// Environment variable holding the log filter (`tracing_subscriber` syntax).
const LOG_ENV: &str = "COUCHCTL_LOG";

#[derive(Parser)]
#[command(name = "couchctl", version, about = "Command-line client for CouchDB")]
struct Cli {
    #[command(flatten)]
    global: commands::GlobalArgs,
    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    let format = OutputFormat::detect(cli.global.json);
    match commands::run(cli.command, &cli.global, format) {
        Ok(()) => ExitCode::Success.into(),
        Err(error) => {
            output::print_anyhow_error(format, &error);
            ExitCode::from_error(&error).into()
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}
