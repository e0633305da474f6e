mod launch;
mod logging;

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{ArgAction, Parser};
use lineflow_engine::config::keys;
use lineflow_engine::errors::{EXIT_INVALID_CONFIG, EXIT_OK};
use lineflow_engine::LaunchError;

#[derive(Parser)]
#[command(
    name = "lineflow",
    version,
    about = "Run a line-oriented source -> subprocess -> sink pipeline",
    after_help = "Configuration keys are listed when a required key is missing."
)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the assembled plan as JSON and exit without running it
    #[arg(long)]
    describe: bool,

    /// Configuration property, as key=value
    #[arg(short = 'D', value_name = "KEY=VALUE", action = ArgAction::Append)]
    define: Vec<String>,

    /// Unexpected arguments; logged and ignored
    #[arg(hide = true)]
    rest: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
                _ => EXIT_INVALID_CONFIG,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    logging::init(&cli.log_level, launch::debug_requested(&cli.define));
    for arg in &cli.rest {
        tracing::warn!(arg = %arg, "Ignoring unexpected argument");
    }

    match launch::run(&cli.define, cli.describe).await {
        Ok(launch::Outcome::Described(json)) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Ok(launch::Outcome::Completed(summary)) => {
            match serde_json::to_string_pretty(&summary) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::warn!(error = %e, "Failed to render run summary"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e}");
            if matches!(e, LaunchError::Config(_)) {
                println!("{}", keys::usage());
            }
            ExitCode::from(e.exit_code())
        }
    }
}
