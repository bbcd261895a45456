//! Network Master - Main CLI Application
//!
//! Runs one diagnostic command through the probe orchestrator and prints the
//! stored result. Progress goes to stderr, reports to stdout.

use clap::Parser;
use network_master::{app::App, cli::Cli, error::ErrorReporter};
use std::process;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let reporter = ErrorReporter::new(cli.use_colors(), cli.verbose);

    let outcome = match App::new(cli) {
        Ok(app) => app.run().await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(code) => process::exit(code),
        Err(e) => {
            reporter.report_error(&e);
            process::exit(e.exit_code());
        }
    }
}
