mod bootstrap_helpers;
mod stdin_driver;

use anyhow::{Context, Result};
use clap::Parser;
use relay_cli::Cli;
use relay_orchestrator::Orchestrator;

use crate::bootstrap_helpers::init_tracing;

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli
        .provider_config()
        .context("invalid relay configuration")?;
    let orchestrator = Orchestrator::new(&config);

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let result = stdin_driver::run(&orchestrator, stdin.lock(), stdout.lock());
    orchestrator.shutdown();
    result
}
