//! Command-line and environment configuration for the relay bot.

mod cli_args;
mod cli_types;

pub use cli_args::Cli;
pub use cli_types::CliProvider;
