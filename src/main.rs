mod cli;
mod commands;
mod config;
mod differ;
mod paths;
mod progress;
mod provider;
mod stack;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    let state = cli.state.as_deref();

    match cli.command {
        Command::Plan(args) => commands::deploy::plan_only(&ctx, &cli.stack, state, &args),
        Command::Deploy(args) => commands::deploy::deploy(&ctx, &cli.stack, state, &args).await,
        Command::Destroy(args) => commands::deploy::destroy(&ctx, state, &args).await,
        Command::State(cmd) => commands::state::run(&ctx, state, &cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "keel", &mut io::stdout());
            Ok(ExitCode::SUCCESS)
        }
    }
}
