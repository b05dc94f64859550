use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keel")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declare resources in a stack file and converge them", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack file to read declarations from
    #[arg(long, global = true, default_value = crate::paths::DEFAULT_STACK_FILE)]
    pub stack: PathBuf,

    /// Snapshot file (default: state_file from config, then the state directory)
    #[arg(long, global = true, env = "KEEL_STATE_FILE")]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what deploy would change
    Plan(PlanArgs),

    /// Converge real resources onto the stack
    Deploy(ApplyArgs),

    /// Delete every resource in the snapshot
    Destroy(ApplyArgs),

    /// Inspect the saved snapshot
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct PlanArgs {
    /// Treat unchanged entries as updates
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Treat unchanged entries as updates
    #[arg(long)]
    pub force: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Maximum number of steps applied at once
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Per-step timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Show the plan without applying it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// List entries in the snapshot
    List,

    /// Show one entry as JSON
    Show {
        /// Entry id or type.name
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_deploy() {
        let cli = Cli::try_parse_from([
            "keel", "-vv", "deploy", "--yes", "--jobs", "4", "--timeout", "30", "--stack", "site.toml",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.stack, PathBuf::from("site.toml"));
        let Command::Deploy(args) = cli.command else {
            panic!("expected deploy");
        };
        assert!(args.yes);
        assert_eq!(args.jobs, Some(4));
        assert_eq!(args.timeout, Some(30));
        assert!(!args.dry_run);
    }

    #[test]
    fn test_default_stack_file() {
        let cli = Cli::try_parse_from(["keel", "state", "show", "file.index"]).unwrap();
        assert_eq!(cli.stack, PathBuf::from("keel.toml"));
        assert!(matches!(
            cli.command,
            Command::State(StateCommand::Show { ref id }) if id == "file.index"
        ));
    }
}
