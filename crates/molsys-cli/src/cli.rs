use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Tony Kan, Ted Yu",
    version,
    about = "molsys CLI - Drive a transactional molecular system through scenario files and inspect its versions and energies.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build the system a scenario describes and replay its steps.
    Replay(ReplayArgs),
}

/// Arguments for the `replay` subcommand.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Path to the scenario file in TOML format.
    #[arg(value_name = "SCENARIO")]
    pub scenario: PathBuf,

    /// Write one row per step (version, energy, error) to this CSV file.
    #[arg(long, value_name = "PATH")]
    pub csv: Option<PathBuf>,

    /// Directory to write each energy monitor's samples to, as <name>.csv.
    #[arg(long, value_name = "DIR")]
    pub monitors: Option<PathBuf>,

    /// Exit with an error if any step failed.
    #[arg(long)]
    pub strict: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_replay_with_global_flags() {
        let cli = Cli::try_parse_from([
            "molsys", "-vv", "replay", "scenario.toml", "--csv", "steps.csv", "--strict",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Commands::Replay(args) = cli.command;
        assert_eq!(args.scenario, PathBuf::from("scenario.toml"));
        assert_eq!(args.csv, Some(PathBuf::from("steps.csv")));
        assert!(args.strict);
        assert!(args.monitors.is_none());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["molsys", "-q", "-v", "replay", "s.toml"]).is_err());
    }
}
