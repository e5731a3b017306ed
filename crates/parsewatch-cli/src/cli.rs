use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI parser for the `parsewatch` binary.
#[derive(Debug, Parser)]
#[command(
    name = "parsewatch",
    version,
    about = "Decide whether a new journal parser version is safe to deploy"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run invariants, drift and canary checks and write all reports.
    /// Exit status: 0 deploy, 1 human review, 2 rollback.
    Run(RunArgs),

    /// Combine previously written reports into a verdict
    Aggregate(AggregateArgs),

    /// Score baseline and candidate against the canary gold labels
    CompareCanary(CompareCanaryArgs),

    /// Validate a policy file and optionally print the effective policy
    Policy(PolicyArgs),
}

/// Which parser runs to compare.
#[derive(Debug, Args)]
pub struct RunSelection {
    /// Data directory (journals.jsonl, parser_outputs_<label>.jsonl, canary/)
    #[arg(long)]
    pub data: PathBuf,

    /// Baseline run label
    #[arg(long, default_value = "day0")]
    pub baseline: String,

    /// Candidate run label
    #[arg(long, default_value = "day1")]
    pub candidate: String,

    /// Policy file (YAML, or JSON by extension); defaults apply when omitted
    #[arg(long)]
    pub policy: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: RunSelection,

    /// Directory the reports are written to
    #[arg(long)]
    pub out: PathBuf,

    /// Print the verdict as JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct AggregateArgs {
    #[arg(long)]
    pub invariant: PathBuf,

    #[arg(long)]
    pub drift: PathBuf,

    #[arg(long)]
    pub canary: PathBuf,

    /// Also write the verdict to this file
    #[arg(long)]
    pub out: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CompareCanaryArgs {
    #[command(flatten)]
    pub selection: RunSelection,

    /// Directory canary_comparison.json is written to
    #[arg(long)]
    pub out: PathBuf,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct PolicyArgs {
    /// Print the effective policy as YAML
    #[arg(long)]
    pub show: bool,

    /// Policy file to validate; defaults apply when omitted
    #[arg(long)]
    pub policy: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};

    use super::{Cli, Commands};

    #[test]
    fn clap_command_tree_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_to_day0_and_day1() {
        let cli = Cli::try_parse_from(["parsewatch", "run", "--data", "data", "--out", "out"])
            .expect("cli should parse");

        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.selection.baseline, "day0");
        assert_eq!(args.selection.candidate, "day1");
        assert!(args.selection.policy.is_none());
        assert!(!args.json);
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from(["parsewatch", "policy", "--show", "-v"])
            .expect("cli should parse");

        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Policy(ref args) if args.show));
    }

    #[test]
    fn aggregate_requires_all_reports() {
        let result = Cli::try_parse_from(["parsewatch", "aggregate", "--invariant", "i.json"]);
        assert!(result.is_err());
    }
}
