use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "annotation-collector")]
#[command(about = "Index Java annotations across a source tree into a queryable artifact")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON configuration file; command-line flags override its values.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Scan include roots and write the compiled artifact.
    Generate(GenerateArgs),
    /// List every target of one annotation kind.
    Query {
        #[arg(long, value_name = "FILE")]
        artifact: Option<PathBuf>,

        #[arg(short, long, value_name = "KIND")]
        kind: String,

        #[arg(short, long, value_enum, default_value_t = TargetFilter::All)]
        target: TargetFilter,
    },
    /// Show every annotation recorded on one type.
    ForClass {
        type_name: String,

        #[arg(long, value_name = "FILE")]
        artifact: Option<PathBuf>,
    },
    Stats {
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },
    Clear {
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct GenerateArgs {
    /// Source roots to scan (files or directories).
    #[arg(value_name = "PATH")]
    pub include: Vec<PathBuf>,

    /// Regular expression over paths to skip.
    #[arg(short = 'x', long, value_name = "REGEX")]
    pub exclude: Option<String>,

    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Run without the durable cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Record targets only; arguments are read from source at query time.
    #[arg(long)]
    pub no_capture_arguments: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum TargetFilter {
    Classes,
    Methods,
    Properties,
    All,
}
