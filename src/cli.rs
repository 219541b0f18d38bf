use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Normalize a recorded TOC stream into parts and episodes.
    Normalize(NormalizeArgs),
    /// Periodically scrape JSON TOC feeds until interrupted.
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct NormalizeArgs {
    /// JSON Lines file with one raw row (`{"type":"piece",...}` or
    /// `{"type":"meta",...}`) per line.
    #[arg(long)]
    pub input: String,

    /// Output file (must not exist). Defaults to stdout.
    #[arg(long)]
    pub out: Option<String>,

    /// Emit episodes only, without part nesting.
    #[arg(long, default_value_t = false)]
    pub flat: bool,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// TOC feed URL serving a JSON array of raw rows (repeatable).
    #[arg(long = "feed", required = true)]
    pub feeds: Vec<String>,

    /// Jobs allowed to run at the same time (overrides TOCWATCH_MAX_ACTIVE).
    #[arg(long)]
    pub max_active: Option<usize>,

    /// Seconds between two scrapes of the same feed.
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Defer new jobs while resident memory exceeds this many MiB.
    #[arg(long)]
    pub memory_limit_mb: Option<u64>,
}
