//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

pub(crate) const CLI_LONG_ABOUT: &str =
    "Fault-injection harness for a 4-replica BFT consensus implementation.\n\n\
    Typical campaign:\n  \
    1. faultline quick-tests\n  \
    2. faultline fuzz-deflake --max-drops 2 --max-corruptions 2\n  \
    3. faultline status\n\n\
    Statistical sample:\n  \
    - faultline reproduce --scope any --grid-max 2 --repeats 200\n\n\
    Traces land in the campaign directory as events<id>.log and can be\n\
    checked offline with `faultline analyze`.";

#[derive(Parser)]
#[command(name = "faultline")]
#[command(about = "Fault-injection harness for BFT consensus implementations")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) global: GlobalArgs,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct GlobalArgs {
    /// Directory holding the trial store and per-trial traces
    #[arg(long, global = true, default_value = "logs")]
    pub(crate) campaign_dir: PathBuf,

    /// Program that runs one trial of the system under test
    #[arg(long, global = true, default_value = "go")]
    pub(crate) sut_program: String,

    /// Argument passed to the SUT program (repeatable; default: run ./cmd/server.go run-instance)
    #[arg(long = "sut-arg", global = true, allow_hyphen_values = true)]
    pub(crate) sut_args: Vec<String>,

    /// Working directory of the SUT
    #[arg(long, global = true)]
    pub(crate) sut_dir: Option<PathBuf>,

    /// Liveness timeout forwarded to the SUT (seconds)
    #[arg(long, global = true, default_value_t = 60)]
    pub(crate) liveness_timeout_secs: u64,

    /// How long the SUT may keep running after its verdict (seconds)
    #[arg(long, global = true, default_value_t = 30)]
    pub(crate) grace_period_secs: u64,

    /// Failures without a pass that confirm a bug trigger
    #[arg(long, global = true, default_value_t = 5)]
    pub(crate) threshold: u32,

    /// Pause between deflake polls when nothing is undecided (seconds)
    #[arg(long, global = true, default_value_t = 5)]
    pub(crate) idle_secs: u64,

    /// Seed for the config sampler (default: random, logged at startup)
    #[arg(long, global = true)]
    pub(crate) seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct FuzzArgs {
    /// Drops per config
    #[arg(long, default_value_t = 1)]
    pub(crate) drops: usize,

    /// Corruptions per config
    #[arg(long, default_value_t = 0)]
    pub(crate) corruptions: usize,

    /// Draw the drop count uniformly from 0..=N instead
    #[arg(long)]
    pub(crate) max_drops: Option<usize>,

    /// Draw the corruption count uniformly from 1..=N instead
    #[arg(long)]
    pub(crate) max_corruptions: Option<usize>,

    /// Corruption scope: small | any
    #[arg(long, default_value = "small")]
    pub(crate) scope: String,

    /// Stop after N iterations (default: run until interrupted)
    #[arg(long)]
    pub(crate) iterations: Option<u64>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run randomly sampled fault configs once each and record the verdicts
    #[command(display_order = 10)]
    Fuzz(FuzzArgs),

    /// Re-run undecided trials until each passes once or fails repeatedly
    #[command(display_order = 11)]
    Deflake {
        /// Corruption scope the store must have been created with
        #[arg(long)]
        scope: Option<String>,

        /// Stop after N polls (default: run until interrupted)
        #[arg(long)]
        iterations: Option<u64>,
    },

    /// Alternate one fuzz trial with one deflake trial
    #[command(display_order = 12)]
    FuzzDeflake(FuzzArgs),

    /// Populate the stratified grid and deflake it to completion
    #[command(display_order = 13)]
    Reproduce {
        /// Corruption scope: small | any
        #[arg(long, default_value = "small")]
        scope: String,

        /// Largest drop and corruption count in the grid
        #[arg(long, default_value_t = 2)]
        grid_max: usize,

        /// Configs per grid shape
        #[arg(long, default_value_t = 200)]
        repeats: usize,

        /// Output format: text | json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Check that isolating every replica fails a trial and no faults pass it
    #[command(display_order = 14)]
    QuickTests,

    /// Mark the oldest trials of every grid shape as the final sample
    #[command(display_order = 15)]
    TagFinal {
        /// Largest drop and corruption count in the grid
        #[arg(long, default_value_t = 2)]
        grid_max: usize,

        /// Trials to mark per shape, capped at the distinct configs a shape admits
        #[arg(long, default_value_t = 200)]
        per_shape: usize,
    },

    /// Summarize the trial store
    #[command(display_order = 20)]
    Status {
        /// Output format: text | json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show one trial by id or by config fingerprint prefix
    #[command(display_order = 22)]
    Show {
        /// Trial id
        #[arg(required_unless_present = "fingerprint", conflicts_with = "fingerprint")]
        id: Option<i64>,

        /// Leading hex digits of the config fingerprint
        #[arg(long)]
        fingerprint: Option<String>,

        /// Output format: text | json
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Check a persisted trace for replicas that skipped a quorum-backed step
    #[command(display_order = 21)]
    Analyze {
        /// Trace file (events<id>.log or a spec log)
        trace: PathBuf,

        /// Trace format: diagnostic | spec-log
        #[arg(long, default_value = "diagnostic")]
        adapter: String,

        /// Byzantine replicas tolerated; a step needs faults + 2 senders
        #[arg(long, default_value_t = 1)]
        faults: usize,

        /// Count only prevotes and precommits towards the quorum
        #[arg(long, default_value_t = false)]
        votes_only: bool,

        /// Output format: text | json
        #[arg(long, default_value = "text")]
        format: String,
    },
}
