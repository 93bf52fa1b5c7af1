use std::time::Duration;

use faultline_campaign::{CampaignSettings, SutCommand};
use faultline_model::{CorruptionScope, FaultCount, SamplerSettings};
use faultline_trace::AdapterKind;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::cli::{FuzzArgs, GlobalArgs};
use crate::types::OutputFormat;

pub(crate) const STORE_FILE: &str = "test_results.sqlite3";

pub(crate) fn parse_output_format(raw: &str) -> miette::Result<OutputFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => miette::bail!("Unknown output format: {other}. Use 'text' or 'json'."),
    }
}

pub(crate) fn parse_scope(raw: &str) -> miette::Result<CorruptionScope> {
    raw.parse::<CorruptionScope>()
        .map_err(|e| miette::miette!("{e}"))
}

pub(crate) fn parse_adapter(raw: &str) -> miette::Result<AdapterKind> {
    raw.parse::<AdapterKind>()
        .map_err(|e| miette::miette!("{e}"))
}

pub(crate) fn sut_command_from_cli(global: &GlobalArgs) -> SutCommand {
    let defaults = SutCommand::default();
    let args = if global.sut_args.is_empty() {
        defaults.args
    } else {
        global.sut_args.clone()
    };
    SutCommand {
        program: global.sut_program.clone(),
        args,
        dir: global.sut_dir.clone(),
        liveness_timeout: Duration::from_secs(global.liveness_timeout_secs),
        grace_period: Duration::from_secs(global.grace_period_secs),
    }
}

/// An explicit maximum switches a count from fixed to uniform; corruption
/// counts then start at one.
pub(crate) fn sampler_settings_from_cli(args: &FuzzArgs) -> miette::Result<SamplerSettings> {
    let drops = match args.max_drops {
        Some(max) => FaultCount::Uniform { min: 0, max },
        None => FaultCount::Fixed(args.drops),
    };
    let corruptions = match args.max_corruptions {
        Some(max) => FaultCount::Uniform { min: 1, max },
        None => FaultCount::Fixed(args.corruptions),
    };
    let settings = SamplerSettings {
        drops,
        corruptions,
        scope: parse_scope(&args.scope)?,
    };
    settings
        .validate()
        .map_err(|e| miette::miette!("Invalid fuzz options: {e}"))?;
    Ok(settings)
}

pub(crate) fn campaign_settings_from_cli(
    global: &GlobalArgs,
    sampler: SamplerSettings,
) -> CampaignSettings {
    CampaignSettings {
        fail_threshold: global.threshold,
        idle_interval: Duration::from_secs(global.idle_secs),
        sampler,
    }
}

/// Seeded RNG for a campaign. Without `--seed` a fresh seed is drawn and
/// logged so the run can be replayed.
pub(crate) fn rng_from_cli(global: &GlobalArgs) -> ChaCha8Rng {
    let seed = global.seed.unwrap_or_else(rand::random);
    tracing::info!(seed, "sampler seed");
    ChaCha8Rng::seed_from_u64(seed)
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Commands};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("faultline").chain(args.iter().copied())).unwrap()
    }

    fn fuzz_args(cli: Cli) -> FuzzArgs {
        match cli.command {
            Commands::Fuzz(args) | Commands::FuzzDeflake(args) => args,
            _ => panic!("expected a fuzz command"),
        }
    }

    #[test]
    fn fixed_counts_by_default() {
        let settings = sampler_settings_from_cli(&fuzz_args(parse(&["fuzz"]))).unwrap();
        assert_eq!(settings.drops, FaultCount::Fixed(1));
        assert_eq!(settings.corruptions, FaultCount::Fixed(0));
        assert_eq!(settings.scope, CorruptionScope::Small);
    }

    #[test]
    fn maxima_switch_to_uniform_counts() {
        let cli = parse(&[
            "fuzz-deflake",
            "--max-drops",
            "3",
            "--max-corruptions",
            "2",
            "--scope",
            "any",
        ]);
        let settings = sampler_settings_from_cli(&fuzz_args(cli)).unwrap();
        assert_eq!(settings.drops, FaultCount::Uniform { min: 0, max: 3 });
        assert_eq!(settings.corruptions, FaultCount::Uniform { min: 1, max: 2 });
        assert_eq!(settings.scope, CorruptionScope::Any);
    }

    #[test]
    fn zero_faults_and_bad_scope_are_rejected() {
        let cli = parse(&["fuzz", "--drops", "0"]);
        assert!(sampler_settings_from_cli(&fuzz_args(cli)).is_err());
        let cli = parse(&["fuzz", "--scope", "wide"]);
        assert!(sampler_settings_from_cli(&fuzz_args(cli)).is_err());
    }

    #[test]
    fn sut_command_defaults_and_overrides() {
        let cli = parse(&["quick-tests"]);
        assert_eq!(sut_command_from_cli(&cli.global), SutCommand::default());

        let cli = parse(&[
            "--sut-program",
            "sh",
            "--sut-arg",
            "fake.sh",
            "--sut-arg",
            "-x",
            "--liveness-timeout-secs",
            "5",
            "quick-tests",
        ]);
        let command = sut_command_from_cli(&cli.global);
        assert_eq!(command.program, "sh");
        assert_eq!(command.argv(), ["fake.sh", "-x", "--liveness-timeout=5s"]);
    }

    #[test]
    fn global_options_follow_the_subcommand() {
        let cli = parse(&["status", "--campaign-dir", "/tmp/c", "--threshold", "3"]);
        assert_eq!(cli.global.campaign_dir, std::path::PathBuf::from("/tmp/c"));
        assert_eq!(cli.global.threshold, 3);
    }

    #[test]
    fn output_format_parsing() {
        assert_eq!(parse_output_format("JSON").unwrap(), OutputFormat::Json);
        assert!(parse_output_format("yaml").is_err());
    }
}
