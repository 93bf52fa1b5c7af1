// Command handlers for: Fuzz, Deflake, FuzzDeflake, Reproduce, QuickTests, TagFinal
//
// Every campaign command opens the trial store in the campaign directory,
// spawns the SUT through the subprocess runner and stops cleanly on Ctrl-C.

use std::fs;

use miette::IntoDiagnostic;

use faultline_campaign::{
    quick_tests, tag_final, Campaign, CancelToken, LoopReport, ReproduceSummary,
    SubprocessRunner, TraceLog, TrialStore,
};
use faultline_model::SamplerSettings;
use rand_chacha::ChaCha8Rng;

use super::helpers::{
    campaign_settings_from_cli, parse_output_format, parse_scope, rng_from_cli,
    sampler_settings_from_cli, sut_command_from_cli, STORE_FILE,
};
use crate::cli::{FuzzArgs, GlobalArgs};
use crate::types::{FuzzMode, OutputFormat};

fn open_store(global: &GlobalArgs) -> miette::Result<TrialStore> {
    fs::create_dir_all(&global.campaign_dir).into_diagnostic()?;
    TrialStore::open(&global.campaign_dir.join(STORE_FILE)).into_diagnostic()
}

/// A token flipped by SIGINT. The loops finish (or discard) the current
/// trial and return.
fn install_cancel_handler() -> miette::Result<CancelToken> {
    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("interrupt received, stopping after the current trial");
        handler_token.cancel();
    })
    .into_diagnostic()?;
    Ok(token)
}

fn build_campaign(
    global: &GlobalArgs,
    sampler: SamplerSettings,
) -> miette::Result<Campaign<SubprocessRunner, ChaCha8Rng>> {
    let store = open_store(global)?;
    let log = TraceLog::create(&global.campaign_dir).into_diagnostic()?;
    Ok(Campaign::new(
        store,
        SubprocessRunner::new(sut_command_from_cli(global)),
        rng_from_cli(global),
        log,
        campaign_settings_from_cli(global, sampler),
        install_cancel_handler()?,
    ))
}

fn print_loop_report(name: &str, report: &LoopReport) {
    println!(
        "{name}: {} trial(s), {} passed, {} failed, {} newly confirmed{}",
        report.trials,
        report.passed,
        report.failed,
        report.confirmed.len(),
        if report.interrupted { " (interrupted)" } else { "" }
    );
    for id in &report.confirmed {
        println!("  confirmed bug trigger: trial {id}");
    }
}

pub(crate) fn run_fuzz_command(
    global: &GlobalArgs,
    args: &FuzzArgs,
    mode: FuzzMode,
) -> miette::Result<()> {
    let sampler = sampler_settings_from_cli(args)?;
    let mut campaign = build_campaign(global, sampler)?;
    let report = match mode {
        FuzzMode::Fuzz => campaign.run_fuzz(args.iterations),
        FuzzMode::FuzzDeflake => campaign.run_fuzz_deflake(args.iterations),
    }
    .into_diagnostic()?;
    let name = match mode {
        FuzzMode::Fuzz => "fuzz",
        FuzzMode::FuzzDeflake => "fuzz-deflake",
    };
    print_loop_report(name, &report);
    Ok(())
}

pub(crate) fn run_deflake_command(
    global: &GlobalArgs,
    scope: Option<&str>,
    iterations: Option<u64>,
) -> miette::Result<()> {
    let mut sampler = SamplerSettings::default();
    if let Some(raw) = scope {
        sampler.scope = parse_scope(raw)?;
    }
    let mut campaign = build_campaign(global, sampler)?;
    if scope.is_some() {
        campaign
            .store()
            .bind_scope(sampler.scope)
            .into_diagnostic()?;
    }
    let report = campaign.run_deflake(iterations).into_diagnostic()?;
    print_loop_report("deflake", &report);
    Ok(())
}

pub(crate) fn run_reproduce_command(
    global: &GlobalArgs,
    scope: &str,
    grid_max: usize,
    repeats: usize,
    format: &str,
) -> miette::Result<()> {
    let format = parse_output_format(format)?;
    let sampler = SamplerSettings {
        scope: parse_scope(scope)?,
        ..SamplerSettings::default()
    };
    let mut campaign = build_campaign(global, sampler)?;
    let summary = campaign.reproduce(grid_max, repeats).into_diagnostic()?;
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&summary).into_diagnostic()?;
            println!("{json}");
        }
        OutputFormat::Text => print_reproduce_summary(&summary),
    }
    Ok(())
}

fn print_reproduce_summary(summary: &ReproduceSummary) {
    if summary.resumed {
        println!("reproduce: resumed existing grid");
    } else {
        println!("reproduce: stored {} grid trial(s)", summary.inserted);
    }
    print_loop_report("deflake", &summary.deflake);
    let counts = &summary.store.counts;
    println!(
        "store: {} trial(s), {} confirmed, {} not reproducible, {} undecided",
        counts.total, counts.confirmed, counts.not_reproducible, counts.undecided
    );
    for shape in &summary.store.shapes {
        println!(
            "  {:>7}  confirmed {:>4} / {:<4}",
            shape.shape.to_string(),
            shape.counts.confirmed,
            shape.counts.total
        );
    }
}

pub(crate) fn run_quick_tests_command(global: &GlobalArgs) -> miette::Result<()> {
    let mut runner = SubprocessRunner::new(sut_command_from_cli(global));
    let report = quick_tests(&mut runner).into_diagnostic()?;
    for check in &report.checks {
        let verdict = match check.verdict {
            Some(true) => "pass",
            Some(false) => "fail",
            None => "none",
        };
        let expected = if check.expect_pass { "pass" } else { "fail" };
        let status = if check.ok() { "ok" } else { "VIOLATED" };
        println!(
            "{:<10} expected {expected}, got {verdict}: {status}",
            check.name
        );
    }
    if !report.passed() {
        miette::bail!("quick tests failed: the SUT does not react to injected faults as expected");
    }
    Ok(())
}

pub(crate) fn run_tag_final_command(
    global: &GlobalArgs,
    grid_max: usize,
    per_shape: usize,
) -> miette::Result<()> {
    let store = open_store(global)?;
    let marked = tag_final(&store, grid_max, per_shape).into_diagnostic()?;
    println!("tagged {marked} trial(s) as final");
    Ok(())
}
