use std::fs;
use std::path::{Path, PathBuf};

use miette::IntoDiagnostic;

use faultline_campaign::{StoreSummary, TrialRecord, TrialStatus, TrialStore};

use super::helpers::{parse_output_format, STORE_FILE};
use crate::cli::GlobalArgs;
use crate::types::OutputFormat;

fn open_existing_store(global: &GlobalArgs) -> miette::Result<TrialStore> {
    let path = global.campaign_dir.join(STORE_FILE);
    if !path.exists() {
        miette::bail!(
            "No trial store at {}. Start a campaign with `faultline fuzz` or `faultline reproduce`.",
            path.display()
        );
    }
    TrialStore::open(&path).into_diagnostic()
}

pub(crate) fn run_status_command(global: &GlobalArgs, format: &str) -> miette::Result<()> {
    let format = parse_output_format(format)?;
    let store = open_existing_store(global)?;
    let summary = store.summary(global.threshold).into_diagnostic()?;
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&summary).into_diagnostic()?;
            println!("{json}");
        }
        OutputFormat::Text => print!("{}", render_status_text(&summary)),
    }
    Ok(())
}

pub(crate) fn render_status_text(summary: &StoreSummary) -> String {
    let scope = summary
        .scope
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unset".into());
    let counts = &summary.counts;
    let mut out = format!(
        "trials: {}  scope: {scope}  threshold: {}\n\
         confirmed: {}  not reproducible: {}  undecided: {}  final: {}\n",
        counts.total,
        summary.threshold,
        counts.confirmed,
        counts.not_reproducible,
        counts.undecided,
        counts.final_count,
    );
    if !summary.shapes.is_empty() {
        out.push_str("\n  shape    total  confirmed  not-repro  undecided  final\n");
        for shape in &summary.shapes {
            let c = &shape.counts;
            out.push_str(&format!(
                "  {:<7} {:>6} {:>10} {:>10} {:>10} {:>6}\n",
                shape.shape.to_string(),
                c.total,
                c.confirmed,
                c.not_reproducible,
                c.undecided,
                c.final_count
            ));
        }
    }
    out
}

pub(crate) fn run_show_command(
    global: &GlobalArgs,
    id: Option<i64>,
    fingerprint: Option<&str>,
    format: &str,
) -> miette::Result<()> {
    let format = parse_output_format(format)?;
    let store = open_existing_store(global)?;
    let record = match (id, fingerprint) {
        (Some(id), _) => store
            .get(id)
            .into_diagnostic()?
            .ok_or_else(|| miette::miette!("No trial with id {id}"))?,
        (None, Some(prefix)) => {
            let mut found = store.find_by_fingerprint(prefix).into_diagnostic()?;
            match found.len() {
                0 => miette::bail!("No trial fingerprint starts with '{prefix}'"),
                1 => found.remove(0),
                n => {
                    let ids: Vec<String> = found.iter().map(|r| r.id.to_string()).collect();
                    miette::bail!(
                        "Fingerprint prefix '{prefix}' matches {n} trials ({}); use a longer prefix",
                        ids.join(", ")
                    );
                }
            }
        }
        (None, None) => miette::bail!("Give a trial id or --fingerprint"),
    };
    let traces = trace_files(&global.campaign_dir, record.id).into_diagnostic()?;
    let status = record.status(global.threshold);

    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "id": record.id,
                "fingerprint": record.fingerprint,
                "shape": record.shape(),
                "status": status,
                "pass": record.pass,
                "fail": record.fail,
                "final": record.is_final,
                "config": record.config,
                "traces": traces,
            });
            let json = serde_json::to_string_pretty(&value).into_diagnostic()?;
            println!("{json}");
        }
        OutputFormat::Text => {
            let config = record.config.canonical_json().into_diagnostic()?;
            print!("{}", render_trial_text(&record, status, &config, &traces));
        }
    }
    Ok(())
}

/// Every persisted trace of trial `id`, sorted by file name.
fn trace_files(dir: &Path, id: i64) -> std::io::Result<Vec<PathBuf>> {
    let prefix = format!("events{id:06}");
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(&prefix))
            .is_some_and(|rest| {
                rest == ".log" || (rest.starts_with('_') && rest.ends_with(".log"))
            });
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn render_trial_text(
    record: &TrialRecord,
    status: TrialStatus,
    config: &str,
    traces: &[PathBuf],
) -> String {
    let status = match status {
        TrialStatus::Confirmed => "confirmed",
        TrialStatus::NotReproducible => "not reproducible",
        TrialStatus::Undecided => "undecided",
    };
    let mut out = format!(
        "trial {}  shape {}  {status}\n\
         pass: {}  fail: {}  final: {}\n\
         fingerprint: {}\n\
         config: {config}\n",
        record.id,
        record.shape(),
        record.pass,
        record.fail,
        if record.is_final { "yes" } else { "no" },
        record.fingerprint,
    );
    for trace in traces {
        out.push_str(&format!("  trace: {}\n", trace.display()));
    }
    out
}

#[cfg(test)]
mod tests {
    use faultline_campaign::{ShapeSummary, StatusCounts};
    use faultline_model::{CorruptionScope, FaultConfig, Shape};

    use super::*;

    #[test]
    fn status_text_lists_shapes() {
        let counts = StatusCounts {
            total: 3,
            confirmed: 1,
            not_reproducible: 1,
            undecided: 1,
            final_count: 0,
        };
        let summary = StoreSummary {
            threshold: 5,
            scope: Some(CorruptionScope::Any),
            counts: counts.clone(),
            shapes: vec![ShapeSummary {
                shape: Shape::new(1, 2),
                counts,
            }],
        };
        let text = render_status_text(&summary);
        assert!(text.starts_with("trials: 3  scope: any  threshold: 5\n"));
        assert!(text.contains("1d/2c"));
    }

    #[test]
    fn trial_text_shows_tallies_and_traces() {
        let record = TrialRecord {
            id: 4,
            config: FaultConfig::default(),
            fingerprint: "ab12".into(),
            pass: 0,
            fail: 5,
            is_final: true,
        };
        let traces = vec![PathBuf::from("logs/events000004.log")];
        let text = render_trial_text(&record, TrialStatus::Confirmed, "{}", &traces);
        assert_eq!(
            text,
            "trial 4  shape 0d/0c  confirmed\n\
             pass: 0  fail: 5  final: yes\n\
             fingerprint: ab12\n\
             config: {}\n  \
             trace: logs/events000004.log\n"
        );
    }

    #[test]
    fn trace_files_match_only_the_trial() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "events000004.log",
            "events000004_fail.log",
            "events000004_fuzz3.log",
            "events000040.log",
            "test_results.sqlite3",
        ] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let names: Vec<String> = trace_files(dir.path(), 4)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["events000004.log", "events000004_fail.log", "events000004_fuzz3.log"]
        );
    }

    #[test]
    fn empty_store_has_no_shape_table() {
        let text = render_status_text(&StoreSummary::default());
        assert!(text.contains("scope: unset"));
        assert!(!text.contains("shape"));
    }
}
