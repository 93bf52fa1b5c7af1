// Command handler for: Analyze
//
// Offline quorum check of a persisted trial trace.

use std::fs;
use std::path::Path;

use miette::IntoDiagnostic;

use faultline_trace::{
    adapt_trace, decode_line, AdapterKind, AppliedCorruption, CheckReport, CheckerOptions,
    QuorumChecker, Trace,
};

use super::helpers::{parse_adapter, parse_output_format};
use crate::types::OutputFormat;

pub(crate) fn run_analyze_command(
    trace: &Path,
    adapter: &str,
    faults: usize,
    votes_only: bool,
    format: &str,
) -> miette::Result<()> {
    let adapter = parse_adapter(adapter)?;
    let format = parse_output_format(format)?;
    let raw = fs::read_to_string(trace).into_diagnostic()?;
    let observations =
        adapt_trace(adapter, &raw).map_err(|e| miette::miette!("Trace adapter error: {e}"))?;
    let checker = QuorumChecker::new(CheckerOptions { faults, votes_only });
    let report = checker.check(&observations);

    // Spec logs carry no corruption records. Undecodable lines were already
    // reported by the adapter.
    let decoded: Trace = match adapter {
        AdapterKind::Diagnostic => raw.lines().filter_map(|l| decode_line(l).ok()).collect(),
        AdapterKind::SpecLog => Trace::new(),
    };
    let corruptions = decoded.corruptions();

    match format {
        OutputFormat::Json => {
            let mut value = serde_json::to_value(&report).into_diagnostic()?;
            value["corruptions"] = corruptions.iter().map(corruption_json).collect();
            let json = serde_json::to_string_pretty(&value).into_diagnostic()?;
            println!("{json}");
        }
        OutputFormat::Text => {
            print!("{}", render_report_text(&report));
            print!("{}", render_corruptions_text(&corruptions));
        }
    }
    if !report.passed {
        miette::bail!(
            "{} replica step(s) reached quorum without being executed in {}",
            report.violations.len(),
            trace.display()
        );
    }
    Ok(())
}

pub(crate) fn render_report_text(report: &CheckReport) -> String {
    let mut out = String::new();
    if report.passed {
        out.push_str(&format!(
            "PASSED ({} replica(s), quorum {})\n",
            report.nodes.len(),
            report.threshold
        ));
        return out;
    }
    out.push_str(&format!(
        "FAILED: {} missing step(s), quorum {}\n",
        report.violations.len(),
        report.threshold
    ));
    for node in report.nodes.iter().filter(|n| !n.missing.is_empty()) {
        let missing: Vec<String> = node.missing.iter().map(ToString::to_string).collect();
        out.push_str(&format!("  {}: {}\n", node.node, missing.join(" ")));
    }
    out
}

fn describe_corruption(applied: &AppliedCorruption<'_>) -> String {
    match applied.send {
        Some(m) => format!(
            "{} on {} -> {} {} ({}, {})",
            applied.kind, m.sent_from, m.sent_to, m.message_type, m.height, m.round
        ),
        None => format!("{} before any send", applied.kind),
    }
}

fn corruption_json(applied: &AppliedCorruption<'_>) -> serde_json::Value {
    match applied.send {
        Some(m) => serde_json::json!({
            "kind": applied.kind,
            "from": m.sent_from,
            "to": m.sent_to,
            "type": m.message_type,
            "height": m.height,
            "round": m.round,
        }),
        None => serde_json::json!({ "kind": applied.kind }),
    }
}

pub(crate) fn render_corruptions_text(corruptions: &[AppliedCorruption<'_>]) -> String {
    if corruptions.is_empty() {
        return String::new();
    }
    let mut out = format!("applied corruptions: {}\n", corruptions.len());
    for applied in corruptions {
        out.push_str(&format!("  {}\n", describe_corruption(applied)));
    }
    out
}

#[cfg(test)]
mod tests {
    use faultline_trace::{HeightRound, NodeReport, Violation};

    use super::*;

    #[test]
    fn failed_report_lists_missing_steps_per_node() {
        let report = CheckReport {
            passed: false,
            threshold: 3,
            nodes: vec![
                NodeReport {
                    node: "node0".into(),
                    expected: vec![HeightRound::new(1, 0), HeightRound::new(1, 1)],
                    actual: vec![],
                    missing: vec![HeightRound::new(1, 0), HeightRound::new(1, 1)],
                },
                NodeReport {
                    node: "node1".into(),
                    expected: vec![],
                    actual: vec![HeightRound::new(1, 0)],
                    missing: vec![],
                },
            ],
            violations: [HeightRound::new(1, 0), HeightRound::new(1, 1)]
                .into_iter()
                .map(|step| Violation {
                    node: "node0".into(),
                    step,
                    senders: 3,
                    message: String::new(),
                })
                .collect(),
        };
        let text = render_report_text(&report);
        assert_eq!(
            text,
            "FAILED: 2 missing step(s), quorum 3\n  node0: (1, 0) (1, 1)\n"
        );
    }

    #[test]
    fn corruptions_name_the_modified_send() {
        let trace: Trace = [
            r#"{"msg":"Corruption","type":"changeBlockId"}"#,
            r#"{"msg":"Consensus message","is_send":true,"is_receive":false,"sent_from":"node3","sent_to":"node1","type":"Prevote","height":2,"round":1}"#,
            r#"{"msg":"Corruption","type":"omit"}"#,
        ]
        .into_iter()
        .map(|l| decode_line(l).unwrap())
        .collect();
        let corruptions = trace.corruptions();
        assert_eq!(
            render_corruptions_text(&corruptions),
            "applied corruptions: 2\n  changeBlockId before any send\n  omit on node3 -> node1 Prevote (2, 1)\n"
        );
        assert_eq!(corruption_json(&corruptions[1])["from"], "node3");
        assert!(render_corruptions_text(&[]).is_empty());
    }
}
