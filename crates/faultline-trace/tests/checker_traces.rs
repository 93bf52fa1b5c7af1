use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use faultline_trace::{
    adapt_trace, AdapterKind, CheckReport, CheckerOptions, HeightRound, QuorumChecker, Trace,
    Verdict,
};

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn check_fixture(adapter: AdapterKind, name: &str, options: CheckerOptions) -> CheckReport {
    let raw = std::fs::read_to_string(fixture_path(name)).expect("read fixture");
    let observations = adapt_trace(adapter, &raw).expect("adapt fixture");
    QuorumChecker::new(options).check(&observations)
}

#[test]
fn stalled_node_is_reported_missing_its_step() {
    let report = check_fixture(
        AdapterKind::Diagnostic,
        "stalled_node.log",
        CheckerOptions::default(),
    );
    assert!(!report.passed);
    assert_eq!(report.threshold, 3);
    assert_eq!(report.violations.len(), 1, "{:?}", report.violations);
    let violation = &report.violations[0];
    assert_eq!(violation.node, "node0");
    assert_eq!(violation.step, HeightRound::new(1, 0));

    // node1 saw the same quorum and stepped.
    let node1 = report
        .nodes
        .iter()
        .find(|n| n.node == "node1")
        .expect("node1 report");
    assert!(node1.missing.is_empty());
    assert_eq!(node1.actual, vec![HeightRound::new(1, 0)]);
}

#[test]
fn votes_only_mode_still_counts_precommits() {
    let report = check_fixture(
        AdapterKind::Diagnostic,
        "stalled_node.log",
        CheckerOptions {
            faults: 1,
            votes_only: true,
        },
    );
    assert!(!report.passed);
    assert_eq!(report.violations[0].senders, 3);
}

#[test]
fn healthy_trace_passes() {
    let report = check_fixture(
        AdapterKind::Diagnostic,
        "healthy.log",
        CheckerOptions::default(),
    );
    assert!(report.passed, "violations: {:?}", report.violations);
}

#[test]
fn higher_fault_bound_raises_the_quorum() {
    let report = check_fixture(
        AdapterKind::Diagnostic,
        "stalled_node.log",
        CheckerOptions {
            faults: 2,
            votes_only: false,
        },
    );
    assert!(report.passed);
    assert_eq!(report.threshold, 4);
}

#[test]
fn spec_log_trace_flags_the_lagging_replica() {
    let report = check_fixture(
        AdapterKind::SpecLog,
        "spec_stalled.log",
        CheckerOptions::default(),
    );
    assert!(!report.passed);
    let nodes: Vec<&str> = report.violations.iter().map(|v| v.node.as_str()).collect();
    assert_eq!(nodes, ["node2"]);
    assert_eq!(report.violations[0].step, HeightRound::new(2, 1));
}

#[test]
fn persisted_trace_keeps_its_verdict_and_corruptions() {
    let file = File::open(fixture_path("stalled_node.log")).expect("open fixture");
    let trace = Trace::read_ndjson(BufReader::new(file)).expect("read trace");
    assert_eq!(trace.verdict(), Some(Verdict::Failed));
    let corruptions = trace.corruptions();
    assert_eq!(corruptions.len(), 1);
    assert_eq!(corruptions[0].kind, "omit");
    assert_eq!(
        corruptions[0].send.map(|m| m.sent_from.as_str()),
        Some("node1")
    );
}
