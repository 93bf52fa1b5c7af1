use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::adapters::Observation;

/// A consensus step coordinate. Ordered by height, then round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HeightRound {
    pub height: i64,
    pub round: i64,
}

impl HeightRound {
    pub fn new(height: i64, round: i64) -> Self {
        Self { height, round }
    }
}

impl fmt::Display for HeightRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.height, self.round)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckerOptions {
    /// Byzantine replicas tolerated by the cluster.
    pub faults: usize,
    /// Count only prevote/precommit deliveries towards the quorum.
    pub votes_only: bool,
}

impl CheckerOptions {
    /// Distinct senders at a step that oblige the receiver to execute it.
    pub fn quorum_threshold(&self) -> usize {
        self.faults + 2
    }
}

impl Default for CheckerOptions {
    fn default() -> Self {
        Self {
            faults: 1,
            votes_only: false,
        }
    }
}

/// Per-replica comparison of expected and executed steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeReport {
    pub node: String,
    pub expected: Vec<HeightRound>,
    pub actual: Vec<HeightRound>,
    pub missing: Vec<HeightRound>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    pub node: String,
    pub step: HeightRound,
    /// Distinct senders observed for `step`.
    pub senders: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckReport {
    pub passed: bool,
    pub threshold: usize,
    pub nodes: Vec<NodeReport>,
    pub violations: Vec<Violation>,
}

/// Flags replicas that were shown a quorum of messages for a step but
/// never executed it.
pub struct QuorumChecker {
    options: CheckerOptions,
}

#[derive(Default)]
struct NodeView<'a> {
    senders: BTreeMap<HeightRound, BTreeSet<&'a str>>,
    executed: BTreeSet<HeightRound>,
}

impl QuorumChecker {
    pub fn new(options: CheckerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> CheckerOptions {
        self.options
    }

    pub fn check(&self, observations: &[Observation]) -> CheckReport {
        let threshold = self.options.quorum_threshold();
        let mut views: BTreeMap<&str, NodeView<'_>> = BTreeMap::new();

        for observation in observations {
            match observation {
                Observation::Received {
                    receiver,
                    sender,
                    message_type,
                    height,
                    round,
                } => {
                    if *round < 0 {
                        continue;
                    }
                    if self.options.votes_only && !message_type.is_some_and(|t| t.is_vote()) {
                        continue;
                    }
                    views
                        .entry(receiver.as_str())
                        .or_default()
                        .senders
                        .entry(HeightRound::new(*height, *round))
                        .or_default()
                        .insert(sender.as_str());
                }
                Observation::Step {
                    replica,
                    height,
                    round,
                } => {
                    views
                        .entry(replica.as_str())
                        .or_default()
                        .executed
                        .insert(HeightRound::new(*height, *round));
                }
            }
        }

        let mut nodes = Vec::with_capacity(views.len());
        let mut violations = Vec::new();
        for (node, view) in &views {
            let expected: Vec<HeightRound> = view
                .senders
                .iter()
                .filter(|(_, senders)| senders.len() >= threshold)
                .map(|(step, _)| *step)
                .collect();
            let missing: Vec<HeightRound> = expected
                .iter()
                .filter(|step| !view.executed.contains(step))
                .copied()
                .collect();
            for step in &missing {
                let senders = view.senders.get(step).map_or(0, BTreeSet::len);
                violations.push(Violation {
                    node: node.to_string(),
                    step: *step,
                    senders,
                    message: format!(
                        "{node} received step {step} from {senders} replicas (threshold {threshold}) but never executed it"
                    ),
                });
            }
            nodes.push(NodeReport {
                node: node.to_string(),
                expected,
                actual: view.executed.iter().copied().collect(),
                missing,
            });
        }

        if violations.is_empty() {
            tracing::debug!(nodes = nodes.len(), threshold, "quorum check passed");
        } else {
            tracing::info!(
                violations = violations.len(),
                threshold,
                "quorum check found missing steps"
            );
        }

        CheckReport {
            passed: violations.is_empty(),
            threshold,
            nodes,
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MessageType;

    fn recv(to: &str, from: &str, ty: MessageType, height: i64, round: i64) -> Observation {
        Observation::Received {
            receiver: to.into(),
            sender: from.into(),
            message_type: Some(ty),
            height,
            round,
        }
    }

    fn step(replica: &str, height: i64, round: i64) -> Observation {
        Observation::Step {
            replica: replica.into(),
            height,
            round,
        }
    }

    #[test]
    fn threshold_is_faults_plus_two() {
        assert_eq!(CheckerOptions::default().quorum_threshold(), 3);
        let options = CheckerOptions {
            faults: 2,
            votes_only: false,
        };
        assert_eq!(options.quorum_threshold(), 4);
    }

    #[test]
    fn quorum_without_step_is_missing() {
        let observations = vec![
            recv("node0", "node1", MessageType::Prevote, 1, 0),
            recv("node0", "node2", MessageType::Prevote, 1, 0),
            recv("node0", "node3", MessageType::Prevote, 1, 0),
        ];
        let report = QuorumChecker::new(CheckerOptions::default()).check(&observations);
        assert!(!report.passed);
        assert_eq!(report.nodes.len(), 1);
        assert_eq!(report.nodes[0].missing, vec![HeightRound::new(1, 0)]);
        assert_eq!(report.violations[0].senders, 3);
    }

    #[test]
    fn executed_steps_and_sub_quorum_steps_pass() {
        let observations = vec![
            recv("node0", "node1", MessageType::Prevote, 1, 0),
            recv("node0", "node2", MessageType::Prevote, 1, 0),
            recv("node0", "node3", MessageType::Prevote, 1, 0),
            step("node0", 1, 0),
            // Two senders only, and one of them repeats.
            recv("node0", "node1", MessageType::Prevote, 1, 1),
            recv("node0", "node1", MessageType::Precommit, 1, 1),
            recv("node0", "node2", MessageType::Prevote, 1, 1),
        ];
        let report = QuorumChecker::new(CheckerOptions::default()).check(&observations);
        assert!(report.passed, "{report:?}");
        assert_eq!(report.nodes[0].expected, vec![HeightRound::new(1, 0)]);
    }

    #[test]
    fn negative_rounds_are_ignored() {
        let observations = vec![
            recv("node0", "node1", MessageType::Prevote, 1, -1),
            recv("node0", "node2", MessageType::Prevote, 1, -1),
            recv("node0", "node3", MessageType::Prevote, 1, -1),
        ];
        let report = QuorumChecker::new(CheckerOptions::default()).check(&observations);
        assert!(report.passed);
        assert!(report.nodes.iter().all(|n| n.expected.is_empty()));
    }

    #[test]
    fn votes_only_discounts_proposals() {
        let observations = vec![
            recv("node0", "node1", MessageType::Proposal, 2, 0),
            recv("node0", "node2", MessageType::Prevote, 2, 0),
            recv("node0", "node3", MessageType::Prevote, 2, 0),
        ];
        let lenient = QuorumChecker::new(CheckerOptions::default()).check(&observations);
        assert!(!lenient.passed);
        let strict = QuorumChecker::new(CheckerOptions {
            faults: 1,
            votes_only: true,
        })
        .check(&observations);
        assert!(strict.passed);
    }

    #[test]
    fn every_node_is_reported_in_order() {
        let mut observations = Vec::new();
        for node in ["node2", "node1"] {
            for sender in ["node0", "node3", "node1", "node2"] {
                observations.push(recv(node, sender, MessageType::Precommit, 3, 2));
            }
            observations.push(recv(node, "node0", MessageType::Precommit, 3, 1));
        }
        observations.push(recv("node1", "node0", MessageType::Precommit, 3, 1));
        let report = QuorumChecker::new(CheckerOptions::default()).check(&observations);
        let names: Vec<&str> = report.nodes.iter().map(|n| n.node.as_str()).collect();
        assert_eq!(names, ["node1", "node2"]);
        assert_eq!(report.violations.len(), 2);
        assert!(report
            .nodes
            .iter()
            .all(|n| n.missing == vec![HeightRound::new(3, 2)]));
    }
}
