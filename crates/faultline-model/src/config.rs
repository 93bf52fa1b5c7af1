//! Fault configuration types and their canonical JSON form.
//!
//! The canonical form is the compact `serde_json` encoding of a
//! [`FaultConfig`]. It is both the wire document handed to the system under
//! test and the dedup key of the trial store, so field order and list order
//! are significant: two configs holding the same faults in a different order
//! are different keys.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::catalog::{MessageRole, MAX_STEPS, NUM_NODES};

/// Index of a replica in the cluster, `0..NUM_NODES`.
pub type NodeId = u8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("step {step} is out of range (max {max})", max = MAX_STEPS - 1)]
    StepOutOfRange { step: u8 },
    #[error("node {node} is out of range (cluster has {n} nodes)", n = NUM_NODES)]
    NodeOutOfRange { node: NodeId },
    #[error("invalid partition {partition}: {reason}")]
    InvalidPartition { partition: String, reason: String },
    #[error("corruption at step {step} has no target nodes")]
    EmptyTargets { step: u8 },
    #[error("corruption at step {step} targets node {node} more than once")]
    DuplicateTarget { step: u8, node: NodeId },
    #[error("unknown corruption type code {0}")]
    UnknownCorruptionType(u8),
    #[error("fault config JSON decode failed: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("fault config JSON encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Disjoint groups of nodes covering the whole cluster. Messages between
/// nodes of different groups are dropped while the partition is active.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Partition(Vec<Vec<NodeId>>);

impl Partition {
    /// Build a partition, checking that the groups are non-empty, pairwise
    /// disjoint and cover every node.
    pub fn new(groups: Vec<Vec<NodeId>>) -> Result<Self, ConfigError> {
        let partition = Partition(groups);
        partition.validate()?;
        Ok(partition)
    }

    pub(crate) fn from_static(groups: &[&[NodeId]]) -> Self {
        Partition(groups.iter().map(|g| g.to_vec()).collect())
    }

    pub fn groups(&self) -> &[Vec<NodeId>] {
        &self.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPartition {
            partition: self.to_string(),
            reason: reason.to_string(),
        };
        let mut seen = BTreeSet::new();
        for group in &self.0 {
            if group.is_empty() {
                return Err(invalid("empty group"));
            }
            for &node in group {
                if usize::from(node) >= NUM_NODES {
                    return Err(ConfigError::NodeOutOfRange { node });
                }
                if !seen.insert(node) {
                    return Err(invalid("groups overlap"));
                }
            }
        }
        if seen.len() != NUM_NODES {
            return Err(invalid("groups do not cover every node"));
        }
        Ok(())
    }

    /// True when `a` and `b` are in different groups.
    pub fn isolates(&self, a: NodeId, b: NodeId) -> bool {
        !self
            .0
            .iter()
            .any(|group| group.contains(&a) && group.contains(&b))
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<String> = self
            .0
            .iter()
            .map(|g| {
                let nodes: Vec<String> = g.iter().map(|n| n.to_string()).collect();
                format!("[{}]", nodes.join(","))
            })
            .collect();
        write!(f, "[{}]", groups.join(","))
    }
}

/// Drop every message crossing a partition boundary during one step.
///
/// Derived ordering (step first, then partition) is the canonical order in
/// which sampled drops are listed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageDrop {
    pub step: u8,
    pub partition: Partition,
}

impl MessageDrop {
    pub fn role(&self) -> MessageRole {
        MessageRole::for_step(self.step)
    }

    pub fn round(&self) -> u8 {
        self.step / 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CorruptionType {
    ChangeProposalToNil,
    ChangeVoteToNil,
    ChangeVoteRound,
    Omit,
    ChangeBlockId,
}

impl CorruptionType {
    pub const ALL: [CorruptionType; 5] = [
        CorruptionType::ChangeProposalToNil,
        CorruptionType::ChangeVoteToNil,
        CorruptionType::ChangeVoteRound,
        CorruptionType::Omit,
        CorruptionType::ChangeBlockId,
    ];

    pub fn code(self) -> u8 {
        match self {
            CorruptionType::ChangeProposalToNil => 0,
            CorruptionType::ChangeVoteToNil => 1,
            CorruptionType::ChangeVoteRound => 2,
            CorruptionType::Omit => 3,
            CorruptionType::ChangeBlockId => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CorruptionType::ChangeProposalToNil => "change-proposal-to-nil",
            CorruptionType::ChangeVoteToNil => "change-vote-to-nil",
            CorruptionType::ChangeVoteRound => "change-vote-round",
            CorruptionType::Omit => "omit",
            CorruptionType::ChangeBlockId => "change-block-id",
        }
    }
}

impl From<CorruptionType> for u8 {
    fn from(value: CorruptionType) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for CorruptionType {
    type Error = ConfigError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        CorruptionType::ALL
            .into_iter()
            .find(|ty| ty.code() == code)
            .ok_or(ConfigError::UnknownCorruptionType(code))
    }
}

impl fmt::Display for CorruptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Corrupt messages sent by `from_node` to any of `to_nodes` during `step`.
///
/// `seed` does not seed the trial. The system under test uses it to pick
/// which of the eligible messages gets corrupted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageCorruption {
    pub step: u8,
    pub from_node: NodeId,
    pub to_nodes: Vec<NodeId>,
    pub corruption_type: CorruptionType,
    pub seed: u32,
}

impl MessageCorruption {
    pub fn role(&self) -> MessageRole {
        MessageRole::for_step(self.step)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_step(self.step)?;
        check_node(self.from_node)?;
        if self.to_nodes.is_empty() {
            return Err(ConfigError::EmptyTargets { step: self.step });
        }
        let mut seen = BTreeSet::new();
        for &node in &self.to_nodes {
            check_node(node)?;
            if !seen.insert(node) {
                return Err(ConfigError::DuplicateTarget {
                    step: self.step,
                    node,
                });
            }
        }
        Ok(())
    }
}

fn check_step(step: u8) -> Result<(), ConfigError> {
    if step >= MAX_STEPS {
        return Err(ConfigError::StepOutOfRange { step });
    }
    Ok(())
}

fn check_node(node: NodeId) -> Result<(), ConfigError> {
    if usize::from(node) >= NUM_NODES {
        return Err(ConfigError::NodeOutOfRange { node });
    }
    Ok(())
}

/// Number of drops and corruptions in a config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub drops: usize,
    pub corruptions: usize,
}

impl Shape {
    pub fn new(drops: usize, corruptions: usize) -> Self {
        Shape { drops, corruptions }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d/{}c", self.drops, self.corruptions)
    }
}

/// All faults injected during one trial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaultConfig {
    pub drops: Vec<MessageDrop>,
    pub corruptions: Vec<MessageCorruption>,
}

impl FaultConfig {
    pub fn new(drops: Vec<MessageDrop>, corruptions: Vec<MessageCorruption>) -> Self {
        FaultConfig { drops, corruptions }
    }

    pub fn is_empty(&self) -> bool {
        self.drops.is_empty() && self.corruptions.is_empty()
    }

    pub fn shape(&self) -> Shape {
        Shape::new(self.drops.len(), self.corruptions.len())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for drop in &self.drops {
            check_step(drop.step)?;
            drop.partition.validate()?;
        }
        for corruption in &self.corruptions {
            corruption.validate()?;
        }
        Ok(())
    }

    pub fn canonical_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string(self).map_err(ConfigError::Encode)
    }

    /// Decode and validate a canonical (or any equivalent) JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: FaultConfig = serde_json::from_str(raw).map_err(ConfigError::Decode)?;
        config.validate()?;
        Ok(config)
    }

    /// SHA-256 of the canonical JSON, lowercase hex.
    pub fn fingerprint(&self) -> Result<String, ConfigError> {
        let canonical = self.canonical_json()?;
        let digest = Sha256::digest(canonical.as_bytes());
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolation_drop() -> MessageDrop {
        MessageDrop {
            step: 1,
            partition: Partition::new(vec![vec![0], vec![1], vec![2], vec![3]]).unwrap(),
        }
    }

    #[test]
    fn canonical_json_matches_wire_shape() {
        let config = FaultConfig::new(
            vec![isolation_drop()],
            vec![MessageCorruption {
                step: 3,
                from_node: 2,
                to_nodes: vec![0, 1],
                corruption_type: CorruptionType::Omit,
                seed: 42,
            }],
        );
        assert_eq!(
            config.canonical_json().unwrap(),
            r#"{"drops":[{"step":1,"partition":[[0],[1],[2],[3]]}],"corruptions":[{"step":3,"from_node":2,"to_nodes":[0,1],"corruption_type":3,"seed":42}]}"#
        );
    }

    #[test]
    fn empty_config_encodes_to_empty_lists() {
        let config = FaultConfig::default();
        assert!(config.is_empty());
        assert_eq!(
            config.canonical_json().unwrap(),
            r#"{"drops":[],"corruptions":[]}"#
        );
    }

    #[test]
    fn list_order_is_part_of_the_key() {
        let a = MessageDrop {
            step: 0,
            partition: Partition::new(vec![vec![0, 1], vec![2, 3]]).unwrap(),
        };
        let b = isolation_drop();
        let forward = FaultConfig::new(vec![a.clone(), b.clone()], vec![]);
        let reversed = FaultConfig::new(vec![b, a], vec![]);
        assert_ne!(forward, reversed);
        assert_ne!(
            forward.canonical_json().unwrap(),
            reversed.canonical_json().unwrap()
        );
        assert_ne!(
            forward.fingerprint().unwrap(),
            reversed.fingerprint().unwrap()
        );
    }

    #[test]
    fn partition_rejects_overlap_and_gaps() {
        assert!(matches!(
            Partition::new(vec![vec![0, 1], vec![1, 2, 3]]),
            Err(ConfigError::InvalidPartition { .. })
        ));
        assert!(matches!(
            Partition::new(vec![vec![0, 1], vec![2]]),
            Err(ConfigError::InvalidPartition { .. })
        ));
        assert!(matches!(
            Partition::new(vec![vec![0, 1], vec![2, 4]]),
            Err(ConfigError::NodeOutOfRange { node: 4 })
        ));
        assert!(matches!(
            Partition::new(vec![vec![], vec![0, 1, 2, 3]]),
            Err(ConfigError::InvalidPartition { .. })
        ));
    }

    #[test]
    fn partition_isolation() {
        let p = Partition::new(vec![vec![0], vec![1, 2, 3]]).unwrap();
        assert!(p.isolates(0, 1));
        assert!(p.isolates(3, 0));
        assert!(!p.isolates(1, 3));
        assert!(!p.isolates(0, 0));
    }

    #[test]
    fn from_json_rejects_invalid_faults() {
        let bad_step = r#"{"drops":[{"step":10,"partition":[[0],[1,2,3]]}],"corruptions":[]}"#;
        assert!(matches!(
            FaultConfig::from_json(bad_step),
            Err(ConfigError::StepOutOfRange { step: 10 })
        ));

        let bad_type = r#"{"drops":[],"corruptions":[{"step":0,"from_node":0,"to_nodes":[1],"corruption_type":9,"seed":0}]}"#;
        assert!(matches!(
            FaultConfig::from_json(bad_type),
            Err(ConfigError::Decode(_))
        ));

        let no_targets = r#"{"drops":[],"corruptions":[{"step":0,"from_node":0,"to_nodes":[],"corruption_type":3,"seed":0}]}"#;
        assert!(matches!(
            FaultConfig::from_json(no_targets),
            Err(ConfigError::EmptyTargets { step: 0 })
        ));
    }

    #[test]
    fn corruption_type_codes_round_trip() {
        for ty in CorruptionType::ALL {
            assert_eq!(CorruptionType::try_from(ty.code()).unwrap(), ty);
        }
        assert!(CorruptionType::try_from(5).is_err());
    }

    #[test]
    fn drop_role_and_round_follow_step() {
        let drop = MessageDrop {
            step: 7,
            partition: Partition::new(vec![vec![0, 1], vec![2, 3]]).unwrap(),
        };
        assert_eq!(drop.round(), 2);
        assert_eq!(drop.role(), MessageRole::Vote);
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = FaultConfig::default().fingerprint().unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
