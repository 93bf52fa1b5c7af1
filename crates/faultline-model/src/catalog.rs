//! Static fault catalog: partitions, drop descriptors, target subsets and
//! role-scoped corruption types.
//!
//! Everything here is read-only data built on first use.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::config::{CorruptionType, MessageDrop, NodeId, Partition};

/// Replicas in the cluster under test.
pub const NUM_NODES: usize = 4;

/// Logical protocol steps a fault may target. Step `s` is round `s / 3`.
pub const MAX_STEPS: u8 = 10;

/// Upper bound (inclusive) of corruption seeds. Comfortably above the
/// number of messages exchanged during a trial window.
pub const SEED_MAX: u32 = 10_000;

// The single-group partition is left out: it never separates anyone.
const PARTITION_TABLE: [&[&[NodeId]]; 14] = [
    // two groups
    &[&[0, 1], &[2, 3]],
    &[&[0, 2], &[1, 3]],
    &[&[0, 3], &[1, 2]],
    &[&[0], &[1, 2, 3]],
    &[&[1], &[0, 2, 3]],
    &[&[2], &[0, 1, 3]],
    &[&[3], &[0, 1, 2]],
    // three groups
    &[&[0], &[1], &[2, 3]],
    &[&[0], &[2], &[1, 3]],
    &[&[0], &[3], &[1, 2]],
    &[&[1], &[2], &[0, 3]],
    &[&[1], &[3], &[0, 2]],
    &[&[2], &[3], &[0, 1]],
    // four groups
    &[&[0], &[1], &[2], &[3]],
];

/// Every non-trivial partition of the cluster.
pub static ALL_PARTITIONS: LazyLock<Vec<Partition>> = LazyLock::new(|| {
    PARTITION_TABLE
        .iter()
        .map(|groups| Partition::from_static(groups))
        .collect()
});

/// Every `(step, partition)` drop descriptor, step-major.
pub static ALL_DROPS: LazyLock<Vec<MessageDrop>> = LazyLock::new(|| {
    (0..MAX_STEPS)
        .flat_map(|step| {
            ALL_PARTITIONS.iter().map(move |partition| MessageDrop {
                step,
                partition: partition.clone(),
            })
        })
        .collect()
});

/// Every non-empty subset of the cluster, largest first.
pub const ALL_SUBSETS: [&[NodeId]; 15] = [
    &[0, 1, 2, 3],
    &[0, 1, 2],
    &[0, 1, 3],
    &[0, 2, 3],
    &[1, 2, 3],
    &[0, 1],
    &[0, 2],
    &[0, 3],
    &[1, 2],
    &[1, 3],
    &[2, 3],
    &[0],
    &[1],
    &[2],
    &[3],
];

/// The kind of message a step carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    Proposal,
    /// Prevote or precommit.
    Vote,
}

impl MessageRole {
    pub fn for_step(step: u8) -> Self {
        if step % 3 == 0 {
            MessageRole::Proposal
        } else {
            MessageRole::Vote
        }
    }
}

/// Which corruption types a campaign may inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptionScope {
    /// Block-id changes and omissions only.
    #[default]
    Small,
    /// Additionally forces proposals and votes to nil and shifts vote rounds.
    Any,
}

const SMALL_PROPOSAL: &[CorruptionType] = &[CorruptionType::ChangeBlockId, CorruptionType::Omit];
const SMALL_VOTE: &[CorruptionType] = &[CorruptionType::ChangeBlockId, CorruptionType::Omit];
const ANY_PROPOSAL: &[CorruptionType] = &[
    CorruptionType::ChangeBlockId,
    CorruptionType::Omit,
    CorruptionType::ChangeProposalToNil,
];
const ANY_VOTE: &[CorruptionType] = &[
    CorruptionType::ChangeBlockId,
    CorruptionType::Omit,
    CorruptionType::ChangeVoteToNil,
    CorruptionType::ChangeVoteRound,
];

impl CorruptionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorruptionScope::Small => "small",
            CorruptionScope::Any => "any",
        }
    }

    pub fn corruption_types(&self, role: MessageRole) -> &'static [CorruptionType] {
        match (self, role) {
            (CorruptionScope::Small, MessageRole::Proposal) => SMALL_PROPOSAL,
            (CorruptionScope::Small, MessageRole::Vote) => SMALL_VOTE,
            (CorruptionScope::Any, MessageRole::Proposal) => ANY_PROPOSAL,
            (CorruptionScope::Any, MessageRole::Vote) => ANY_VOTE,
        }
    }
}

impl fmt::Display for CorruptionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CorruptionScope {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(CorruptionScope::Small),
            "any" => Ok(CorruptionScope::Any),
            other => Err(format!(
                "unknown corruption scope '{other}' (expected small|any)"
            )),
        }
    }
}
