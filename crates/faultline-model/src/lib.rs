//! Fault model for BFT fault-injection campaigns.
//!
//! A campaign explores a combinatorial space of faults against a fixed
//! 4-replica cluster: network partitions applied during one protocol step
//! ([`MessageDrop`]) and message corruptions emitted by a single Byzantine
//! replica ([`MessageCorruption`]). A [`FaultConfig`] bundles both and is the
//! unit of one trial.

pub mod catalog;
pub mod config;
pub mod sampler;

pub use catalog::{CorruptionScope, MessageRole, MAX_STEPS, NUM_NODES, SEED_MAX};
pub use config::{
    ConfigError, CorruptionType, FaultConfig, MessageCorruption, MessageDrop, NodeId, Partition,
    Shape,
};
pub use sampler::{
    sample_shape, ConfigSampler, FaultCount, GridCell, SamplerError, SamplerSettings,
    StratifiedGrid,
};
