//! Trace handling for fault-injection trials.
//!
//! The system under test reports what happened during a trial as
//! newline-delimited JSON on its diagnostic stream. [`event`] decodes those
//! records into a tagged union, [`adapters`] normalizes persisted traces into
//! per-node observations, and [`checker`] derives the quorum liveness oracle
//! from them.

pub mod adapters;
pub mod checker;
pub mod event;

pub use adapters::{adapt_trace, AdapterError, AdapterKind, Observation, TraceAdapter};
pub use checker::{
    CheckReport, CheckerOptions, HeightRound, NodeReport, QuorumChecker, Violation,
};
pub use event::{
    decode_line, AppliedCorruption, DecodeError, Event, MessageType, Trace, TraceEntry, Verdict,
};
