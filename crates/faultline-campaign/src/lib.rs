//! Fault-injection campaigns against an external consensus implementation.
//!
//! [`runner`] executes one fault config against the system under test,
//! [`store`] keeps every config with its pass/fail tallies, and
//! [`controller`] composes them into the fuzz, deflake and reproduce loops.

pub mod cancel;
pub mod controller;
pub mod logs;
pub mod runner;
pub mod store;

pub use cancel::CancelToken;
pub use controller::{
    quick_tests, tag_final, Campaign, CampaignError, CampaignSettings, LoopReport, QuickCheck,
    QuickTestReport, ReproduceSummary, StepOutcome,
};
pub use logs::{TraceKind, TraceLog};
pub use runner::{RunnerError, SubprocessRunner, SutCommand, TrialExecutor, TrialOutcome};
pub use store::{
    ShapeSummary, StatusCounts, StoreError, StoreSummary, TrialCounts, TrialRecord, TrialStatus,
    TrialStore, SCHEMA_VERSION,
};
