use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event::{decode_line, Event, MessageType};

pub const ADAPTER_DIAGNOSTIC: &str = "diagnostic";
pub const ADAPTER_SPEC_LOG: &str = "spec-log";
pub const ADAPTER_FAMILIES: [&str; 2] = [ADAPTER_DIAGNOSTIC, ADAPTER_SPEC_LOG];

/// Trace formats the checker can ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    /// The system under test's diagnostic stream, as persisted per trial.
    Diagnostic,
    /// Per-replica step/message log written by the round tracker.
    SpecLog,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Diagnostic => ADAPTER_DIAGNOSTIC,
            AdapterKind::SpecLog => ADAPTER_SPEC_LOG,
        }
    }
}

impl FromStr for AdapterKind {
    type Err = AdapterError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            ADAPTER_DIAGNOSTIC => Ok(AdapterKind::Diagnostic),
            ADAPTER_SPEC_LOG => Ok(AdapterKind::SpecLog),
            other => Err(AdapterError::UnknownAdapter(other.into())),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unknown trace adapter '{0}' (expected one of: diagnostic, spec-log)")]
    UnknownAdapter(String),
    #[error("{family} adapter: line {line} is not valid JSON: {source}")]
    Decode {
        family: &'static str,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("{family} adapter: line {line} invalid: {message}")]
    Invalid {
        family: &'static str,
        line: usize,
        message: String,
    },
}

/// What one replica saw or did, normalized across trace formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    /// `receiver` was delivered a message from `sender` tagged with
    /// `(height, round)`.
    Received {
        receiver: String,
        sender: String,
        message_type: Option<MessageType>,
        height: i64,
        round: i64,
    },
    /// `replica` executed step `(height, round)`.
    Step {
        replica: String,
        height: i64,
        round: i64,
    },
}

/// Stable interface for trace-format adapters.
pub trait TraceAdapter {
    fn kind(&self) -> AdapterKind;
    fn adapt(&self, raw: &str) -> Result<Vec<Observation>, AdapterError>;
}

pub fn adapt_trace(kind: AdapterKind, raw: &str) -> Result<Vec<Observation>, AdapterError> {
    let adapter: &dyn TraceAdapter = match kind {
        AdapterKind::Diagnostic => &DiagnosticAdapter,
        AdapterKind::SpecLog => &SpecLogAdapter,
    };
    let observations = adapter.adapt(raw)?;
    tracing::debug!(
        adapter = adapter.kind().as_str(),
        observations = observations.len(),
        "trace adapted"
    );
    Ok(observations)
}

struct DiagnosticAdapter;

impl TraceAdapter for DiagnosticAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Diagnostic
    }

    fn adapt(&self, raw: &str) -> Result<Vec<Observation>, AdapterError> {
        let mut observations = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            // Same leniency as the live runner: stray non-JSON output is noise.
            let entry = match decode_line(line) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(line = index + 1, "skipping diagnostic line: {e}");
                    continue;
                }
            };
            match entry.event {
                Event::ConsensusMessage(m) if m.is_receive => {
                    observations.push(Observation::Received {
                        receiver: m.sent_to,
                        sender: m.sent_from,
                        message_type: Some(m.message_type),
                        height: m.height,
                        round: m.round,
                    });
                }
                Event::NewStep(step) => observations.push(Observation::Step {
                    replica: step.replica,
                    height: step.height,
                    round: step.round,
                }),
                _ => {}
            }
        }
        Ok(observations)
    }
}

struct SpecLogAdapter;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SpecLogRecord {
    Step {
        #[serde(rename = "Replica")]
        replica: String,
        #[serde(rename = "Height")]
        height: i64,
        #[serde(rename = "Round")]
        round: i64,
    },
    Message {
        #[serde(rename = "From")]
        from: String,
        #[serde(rename = "To")]
        to: String,
        #[serde(rename = "Height")]
        height: i64,
        #[serde(rename = "Round")]
        round: i64,
    },
}

impl TraceAdapter for SpecLogAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::SpecLog
    }

    fn adapt(&self, raw: &str) -> Result<Vec<Observation>, AdapterError> {
        let mut observations = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let value: Value =
                serde_json::from_str(line).map_err(|source| AdapterError::Decode {
                    family: ADAPTER_SPEC_LOG,
                    line: index + 1,
                    source,
                })?;
            let record =
                SpecLogRecord::deserialize(&value).map_err(|_| AdapterError::Invalid {
                    family: ADAPTER_SPEC_LOG,
                    line: index + 1,
                    message: "expected {Replica, Height, Round} or {From, To, Height, Round}"
                        .into(),
                })?;
            observations.push(match record {
                SpecLogRecord::Step {
                    replica,
                    height,
                    round,
                } => Observation::Step {
                    replica,
                    height,
                    round,
                },
                // The tracker only records deliveries, and only of votes.
                SpecLogRecord::Message {
                    from,
                    to,
                    height,
                    round,
                } => Observation::Received {
                    receiver: to,
                    sender: from,
                    message_type: None,
                    height,
                    round,
                },
            });
        }
        Ok(observations)
    }
}
