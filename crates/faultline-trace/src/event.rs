//! Diagnostic records emitted by the system under test.
//!
//! Each line of the diagnostic stream is one JSON object whose `msg` field
//! names the record kind. Known kinds decode into [`Event`] variants; any
//! other object is kept as [`Event::Unrecognized`]. The raw object is kept
//! next to the decoded event so a trace can be written back out verbatim.

use std::fmt;
use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MSG_TESTCASE_SUCCEEDED: &str = "Testcase succeeded";
pub const MSG_TESTCASE_FAILED: &str = "Testcase failed";
pub const MSG_CONSENSUS_MESSAGE: &str = "Consensus message";
pub const MSG_CORRUPTION: &str = "Corruption";
pub const MSG_NEW_STEP: &str = "newStep";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Proposal,
    Prevote,
    Precommit,
}

impl MessageType {
    pub fn is_vote(self) -> bool {
        matches!(self, MessageType::Prevote | MessageType::Precommit)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Proposal => "Proposal",
            MessageType::Prevote => "Prevote",
            MessageType::Precommit => "Precommit",
        };
        f.write_str(name)
    }
}

/// A consensus message observed at send or delivery time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusMessage {
    pub is_send: bool,
    pub is_receive: bool,
    pub sent_from: String,
    pub sent_to: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub height: i64,
    pub round: i64,
}

/// A replica entering a new `(height, round)` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub replica: String,
    pub height: i64,
    pub round: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Succeeded,
    Failed,
}

impl Verdict {
    pub fn passed(self) -> bool {
        matches!(self, Verdict::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ConsensusMessage(ConsensusMessage),
    /// A corruption applied to the send recorded just before it.
    Corruption {
        kind: String,
    },
    NewStep(StepRecord),
    /// Terminal record: the trial is over.
    Verdict(Verdict),
    Unrecognized {
        msg: Option<String>,
    },
}

impl Event {
    /// Classify a decoded JSON object. Known `msg` kinds whose fields do not
    /// match the expected shape fall back to `Unrecognized`.
    pub fn from_value(value: &Value) -> Event {
        let msg = value.get("msg").and_then(Value::as_str);
        let decoded = match msg {
            Some(MSG_TESTCASE_SUCCEEDED) => Some(Event::Verdict(Verdict::Succeeded)),
            Some(MSG_TESTCASE_FAILED) => Some(Event::Verdict(Verdict::Failed)),
            Some(MSG_CONSENSUS_MESSAGE) => ConsensusMessage::deserialize(value)
                .ok()
                .map(Event::ConsensusMessage),
            Some(MSG_CORRUPTION) => value
                .get("type")
                .and_then(Value::as_str)
                .map(|kind| Event::Corruption {
                    kind: kind.to_string(),
                }),
            Some(MSG_NEW_STEP) => StepRecord::deserialize(value).ok().map(Event::NewStep),
            _ => None,
        };
        decoded.unwrap_or_else(|| Event::Unrecognized {
            msg: msg.map(str::to_string),
        })
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            Event::Verdict(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("diagnostic line is not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
}

/// One decoded diagnostic line.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub raw: Value,
    pub event: Event,
}

pub fn decode_line(line: &str) -> Result<TraceEntry, DecodeError> {
    let raw: Value = serde_json::from_str(line).map_err(DecodeError::Json)?;
    let event = Event::from_value(&raw);
    Ok(TraceEntry { raw, event })
}

/// A corruption record paired with the send it modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedCorruption<'a> {
    pub send: Option<&'a ConsensusMessage>,
    pub kind: &'a str,
}

/// Ordered events of one trial.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.entries.iter().map(|e| &e.event)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last terminal record, if the trial produced one.
    pub fn verdict(&self) -> Option<Verdict> {
        self.events().filter_map(Event::verdict).last()
    }

    pub fn corruptions(&self) -> Vec<AppliedCorruption<'_>> {
        let mut last_send = None;
        let mut out = Vec::new();
        for event in self.events() {
            match event {
                Event::ConsensusMessage(m) if m.is_send => last_send = Some(m),
                Event::Corruption { kind } => out.push(AppliedCorruption {
                    send: last_send,
                    kind,
                }),
                _ => {}
            }
        }
        out
    }

    /// Write every raw record as one JSON object per line.
    pub fn write_ndjson<W: Write>(&self, mut out: W) -> io::Result<()> {
        for entry in &self.entries {
            serde_json::to_writer(&mut out, &entry.raw)?;
            out.write_all(b"\n")?;
        }
        out.flush()
    }

    /// Read a newline-delimited trace. Lines that are not JSON are logged
    /// and skipped.
    pub fn read_ndjson<R: BufRead>(input: R) -> io::Result<Trace> {
        let mut trace = Trace::new();
        for (index, line) in input.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match decode_line(&line) {
                Ok(entry) => trace.push(entry),
                Err(e) => tracing::warn!(line = index + 1, "skipping trace line: {e}"),
            }
        }
        Ok(trace)
    }
}

impl FromIterator<TraceEntry> for Trace {
    fn from_iter<I: IntoIterator<Item = TraceEntry>>(iter: I) -> Self {
        Trace {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEND: &str = r#"{"level":"info","msg":"Consensus message","is_send":true,"is_receive":false,"sent_from":"node2","sent_to":"node0","type":"Prevote","height":1,"round":0}"#;

    #[test]
    fn decodes_consensus_message() {
        let entry = decode_line(SEND).unwrap();
        match entry.event {
            Event::ConsensusMessage(m) => {
                assert!(m.is_send);
                assert_eq!(m.sent_from, "node2");
                assert_eq!(m.message_type, MessageType::Prevote);
                assert_eq!((m.height, m.round), (1, 0));
            }
            other => panic!("expected consensus message, got {other:?}"),
        }
    }

    #[test]
    fn decodes_terminal_records() {
        let ok = decode_line(r#"{"msg":"Testcase succeeded"}"#).unwrap();
        assert_eq!(ok.event, Event::Verdict(Verdict::Succeeded));
        let failed = decode_line(r#"{"msg":"Testcase failed","level":"info"}"#).unwrap();
        assert_eq!(failed.event, Event::Verdict(Verdict::Failed));
    }

    #[test]
    fn unknown_and_malformed_kinds_are_kept_as_unrecognized() {
        let other = decode_line(r#"{"msg":"Partitioned replicas","partition":"..."}"#).unwrap();
        assert_eq!(
            other.event,
            Event::Unrecognized {
                msg: Some("Partitioned replicas".into())
            }
        );
        // Known kind, wrong field types.
        let broken = decode_line(r#"{"msg":"Consensus message","height":"one"}"#).unwrap();
        assert!(matches!(broken.event, Event::Unrecognized { .. }));
        let no_msg = decode_line(r#"{"level":"debug"}"#).unwrap();
        assert_eq!(no_msg.event, Event::Unrecognized { msg: None });
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(decode_line("panic: runtime error").is_err());
    }

    #[test]
    fn corruption_attaches_to_preceding_send() {
        let trace: Trace = [
            SEND,
            r#"{"msg":"Consensus message","is_send":false,"is_receive":true,"sent_from":"node2","sent_to":"node0","type":"Prevote","height":1,"round":0}"#,
            r#"{"msg":"Corruption","type":"omit"}"#,
        ]
        .iter()
        .map(|l| decode_line(l).unwrap())
        .collect();
        let applied = trace.corruptions();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].kind, "omit");
        assert_eq!(applied[0].send.map(|s| s.sent_from.as_str()), Some("node2"));
        assert!(applied[0].send.map(|s| s.is_send).unwrap_or(false));
    }

    #[test]
    fn ndjson_round_trip_is_verbatim() {
        let input = format!("{SEND}\nnot json\n\n{}\n", r#"{"msg":"Testcase failed"}"#);
        let trace = Trace::read_ndjson(input.as_bytes()).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.verdict(), Some(Verdict::Failed));

        let mut out = Vec::new();
        trace.write_ndjson(&mut out).unwrap();
        let reread = Trace::read_ndjson(out.as_slice()).unwrap();
        assert_eq!(reread, trace);
    }

    #[test]
    fn trace_without_terminal_record_has_no_verdict() {
        let trace: Trace = [SEND].iter().map(|l| decode_line(l).unwrap()).collect();
        assert_eq!(trace.verdict(), None);
    }
}
