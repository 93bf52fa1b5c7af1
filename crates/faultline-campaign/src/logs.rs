//! Per-trial trace files.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use faultline_trace::Trace;

/// Why a trace was written, which decides its file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    /// Fuzz execution; `execution` is the record's run count including this
    /// one. Later fuzz hits on an existing record get their own file.
    Fuzz { execution: u32 },
    /// Re-execution during deflaking, suffixed by its verdict.
    Deflake { passed: bool },
}

/// Directory holding every trial trace of a campaign.
#[derive(Debug, Clone)]
pub struct TraceLog {
    dir: PathBuf,
}

impl TraceLog {
    pub fn create(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: i64, kind: TraceKind) -> PathBuf {
        let name = match kind {
            TraceKind::Fuzz { execution: 0 | 1 } => format!("events{id:06}.log"),
            TraceKind::Fuzz { execution } => format!("events{id:06}_fuzz{execution}.log"),
            TraceKind::Deflake { passed: true } => format!("events{id:06}_pass.log"),
            TraceKind::Deflake { passed: false } => format!("events{id:06}_fail.log"),
        };
        self.dir.join(name)
    }

    /// Write `trace` as newline-delimited JSON. Deflake traces replace any
    /// earlier file for the same trial and outcome.
    pub fn write(&self, id: i64, kind: TraceKind, trace: &Trace) -> io::Result<PathBuf> {
        let path = self.path_for(id, kind);
        let file = File::create(&path)?;
        trace.write_ndjson(BufWriter::new(file))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_trace::decode_line;

    #[test]
    fn file_names_are_zero_padded() {
        let log = TraceLog {
            dir: PathBuf::from("logs"),
        };
        assert_eq!(
            log.path_for(7, TraceKind::Fuzz { execution: 1 }),
            PathBuf::from("logs/events000007.log")
        );
        assert_eq!(
            log.path_for(7, TraceKind::Fuzz { execution: 3 }),
            PathBuf::from("logs/events000007_fuzz3.log")
        );
        assert_eq!(
            log.path_for(123456, TraceKind::Deflake { passed: true }),
            PathBuf::from("logs/events123456_pass.log")
        );
        assert_eq!(
            log.path_for(42, TraceKind::Deflake { passed: false }),
            PathBuf::from("logs/events000042_fail.log")
        );
    }

    #[test]
    fn writes_trace_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let log = TraceLog::create(dir.path().join("nested/logs")).unwrap();
        let line = r#"{"msg":"Testcase succeeded","level":"info"}"#;
        let trace: Trace = std::iter::once(decode_line(line).unwrap()).collect();
        let path = log.write(3, TraceKind::Fuzz { execution: 1 }, &trace).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), format!("{line}\n"));
    }
}
