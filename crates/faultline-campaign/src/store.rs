//! Durable table of fault configs and their pass/fail tallies.

use std::path::Path;

use faultline_model::{ConfigError, CorruptionScope, FaultConfig, Shape};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS trials (
    id INTEGER PRIMARY KEY,
    config TEXT NOT NULL UNIQUE,
    fingerprint TEXT NOT NULL,
    num_drops INTEGER NOT NULL,
    num_corruptions INTEGER NOT NULL,
    pass INTEGER NOT NULL DEFAULT 0,
    fail INTEGER NOT NULL DEFAULT 0,
    is_final INTEGER
);
CREATE INDEX IF NOT EXISTS trials_by_shape ON trials (num_drops, num_corruptions);
CREATE TABLE IF NOT EXISTS campaign_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const SELECT_TRIAL: &str =
    "SELECT id, config, num_drops, num_corruptions, pass, fail, is_final, fingerprint FROM trials";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("trial store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored config is invalid: {0}")]
    Config(#[from] ConfigError),
    #[error("trial store has schema version {found}, expected {SCHEMA_VERSION}")]
    UnsupportedSchema { found: i64 },
    #[error("trial store was created with corruption scope '{stored}', not '{requested}'")]
    ScopeMismatch { stored: String, requested: String },
    #[error("trial store metadata is corrupt: {0}")]
    InvalidScope(String),
    #[error("no trial with id {0}")]
    UnknownTrial(i64),
}

/// Where a trial stands with respect to the fail threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Never passed and failed at least the threshold.
    Confirmed,
    /// Passed at least once.
    NotReproducible,
    Undecided,
}

/// Tallies after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialCounts {
    pub id: i64,
    pub pass: u32,
    pub fail: u32,
}

impl TrialCounts {
    pub fn status(&self, threshold: u32) -> TrialStatus {
        classify(self.pass, self.fail, threshold)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialRecord {
    pub id: i64,
    pub config: FaultConfig,
    /// SHA-256 of the canonical config.
    pub fingerprint: String,
    pub pass: u32,
    pub fail: u32,
    pub is_final: bool,
}

impl TrialRecord {
    pub fn shape(&self) -> Shape {
        self.config.shape()
    }

    pub fn status(&self, threshold: u32) -> TrialStatus {
        classify(self.pass, self.fail, threshold)
    }
}

fn classify(pass: u32, fail: u32, threshold: u32) -> TrialStatus {
    if pass > 0 {
        TrialStatus::NotReproducible
    } else if fail >= threshold {
        TrialStatus::Confirmed
    } else {
        TrialStatus::Undecided
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub confirmed: usize,
    pub not_reproducible: usize,
    pub undecided: usize,
    #[serde(rename = "final")]
    pub final_count: usize,
}

impl StatusCounts {
    fn add(&mut self, status: TrialStatus, is_final: bool) {
        self.total += 1;
        match status {
            TrialStatus::Confirmed => self.confirmed += 1,
            TrialStatus::NotReproducible => self.not_reproducible += 1,
            TrialStatus::Undecided => self.undecided += 1,
        }
        if is_final {
            self.final_count += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShapeSummary {
    pub shape: Shape,
    #[serde(flatten)]
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub threshold: u32,
    pub scope: Option<CorruptionScope>,
    #[serde(flatten)]
    pub counts: StatusCounts,
    pub shapes: Vec<ShapeSummary>,
}

struct RawTrial {
    id: i64,
    config: String,
    fingerprint: String,
    pass: u32,
    fail: u32,
    is_final: bool,
}

impl RawTrial {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawTrial {
            id: row.get(0)?,
            config: row.get(1)?,
            fingerprint: row.get(7)?,
            pass: row.get(4)?,
            fail: row.get(5)?,
            is_final: row.get::<_, Option<i64>>(6)?.unwrap_or(0) != 0,
        })
    }

    fn decode(self) -> Result<TrialRecord, StoreError> {
        Ok(TrialRecord {
            id: self.id,
            config: FaultConfig::from_json(&self.config)?,
            fingerprint: self.fingerprint,
            pass: self.pass,
            fail: self.fail,
            is_final: self.is_final,
        })
    }
}

pub struct TrialStore {
    conn: Connection,
}

impl TrialStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        match version {
            0 => {
                conn.execute_batch(SCHEMA)?;
                conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            }
            SCHEMA_VERSION => {}
            found => return Err(StoreError::UnsupportedSchema { found }),
        }
        Ok(Self { conn })
    }

    /// The corruption scope recorded by the first sampling campaign.
    pub fn scope(&self) -> Result<Option<CorruptionScope>, StoreError> {
        let stored: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM campaign_meta WHERE key = 'scope'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        stored
            .map(|raw| raw.parse().map_err(StoreError::InvalidScope))
            .transpose()
    }

    /// Record `scope` on first use; reject a different one afterwards.
    pub fn bind_scope(&self, scope: CorruptionScope) -> Result<(), StoreError> {
        match self.scope()? {
            Some(stored) if stored == scope => Ok(()),
            Some(stored) => Err(StoreError::ScopeMismatch {
                stored: stored.to_string(),
                requested: scope.to_string(),
            }),
            None => {
                self.conn.execute(
                    "INSERT INTO campaign_meta (key, value) VALUES ('scope', ?1)",
                    params![scope.as_str()],
                )?;
                Ok(())
            }
        }
    }

    /// Add `config` with zero tallies unless it is already stored. Returns
    /// its id either way.
    pub fn insert(&self, config: &FaultConfig) -> Result<i64, StoreError> {
        let canonical = config.canonical_json()?;
        let shape = config.shape();
        self.conn.execute(
            "INSERT INTO trials (config, fingerprint, num_drops, num_corruptions)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (config) DO NOTHING",
            params![
                canonical,
                config.fingerprint()?,
                shape.drops as i64,
                shape.corruptions as i64
            ],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM trials WHERE config = ?1",
            params![canonical],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Store `config` with one outcome, or fold the outcome into the
    /// existing record.
    pub fn insert_with_outcome(
        &self,
        config: &FaultConfig,
        passed: bool,
    ) -> Result<TrialCounts, StoreError> {
        let shape = config.shape();
        let (pass, fail) = if passed { (1, 0) } else { (0, 1) };
        let counts = self.conn.query_row(
            "INSERT INTO trials (config, fingerprint, num_drops, num_corruptions, pass, fail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (config) DO UPDATE SET
                 pass = pass + excluded.pass,
                 fail = fail + excluded.fail
             RETURNING id, pass, fail",
            params![
                config.canonical_json()?,
                config.fingerprint()?,
                shape.drops as i64,
                shape.corruptions as i64,
                pass,
                fail
            ],
            |row| {
                Ok(TrialCounts {
                    id: row.get(0)?,
                    pass: row.get(1)?,
                    fail: row.get(2)?,
                })
            },
        )?;
        Ok(counts)
    }

    /// Insert every config in one transaction and return their ids in
    /// order. A config that is already stored aborts the whole batch.
    /// With `is_final` the rows are flagged as final in the same
    /// transaction.
    pub fn insert_all<'a, I>(
        &mut self,
        configs: I,
        is_final: bool,
    ) -> Result<Vec<i64>, StoreError>
    where
        I: IntoIterator<Item = &'a FaultConfig>,
    {
        let flag = is_final.then_some(1_i64);
        let tx = self.conn.transaction()?;
        let mut ids = Vec::new();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO trials (config, fingerprint, num_drops, num_corruptions, is_final)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING id",
            )?;
            for config in configs {
                let shape = config.shape();
                let id = stmt.query_row(
                    params![
                        config.canonical_json()?,
                        config.fingerprint()?,
                        shape.drops as i64,
                        shape.corruptions as i64,
                        flag
                    ],
                    |row| row.get(0),
                )?;
                ids.push(id);
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    pub fn record_pass(&self, id: i64) -> Result<TrialCounts, StoreError> {
        self.bump(id, "UPDATE trials SET pass = pass + 1 WHERE id = ?1 RETURNING id, pass, fail")
    }

    pub fn record_fail(&self, id: i64) -> Result<TrialCounts, StoreError> {
        self.bump(id, "UPDATE trials SET fail = fail + 1 WHERE id = ?1 RETURNING id, pass, fail")
    }

    fn bump(&self, id: i64, sql: &str) -> Result<TrialCounts, StoreError> {
        self.conn
            .query_row(sql, params![id], |row| {
                Ok(TrialCounts {
                    id: row.get(0)?,
                    pass: row.get(1)?,
                    fail: row.get(2)?,
                })
            })
            .optional()?
            .ok_or(StoreError::UnknownTrial(id))
    }

    /// Trials that never passed and have fewer than `threshold` failures.
    pub fn select_undecided(&self, threshold: u32) -> Result<Vec<TrialRecord>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_TRIAL} WHERE pass = 0 AND fail < ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![threshold], RawTrial::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawTrial::decode).collect()
    }

    pub fn get(&self, id: i64) -> Result<Option<TrialRecord>, StoreError> {
        let raw = self
            .conn
            .query_row(
                &format!("{SELECT_TRIAL} WHERE id = ?1"),
                params![id],
                RawTrial::from_row,
            )
            .optional()?;
        raw.map(RawTrial::decode).transpose()
    }

    /// Trials whose fingerprint starts with `prefix`, oldest first.
    pub fn find_by_fingerprint(&self, prefix: &str) -> Result<Vec<TrialRecord>, StoreError> {
        let prefix = prefix.to_ascii_lowercase();
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_TRIAL} WHERE substr(fingerprint, 1, length(?1)) = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![prefix], RawTrial::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawTrial::decode).collect()
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM trials", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn count_by_shape(&self, shape: Shape) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM trials WHERE num_drops = ?1 AND num_corruptions = ?2",
            params![shape.drops as i64, shape.corruptions as i64],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn count_final_by_shape(&self, shape: Shape) -> Result<usize, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM trials
             WHERE num_drops = ?1 AND num_corruptions = ?2 AND is_final = 1",
            params![shape.drops as i64, shape.corruptions as i64],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// The `limit` oldest trial ids of `shape`.
    pub fn first_ids_by_shape(&self, shape: Shape, limit: usize) -> Result<Vec<i64>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM trials
             WHERE num_drops = ?1 AND num_corruptions = ?2
             ORDER BY id LIMIT ?3",
        )?;
        let ids = stmt
            .query_map(
                params![shape.drops as i64, shape.corruptions as i64, limit as i64],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Flag `ids` as part of the final sample. Returns the rows touched.
    pub fn mark_final(&self, ids: &[i64]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("UPDATE trials SET is_final = 1 WHERE id IN ({placeholders})");
        Ok(self.conn.execute(&sql, params_from_iter(ids.iter()))?)
    }

    pub fn summary(&self, threshold: u32) -> Result<StoreSummary, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT num_drops, num_corruptions, pass, fail, is_final FROM trials
             ORDER BY num_drops, num_corruptions",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Option<i64>>(4)?.unwrap_or(0) != 0,
            ))
        })?;

        let mut summary = StoreSummary {
            threshold,
            scope: self.scope()?,
            ..StoreSummary::default()
        };
        for row in rows {
            let (drops, corruptions, pass, fail, is_final) = row?;
            let shape = Shape::new(drops as usize, corruptions as usize);
            let status = classify(pass, fail, threshold);
            summary.counts.add(status, is_final);
            match summary.shapes.last_mut() {
                Some(last) if last.shape == shape => last.counts.add(status, is_final),
                _ => {
                    let mut counts = StatusCounts::default();
                    counts.add(status, is_final);
                    summary.shapes.push(ShapeSummary { shape, counts });
                }
            }
        }
        Ok(summary)
    }
}
