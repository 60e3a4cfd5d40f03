//! Decision store (C5): transactional, append-only SQLite log of decisions,
//! tool calls, LLM transcripts (hashes only), and observation history.

use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::audit::{canonical_json, hash_envelope};
use crate::error::{CortexError, CortexResult};
use crate::model::{Candidate, DecisionRecord, Observation, OutcomeFeedback};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS decisions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trace_id TEXT UNIQUE NOT NULL,
    timestamp_unix_us INTEGER NOT NULL,
    observation_json TEXT NOT NULL,
    observation_hash TEXT NOT NULL,
    action TEXT NOT NULL,
    target_speed_rpm REAL NOT NULL,
    confidence REAL NOT NULL,
    reasoning TEXT,
    constraints_json TEXT NOT NULL,
    constraints_hash TEXT NOT NULL,
    engine TEXT NOT NULL DEFAULT 'baseline',
    model TEXT,
    llm_latency_ms INTEGER,
    llm_output_hash TEXT,
    approved INTEGER NOT NULL DEFAULT 0,
    violations_json TEXT NOT NULL DEFAULT '[]',
    warnings_json TEXT NOT NULL DEFAULT '[]',
    spine_accepted INTEGER DEFAULT NULL,
    actual_speed_rpm REAL DEFAULT NULL,
    outcome_timestamp_us INTEGER DEFAULT NULL,
    outcome_notes TEXT DEFAULT NULL
);
CREATE INDEX IF NOT EXISTS idx_decisions_timestamp ON decisions(timestamp_unix_us);
CREATE INDEX IF NOT EXISTS idx_decisions_hash ON decisions(observation_hash);
CREATE INDEX IF NOT EXISTS idx_decisions_engine ON decisions(engine);
CREATE INDEX IF NOT EXISTS idx_decisions_approved ON decisions(approved);

CREATE TABLE IF NOT EXISTS tool_calls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trace_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    timestamp_unix_us INTEGER NOT NULL,
    tool_name TEXT NOT NULL,
    args_json TEXT NOT NULL,
    args_hash TEXT NOT NULL,
    result_hash TEXT,
    FOREIGN KEY (trace_id) REFERENCES decisions(trace_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_tool_calls_trace ON tool_calls(trace_id);
CREATE INDEX IF NOT EXISTS idx_tool_calls_name ON tool_calls(tool_name);

CREATE TABLE IF NOT EXISTS llm_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trace_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT,
    tool_call_id TEXT DEFAULT NULL,
    tool_calls_json TEXT DEFAULT NULL,
    FOREIGN KEY (trace_id) REFERENCES decisions(trace_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_llm_messages_trace ON llm_messages(trace_id);

CREATE TABLE IF NOT EXISTS observation_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp_unix_us INTEGER NOT NULL,
    motor_speed_rpm REAL NOT NULL,
    motor_temp_c REAL NOT NULL,
    pressure_bar REAL NOT NULL,
    safety_state TEXT NOT NULL,
    cycle_jitter_us INTEGER NOT NULL DEFAULT 0,
    cycle_count INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_history_timestamp ON observation_history(timestamp_unix_us DESC);
"#;

pub struct ObservationRow {
    pub timestamp_unix_us: u64,
    pub motor_speed_rpm: f64,
    pub motor_temp_c: f64,
    pub pressure_bar: f64,
}

pub struct DecisionRow {
    pub trace_id: String,
    pub timestamp_unix_us: u64,
    pub observation_json: String,
    pub action: String,
    pub target_speed_rpm: f64,
    pub confidence: f64,
    pub reasoning: Option<String>,
    pub engine: String,
    pub approved: bool,
    pub spine_accepted: Option<bool>,
}

pub struct DecisionStore {
    conn: Mutex<Connection>,
    max_decisions: usize,
}

impl DecisionStore {
    pub fn open(path: &str, max_decisions: usize) -> CortexResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CortexError::PersistenceFailure(format!("open {path}: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| CortexError::PersistenceFailure(format!("init schema: {e}")))?;
        Ok(DecisionStore {
            conn: Mutex::new(conn),
            max_decisions,
        })
    }

    pub fn open_in_memory(max_decisions: usize) -> CortexResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| CortexError::PersistenceFailure(format!("init schema: {e}")))?;
        Ok(DecisionStore {
            conn: Mutex::new(conn),
            max_decisions,
        })
    }

    pub fn record_decision(&self, record: &DecisionRecord) -> CortexResult<()> {
        let observation_json = serde_json::to_string(&record.observation)?;
        let observation_hash = hash_envelope(&serde_json::json!({ "observation": &record.observation }));
        let constraints_json = serde_json::to_string(&record.constraints)?;
        let constraints_hash = hash_envelope(&serde_json::json!({ "constraints": &record.constraints }));
        let violations_json = serde_json::to_string(&record.violations)?;
        let warnings_json = serde_json::to_string(&record.warnings)?;
        let action_str = canonical_action(&record.candidate);

        let mut conn = self.conn.lock().expect("store lock poisoned");
        let tx = conn
            .transaction()
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;

        tx.execute(
            "INSERT INTO decisions (
                trace_id, timestamp_unix_us, observation_json, observation_hash,
                action, target_speed_rpm, confidence, reasoning,
                constraints_json, constraints_hash, engine, model,
                llm_latency_ms, llm_output_hash, approved, violations_json, warnings_json
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            params![
                record.trace_id,
                record.timestamp_unix_us as i64,
                observation_json,
                observation_hash,
                action_str,
                record.candidate.target_speed_rpm,
                record.candidate.confidence,
                record.candidate.reasoning,
                constraints_json,
                constraints_hash,
                record.engine,
                record.model,
                record.llm_latency_ms.map(|v| v as i64),
                record.llm_output_hash,
                record.approved as i64,
                violations_json,
                warnings_json,
            ],
        )
        .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;

        for (seq, trace) in record.tool_traces.iter().enumerate() {
            tx.execute(
                "INSERT INTO tool_calls (trace_id, sequence, timestamp_unix_us, tool_name, args_hash, result_hash)
                 VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    record.trace_id,
                    seq as i64,
                    record.timestamp_unix_us as i64,
                    trace.name,
                    trace.args_hash,
                    trace.result_hash,
                ],
            )
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;
        drop(conn);

        self.maybe_prune()?;
        Ok(())
    }

    pub fn record_feedback(&self, feedback: &OutcomeFeedback) -> CortexResult<bool> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let updated = conn
            .execute(
                "UPDATE decisions SET spine_accepted=?1, actual_speed_rpm=?2, outcome_timestamp_us=?3, outcome_notes=?4
                 WHERE trace_id=?5",
                params![
                    feedback.spine_accepted as i64,
                    feedback.actual_speed_rpm,
                    feedback.outcome_timestamp_us.map(|v| v as i64),
                    feedback.notes,
                    feedback.trace_id,
                ],
            )
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;
        Ok(updated > 0)
    }

    pub fn get_decision(&self, trace_id: &str) -> CortexResult<Option<DecisionRow>> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.query_row(
            "SELECT trace_id, timestamp_unix_us, observation_json, action, target_speed_rpm,
                    confidence, reasoning, engine, approved, spine_accepted
             FROM decisions WHERE trace_id = ?1",
            params![trace_id],
            row_to_decision,
        )
        .optional()
        .map_err(|e| CortexError::PersistenceFailure(e.to_string()))
    }

    pub fn query_decisions(
        &self,
        start_time_us: Option<u64>,
        end_time_us: Option<u64>,
        engine: Option<&str>,
        approved_only: bool,
        limit: usize,
        offset: usize,
    ) -> CortexResult<Vec<DecisionRow>> {
        let mut sql = String::from(
            "SELECT trace_id, timestamp_unix_us, observation_json, action, target_speed_rpm,
                    confidence, reasoning, engine, approved, spine_accepted
             FROM decisions WHERE 1=1",
        );
        if start_time_us.is_some() {
            sql.push_str(" AND timestamp_unix_us >= :start");
        }
        if end_time_us.is_some() {
            sql.push_str(" AND timestamp_unix_us <= :end");
        }
        if engine.is_some() {
            sql.push_str(" AND engine = :engine");
        }
        if approved_only {
            sql.push_str(" AND approved = 1");
        }
        sql.push_str(" ORDER BY timestamp_unix_us DESC LIMIT :limit OFFSET :offset");

        let conn = self.conn.lock().expect("store lock poisoned");
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;

        let mut named: Vec<(&str, &dyn rusqlite::ToSql)> = Vec::new();
        if let Some(s) = &start_time_us {
            named.push((":start", s));
        }
        if let Some(e) = &end_time_us {
            named.push((":end", e));
        }
        if let Some(e) = &engine {
            named.push((":engine", e));
        }
        named.push((":limit", &limit));
        named.push((":offset", &offset));

        let rows = stmt
            .query_map(named.as_slice(), row_to_decision)
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))
    }

    pub fn get_recent_observations(
        &self,
        limit: usize,
        since_us: Option<u64>,
    ) -> CortexResult<Vec<ObservationRow>> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let sql = if since_us.is_some() {
            "SELECT timestamp_unix_us, motor_speed_rpm, motor_temp_c, pressure_bar
             FROM observation_history WHERE timestamp_unix_us > ?1
             ORDER BY timestamp_unix_us DESC LIMIT ?2"
        } else {
            "SELECT timestamp_unix_us, motor_speed_rpm, motor_temp_c, pressure_bar
             FROM observation_history ORDER BY timestamp_unix_us DESC LIMIT ?1"
        };
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;

        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<ObservationRow> {
            Ok(ObservationRow {
                timestamp_unix_us: row.get::<_, i64>(0)? as u64,
                motor_speed_rpm: row.get(1)?,
                motor_temp_c: row.get(2)?,
                pressure_bar: row.get(3)?,
            })
        };

        let rows = if let Some(since) = since_us {
            stmt.query_map(params![since as i64, limit as i64], map_row)
        } else {
            stmt.query_map(params![limit as i64], map_row)
        }
        .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))
    }

    pub fn add_observation(&self, obs: &Observation, timestamp_us: u64) -> CortexResult<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        conn.execute(
            "INSERT INTO observation_history
                (timestamp_unix_us, motor_speed_rpm, motor_temp_c, pressure_bar, safety_state, cycle_jitter_us, cycle_count)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                timestamp_us as i64,
                obs.motor_speed_rpm,
                obs.motor_temp_c,
                obs.pressure_bar,
                obs.safety_state,
                obs.cycle_jitter_us as i64,
                obs.cycle_count as i64,
            ],
        )
        .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;
        Ok(())
    }

    fn maybe_prune(&self) -> CortexResult<()> {
        let conn = self.conn.lock().expect("store lock poisoned");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM decisions", [], |r| r.get(0))
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;

        if count as usize > self.max_decisions {
            // At least one row, even when `max_decisions * 0.1` truncates to zero
            // for small `max_decisions` (otherwise `DELETE ... LIMIT 0` is a no-op
            // and the table grows unbounded).
            let delete_count = ((self.max_decisions as f64 * 0.1).ceil() as i64).max(1);
            conn.execute(
                "DELETE FROM decisions WHERE id IN (
                    SELECT id FROM decisions ORDER BY timestamp_unix_us ASC LIMIT ?1
                )",
                params![delete_count],
            )
            .map_err(|e| CortexError::PersistenceFailure(e.to_string()))?;
        }
        Ok(())
    }
}

fn row_to_decision(row: &rusqlite::Row) -> rusqlite::Result<DecisionRow> {
    Ok(DecisionRow {
        trace_id: row.get(0)?,
        timestamp_unix_us: row.get::<_, i64>(1)? as u64,
        observation_json: row.get(2)?,
        action: row.get(3)?,
        target_speed_rpm: row.get(4)?,
        confidence: row.get(5)?,
        reasoning: row.get(6)?,
        engine: row.get(7)?,
        approved: row.get::<_, i64>(8)? != 0,
        spine_accepted: row.get::<_, Option<i64>>(9)?.map(|v| v != 0),
    })
}

fn canonical_action(candidate: &Candidate) -> String {
    serde_json::to_value(candidate.action)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "hold".to_string())
}
