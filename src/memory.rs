//! Error-learning store
//!
//! Content-addressed error memory with SQLite persistence. Error text is
//! normalized (lower-cased, whitespace-collapsed, trimmed) and hashed, so
//! identical failures always route to the same signature: O(1) exact
//! lookup and a stable identity for fix bookkeeping. The store is
//! write-through; every mutation hits disk immediately and survives
//! restarts. Paraphrased duplicates are missed by construction - that is
//! an accepted limitation of skipping semantic matching, not a bug.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

/// Confidence reported for fuzzy substring matches. Exact hash matches are
/// always 1.0; fuzzy matching is a hint, not semantic similarity.
pub const FUZZY_CONFIDENCE: f64 = 0.5;

const DEFAULT_LOG_CAPACITY: usize = 200;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// A content-addressed error identity
#[derive(Debug, Clone)]
pub struct ErrorSignature {
    /// 16 hex chars of the SHA-256 of the normalized text
    pub hash: String,
    /// Original (trimmed) error text as first observed
    pub raw_pattern: String,
    pub error_type: Option<String>,
    pub occurrence_count: u64,
    pub first_seen: i64,
    pub last_seen: i64,
}

/// A remembered fix
#[derive(Debug, Clone)]
pub struct Fix {
    pub id: String,
    pub signature_hash: String,
    pub description: String,
    pub code: Option<String>,
    pub context: Option<String>,
    pub created_at: i64,
}

/// A fix with its association counters for one signature
#[derive(Debug, Clone)]
pub struct RankedFix {
    pub fix: Fix,
    pub success_count: u64,
    pub failure_count: u64,
}

/// An exact signature match with its ranked fixes
#[derive(Debug, Clone)]
pub struct SignatureMatch {
    pub signature: ErrorSignature,
    /// Ranked by success count, best first
    pub fixes: Vec<RankedFix>,
    pub confidence: f64,
}

/// A fuzzy candidate
#[derive(Debug, Clone)]
pub struct FuzzyMatch {
    pub signature: ErrorSignature,
    pub confidence: f64,
}

/// Result of a similarity search
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub exact: Option<SignatureMatch>,
    pub fuzzy: Vec<FuzzyMatch>,
}

/// Store statistics
#[derive(Debug, Clone, Default)]
pub struct LearningStats {
    pub error_count: usize,
    pub fix_count: usize,
    pub execution_count: usize,
    /// Success fraction over the retained execution window (0-1)
    pub success_rate: f64,
}

/// Learning store with SQLite backend
pub struct LearningStore {
    conn: Connection,
    log_capacity: usize,
}

/// Normalize error text: lower-case, collapse whitespace, trim
pub fn normalize(text: &str) -> String {
    WHITESPACE
        .replace_all(text.to_lowercase().trim(), " ")
        .into_owned()
}

/// 16-hex-char signature of normalized error text
pub fn signature_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

impl LearningStore {
    /// Open or create the learning database
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_capacity(path, DEFAULT_LOG_CAPACITY)
    }

    /// Open with a custom execution-log window
    pub fn open_with_capacity(path: &Path, log_capacity: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            log_capacity: log_capacity.max(1),
        };
        store.init_schema()?;

        info!("Learning store opened: {}", path.display());
        Ok(store)
    }

    /// In-memory store (tests, ephemeral sessions)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn,
            log_capacity: DEFAULT_LOG_CAPACITY,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS error_signatures (
                hash TEXT PRIMARY KEY,
                raw_pattern TEXT NOT NULL,
                normalized TEXT NOT NULL,
                error_type TEXT,
                context TEXT,
                occurrence_count INTEGER NOT NULL DEFAULT 1,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fixes (
                id TEXT PRIMARY KEY,
                signature_hash TEXT NOT NULL,
                description TEXT NOT NULL,
                code TEXT,
                context TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fix_associations (
                signature_hash TEXT NOT NULL,
                fix_id TEXT NOT NULL,
                success_count INTEGER NOT NULL DEFAULT 1,
                failure_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (signature_hash, fix_id)
            );

            CREATE TABLE IF NOT EXISTS execution_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tool TEXT NOT NULL,
                arguments TEXT NOT NULL,
                success INTEGER NOT NULL,
                error TEXT,
                timestamp_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_fixes_signature ON fixes(signature_hash);
            CREATE INDEX IF NOT EXISTS idx_signatures_type ON error_signatures(error_type);
            "#,
        )?;

        Ok(())
    }

    /// Record an error observation; returns the signature hash.
    ///
    /// Texts that normalize identically collide to the same signature and
    /// bump its occurrence counter instead of duplicating.
    pub fn record_error(
        &self,
        text: &str,
        error_type: Option<&str>,
        context: Option<&str>,
    ) -> Result<String> {
        let hash = signature_hash(text);
        let normalized = normalize(text);
        let now = chrono::Utc::now().timestamp_millis();

        self.conn.execute(
            r#"
            INSERT INTO error_signatures
                (hash, raw_pattern, normalized, error_type, context,
                 occurrence_count, first_seen, last_seen)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
            ON CONFLICT(hash) DO UPDATE SET
                occurrence_count = occurrence_count + 1,
                last_seen = excluded.last_seen,
                error_type = COALESCE(excluded.error_type, error_type),
                context = COALESCE(excluded.context, context)
            "#,
            params![hash, text.trim(), normalized, error_type, context, now],
        )?;

        debug!("Recorded error signature {}", hash);
        Ok(hash)
    }

    /// Look up a signature by its hash
    pub fn get_signature(&self, hash: &str) -> Result<Option<ErrorSignature>> {
        self.conn
            .query_row(
                r#"
                SELECT hash, raw_pattern, error_type, occurrence_count,
                       first_seen, last_seen
                FROM error_signatures
                WHERE hash = ?1
                "#,
                params![hash],
                row_to_signature,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Fixes associated with a signature, best success record first
    pub fn get_fixes(&self, signature_hash: &str) -> Result<Vec<RankedFix>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT f.id, f.signature_hash, f.description, f.code, f.context,
                   f.created_at, a.success_count, a.failure_count
            FROM fix_associations a
            JOIN fixes f ON f.id = a.fix_id
            WHERE a.signature_hash = ?1
            ORDER BY a.success_count DESC, f.created_at ASC
            "#,
        )?;

        let fixes = stmt
            .query_map(params![signature_hash], |row| {
                Ok(RankedFix {
                    fix: Fix {
                        id: row.get(0)?,
                        signature_hash: row.get(1)?,
                        description: row.get(2)?,
                        code: row.get(3)?,
                        context: row.get(4)?,
                        created_at: row.get(5)?,
                    },
                    success_count: row.get::<_, i64>(6)? as u64,
                    failure_count: row.get::<_, i64>(7)? as u64,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(fixes)
    }

    /// Search for a known error.
    ///
    /// The query's hash is computed first; an exact match returns that
    /// signature with its ranked fixes at confidence 1.0. Otherwise a
    /// substring match over normalized patterns returns up to `limit`
    /// candidates at a fixed low confidence.
    pub fn search_similar(&self, query: &str, limit: usize) -> Result<SearchOutcome> {
        let hash = signature_hash(query);

        if let Some(signature) = self.get_signature(&hash)? {
            let fixes = self.get_fixes(&hash)?;
            return Ok(SearchOutcome {
                exact: Some(SignatureMatch {
                    signature,
                    fixes,
                    confidence: 1.0,
                }),
                fuzzy: Vec::new(),
            });
        }

        // An empty normalized query is a substring of everything
        let normalized = normalize(query);
        if normalized.is_empty() {
            return Ok(SearchOutcome::default());
        }

        let mut stmt = self.conn.prepare(
            r#"
            SELECT hash, raw_pattern, error_type, occurrence_count,
                   first_seen, last_seen
            FROM error_signatures
            WHERE instr(?1, normalized) > 0 OR instr(normalized, ?1) > 0
            ORDER BY occurrence_count DESC, last_seen DESC
            LIMIT ?2
            "#,
        )?;

        let fuzzy = stmt
            .query_map(params![normalized, limit as i64], row_to_signature)?
            .filter_map(|r| r.ok())
            .map(|signature| FuzzyMatch {
                signature,
                confidence: FUZZY_CONFIDENCE,
            })
            .collect();

        Ok(SearchOutcome {
            exact: None,
            fuzzy,
        })
    }

    /// Associate a fix with a signature.
    ///
    /// Recording the same description again for the same signature bumps
    /// the association's success counter instead of duplicating the fix.
    pub fn record_fix(
        &self,
        signature_hash: &str,
        description: &str,
        code: Option<&str>,
        context: Option<&str>,
    ) -> Result<Fix> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM fixes WHERE signature_hash = ?1 AND description = ?2",
                params![signature_hash, description],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(fix_id) = existing {
            self.conn.execute(
                r#"
                UPDATE fix_associations SET success_count = success_count + 1
                WHERE signature_hash = ?1 AND fix_id = ?2
                "#,
                params![signature_hash, fix_id],
            )?;

            return self.get_fix(&fix_id);
        }

        let fix = Fix {
            id: uuid::Uuid::new_v4().to_string(),
            signature_hash: signature_hash.to_string(),
            description: description.to_string(),
            code: code.map(str::to_string),
            context: context.map(str::to_string),
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        self.conn.execute(
            r#"
            INSERT INTO fixes (id, signature_hash, description, code, context, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                fix.id,
                fix.signature_hash,
                fix.description,
                fix.code,
                fix.context,
                fix.created_at
            ],
        )?;

        self.conn.execute(
            r#"
            INSERT INTO fix_associations (signature_hash, fix_id, success_count, failure_count)
            VALUES (?1, ?2, 1, 0)
            "#,
            params![signature_hash, fix.id],
        )?;

        debug!("Recorded fix {} for signature {}", fix.id, signature_hash);
        Ok(fix)
    }

    fn get_fix(&self, id: &str) -> Result<Fix> {
        self.conn
            .query_row(
                r#"
                SELECT id, signature_hash, description, code, context, created_at
                FROM fixes WHERE id = ?1
                "#,
                params![id],
                |row| {
                    Ok(Fix {
                        id: row.get(0)?,
                        signature_hash: row.get(1)?,
                        description: row.get(2)?,
                        code: row.get(3)?,
                        context: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .map_err(Into::into)
    }

    /// Report whether applying a fix worked, adjusting its confidence
    /// counters
    pub fn record_fix_outcome(
        &self,
        signature_hash: &str,
        fix_id: &str,
        success: bool,
    ) -> Result<()> {
        let column = if success {
            "success_count"
        } else {
            "failure_count"
        };
        self.conn.execute(
            &format!(
                "UPDATE fix_associations SET {column} = {column} + 1
                 WHERE signature_hash = ?1 AND fix_id = ?2"
            ),
            params![signature_hash, fix_id],
        )?;
        Ok(())
    }

    /// Append a tool execution outcome to the bounded log.
    ///
    /// Eviction is FIFO: the success-rate metric cares about recency, not
    /// access frequency.
    pub fn record_execution(
        &self,
        tool: &str,
        arguments: &serde_json::Value,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn.execute(
            r#"
            INSERT INTO execution_log (tool, arguments, success, error, timestamp_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![tool, arguments.to_string(), success, error, now],
        )?;

        self.conn.execute(
            r#"
            DELETE FROM execution_log
            WHERE id NOT IN (
                SELECT id FROM execution_log ORDER BY id DESC LIMIT ?1
            )
            "#,
            params![self.log_capacity as i64],
        )?;

        Ok(())
    }

    /// Store statistics
    pub fn stats(&self) -> Result<LearningStats> {
        let error_count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM error_signatures", [], |row| {
                    row.get(0)
                })?;

        let fix_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM fixes", [], |row| row.get(0))?;

        let (execution_count, successes): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(success), 0) FROM execution_log",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(LearningStats {
            error_count: error_count as usize,
            fix_count: fix_count as usize,
            execution_count: execution_count as usize,
            success_rate: if execution_count > 0 {
                successes as f64 / execution_count as f64
            } else {
                0.0
            },
        })
    }
}

fn row_to_signature(row: &rusqlite::Row<'_>) -> rusqlite::Result<ErrorSignature> {
    Ok(ErrorSignature {
        hash: row.get(0)?,
        raw_pattern: row.get(1)?,
        error_type: row.get(2)?,
        occurrence_count: row.get::<_, i64>(3)? as u64,
        first_seen: row.get(4)?,
        last_seen: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize("  ERROR:   something\n\twent wrong  "),
            "error: something went wrong"
        );
    }

    #[test]
    fn test_signature_hash_is_16_hex_chars() {
        let hash = signature_hash("avrdude: stk500_getsync(): not in sync");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_record_error_idempotent_signature() {
        let store = LearningStore::open_in_memory().unwrap();

        let h1 = store.record_error("Error: LED not declared", None, None).unwrap();
        let h2 = store
            .record_error("error:   led NOT declared", Some("compile"), None)
            .unwrap();

        // Normalized-identical texts collide to one signature
        assert_eq!(h1, h2);
        let signature = store.get_signature(&h1).unwrap().unwrap();
        assert_eq!(signature.occurrence_count, 2);
        assert_eq!(signature.error_type.as_deref(), Some("compile"));
        assert_eq!(store.stats().unwrap().error_count, 1);
    }

    #[test]
    fn test_exact_match_returns_ranked_fixes() {
        let store = LearningStore::open_in_memory().unwrap();
        let error = "avrdude: stk500_getsync(): not in sync";

        let hash = store.record_error(error, Some("upload"), None).unwrap();
        let outcome = store.search_similar(error, 5).unwrap();
        let exact = outcome.exact.unwrap();
        assert_eq!(exact.confidence, 1.0);
        assert!(exact.fixes.is_empty());

        store
            .record_fix(&hash, "lower the upload speed", None, None)
            .unwrap();
        store
            .record_fix(&hash, "check the board is plugged in", None, None)
            .unwrap();
        // Re-record the second fix twice so it outranks the first
        store
            .record_fix(&hash, "check the board is plugged in", None, None)
            .unwrap();
        store
            .record_fix(&hash, "check the board is plugged in", None, None)
            .unwrap();

        let outcome = store.search_similar(error, 5).unwrap();
        let exact = outcome.exact.unwrap();
        assert_eq!(exact.fixes.len(), 2);
        assert_eq!(exact.fixes[0].fix.description, "check the board is plugged in");
        assert_eq!(exact.fixes[0].success_count, 3);
        assert!(outcome.fuzzy.is_empty());
    }

    #[test]
    fn test_fuzzy_match_on_substring() {
        let store = LearningStore::open_in_memory().unwrap();
        store
            .record_error("'Serial1' was not declared in this scope", Some("compile"), None)
            .unwrap();

        let outcome = store.search_similar("not declared in this scope", 5).unwrap();
        assert!(outcome.exact.is_none());
        assert_eq!(outcome.fuzzy.len(), 1);
        assert_eq!(outcome.fuzzy[0].confidence, FUZZY_CONFIDENCE);
    }

    #[test]
    fn test_blank_query_matches_nothing() {
        let store = LearningStore::open_in_memory().unwrap();
        store
            .record_error("'Serial1' was not declared in this scope", Some("compile"), None)
            .unwrap();

        for query in ["", "   ", "\t\n"] {
            let outcome = store.search_similar(query, 5).unwrap();
            assert!(outcome.exact.is_none());
            assert!(outcome.fuzzy.is_empty());
        }
    }

    #[test]
    fn test_record_fix_deduplicates() {
        let store = LearningStore::open_in_memory().unwrap();
        let hash = store.record_error("some error", None, None).unwrap();

        let f1 = store.record_fix(&hash, "restart the IDE", None, None).unwrap();
        let f2 = store.record_fix(&hash, "restart the IDE", None, None).unwrap();

        assert_eq!(f1.id, f2.id);
        assert_eq!(store.stats().unwrap().fix_count, 1);

        let fixes = store.get_fixes(&hash).unwrap();
        assert_eq!(fixes[0].success_count, 2);
    }

    #[test]
    fn test_fix_outcome_counters() {
        let store = LearningStore::open_in_memory().unwrap();
        let hash = store.record_error("boom", None, None).unwrap();
        let fix = store.record_fix(&hash, "try again", None, None).unwrap();

        store.record_fix_outcome(&hash, &fix.id, false).unwrap();
        store.record_fix_outcome(&hash, &fix.id, true).unwrap();

        let fixes = store.get_fixes(&hash).unwrap();
        assert_eq!(fixes[0].success_count, 2);
        assert_eq!(fixes[0].failure_count, 1);
    }

    #[test]
    fn test_execution_log_fifo_window() {
        let store = {
            let conn = Connection::open_in_memory().unwrap();
            let store = LearningStore {
                conn,
                log_capacity: 3,
            };
            store.init_schema().unwrap();
            store
        };

        for i in 0..5 {
            store
                .record_execution("compile_sketch", &serde_json::json!({"i": i}), i % 2 == 0, None)
                .unwrap();
        }

        let stats = store.stats().unwrap();
        assert_eq!(stats.execution_count, 3);

        // Oldest entries evicted first: ids 3,4,5 remain (i = 2,3,4)
        let oldest: String = store
            .conn
            .query_row(
                "SELECT arguments FROM execution_log ORDER BY id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(oldest.contains("2"));
    }

    #[test]
    fn test_success_rate() {
        let store = LearningStore::open_in_memory().unwrap();
        assert_eq!(store.stats().unwrap().success_rate, 0.0);

        store
            .record_execution("compile_sketch", &serde_json::json!({}), true, None)
            .unwrap();
        store
            .record_execution("upload_sketch", &serde_json::json!({}), false, Some("sync error"))
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.execution_count, 2);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("learning.db");

        let hash = {
            let store = LearningStore::open(&path).unwrap();
            let hash = store.record_error("persistent error", None, None).unwrap();
            store.record_fix(&hash, "the fix", Some("code"), None).unwrap();
            hash
        };

        let store = LearningStore::open(&path).unwrap();
        let outcome = store.search_similar("persistent error", 5).unwrap();
        let exact = outcome.exact.unwrap();
        assert_eq!(exact.signature.hash, hash);
        assert_eq!(exact.fixes.len(), 1);
        assert_eq!(exact.fixes[0].fix.code.as_deref(), Some("code"));
    }
}
