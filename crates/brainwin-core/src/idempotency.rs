use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Mutex;

use crate::error::BrainwinError;

/// Proof that a checkout session's effect was applied to an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub session_id: String,
    pub account_id: String,
    pub product_id: String,
    pub applied_at: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn new(session_id: &str, account_id: &str, product_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            account_id: account_id.to_string(),
            product_id: product_id.to_string(),
            applied_at: Utc::now(),
        }
    }
}

/// Ledger of applied payment sessions.
///
/// Presence of a session id is the sole authority for "already applied".
/// Implementations must be thread-safe and `try_claim` must be atomic.
pub trait IdempotencyStore: Send + Sync {
    fn exists(&self, session_id: &str) -> Result<bool, BrainwinError>;

    /// Atomically insert the record if its session id is unclaimed.
    /// Returns `Ok(true)` if this caller won the claim, `Ok(false)` if the
    /// session id was already present.
    fn try_claim(&self, record: LedgerRecord) -> Result<bool, BrainwinError>;

    /// Drop a claim whose effect could not be persisted, so a redelivered
    /// event can settle the session again.
    fn release(&self, session_id: &str);

    /// Records for one account, newest first.
    fn list_for_account(&self, account_id: &str) -> Result<Vec<LedgerRecord>, BrainwinError>;
}

/// In-memory ledger backed by DashMap. Lost on restart.
pub struct InMemoryIdempotencyStore {
    records: DashMap<String, LedgerRecord>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn exists(&self, session_id: &str) -> Result<bool, BrainwinError> {
        Ok(self.records.contains_key(session_id))
    }

    fn try_claim(&self, record: LedgerRecord) -> Result<bool, BrainwinError> {
        use dashmap::mapref::entry::Entry;
        match self.records.entry(record.session_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(v) => {
                v.insert(record);
                Ok(true)
            }
        }
    }

    fn release(&self, session_id: &str) {
        self.records.remove(session_id);
    }

    fn list_for_account(&self, account_id: &str) -> Result<Vec<LedgerRecord>, BrainwinError> {
        let mut out: Vec<LedgerRecord> = self
            .records
            .iter()
            .filter(|r| r.account_id == account_id)
            .map(|r| r.value().clone())
            .collect();
        out.sort_by(|a, b| b.applied_at.cmp(&a.applied_at));
        Ok(out)
    }
}

/// Persistent ledger backed by SQLite. The session id is the primary key,
/// so a duplicate claim fails inside the database even across processes.
pub struct SqliteIdempotencyStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteIdempotencyStore {
    /// Open (or create) the ledger database at `path`. On Unix the file is
    /// restricted to 0600.
    pub fn open(path: &str) -> Result<Self, BrainwinError> {
        let conn = rusqlite::Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS processed_payments (
                session_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_processed_account ON processed_payments(account_id);
            PRAGMA journal_mode=WAL;",
        )?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            {
                tracing::warn!(
                    path = %path,
                    error = %e,
                    "failed to restrict ledger database permissions to 0600"
                );
            }
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, rusqlite::Connection> {
        match self.conn.lock() {
            Ok(c) => c,
            Err(poisoned) => {
                tracing::error!("ledger store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    // SQLITE_CONSTRAINT_PRIMARYKEY (1555) or SQLITE_CONSTRAINT_UNIQUE (2067)
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.extended_code == 1555 || err.extended_code == 2067
    )
}

impl IdempotencyStore for SqliteIdempotencyStore {
    fn exists(&self, session_id: &str) -> Result<bool, BrainwinError> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processed_payments WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn try_claim(&self, record: LedgerRecord) -> Result<bool, BrainwinError> {
        let conn = self.lock();
        let result = conn.execute(
            "INSERT INTO processed_payments (session_id, account_id, product_id, applied_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                record.session_id,
                record.account_id,
                record.product_id,
                record.applied_at.timestamp_millis()
            ],
        );
        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn release(&self, session_id: &str) {
        let conn = self.lock();
        if let Err(e) = conn.execute(
            "DELETE FROM processed_payments WHERE session_id = ?1",
            [session_id],
        ) {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "failed to release ledger claim; session stays marked as applied"
            );
        }
    }

    fn list_for_account(&self, account_id: &str) -> Result<Vec<LedgerRecord>, BrainwinError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, account_id, product_id, applied_at
             FROM processed_payments WHERE account_id = ?1
             ORDER BY applied_at DESC",
        )?;
        let rows = stmt.query_map([account_id], |row| {
            let millis: i64 = row.get(3)?;
            Ok(LedgerRecord {
                session_id: row.get(0)?,
                account_id: row.get(1)?,
                product_id: row.get(2)?,
                applied_at: Utc
                    .timestamp_millis_opt(millis)
                    .single()
                    .unwrap_or_else(Utc::now),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> (tempfile::TempDir, Vec<Box<dyn IdempotencyStore>>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let sqlite = SqliteIdempotencyStore::open(path.to_str().unwrap()).unwrap();
        (
            dir,
            vec![Box::new(InMemoryIdempotencyStore::new()), Box::new(sqlite)],
        )
    }

    #[test]
    fn second_claim_for_same_session_loses() {
        let (_dir, stores) = stores();
        for store in stores {
            assert!(store
                .try_claim(LedgerRecord::new("cs_1", "acc", "wins-pack"))
                .unwrap());
            assert!(!store
                .try_claim(LedgerRecord::new("cs_1", "acc", "wins-pack"))
                .unwrap());
            assert!(store.exists("cs_1").unwrap());
            assert_eq!(store.list_for_account("acc").unwrap().len(), 1);
        }
    }

    #[test]
    fn released_claim_can_be_taken_again() {
        let (_dir, stores) = stores();
        for store in stores {
            assert!(store.try_claim(LedgerRecord::new("cs_2", "a", "p")).unwrap());
            store.release("cs_2");
            assert!(!store.exists("cs_2").unwrap());
            assert!(store.try_claim(LedgerRecord::new("cs_2", "a", "p")).unwrap());
        }
    }

    #[test]
    fn history_is_per_account_newest_first() {
        let (_dir, stores) = stores();
        for store in stores {
            let mut older = LedgerRecord::new("cs_old", "a", "wins-pack");
            older.applied_at = Utc::now() - chrono::Duration::hours(1);
            store.try_claim(older).unwrap();
            store
                .try_claim(LedgerRecord::new("cs_new", "a", "brainwin-learn"))
                .unwrap();
            store
                .try_claim(LedgerRecord::new("cs_other", "b", "wins-pack"))
                .unwrap();

            let history = store.list_for_account("a").unwrap();
            let ids: Vec<&str> = history.iter().map(|r| r.session_id.as_str()).collect();
            assert_eq!(ids, vec!["cs_new", "cs_old"]);
        }
    }

    #[test]
    fn sqlite_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteIdempotencyStore::open(path).unwrap();
            store.try_claim(LedgerRecord::new("cs_9", "a", "p")).unwrap();
        }
        let reopened = SqliteIdempotencyStore::open(path).unwrap();
        assert!(reopened.exists("cs_9").unwrap());
        assert!(!reopened.try_claim(LedgerRecord::new("cs_9", "a", "p")).unwrap());
    }
}
