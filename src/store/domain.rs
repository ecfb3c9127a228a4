//! Domain Store (§4.1), generalized from the teacher's
//! `keyvault-package/src/vault/store.rs::KeyStore` persistence pattern
//! (`Mutex<Connection>`, WAL mode, `execute_batch` schema) onto the
//! domains table rather than encrypted key rows.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Error,
}

impl DomainStatus {
    fn as_str(self) -> &'static str {
        match self {
            DomainStatus::Pending => "pending",
            DomainStatus::Processing => "processing",
            DomainStatus::Completed => "completed",
            DomainStatus::Failed => "failed",
            DomainStatus::Error => "error",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "processing" => DomainStatus::Processing,
            "completed" => DomainStatus::Completed,
            "failed" => DomainStatus::Failed,
            "error" => DomainStatus::Error,
            _ => DomainStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    pub domain: String,
    pub status: DomainStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub process_count: i64,
    pub error_count: i64,
    pub priority: i64,
    pub cohort: String,
}

fn row_to_domain(row: &rusqlite::Row) -> rusqlite::Result<Domain> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let last_processed_at: Option<String> = row.get("last_processed_at")?;
    Ok(Domain {
        id: row.get("id")?,
        domain: row.get("domain")?,
        status: DomainStatus::parse(&status),
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
        last_processed_at: last_processed_at.and_then(|s| s.parse().ok()),
        process_count: row.get("process_count")?,
        error_count: row.get("error_count")?,
        priority: row.get("priority")?,
        cohort: row.get("cohort")?,
    })
}

/// Domain persistence, shared by every scheduler worker behind one mutex.
/// Queries are point lookups or small batch updates, so they run inline on
/// the async executor rather than through `spawn_blocking` (§5).
pub struct DomainStore {
    conn: Mutex<rusqlite::Connection>,
}

impl DomainStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path).context("failed to open domain store database")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS domains (
                id TEXT PRIMARY KEY,
                domain TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_processed_at TEXT,
                process_count INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                cohort TEXT NOT NULL DEFAULT 'legacy',
                audit_reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_domains_priority ON domains(priority DESC, status, created_at);
            CREATE INDEX IF NOT EXISTS idx_domains_cohort ON domains(cohort, status);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn insert_if_absent(&self, domain: &str, priority: i64, cohort: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO domains (id, domain, status, created_at, updated_at, priority, cohort)
             VALUES (?1, ?2, 'pending', ?3, ?3, ?4, ?5)
             ON CONFLICT (domain) DO NOTHING",
            params![uuid::Uuid::new_v4().to_string(), domain, now, priority, cohort],
        )?;
        Ok(())
    }

    /// Atomically select up to `limit` pending domains and transition them
    /// to `processing` in one statement, so two concurrent claimers never
    /// both receive the same row (§4.1, §5).
    pub fn claim_pending(&self, limit: usize, cohort_filter: Option<&str>) -> Result<Vec<Domain>> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let ids: Vec<String> = {
            let mut stmt = match cohort_filter {
                Some(_) => conn.prepare(
                    "SELECT id FROM domains WHERE status = 'pending' AND cohort = ?1
                     ORDER BY priority DESC, updated_at ASC, id ASC LIMIT ?2",
                )?,
                None => conn.prepare(
                    "SELECT id FROM domains WHERE status = 'pending'
                     ORDER BY priority DESC, updated_at ASC, id ASC LIMIT ?1",
                )?,
            };
            match cohort_filter {
                Some(cohort) => stmt
                    .query_map(params![cohort, limit as i64], |r| r.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
                None => stmt
                    .query_map(params![limit as i64], |r| r.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?,
            }
        };

        let mut claimed = Vec::with_capacity(ids.len());
        for id in &ids {
            let updated = conn.execute(
                "UPDATE domains SET status = 'processing', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![now, id],
            )?;
            if updated == 1 {
                let domain = conn.query_row(
                    "SELECT id, domain, status, created_at, updated_at, last_processed_at,
                            process_count, error_count, priority, cohort
                     FROM domains WHERE id = ?1",
                    params![id],
                    row_to_domain,
                )?;
                claimed.push(domain);
            }
        }
        Ok(claimed)
    }

    pub fn mark_completed(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE domains SET status = 'completed', updated_at = ?1, last_processed_at = ?1,
                process_count = process_count + 1
             WHERE id = ?2 AND status = 'processing'",
            params![now, id],
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, id: &str, reason: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE domains SET status = 'failed', updated_at = ?1, last_processed_at = ?1,
                error_count = error_count + 1, audit_reason = ?2
             WHERE id = ?3 AND status = 'processing'",
            params![now, reason, id],
        )?;
        Ok(())
    }

    /// Reset a non-pending domain back to `pending`, used by the reconciliation
    /// pass (§4.8) to repair rows marked complete before their responses
    /// actually satisfied the tensor-completeness invariant.
    pub fn reset(&self, id: &str, reason: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE domains SET status = 'pending', updated_at = ?1, audit_reason = ?2
             WHERE id = ?3 AND status != 'pending'",
            params![now, reason, id],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Domain>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, domain, status, created_at, updated_at, last_processed_at,
                    process_count, error_count, priority, cohort
             FROM domains WHERE id = ?1",
            params![id],
            row_to_domain,
        )
        .optional()
        .context("querying domain by id")
    }

    pub fn completed_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM domains WHERE status = 'completed'")?;
        let ids = stmt.query_map([], |r| r.get::<_, String>(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (DomainStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = DomainStore::open(&dir.path().join("domains.db")).unwrap();
        (store, dir)
    }

    #[test]
    fn claim_pending_transitions_to_processing_and_returns_rows() {
        let (store, _dir) = store();
        store.insert_if_absent("example.com", 5, "legacy").unwrap();
        let claimed = store.claim_pending(10, None).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status.as_str(), "processing");
    }

    #[test]
    fn claim_pending_respects_priority_order() {
        let (store, _dir) = store();
        store.insert_if_absent("low.com", 1, "legacy").unwrap();
        store.insert_if_absent("high.com", 9, "legacy").unwrap();
        let claimed = store.claim_pending(10, None).unwrap();
        assert_eq!(claimed[0].domain, "high.com");
        assert_eq!(claimed[1].domain, "low.com");
    }

    #[test]
    fn double_claim_never_returns_the_same_row_twice() {
        let (store, _dir) = store();
        store.insert_if_absent("example.com", 5, "legacy").unwrap();
        let first = store.claim_pending(10, None).unwrap();
        let second = store.claim_pending(10, None).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 0);
    }

    #[test]
    fn mark_completed_then_reset_returns_to_pending() {
        let (store, _dir) = store();
        store.insert_if_absent("example.com", 5, "legacy").unwrap();
        let claimed = store.claim_pending(10, None).unwrap();
        store.mark_completed(&claimed[0].id).unwrap();
        store.reset(&claimed[0].id, "incomplete tensor on reconciliation").unwrap();
        let domain = store.get(&claimed[0].id).unwrap().unwrap();
        assert_eq!(domain.status.as_str(), "pending");
    }

    #[test]
    fn mark_failed_increments_error_count() {
        let (store, _dir) = store();
        store.insert_if_absent("example.com", 5, "legacy").unwrap();
        let claimed = store.claim_pending(10, None).unwrap();
        store.mark_failed(&claimed[0].id, "every provider circuit open").unwrap();
        let domain = store.get(&claimed[0].id).unwrap().unwrap();
        assert_eq!(domain.error_count, 1);
        assert_eq!(domain.status.as_str(), "failed");
    }
}
