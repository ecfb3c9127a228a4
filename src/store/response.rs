//! Response Store (§4.2), append-only, same `Mutex<Connection>` + WAL
//! pattern as `domain.rs`, with the conflict-tolerant insert adapted from
//! `keyvault-package/src/vault/store.rs::update_model_catalog`'s
//! `ON CONFLICT ... DO UPDATE` (here `DO NOTHING`, since responses are
//! immutable once written).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub domain_id: String,
    pub model: String,
    pub prompt_type: String,
    pub prompt: String,
    pub response: String,
    pub response_time_ms: i64,
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
}

pub struct ResponseStore {
    conn: Mutex<rusqlite::Connection>,
}

impl ResponseStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path).context("failed to open response store database")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS responses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain_id TEXT NOT NULL,
                model TEXT NOT NULL,
                prompt_type TEXT NOT NULL,
                prompt TEXT NOT NULL,
                response TEXT NOT NULL,
                response_time_ms INTEGER NOT NULL,
                batch_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_responses_natural_key
                ON responses(domain_id, model, prompt_type, batch_id);
            CREATE INDEX IF NOT EXISTS idx_responses_model_created ON responses(model, created_at);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn append(&self, response: &Response) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        insert_one(&conn, response)?;
        Ok(())
    }

    /// Used when a domain's whole task group finishes and its responses are
    /// flushed together (§4.2); at-least-once, conflict-tolerant.
    pub fn append_batch(&self, responses: &[Response]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for response in responses {
            insert_one(&tx, response)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn count_by_domain(&self, domain_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM responses WHERE domain_id = ?1",
            params![domain_id],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    pub fn distinct_pairs_by_domain(&self, domain_id: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT model || ':' || prompt_type) FROM responses WHERE domain_id = ?1",
            params![domain_id],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    pub fn recent_by_model(&self, since: DateTime<Utc>) -> Result<HashMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT model, COUNT(*) FROM responses WHERE created_at >= ?1 GROUP BY model",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (model, count) = row?;
            out.insert(model, count);
        }
        Ok(out)
    }
}

fn insert_one(conn: &rusqlite::Connection, response: &Response) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO responses (domain_id, model, prompt_type, prompt, response, response_time_ms, batch_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (domain_id, model, prompt_type, batch_id) DO NOTHING",
        params![
            response.domain_id,
            response.model,
            response.prompt_type,
            response.prompt,
            response.response,
            response.response_time_ms,
            response.batch_id,
            response.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// `crawl_<UTC timestamp>_<short id>`, the batch-id convention observed in
/// prior implementations of this system.
pub fn new_batch_id(now: DateTime<Utc>) -> String {
    format!("crawl_{}_{}", now.format("%Y%m%dT%H%M%SZ"), &uuid::Uuid::new_v4().to_string()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (ResponseStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = ResponseStore::open(&dir.path().join("responses.db")).unwrap();
        (store, dir)
    }

    fn response(domain_id: &str, model: &str, prompt_type: &str, batch_id: &str) -> Response {
        Response {
            domain_id: domain_id.to_string(),
            model: model.to_string(),
            prompt_type: prompt_type.to_string(),
            prompt: "Analyze example.com".to_string(),
            response: "example.com is a reference domain.".to_string(),
            response_time_ms: 812,
            batch_id: batch_id.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn append_then_count_by_domain() {
        let (store, _dir) = store();
        store.append(&response("d1", "openai/gpt-4o-mini", "business_analysis", "crawl_1")).unwrap();
        assert_eq!(store.count_by_domain("d1").unwrap(), 1);
    }

    #[test]
    fn duplicate_write_is_tolerated_not_duplicated() {
        let (store, _dir) = store();
        let r = response("d1", "openai/gpt-4o-mini", "business_analysis", "crawl_1");
        store.append(&r).unwrap();
        store.append(&r).unwrap();
        assert_eq!(store.count_by_domain("d1").unwrap(), 1);
    }

    #[test]
    fn append_batch_writes_all_rows() {
        let (store, _dir) = store();
        let rows = vec![
            response("d1", "openai/gpt-4o-mini", "business_analysis", "crawl_1"),
            response("d1", "anthropic/claude-haiku", "business_analysis", "crawl_1"),
        ];
        store.append_batch(&rows).unwrap();
        assert_eq!(store.count_by_domain("d1").unwrap(), 2);
    }

    #[test]
    fn distinct_pairs_counts_unique_model_prompt_combinations() {
        let (store, _dir) = store();
        store.append(&response("d1", "openai/gpt-4o-mini", "business_analysis", "crawl_1")).unwrap();
        store.append(&response("d1", "openai/gpt-4o-mini", "business_analysis", "crawl_2")).unwrap();
        store.append(&response("d1", "openai/gpt-4o-mini", "content_strategy", "crawl_2")).unwrap();
        assert_eq!(store.distinct_pairs_by_domain("d1").unwrap(), 2);
    }

    #[test]
    fn batch_id_follows_crawl_prefix_convention() {
        let id = new_batch_id(Utc::now());
        assert!(id.starts_with("crawl_"));
    }
}
