//! Draft/Case store: two keyed collections over SQLite.
//!
//! Drafts are keyed by their local `draft_id`; confirmed cases by the
//! durable `case_id`. The two tables are independent — nothing references
//! across them — so either collection can be rebuilt or pruned without
//! touching the other.
//!
//! ## Confirmation is a two-phase move
//!
//! [`CaseStore::confirm`] first upserts a confirmation-stamped copy into the
//! confirmed collection, then deletes the source draft. The move is not
//! transactional on purpose: `case_id` acts as the idempotency key, so a
//! crash between the phases is safely retryable — re-writing the confirmed
//! record is a no-op overwrite and re-deleting an absent draft is a no-op.
//! Until the retry happens, [`CaseStore::history`] treats the confirmed copy
//! as authoritative and hides the stale draft.
//!
//! ## Schema versioning
//!
//! `PRAGMA user_version` gates a ladder of additive-only migrations: new
//! collections may be added in later versions, existing ones are never
//! reshaped.

use crate::error::HistocaseError;
use crate::model::{CaseRecord, ConfirmedCase, DraftCase};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Where a history entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Draft,
    Confirmed,
}

/// One row of the unified history view.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub provenance: Provenance,
    /// Present only for drafts.
    pub draft_id: Option<Uuid>,
    pub record: CaseRecord,
    /// Draft update time or confirmation time; None sorts as epoch/oldest.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Keyed persistent storage for drafts and confirmed cases.
pub struct CaseStore {
    conn: Connection,
}

impl CaseStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistocaseError> {
        let conn = Connection::open(path.as_ref())?;
        migrate(&conn)?;
        info!("Opened case store at {}", path.as_ref().display());
        Ok(Self { conn })
    }

    /// Open an in-memory store. Used by tests and throwaway sessions.
    pub fn open_in_memory() -> Result<Self, HistocaseError> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    // ── Draft collection ──────────────────────────────────────────────────

    /// Insert or replace a draft, keyed by its draft identity.
    pub fn upsert_draft(&self, draft: &DraftCase) -> Result<(), HistocaseError> {
        let record = serde_json::to_string(&draft.record)?;
        self.conn.execute(
            r#"INSERT INTO drafts (draft_id, case_id, record, updated_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(draft_id) DO UPDATE SET
                   case_id = excluded.case_id,
                   record = excluded.record,
                   updated_at = excluded.updated_at"#,
            params![
                draft.draft_id.to_string(),
                draft.record.case_id,
                record,
                draft.record.updated_at.to_rfc3339(),
            ],
        )?;
        debug!("Upserted draft {}", draft.draft_id);
        Ok(())
    }

    /// Delete a draft. Deleting an absent draft is a no-op (retry safety).
    pub fn delete_draft(&self, draft_id: Uuid) -> Result<(), HistocaseError> {
        self.conn.execute(
            "DELETE FROM drafts WHERE draft_id = ?1",
            params![draft_id.to_string()],
        )?;
        Ok(())
    }

    pub fn get_draft(&self, draft_id: Uuid) -> Result<Option<DraftCase>, HistocaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT draft_id, record FROM drafts WHERE draft_id = ?1")?;
        let mut rows = stmt.query(params![draft_id.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_draft(row.get::<_, String>(0)?, row.get(1)?)?)),
            None => Ok(None),
        }
    }

    /// All drafts, most recently updated first.
    pub fn drafts(&self) -> Result<Vec<DraftCase>, HistocaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT draft_id, record FROM drafts ORDER BY updated_at DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut drafts = Vec::new();
        for row in rows {
            let (id, record) = row?;
            drafts.push(row_to_draft(id, record)?);
        }
        Ok(drafts)
    }

    // ── Confirmed collection ──────────────────────────────────────────────

    /// Insert or replace a confirmed case, keyed by `case_id`.
    ///
    /// Two confirmations with the same `case_id` overwrite — the durable key
    /// is the case identity, never the draft identity.
    pub fn upsert_case(&self, case: &ConfirmedCase) -> Result<(), HistocaseError> {
        let record = serde_json::to_string(&case.record)?;
        self.conn.execute(
            r#"INSERT INTO cases (case_id, record, confirmed_at)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(case_id) DO UPDATE SET
                   record = excluded.record,
                   confirmed_at = excluded.confirmed_at"#,
            params![
                case.record.case_id,
                record,
                case.confirmed_at.to_rfc3339(),
            ],
        )?;
        debug!("Upserted case {}", case.record.case_id);
        Ok(())
    }

    pub fn delete_case(&self, case_id: &str) -> Result<(), HistocaseError> {
        self.conn
            .execute("DELETE FROM cases WHERE case_id = ?1", params![case_id])?;
        Ok(())
    }

    pub fn get_case(&self, case_id: &str) -> Result<Option<ConfirmedCase>, HistocaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT record, confirmed_at FROM cases WHERE case_id = ?1")?;
        let mut rows = stmt.query(params![case_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_case(row.get(0)?, row.get(1)?)?)),
            None => Ok(None),
        }
    }

    /// All confirmed cases, most recently confirmed first.
    pub fn cases(&self) -> Result<Vec<ConfirmedCase>, HistocaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT record, confirmed_at FROM cases ORDER BY confirmed_at DESC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut cases = Vec::new();
        for row in rows {
            let (record, confirmed_at) = row?;
            cases.push(row_to_case(record, confirmed_at)?);
        }
        Ok(cases)
    }

    // ── Cross-collection operations ───────────────────────────────────────

    /// Move a draft into the confirmed collection.
    ///
    /// Phase 1 writes the confirmation-stamped copy (draft identity
    /// dropped, `confirmed_at` set); phase 2 deletes the draft. Safe to
    /// retry after a crash between the phases.
    pub fn confirm(&self, draft_id: Uuid) -> Result<ConfirmedCase, HistocaseError> {
        let draft = self
            .get_draft(draft_id)?
            .ok_or(HistocaseError::DraftNotFound {
                draft_id: draft_id.to_string(),
            })?;

        let confirmed = ConfirmedCase {
            record: draft.record,
            confirmed_at: Utc::now(),
        };
        self.upsert_case(&confirmed)?;
        self.delete_draft(draft_id)?;
        info!(
            "Confirmed draft {} as case {}",
            draft_id, confirmed.record.case_id
        );
        Ok(confirmed)
    }

    /// Unified history: both collections merged, provenance-tagged, ordered
    /// by timestamp descending (missing timestamps sort oldest).
    ///
    /// A draft whose `case_id` also appears in the confirmed collection is a
    /// leftover from an interrupted confirm; the confirmed copy is
    /// authoritative and the stale draft is omitted.
    pub fn history(&self) -> Result<Vec<HistoryEntry>, HistocaseError> {
        let cases = self.cases()?;
        let confirmed_ids: std::collections::HashSet<String> =
            cases.iter().map(|c| c.record.case_id.clone()).collect();

        let mut entries: Vec<HistoryEntry> = cases
            .into_iter()
            .map(|c| HistoryEntry {
                provenance: Provenance::Confirmed,
                draft_id: None,
                timestamp: Some(c.confirmed_at),
                record: c.record,
            })
            .collect();

        for draft in self.drafts()? {
            if confirmed_ids.contains(&draft.record.case_id) {
                debug!(
                    "Hiding stale draft {} shadowed by confirmed case {}",
                    draft.draft_id, draft.record.case_id
                );
                continue;
            }
            entries.push(HistoryEntry {
                provenance: Provenance::Draft,
                draft_id: Some(draft.draft_id),
                timestamp: Some(draft.record.updated_at),
                record: draft.record,
            });
        }

        let epoch = Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now);
        entries.sort_by_key(|e| std::cmp::Reverse(e.timestamp.unwrap_or(epoch)));
        Ok(entries)
    }
}

/// Create tables and step the schema version forward. Migrations are
/// additive-only: a later version may add collections, never reshape them.
fn migrate(conn: &Connection) -> Result<(), HistocaseError> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS drafts (
                draft_id   TEXT PRIMARY KEY,
                case_id    TEXT NOT NULL,
                record     TEXT NOT NULL,
                updated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS cases (
                case_id      TEXT PRIMARY KEY,
                record       TEXT NOT NULL,
                confirmed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_drafts_case_id ON drafts(case_id);

            PRAGMA user_version = 1;
            "#,
        )?;
        debug!("Migrated store schema to v1");
    }

    Ok(())
}

fn row_to_draft(draft_id: String, record: String) -> Result<DraftCase, HistocaseError> {
    let draft_id = Uuid::parse_str(&draft_id)
        .map_err(|e| HistocaseError::Internal(format!("corrupt draft id: {e}")))?;
    Ok(DraftCase {
        draft_id,
        record: serde_json::from_str(&record)?,
    })
}

fn row_to_case(record: String, confirmed_at: String) -> Result<ConfirmedCase, HistocaseError> {
    let confirmed_at = DateTime::parse_from_rfc3339(&confirmed_at)
        .map_err(|e| HistocaseError::Internal(format!("corrupt timestamp: {e}")))?
        .with_timezone(&Utc);
    Ok(ConfirmedCase {
        record: serde_json::from_str(&record)?,
        confirmed_at,
    })
}
