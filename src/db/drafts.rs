use chrono::Utc;
use rusqlite::params;

use super::*;

/// Parameters for a new reply draft.
pub struct NewDraft<'a> {
    pub processed_message_id: &'a str,
    pub account_id: &'a str,
    pub contact_id: Option<&'a str>,
    pub deal_id: Option<&'a str>,
    pub original_sender: Option<&'a str>,
    pub original_subject: Option<&'a str>,
    pub original_body: Option<&'a str>,
    pub received_at: Option<&'a str>,
    pub draft_subject: &'a str,
    pub draft_body: &'a str,
    pub tone: &'a str,
}

impl CrmDb {
    // =========================================================================
    // Reply drafts
    // =========================================================================

    /// Insert one draft with status `pending`.
    pub fn insert_draft(&self, new: &NewDraft<'_>) -> Result<DbDraft, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO drafts (
                id, processed_message_id, account_id, contact_id, deal_id,
                original_sender, original_subject, original_body, received_at,
                draft_subject, draft_body, tone, status, error,
                created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                       'pending', NULL, ?13, ?13)",
            params![
                id,
                new.processed_message_id,
                new.account_id,
                new.contact_id,
                new.deal_id,
                new.original_sender,
                new.original_subject,
                new.original_body,
                new.received_at,
                new.draft_subject,
                new.draft_body,
                new.tone,
                now,
            ],
        )?;
        Ok(DbDraft {
            id,
            processed_message_id: new.processed_message_id.to_string(),
            account_id: new.account_id.to_string(),
            contact_id: new.contact_id.map(|s| s.to_string()),
            deal_id: new.deal_id.map(|s| s.to_string()),
            original_sender: new.original_sender.map(|s| s.to_string()),
            original_subject: new.original_subject.map(|s| s.to_string()),
            original_body: new.original_body.map(|s| s.to_string()),
            received_at: new.received_at.map(|s| s.to_string()),
            draft_subject: new.draft_subject.to_string(),
            draft_body: new.draft_body.to_string(),
            tone: new.tone.to_string(),
            status: "pending".to_string(),
            error: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Transition a draft to `sent`. Driven by the send action outside this
    /// pipeline.
    pub fn mark_draft_sent(&self, draft_id: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE drafts SET status = 'sent', error = NULL, updated_at = ?1 WHERE id = ?2",
            params![now, draft_id],
        )?;
        Ok(())
    }

    /// Transition a draft to `failed` with an error message.
    pub fn mark_draft_failed(&self, draft_id: &str, error: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE drafts SET status = 'failed', error = ?1, updated_at = ?2 WHERE id = ?3",
            params![error, now, draft_id],
        )?;
        Ok(())
    }

    /// The draft created for one ledger entry, if any.
    pub fn get_draft_for_message(
        &self,
        processed_message_id: &str,
    ) -> Result<Option<DbDraft>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, processed_message_id, account_id, contact_id, deal_id,
                    original_sender, original_subject, original_body, received_at,
                    draft_subject, draft_body, tone, status, error,
                    created_at, updated_at
             FROM drafts WHERE processed_message_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![processed_message_id], map_draft_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All drafts awaiting review, newest first.
    pub fn list_pending_drafts(&self) -> Result<Vec<DbDraft>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, processed_message_id, account_id, contact_id, deal_id,
                    original_sender, original_subject, original_body, received_at,
                    draft_subject, draft_body, tone, status, error,
                    created_at, updated_at
             FROM drafts
             WHERE status = 'pending'
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], map_draft_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

fn map_draft_row(row: &rusqlite::Row) -> rusqlite::Result<DbDraft> {
    Ok(DbDraft {
        id: row.get(0)?,
        processed_message_id: row.get(1)?,
        account_id: row.get(2)?,
        contact_id: row.get(3)?,
        deal_id: row.get(4)?,
        original_sender: row.get(5)?,
        original_subject: row.get(6)?,
        original_body: row.get(7)?,
        received_at: row.get(8)?,
        draft_subject: row.get(9)?,
        draft_body: row.get(10)?,
        tone: row.get(11)?,
        status: row.get(12)?,
        error: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}
