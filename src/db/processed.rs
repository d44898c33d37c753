use chrono::Utc;
use rusqlite::params;

use super::*;

/// Parameters for one idempotency-ledger insert.
pub struct NewProcessedMessage<'a> {
    pub account_id: &'a str,
    pub message_id: &'a str,
    pub sender_email: Option<&'a str>,
    pub subject: Option<&'a str>,
    pub contact_id: Option<&'a str>,
    pub deal_id: Option<&'a str>,
}

impl CrmDb {
    // =========================================================================
    // Idempotency ledger
    // =========================================================================

    /// True iff a ledger row exists for this provider message id.
    ///
    /// Provider message ids are globally unique per provider, so the lookup
    /// is not account-scoped even though the row stores the owning account.
    pub fn is_message_processed(&self, message_id: &str) -> Result<bool, DbError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM processed_messages WHERE message_id = ?1)",
            params![message_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Append exactly one ledger row. Called for every message the
    /// coordinator decides to handle, including filtered ones (with null
    /// contact/deal links). The UNIQUE(account_id, message_id) constraint
    /// makes a double insert an error, never a silent overwrite.
    pub fn record_processed(
        &self,
        new: &NewProcessedMessage<'_>,
    ) -> Result<ProcessedMessage, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO processed_messages (
                id, account_id, message_id, sender_email, subject,
                contact_id, deal_id, processed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                new.account_id,
                new.message_id,
                new.sender_email,
                new.subject,
                new.contact_id,
                new.deal_id,
                now,
            ],
        )?;
        Ok(ProcessedMessage {
            id,
            account_id: new.account_id.to_string(),
            message_id: new.message_id.to_string(),
            sender_email: new.sender_email.map(|s| s.to_string()),
            subject: new.subject.map(|s| s.to_string()),
            contact_id: new.contact_id.map(|s| s.to_string()),
            deal_id: new.deal_id.map(|s| s.to_string()),
            processed_at: now,
        })
    }

    /// Ledger rows for one account, oldest first.
    pub fn list_processed_for_account(
        &self,
        account_id: &str,
    ) -> Result<Vec<ProcessedMessage>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, account_id, message_id, sender_email, subject,
                    contact_id, deal_id, processed_at
             FROM processed_messages
             WHERE account_id = ?1
             ORDER BY processed_at ASC",
        )?;
        let rows = stmt.query_map(params![account_id], map_processed_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

fn map_processed_row(row: &rusqlite::Row) -> rusqlite::Result<ProcessedMessage> {
    Ok(ProcessedMessage {
        id: row.get(0)?,
        account_id: row.get(1)?,
        message_id: row.get(2)?,
        sender_email: row.get(3)?,
        subject: row.get(4)?,
        contact_id: row.get(5)?,
        deal_id: row.get(6)?,
        processed_at: row.get(7)?,
    })
}
