use chrono::Utc;
use rusqlite::params;

use super::*;

/// Parameters for connecting (or reconnecting) a mailbox account.
pub struct NewMailboxAccount<'a> {
    pub email: &'a str,
    pub display_name: Option<&'a str>,
    pub access_token: &'a str,
    pub refresh_token: &'a str,
    pub token_expires_at: Option<&'a str>,
    pub label_filter: Option<&'a str>,
}

impl CrmDb {
    // =========================================================================
    // Mailbox accounts (credential store rows)
    // =========================================================================

    /// Insert a mailbox account, or overwrite tokens and reactivate if the
    /// email is already connected. Guarantees one row per email address.
    pub fn upsert_account(&self, new: &NewMailboxAccount<'_>) -> Result<MailboxAccount, DbError> {
        let now = Utc::now().to_rfc3339();
        let id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO mailbox_accounts (
                id, email, display_name, access_token, refresh_token,
                token_expires_at, is_active, label_filter, last_synced_at,
                created_at, updated_at
             ) VALUES (?1, LOWER(?2), ?3, ?4, ?5, ?6, 1, ?7, NULL, ?8, ?8)
             ON CONFLICT(email) DO UPDATE SET
                display_name = COALESCE(excluded.display_name, mailbox_accounts.display_name),
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                token_expires_at = excluded.token_expires_at,
                is_active = 1,
                label_filter = COALESCE(excluded.label_filter, mailbox_accounts.label_filter),
                updated_at = excluded.updated_at",
            params![
                id,
                new.email,
                new.display_name,
                new.access_token,
                new.refresh_token,
                new.token_expires_at,
                new.label_filter,
                now,
            ],
        )?;

        // The insert id is discarded on conflict; read the row back either way.
        self.get_account_by_email(new.email)?
            .ok_or_else(|| DbError::Migration(format!("account row missing after upsert: {}", new.email)))
    }

    /// Look up an account by email (case-insensitive).
    pub fn get_account_by_email(&self, email: &str) -> Result<Option<MailboxAccount>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, display_name, access_token, refresh_token,
                    token_expires_at, is_active, label_filter, last_synced_at,
                    created_at, updated_at
             FROM mailbox_accounts WHERE email = LOWER(?1)",
        )?;
        let mut rows = stmt.query_map(params![email], map_account_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All accounts with the active flag set, oldest connection first, for
    /// deterministic pass ordering.
    pub fn list_active_accounts(&self) -> Result<Vec<MailboxAccount>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, display_name, access_token, refresh_token,
                    token_expires_at, is_active, label_filter, last_synced_at,
                    created_at, updated_at
             FROM mailbox_accounts
             WHERE is_active = 1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], map_account_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Every connected account, active or not, oldest first (CLI listing).
    pub fn list_accounts(&self) -> Result<Vec<MailboxAccount>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, display_name, access_token, refresh_token,
                    token_expires_at, is_active, label_filter, last_synced_at,
                    created_at, updated_at
             FROM mailbox_accounts
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], map_account_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    /// Persist a refreshed access token and its new expiry.
    pub fn update_account_tokens(
        &self,
        account_id: &str,
        access_token: &str,
        token_expires_at: &str,
    ) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE mailbox_accounts
             SET access_token = ?1, token_expires_at = ?2, updated_at = ?3
             WHERE id = ?4",
            params![access_token, token_expires_at, now, account_id],
        )?;
        Ok(())
    }

    /// Flip the active flag. Disconnect is a soft delete; history stays.
    pub fn set_account_active(&self, account_id: &str, active: bool) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE mailbox_accounts SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active as i32, now, account_id],
        )?;
        Ok(())
    }

    /// Stamp a successful sync pass.
    pub fn touch_account_sync(&self, account_id: &str) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE mailbox_accounts SET last_synced_at = ?1, updated_at = ?1 WHERE id = ?2",
            params![now, account_id],
        )?;
        Ok(())
    }
}

/// Row mapper for mailbox_accounts SELECT queries.
fn map_account_row(row: &rusqlite::Row) -> rusqlite::Result<MailboxAccount> {
    Ok(MailboxAccount {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        access_token: row.get(3)?,
        refresh_token: row.get(4)?,
        token_expires_at: row.get(5)?,
        is_active: row.get::<_, i32>(6)? != 0,
        label_filter: row.get(7)?,
        last_synced_at: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}
