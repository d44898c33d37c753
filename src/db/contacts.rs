use chrono::Utc;
use rusqlite::params;

use super::*;

impl CrmDb {
    // =========================================================================
    // Contacts
    // =========================================================================

    /// Look up a contact by email (case-insensitive). Emails are stored
    /// lowercased, so one LOWER on the probe side is enough.
    pub fn get_contact_by_email(&self, email: &str) -> Result<Option<DbContact>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, email, name, company, source, notes, created_at, updated_at
             FROM contacts WHERE email = LOWER(?1)",
        )?;
        let mut rows = stmt.query_map(params![email], map_contact_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn insert_contact(
        &self,
        email: &str,
        name: Option<&str>,
        source: Option<&str>,
        notes: Option<&str>,
    ) -> Result<DbContact, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO contacts (id, email, name, company, source, notes, created_at, updated_at)
             VALUES (?1, LOWER(?2), ?3, NULL, ?4, ?5, ?6, ?6)",
            params![id, email, name, source, notes, now],
        )?;
        Ok(DbContact {
            id,
            email: email.to_lowercase(),
            name: name.map(|s| s.to_string()),
            company: None,
            source: source.map(|s| s.to_string()),
            notes: notes.map(|s| s.to_string()),
            created_at: now.clone(),
            updated_at: now,
        })
    }
}

fn map_contact_row(row: &rusqlite::Row) -> rusqlite::Result<DbContact> {
    Ok(DbContact {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        company: row.get(3)?,
        source: row.get(4)?,
        notes: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
