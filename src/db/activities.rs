use chrono::Utc;
use rusqlite::params;

use super::*;

/// Parameters for a new activity row.
pub struct NewActivity<'a> {
    pub deal_id: &'a str,
    pub contact_id: &'a str,
    pub kind: &'a str,
    pub title: &'a str,
    pub body: Option<&'a str>,
    pub outcome: Option<&'a str>,
    pub completed_at: Option<&'a str>,
}

impl CrmDb {
    // =========================================================================
    // Activities
    // =========================================================================

    pub fn insert_activity(&self, new: &NewActivity<'_>) -> Result<DbActivity, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO activities (
                id, deal_id, contact_id, kind, title, body, outcome,
                completed_at, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                new.deal_id,
                new.contact_id,
                new.kind,
                new.title,
                new.body,
                new.outcome,
                new.completed_at,
                now,
            ],
        )?;
        Ok(DbActivity {
            id,
            deal_id: new.deal_id.to_string(),
            contact_id: new.contact_id.to_string(),
            kind: new.kind.to_string(),
            title: new.title.to_string(),
            body: new.body.map(|s| s.to_string()),
            outcome: new.outcome.map(|s| s.to_string()),
            completed_at: new.completed_at.map(|s| s.to_string()),
            created_at: now,
        })
    }

    /// Activities for one deal, oldest first (deal detail timeline).
    pub fn list_activities_for_deal(&self, deal_id: &str) -> Result<Vec<DbActivity>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, deal_id, contact_id, kind, title, body, outcome,
                    completed_at, created_at
             FROM activities
             WHERE deal_id = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![deal_id], map_activity_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }
}

fn map_activity_row(row: &rusqlite::Row) -> rusqlite::Result<DbActivity> {
    Ok(DbActivity {
        id: row.get(0)?,
        deal_id: row.get(1)?,
        contact_id: row.get(2)?,
        kind: row.get(3)?,
        title: row.get(4)?,
        body: row.get(5)?,
        outcome: row.get(6)?,
        completed_at: row.get(7)?,
        created_at: row.get(8)?,
    })
}
