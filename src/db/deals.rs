use chrono::Utc;
use rusqlite::params;

use super::*;

/// Parameters for a new deal row.
pub struct NewDeal<'a> {
    pub contact_id: &'a str,
    pub account_id: Option<&'a str>,
    pub title: &'a str,
    pub stage: &'a str,
    pub probability: i32,
    pub lead_source: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub follow_up_at: Option<&'a str>,
}

impl CrmDb {
    // =========================================================================
    // Deals
    // =========================================================================

    /// The contact's oldest open deal, if any. Subsequent inbound messages
    /// from a known contact reuse it instead of spawning new deals.
    pub fn get_open_deal_for_contact(&self, contact_id: &str) -> Result<Option<DbDeal>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, contact_id, account_id, title, stage, probability,
                    lead_source, notes, follow_up_at, status, created_at, updated_at
             FROM deals
             WHERE contact_id = ?1 AND status = 'open'
             ORDER BY created_at ASC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![contact_id], map_deal_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn insert_deal(&self, new: &NewDeal<'_>) -> Result<DbDeal, DbError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO deals (
                id, contact_id, account_id, title, stage, probability,
                lead_source, notes, follow_up_at, status, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'open', ?10, ?10)",
            params![
                id,
                new.contact_id,
                new.account_id,
                new.title,
                new.stage,
                new.probability,
                new.lead_source,
                new.notes,
                new.follow_up_at,
                now,
            ],
        )?;
        Ok(DbDeal {
            id,
            contact_id: new.contact_id.to_string(),
            account_id: new.account_id.map(|s| s.to_string()),
            title: new.title.to_string(),
            stage: new.stage.to_string(),
            probability: new.probability,
            lead_source: new.lead_source.map(|s| s.to_string()),
            notes: new.notes.map(|s| s.to_string()),
            follow_up_at: new.follow_up_at.map(|s| s.to_string()),
            status: "open".to_string(),
            created_at: now.clone(),
            updated_at: now,
        })
    }
}

fn map_deal_row(row: &rusqlite::Row) -> rusqlite::Result<DbDeal> {
    Ok(DbDeal {
        id: row.get(0)?,
        contact_id: row.get(1)?,
        account_id: row.get(2)?,
        title: row.get(3)?,
        stage: row.get(4)?,
        probability: row.get(5)?,
        lead_source: row.get(6)?,
        notes: row.get(7)?,
        follow_up_at: row.get(8)?,
        status: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::testutil::test_db;
    use super::*;

    #[test]
    fn test_open_deal_lookup_ignores_closed_deals() {
        let (db, _dir) = test_db();
        let contact = db.insert_contact("jane@acme.com", None, None, None).unwrap();

        assert!(db.get_open_deal_for_contact(&contact.id).unwrap().is_none());

        let deal = db
            .insert_deal(&NewDeal {
                contact_id: &contact.id,
                account_id: None,
                title: "Lead from Jane",
                stage: "new_lead",
                probability: 10,
                lead_source: Some("inbound_email"),
                notes: None,
                follow_up_at: None,
            })
            .unwrap();

        let found = db.get_open_deal_for_contact(&contact.id).unwrap().unwrap();
        assert_eq!(found.id, deal.id);

        db.conn_ref()
            .execute("UPDATE deals SET status = 'won' WHERE id = ?1", params![deal.id])
            .unwrap();
        assert!(db.get_open_deal_for_contact(&contact.id).unwrap().is_none());
    }
}
