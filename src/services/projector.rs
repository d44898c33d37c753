//! CRM projection: turn one inbound message into contact, deal, and
//! activity rows.
//!
//! Ordering contract: contact before deal (the deal needs a contact id),
//! activity after both. A contact with an open deal never gets a second
//! one; subsequent messages reuse it.

use chrono::Utc;

use crate::db::{
    CrmDb, DbActivity, DbContact, DbDeal, DbError, MailboxAccount, NewActivity, NewDeal,
};
use crate::gmail::InboundMessage;

/// Stage and probability for a deal created straight from an inbound email.
pub const INITIAL_STAGE: &str = "new_lead";
pub const INITIAL_PROBABILITY: i32 = 10;
pub const LEAD_SOURCE: &str = "inbound_email";

/// Source tag on contacts created by this pipeline.
pub const CONTACT_SOURCE: &str = "email_import";

/// Deal notes carry at most this much of the message body.
const DEAL_NOTES_BODY_CHARS: usize = 1000;
/// Activity bodies carry a shorter excerpt.
const ACTIVITY_BODY_CHARS: usize = 500;

/// The CRM rows an inbound message resolved to.
#[derive(Debug, Clone)]
pub struct Projection {
    pub contact: DbContact,
    pub deal: DbDeal,
}

/// Char-safe truncation (message bodies are frequently non-ASCII).
fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

/// Case-insensitive contact lookup; creates the contact on a miss.
/// Existing contacts are reused unmodified.
pub fn resolve_contact(db: &CrmDb, msg: &InboundMessage) -> Result<DbContact, DbError> {
    if let Some(existing) = db.get_contact_by_email(&msg.from_email)? {
        return Ok(existing);
    }

    let name = msg
        .from_name
        .clone()
        .or_else(|| msg.from_email.split('@').next().map(|s| s.to_string()));
    let notes = format!("Created from inbound email: \"{}\"", msg.subject);
    let contact = db.insert_contact(
        &msg.from_email,
        name.as_deref(),
        Some(CONTACT_SOURCE),
        Some(&notes),
    )?;
    log::info!("Created contact {} ({})", contact.email, contact.id);
    Ok(contact)
}

/// Reuse the contact's open deal, or create one seeded from the message.
pub fn resolve_or_create_deal(
    db: &CrmDb,
    contact: &DbContact,
    account: &MailboxAccount,
    msg: &InboundMessage,
) -> Result<DbDeal, DbError> {
    if let Some(existing) = db.get_open_deal_for_contact(&contact.id)? {
        log::debug!(
            "Reusing open deal {} for contact {}",
            existing.id,
            contact.email
        );
        return Ok(existing);
    }

    let display = msg
        .from_name
        .as_deref()
        .unwrap_or(msg.from_email.as_str());
    let title = format!("Lead from {display}");
    let account_name = account
        .display_name
        .as_deref()
        .unwrap_or(account.email.as_str());
    let notes = format!(
        "Imported via mailbox {}.\n\n{}",
        account_name,
        excerpt(&msg.body, DEAL_NOTES_BODY_CHARS)
    );
    let follow_up_at = (Utc::now() + chrono::Duration::hours(24)).to_rfc3339();

    let deal = db.insert_deal(&NewDeal {
        contact_id: &contact.id,
        account_id: Some(&account.id),
        title: &title,
        stage: INITIAL_STAGE,
        probability: INITIAL_PROBABILITY,
        lead_source: Some(LEAD_SOURCE),
        notes: Some(&notes),
        follow_up_at: Some(&follow_up_at),
    })?;
    log::info!("Created deal '{}' ({})", deal.title, deal.id);
    Ok(deal)
}

/// Append one audit-log activity for the inbound message.
pub fn log_activity(
    db: &CrmDb,
    deal: &DbDeal,
    contact: &DbContact,
    msg: &InboundMessage,
) -> Result<DbActivity, DbError> {
    let title = if msg.subject.trim().is_empty() {
        "(no subject)".to_string()
    } else {
        msg.subject.clone()
    };
    db.insert_activity(&NewActivity {
        deal_id: &deal.id,
        contact_id: &contact.id,
        kind: "email_received",
        title: &title,
        body: Some(&excerpt(&msg.body, ACTIVITY_BODY_CHARS)),
        outcome: Some("completed"),
        completed_at: Some(&msg.received_at.to_rfc3339()),
    })
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{make_message, seed_account};
    use super::*;
    use crate::db::testutil::test_db;

    #[test]
    fn test_contact_created_once_then_reused() {
        let (db, _dir) = test_db();
        let msg = make_message("m1", Some("Jane Doe"), "jane@acme.com", "Pricing?");

        let first = resolve_contact(&db, &msg).unwrap();
        assert_eq!(first.email, "jane@acme.com");
        assert_eq!(first.name.as_deref(), Some("Jane Doe"));
        assert_eq!(first.source.as_deref(), Some("email_import"));
        assert!(first.notes.as_deref().unwrap().contains("Pricing?"));

        // Different display name, same address: same contact, unmodified
        let msg2 = make_message("m2", Some("J. Doe"), "JANE@acme.com", "Follow-up");
        let second = resolve_contact(&db, &msg2).unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.name.as_deref(), Some("Jane Doe"));
    }

    #[test]
    fn test_contact_name_falls_back_to_local_part() {
        let (db, _dir) = test_db();
        let msg = make_message("m1", None, "jane@acme.com", "Hi");
        let contact = resolve_contact(&db, &msg).unwrap();
        assert_eq!(contact.name.as_deref(), Some("jane"));
    }

    #[test]
    fn test_deal_defaults_and_reuse() {
        let (db, _dir) = test_db();
        let account = seed_account(&db, "sales@acme.com", "tok");
        let msg = make_message("m1", Some("Jane Doe"), "jane@acme.com", "Pricing?");
        let contact = resolve_contact(&db, &msg).unwrap();

        let deal = resolve_or_create_deal(&db, &contact, &account, &msg).unwrap();
        assert_eq!(deal.title, "Lead from Jane Doe");
        assert_eq!(deal.stage, "new_lead");
        assert_eq!(deal.probability, 10);
        assert_eq!(deal.lead_source.as_deref(), Some("inbound_email"));
        assert!(deal.notes.as_deref().unwrap().contains("Sales Team"));
        assert!(deal.follow_up_at.is_some());

        // Second message reuses the same deal
        let msg2 = make_message("m2", Some("Jane Doe"), "jane@acme.com", "More questions");
        let again = resolve_or_create_deal(&db, &contact, &account, &msg2).unwrap();
        assert_eq!(again.id, deal.id);
    }

    #[test]
    fn test_deal_notes_truncate_long_bodies() {
        let (db, _dir) = test_db();
        let account = seed_account(&db, "sales@acme.com", "tok");
        let mut msg = make_message("m1", None, "jane@acme.com", "Hi");
        msg.body = "ü".repeat(5000);
        let contact = resolve_contact(&db, &msg).unwrap();

        let deal = resolve_or_create_deal(&db, &contact, &account, &msg).unwrap();
        let notes = deal.notes.unwrap();
        // Header line plus at most 1000 body chars
        assert!(notes.chars().count() < 1100);
    }

    #[test]
    fn test_activity_records_message_metadata() {
        let (db, _dir) = test_db();
        let account = seed_account(&db, "sales@acme.com", "tok");
        let msg = make_message("m1", Some("Jane Doe"), "jane@acme.com", "Pricing?");
        let contact = resolve_contact(&db, &msg).unwrap();
        let deal = resolve_or_create_deal(&db, &contact, &account, &msg).unwrap();

        let activity = log_activity(&db, &deal, &contact, &msg).unwrap();
        assert_eq!(activity.kind, "email_received");
        assert_eq!(activity.title, "Pricing?");
        assert_eq!(activity.outcome.as_deref(), Some("completed"));
        assert_eq!(
            activity.completed_at.as_deref(),
            Some(msg.received_at.to_rfc3339().as_str())
        );
        assert_eq!(db.list_activities_for_deal(&deal.id).unwrap().len(), 1);
    }

    #[test]
    fn test_excerpt_is_char_safe() {
        assert_eq!(excerpt("héllo wörld", 5), "héllo");
        assert_eq!(excerpt("short", 100), "short");
    }
}
