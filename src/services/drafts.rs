//! Draft orchestration: ask the generation collaborator for a reply and
//! persist it as a pending draft.
//!
//! Everything here is best-effort by contract. A generation or persistence
//! failure is logged and swallowed; the message is already ledgered and
//! projected, so a human still sees the inbound lead without a draft.

use super::projector::Projection;
use crate::ai::{parse_generated_reply, DraftGenerator, ReplyContext};
use crate::db::{CrmDb, DbDraft, MailboxAccount, NewDraft, ProcessedMessage};
use crate::gmail::InboundMessage;

/// Generate a reply draft for one projected message and store it with
/// status `pending`. Returns `None` when generation or persistence failed;
/// never propagates an error.
pub async fn generate_and_store(
    db: &CrmDb,
    generator: &dyn DraftGenerator,
    account: &MailboxAccount,
    msg: &InboundMessage,
    projection: &Projection,
    record: &ProcessedMessage,
    tone: &str,
) -> Option<DbDraft> {
    let Projection { contact, deal } = projection;
    let ctx = ReplyContext {
        sender_name: msg.from_name.as_deref(),
        sender_email: &msg.from_email,
        subject: &msg.subject,
        body: &msg.body,
        contact_name: contact.name.as_deref(),
        contact_company: contact.company.as_deref(),
        deal_title: &deal.title,
        deal_stage: &deal.stage,
        tone,
    };

    let raw = match generator.generate_reply(&ctx).await {
        Ok(text) => text,
        Err(e) => {
            log::warn!(
                "Draft generation failed for message {} ({}): {e}",
                msg.id,
                msg.from_email
            );
            return None;
        }
    };

    let reply = parse_generated_reply(&raw, &msg.subject);

    match db.insert_draft(&NewDraft {
        processed_message_id: &record.id,
        account_id: &account.id,
        contact_id: Some(&contact.id),
        deal_id: Some(&deal.id),
        original_sender: Some(&msg.from_email),
        original_subject: Some(&msg.subject),
        original_body: Some(&msg.body),
        received_at: Some(&msg.received_at.to_rfc3339()),
        draft_subject: &reply.subject,
        draft_body: &reply.body,
        tone,
    }) {
        Ok(draft) => {
            log::info!(
                "Stored pending draft {} for message {} ({})",
                draft.id,
                msg.id,
                msg.from_email
            );
            Some(draft)
        }
        Err(e) => {
            log::warn!("Failed to store draft for message {}: {e}", msg.id);
            None
        }
    }
}
