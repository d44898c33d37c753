//! Sync coordination: one pass over every active mailbox account.
//!
//! Per message the path is: ledger check, fetch, no-reply filter, CRM
//! projection + ledger row (one transaction), then the best-effort tail
//! (draft, mark read, import label). Authoritative calls propagate;
//! best-effort calls go through `best_effort` so the difference is visible
//! at the call site.
//!
//! Errors are caught at the account boundary and folded into that account's
//! result entry. One broken account never aborts its siblings.

use serde::Serialize;

use super::{credentials, drafts, projector};
use crate::ai::DraftGenerator;
use crate::config::AppConfig;
use crate::db::{CrmDb, DbError, MailboxAccount, NewProcessedMessage};
use crate::gmail::{build_list_query, ListOptions, MailboxApi};

/// Senders matching any of these substrings are automated: they get a ledger
/// entry (so they are never re-evaluated) but no CRM projection or draft.
pub const NO_REPLY_MARKERS: &[&str] = &[
    "noreply",
    "no-reply",
    "donotreply",
    "do-not-reply",
    "mailer-daemon",
    "postmaster",
    "notifications",
    "alert",
    "system",
    "automated",
];

/// Substring match against the fixed no-reply list, case-insensitive.
pub fn is_automated_sender(address: &str) -> bool {
    let lowered = address.to_lowercase();
    NO_REPLY_MARKERS.iter().any(|m| lowered.contains(m))
}

// ============================================================================
// Pass options and summaries
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct PassOptions {
    pub max_results: u32,
    pub only_unread: bool,
    pub newer_than_days: Option<u32>,
}

impl PassOptions {
    /// Scheduled trigger: unread only, small page, for low latency.
    pub fn scheduled() -> Self {
        Self {
            max_results: 10,
            only_unread: true,
            newer_than_days: None,
        }
    }

    /// On-demand trigger: recent messages regardless of read state.
    pub fn on_demand() -> Self {
        Self {
            max_results: 25,
            only_unread: false,
            newer_than_days: Some(7),
        }
    }

    fn list_options(&self) -> ListOptions {
        ListOptions {
            only_unread: self.only_unread,
            newer_than_days: self.newer_than_days,
        }
    }
}

/// Outcome of one account's pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSyncResult {
    pub email: String,
    pub processed: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one full pass. Always returned as a success envelope; failures
/// live in the per-account entries.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub processed: usize,
    pub skipped: usize,
    pub accounts: Vec<AccountSyncResult>,
}

impl SyncSummary {
    /// "Zero accounts connected" is distinct from "all accounts errored".
    pub fn no_accounts(&self) -> bool {
        self.accounts.is_empty()
    }
}

enum MessageOutcome {
    Processed,
    SkippedDuplicate,
    SkippedFiltered,
}

/// Log-and-swallow wrapper for best-effort provider side effects
/// (mark-read, labels). The ledger is the authority on "handled", not the
/// mailbox state, so these never escalate.
fn best_effort<E: std::fmt::Display>(what: &str, message_id: &str, result: Result<(), E>) {
    if let Err(e) = result {
        log::warn!("Best-effort {what} failed for message {message_id}: {e}");
    }
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct SyncCoordinator<'a> {
    db: &'a CrmDb,
    mailbox: &'a dyn MailboxApi,
    generator: &'a dyn DraftGenerator,
    import_label: Option<String>,
    tone: String,
}

impl<'a> SyncCoordinator<'a> {
    pub fn new(
        db: &'a CrmDb,
        mailbox: &'a dyn MailboxApi,
        generator: &'a dyn DraftGenerator,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            mailbox,
            generator,
            import_label: config.import_label().map(|s| s.to_string()),
            tone: config.generation.tone.clone(),
        }
    }

    /// Run one pass over all active accounts, in connection order.
    ///
    /// Only a coordinator-level failure (listing the accounts themselves)
    /// surfaces as `Err`; everything else lands in the summary.
    pub async fn run_pass(&self, opts: &PassOptions) -> Result<SyncSummary, DbError> {
        let accounts = self.db.list_active_accounts()?;
        if accounts.is_empty() {
            log::info!("Sync pass: no active mailbox accounts connected");
            return Ok(SyncSummary::default());
        }

        let mut summary = SyncSummary::default();
        for account in &accounts {
            let result = self.sync_account(account, opts).await;
            summary.processed += result.processed;
            summary.skipped += result.skipped;
            summary.accounts.push(result);
        }

        log::info!(
            "Sync pass complete: {} processed, {} skipped across {} account(s)",
            summary.processed,
            summary.skipped,
            summary.accounts.len()
        );
        Ok(summary)
    }

    /// One account's pass. Never propagates; the error, if any, is folded
    /// into the returned entry.
    async fn sync_account(&self, account: &MailboxAccount, opts: &PassOptions) -> AccountSyncResult {
        let mut result = AccountSyncResult {
            email: account.email.clone(),
            processed: 0,
            skipped: 0,
            error: None,
        };

        // Credential failure skips the whole account; no messages touched,
        // no sync stamp.
        let token = match credentials::valid_access_token(self.db, self.mailbox, account).await {
            Ok(token) => token,
            Err(e) => {
                result.error = Some(e);
                return result;
            }
        };

        let query = build_list_query(account.label_filter.as_deref(), &opts.list_options());
        match self
            .mailbox
            .list_message_ids(&token, &query, opts.max_results)
            .await
        {
            Ok(message_ids) => {
                log::debug!(
                    "{}: {} candidate message(s) for query '{}'",
                    account.email,
                    message_ids.len(),
                    query
                );
                for message_id in &message_ids {
                    match self.handle_message(account, &token, message_id).await {
                        Ok(MessageOutcome::Processed) => result.processed += 1,
                        Ok(MessageOutcome::SkippedDuplicate)
                        | Ok(MessageOutcome::SkippedFiltered) => result.skipped += 1,
                        Err(e) => {
                            // Fatal for the remainder of this account's pass;
                            // already-committed messages stay committed.
                            log::error!("{}: {e}", account.email);
                            result.error = Some(e);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                result.error = Some(format!("message listing failed: {e}"));
            }
        }

        // The token resolved, so the pass ran; stamp it even if a later
        // message errored.
        if let Err(e) = self.db.touch_account_sync(&account.id) {
            log::warn!("Failed to stamp last sync for {}: {e}", account.email);
        }

        result
    }

    async fn handle_message(
        &self,
        account: &MailboxAccount,
        token: &str,
        message_id: &str,
    ) -> Result<MessageOutcome, String> {
        // The ledger is the sole authority on "already handled".
        if self
            .db
            .is_message_processed(message_id)
            .map_err(|e| format!("ledger lookup failed for {message_id}: {e}"))?
        {
            log::debug!("Skipping already-processed message {message_id}");
            return Ok(MessageOutcome::SkippedDuplicate);
        }

        let msg = self
            .mailbox
            .fetch_message(token, message_id)
            .await
            .map_err(|e| format!("fetch failed for {message_id}: {e}"))?;

        if is_automated_sender(&msg.from_email) {
            log::debug!(
                "Filtering automated sender {} (message {message_id})",
                msg.from_email
            );
            best_effort(
                "mark-read",
                message_id,
                self.mailbox.mark_read(token, message_id).await,
            );
            self.db
                .record_processed(&NewProcessedMessage {
                    account_id: &account.id,
                    message_id: &msg.id,
                    sender_email: Some(&msg.from_email),
                    subject: Some(&msg.subject),
                    contact_id: None,
                    deal_id: None,
                })
                .map_err(|e| format!("ledger insert failed for {message_id}: {e}"))?;
            return Ok(MessageOutcome::SkippedFiltered);
        }

        // Projection and the ledger row commit together, so a crash can
        // never leave CRM rows without their "handled" marker.
        let (projection, record) = self
            .db
            .with_transaction(|db| {
                let contact = projector::resolve_contact(db, &msg)?;
                let deal = projector::resolve_or_create_deal(db, &contact, account, &msg)?;
                projector::log_activity(db, &deal, &contact, &msg)?;
                let record = db.record_processed(&NewProcessedMessage {
                    account_id: &account.id,
                    message_id: &msg.id,
                    sender_email: Some(&msg.from_email),
                    subject: Some(&msg.subject),
                    contact_id: Some(&contact.id),
                    deal_id: Some(&deal.id),
                })?;
                Ok((projector::Projection { contact, deal }, record))
            })
            .map_err(|e| format!("projection failed for {message_id}: {e}"))?;

        // Everything past this point is best-effort; the message counts as
        // processed regardless.
        let _ = drafts::generate_and_store(
            self.db,
            self.generator,
            account,
            &msg,
            &projection,
            &record,
            &self.tone,
        )
        .await;

        best_effort(
            "mark-read",
            message_id,
            self.mailbox.mark_read(token, message_id).await,
        );
        if let Some(label) = &self.import_label {
            best_effort(
                "label-apply",
                message_id,
                self.mailbox.ensure_label(token, message_id, label).await,
            );
        }

        log::info!(
            "Processed message {message_id} from {} into deal '{}'",
            msg.from_email,
            projection.deal.title
        );
        Ok(MessageOutcome::Processed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::super::testutil::{make_message, seed_account, MockGenerator, MockMailbox};
    use super::*;
    use crate::db::testutil::test_db;

    fn default_config() -> AppConfig {
        serde_json::from_str("{}").expect("default config")
    }

    #[test]
    fn test_automated_sender_heuristic() {
        for addr in [
            "noreply@billing.com",
            "no-reply@store.example",
            "donotreply@corp.com",
            "do-not-reply@corp.com",
            "mailer-daemon@mx.example",
            "postmaster@example.com",
            "notifications@github.com",
            "alert@monitoring.io",
            "system@internal.example",
            "automated@deploys.example",
            "NOREPLY@SHOUTY.COM",
        ] {
            assert!(is_automated_sender(addr), "{addr} should be filtered");
        }
        for addr in ["jane@acme.com", "bob.smith@partner.example"] {
            assert!(!is_automated_sender(addr), "{addr} should pass");
        }
    }

    #[tokio::test]
    async fn test_scenario_one_lead_one_automated() {
        let (db, _dir) = test_db();
        let account = seed_account(&db, "a1@sales.example", "tok-a1");

        let mut mailbox = MockMailbox::default();
        mailbox.inboxes.insert(
            "tok-a1".to_string(),
            vec![
                make_message("m1", Some("Jane Doe"), "jane@acme.com", "Pricing?"),
                make_message("m2", None, "noreply@billing.com", "Your invoice"),
            ],
        );
        let generator = MockGenerator::default();

        let coordinator =
            SyncCoordinator::new(&db, &mailbox, &generator, &default_config());
        let summary = coordinator.run_pass(&PassOptions::scheduled()).await.unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.accounts.len(), 1);
        assert!(summary.accounts[0].error.is_none());

        // m1: contact, deal referencing the sender, activity, pending draft
        let contact = db.get_contact_by_email("jane@acme.com").unwrap().unwrap();
        let deal = db.get_open_deal_for_contact(&contact.id).unwrap().unwrap();
        assert!(deal.title.contains("Jane Doe"));
        assert_eq!(db.list_activities_for_deal(&deal.id).unwrap().len(), 1);
        let drafts = db.list_pending_drafts().unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].status, "pending");

        // m2: ledgered with no links, nothing else
        let records = db.list_processed_for_account(&account.id).unwrap();
        assert_eq!(records.len(), 2);
        let m2 = records.iter().find(|r| r.message_id == "m2").unwrap();
        assert!(m2.contact_id.is_none());
        assert!(m2.deal_id.is_none());
        assert!(db.get_contact_by_email("noreply@billing.com").unwrap().is_none());

        // Both messages marked read; only m1 labeled
        let marked = mailbox.marked_read.lock().unwrap().clone();
        assert!(marked.contains(&"m1".to_string()));
        assert!(marked.contains(&"m2".to_string()));
        let labeled = mailbox.labeled.lock().unwrap().clone();
        assert_eq!(labeled, vec![("m1".to_string(), "CRM/Imported".to_string())]);

        // Pass stamped the account
        let reloaded = db.get_account_by_email("a1@sales.example").unwrap().unwrap();
        assert!(reloaded.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let (db, _dir) = test_db();
        let account = seed_account(&db, "a1@sales.example", "tok-a1");

        let mut mailbox = MockMailbox::default();
        mailbox.inboxes.insert(
            "tok-a1".to_string(),
            vec![make_message("m1", Some("Jane"), "jane@acme.com", "Pricing?")],
        );
        let generator = MockGenerator::default();
        let coordinator =
            SyncCoordinator::new(&db, &mailbox, &generator, &default_config());

        let first = coordinator.run_pass(&PassOptions::scheduled()).await.unwrap();
        assert_eq!(first.processed, 1);

        // Mailbox unchanged: the second pass processes zero new messages
        let second = coordinator.run_pass(&PassOptions::scheduled()).await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 1);

        assert_eq!(db.list_processed_for_account(&account.id).unwrap().len(), 1);
        let contact = db.get_contact_by_email("jane@acme.com").unwrap().unwrap();
        let deal = db.get_open_deal_for_contact(&contact.id).unwrap().unwrap();
        assert_eq!(db.list_activities_for_deal(&deal.id).unwrap().len(), 1);
        assert_eq!(db.list_pending_drafts().unwrap().len(), 1);
        // No second generation call either
        assert_eq!(*generator.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_deal_reused_across_messages_from_same_sender() {
        let (db, _dir) = test_db();
        seed_account(&db, "a1@sales.example", "tok-a1");

        let mut mailbox = MockMailbox::default();
        mailbox.inboxes.insert(
            "tok-a1".to_string(),
            vec![
                make_message("m1", Some("Jane"), "jane@acme.com", "Pricing?"),
                make_message("m2", Some("Jane"), "jane@acme.com", "One more thing"),
            ],
        );
        let generator = MockGenerator::default();
        let coordinator =
            SyncCoordinator::new(&db, &mailbox, &generator, &default_config());

        let summary = coordinator.run_pass(&PassOptions::scheduled()).await.unwrap();
        assert_eq!(summary.processed, 2);

        let contact = db.get_contact_by_email("jane@acme.com").unwrap().unwrap();
        let deal_count: i32 = db
            .conn_ref()
            .query_row(
                "SELECT COUNT(*) FROM deals WHERE contact_id = ?1",
                rusqlite::params![contact.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(deal_count, 1);

        // Both messages landed on the shared deal's timeline
        let deal = db.get_open_deal_for_contact(&contact.id).unwrap().unwrap();
        assert_eq!(db.list_activities_for_deal(&deal.id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_account_does_not_abort_siblings() {
        let (db, _dir) = test_db();
        let a1 = seed_account(&db, "a1@sales.example", "tok-a1");
        let a2 = seed_account(&db, "a2@sales.example", "tok-a2");
        let a3 = seed_account(&db, "a3@sales.example", "tok-a3");

        // a2's token is stale and its refresh is rejected
        let past = (chrono::Utc::now() - chrono::Duration::hours(1)).to_rfc3339();
        db.update_account_tokens(&a2.id, "tok-a2", &past).unwrap();

        let mut mailbox = MockMailbox::default();
        mailbox.failing_refresh_tokens.insert("rt-tok-a2".to_string());
        mailbox.inboxes.insert(
            "tok-a1".to_string(),
            vec![make_message("m1", Some("Jane"), "jane@acme.com", "Hi")],
        );
        mailbox.inboxes.insert(
            "tok-a3".to_string(),
            vec![make_message("m3", Some("Ben"), "ben@globex.com", "Quote request")],
        );
        let generator = MockGenerator::default();
        let coordinator =
            SyncCoordinator::new(&db, &mailbox, &generator, &default_config());

        let summary = coordinator.run_pass(&PassOptions::scheduled()).await.unwrap();

        assert_eq!(summary.accounts.len(), 3);
        assert_eq!(summary.processed, 2);
        let by_email: std::collections::HashMap<_, _> = summary
            .accounts
            .iter()
            .map(|r| (r.email.as_str(), r))
            .collect();
        assert_eq!(by_email["a1@sales.example"].processed, 1);
        assert!(by_email["a1@sales.example"].error.is_none());
        assert_eq!(by_email["a3@sales.example"].processed, 1);
        assert!(by_email["a2@sales.example"].error.is_some());
        assert_eq!(by_email["a2@sales.example"].processed, 0);

        // a2 is deactivated and untouched: no sync stamp, no messages
        let reloaded = db.get_account_by_email("a2@sales.example").unwrap().unwrap();
        assert!(!reloaded.is_active);
        assert!(reloaded.last_synced_at.is_none());
        assert!(db.list_processed_for_account(&a2.id).unwrap().is_empty());

        // a1 and a3 were stamped
        for id in [&a1.id, &a3.id] {
            let count = db.list_processed_for_account(id).unwrap().len();
            assert_eq!(count, 1);
        }
    }

    #[tokio::test]
    async fn test_generation_failure_still_counts_message_processed() {
        let (db, _dir) = test_db();
        let account = seed_account(&db, "a1@sales.example", "tok-a1");

        let mut mailbox = MockMailbox::default();
        mailbox.inboxes.insert(
            "tok-a1".to_string(),
            vec![make_message("m1", Some("Jane"), "jane@acme.com", "Pricing?")],
        );
        let generator = MockGenerator {
            fail: true,
            ..Default::default()
        };
        let coordinator =
            SyncCoordinator::new(&db, &mailbox, &generator, &default_config());

        let summary = coordinator.run_pass(&PassOptions::scheduled()).await.unwrap();
        assert_eq!(summary.processed, 1);
        assert!(summary.accounts[0].error.is_none());

        // Ledger, contact, deal, activity all present; draft absent
        assert!(db.is_message_processed("m1").unwrap());
        let contact = db.get_contact_by_email("jane@acme.com").unwrap().unwrap();
        let deal = db.get_open_deal_for_contact(&contact.id).unwrap().unwrap();
        assert_eq!(db.list_activities_for_deal(&deal.id).unwrap().len(), 1);
        assert!(db.list_pending_drafts().unwrap().is_empty());
        let records = db.list_processed_for_account(&account.id).unwrap();
        assert!(db.get_draft_for_message(&records[0].id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_remainder_but_keeps_commits() {
        let (db, _dir) = test_db();
        let account = seed_account(&db, "a1@sales.example", "tok-a1");

        let mut mailbox = MockMailbox::default();
        mailbox.inboxes.insert(
            "tok-a1".to_string(),
            vec![
                make_message("m1", Some("Jane"), "jane@acme.com", "Hi"),
                make_message("m2", Some("Ben"), "ben@globex.com", "Hello"),
                make_message("m3", Some("Ava"), "ava@initech.com", "Hey"),
            ],
        );
        mailbox.failing_fetches.insert("m2".to_string());
        let generator = MockGenerator::default();
        let coordinator =
            SyncCoordinator::new(&db, &mailbox, &generator, &default_config());

        let summary = coordinator.run_pass(&PassOptions::scheduled()).await.unwrap();

        // m1 committed, m2 errored, m3 never reached
        assert_eq!(summary.processed, 1);
        assert!(summary.accounts[0].error.is_some());
        assert!(db.is_message_processed("m1").unwrap());
        assert!(!db.is_message_processed("m2").unwrap());
        assert!(!db.is_message_processed("m3").unwrap());

        // The pass still stamps the account (the token resolved)
        let reloaded = db.get_account_by_email("a1@sales.example").unwrap().unwrap();
        assert!(reloaded.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_zero_accounts_is_an_explicit_outcome() {
        let (db, _dir) = test_db();
        let mailbox = MockMailbox::default();
        let generator = MockGenerator::default();
        let coordinator =
            SyncCoordinator::new(&db, &mailbox, &generator, &default_config());

        let summary = coordinator.run_pass(&PassOptions::on_demand()).await.unwrap();
        assert!(summary.no_accounts());
        assert_eq!(summary.processed, 0);
    }
}
