//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),
}

/// A row from `mailbox_accounts`: one OAuth-connected inbox.
///
/// Owned by the credential store: mutated on connect, token refresh,
/// disconnect (soft: `is_active` cleared) and after each sync pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxAccount {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub token_expires_at: Option<String>,
    pub is_active: bool,
    /// Optional provider query fragment appended to every listing
    /// (e.g. `label:CRM` or `from:customer.com`).
    pub label_filter: Option<String>,
    pub last_synced_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from `processed_messages`: the idempotency ledger.
///
/// Created exactly once per handled message, never updated or deleted.
/// Existence of a row is the sole authority for "already handled".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedMessage {
    pub id: String,
    pub account_id: String,
    pub message_id: String,
    pub sender_email: Option<String>,
    pub subject: Option<String>,
    pub contact_id: Option<String>,
    pub deal_id: Option<String>,
    pub processed_at: String,
}

/// A row from `contacts`. Identity for matching is the lowercased email.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbContact {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from `deals`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbDeal {
    pub id: String,
    pub contact_id: String,
    pub account_id: Option<String>,
    pub title: String,
    pub stage: String,
    pub probability: i32,
    pub lead_source: Option<String>,
    pub notes: Option<String>,
    pub follow_up_at: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from `activities`: an audit-log entry for one inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbActivity {
    pub id: String,
    pub deal_id: String,
    pub contact_id: String,
    pub kind: String,
    pub title: String,
    pub body: Option<String>,
    pub outcome: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
}

/// A row from `drafts`: an AI-proposed reply awaiting human review.
///
/// Lifecycle: `pending` -> `sent` (send action, outside this pipeline)
/// or `pending` -> `failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbDraft {
    pub id: String,
    pub processed_message_id: String,
    pub account_id: String,
    pub contact_id: Option<String>,
    pub deal_id: Option<String>,
    pub original_sender: Option<String>,
    pub original_subject: Option<String>,
    pub original_body: Option<String>,
    pub received_at: Option<String>,
    pub draft_subject: String,
    pub draft_body: String,
    pub tone: String,
    pub status: String,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
