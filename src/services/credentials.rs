//! Credential lifecycle for connected mailbox accounts.
//!
//! Tokens live in the `mailbox_accounts` table, one row per address. This
//! module decides when a stored access token is still usable, refreshes it
//! through the provider when it is not, and deactivates accounts whose
//! refresh is rejected so future passes skip them until reconnection.

use crate::db::{CrmDb, MailboxAccount, NewMailboxAccount};
use crate::gmail::auth::ConnectedAccount;
use crate::gmail::{token_expiring, MailboxApi};

/// Refresh when the stored expiry is within this many seconds of now.
pub const REFRESH_MARGIN_SECS: i64 = 300;

/// Store (or re-store) a freshly consented account. Reconnecting an address
/// reactivates its existing row rather than creating a duplicate.
pub fn connect_account(
    db: &CrmDb,
    connected: &ConnectedAccount,
) -> Result<MailboxAccount, String> {
    db.upsert_account(&NewMailboxAccount {
        email: &connected.email,
        display_name: connected.display_name.as_deref(),
        access_token: &connected.access_token,
        refresh_token: &connected.refresh_token,
        token_expires_at: Some(&connected.expires_at.to_rfc3339()),
        label_filter: None,
    })
    .map_err(|e| format!("Failed to store account {}: {e}", connected.email))
}

/// Soft-disconnect an account by email. History is kept.
pub fn disconnect_account(db: &CrmDb, email: &str) -> Result<bool, String> {
    let Some(account) = db
        .get_account_by_email(email)
        .map_err(|e| format!("Failed to look up {email}: {e}"))?
    else {
        return Ok(false);
    };
    db.set_account_active(&account.id, false)
        .map_err(|e| format!("Failed to disconnect {email}: {e}"))?;
    log::info!("Disconnected mailbox account {email}");
    Ok(true)
}

/// Return a usable bearer token for one account.
///
/// Refreshes synchronously when the stored expiry is inside the safety
/// margin, persisting the new token. A rejected refresh deactivates the
/// account and returns an error; callers must treat that as "skip this
/// account for this pass".
pub async fn valid_access_token(
    db: &CrmDb,
    mailbox: &dyn MailboxApi,
    account: &MailboxAccount,
) -> Result<String, String> {
    if !token_expiring(account.token_expires_at.as_deref(), REFRESH_MARGIN_SECS) {
        return Ok(account.access_token.clone());
    }

    match mailbox.refresh_access_token(&account.refresh_token).await {
        Ok(refreshed) => {
            db.update_account_tokens(
                &account.id,
                &refreshed.access_token,
                &refreshed.expires_at.to_rfc3339(),
            )
            .map_err(|e| format!("Failed to persist refreshed token for {}: {e}", account.email))?;
            log::debug!("Refreshed access token for {}", account.email);
            Ok(refreshed.access_token)
        }
        Err(e) => {
            // Account is excluded from future passes until re-authorized.
            if let Err(db_err) = db.set_account_active(&account.id, false) {
                log::error!(
                    "Failed to deactivate {} after refresh failure: {db_err}",
                    account.email
                );
            }
            log::warn!(
                "Token refresh failed for {}; account deactivated: {e}",
                account.email
            );
            Err(format!("token refresh failed: {e}"))
        }
    }
}

// ============================================================================
// Legacy single-account token import
// ============================================================================

/// Token file layout from the pre-multi-account era.
#[derive(Debug, serde::Deserialize)]
struct LegacyToken {
    #[serde(alias = "access_token")]
    token: String,
    refresh_token: Option<String>,
    #[serde(default)]
    expiry: Option<String>,
    #[serde(default, alias = "email")]
    account: Option<String>,
}

fn legacy_token_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|home| home.join(".leadflow").join("token.json"))
}

/// One-shot startup reconciliation: absorb a legacy single-account
/// `~/.leadflow/token.json` into the account table, then rename the file
/// aside so this never runs again. Returns the imported email, if any.
pub fn import_legacy_token(db: &CrmDb) -> Result<Option<String>, String> {
    let Some(path) = legacy_token_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let legacy: LegacyToken = serde_json::from_str(&content)
        .map_err(|e| format!("Invalid legacy token file {}: {e}", path.display()))?;

    let Some(email) = legacy.account else {
        log::warn!(
            "Legacy token file {} has no account email; leaving it in place",
            path.display()
        );
        return Ok(None);
    };
    let Some(refresh_token) = legacy.refresh_token else {
        log::warn!(
            "Legacy token file {} has no refresh token; leaving it in place",
            path.display()
        );
        return Ok(None);
    };

    let already_connected = db
        .get_account_by_email(&email)
        .map_err(|e| format!("Failed to look up {email}: {e}"))?
        .is_some();
    if !already_connected {
        db.upsert_account(&NewMailboxAccount {
            email: &email,
            display_name: None,
            access_token: &legacy.token,
            refresh_token: &refresh_token,
            token_expires_at: legacy.expiry.as_deref(),
            label_filter: None,
        })
        .map_err(|e| format!("Failed to import legacy account {email}: {e}"))?;
        log::info!("Imported legacy mailbox token for {email}");
    }

    let retired = path.with_extension("json.imported");
    if let Err(e) = std::fs::rename(&path, &retired) {
        log::warn!("Could not retire legacy token file: {e}");
    }

    Ok(Some(email))
}
