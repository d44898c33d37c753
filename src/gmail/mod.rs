//! Native Gmail API client.
//!
//! Direct HTTP via reqwest against the Gmail v1 and OAuth2 token endpoints.
//! Tokens live per-account in the `mailbox_accounts` table; this module only
//! knows how to exchange and refresh them.
//!
//! Modules:
//! - auth: OAuth2 browser consent flow for connecting an account
//! - client: message list/get/modify + labels, behind the `MailboxApi` trait

pub mod auth;
pub mod client;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use client::{build_list_query, GmailClient, ListOptions};

/// OAuth2 scopes the pipeline needs: read, mark-read, and labels.
pub const SCOPES: &[&str] = &["https://www.googleapis.com/auth/gmail.modify"];

/// Per-call timeout for provider requests.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Error type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum GmailApiError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("OAuth flow cancelled")]
    FlowCancelled,
}

// ============================================================================
// Normalized message + trait surface
// ============================================================================

/// A normalized inbound message, independent of provider payload shape.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    pub thread_id: String,
    /// Display name from the From header, when present.
    pub from_name: Option<String>,
    /// Normalized (lowercased) address from the From header.
    pub from_email: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

/// Result of a refresh-token exchange.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// The mailbox provider surface the sync coordinator drives.
///
/// Kept dyn-compatible so tests can substitute an in-memory mailbox.
#[async_trait]
pub trait MailboxApi: Send + Sync {
    /// Exchange a refresh token for a new access token.
    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedToken, GmailApiError>;

    /// List candidate message ids matching a provider query, up to
    /// `max_results`. No ordering guarantee beyond provider default.
    async fn list_message_ids(
        &self,
        access_token: &str,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<String>, GmailApiError>;

    /// Fetch and normalize one full message.
    async fn fetch_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<InboundMessage, GmailApiError>;

    /// Clear the unread marker. Idempotent and best-effort: the ledger,
    /// not the read state, is the authority on "handled".
    async fn mark_read(&self, access_token: &str, message_id: &str)
        -> Result<(), GmailApiError>;

    /// Look up a label by name, create it if absent, and apply it to the
    /// message. Callers treat this as best-effort.
    async fn ensure_label(
        &self,
        access_token: &str,
        message_id: &str,
        label_name: &str,
    ) -> Result<(), GmailApiError>;
}

// ============================================================================
// Token expiry
// ============================================================================

/// True when the stored expiry is missing, unparseable, or within
/// `margin_secs` of now. Callers refresh rather than risk a mid-pass 401.
pub fn token_expiring(expires_at: Option<&str>, margin_secs: i64) -> bool {
    match expires_at {
        None => true,
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(expiry) => {
                let now = Utc::now();
                expiry.with_timezone(&Utc) <= now + chrono::Duration::seconds(margin_secs)
            }
            Err(_) => true,
        },
    }
}

// ============================================================================
// Token refresh
// ============================================================================

/// Exchange a refresh token for a new access token at the provider's token
/// endpoint.
pub async fn refresh_access_token(
    http: &reqwest::Client,
    token_uri: &str,
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
) -> Result<RefreshedToken, GmailApiError> {
    let mut form = vec![
        ("client_id", client_id),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];
    if let Some(secret) = client_secret {
        form.push(("client_secret", secret));
    }

    let resp = http.post(token_uri).form(&form).send().await?;
    let status = resp.status();
    let body_text = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(map_refresh_error(status.as_u16(), &body_text));
    }

    let body: serde_json::Value = serde_json::from_str(&body_text)?;
    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| GmailApiError::RefreshFailed("No access_token in response".into()))?
        .to_string();
    let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
    let expires_at = Utc::now() + chrono::Duration::seconds(expires_in as i64);

    Ok(RefreshedToken {
        access_token,
        expires_at,
    })
}

fn map_refresh_error(status: u16, body: &str) -> GmailApiError {
    let lowered = body.to_lowercase();
    if (status == 400 || status == 401)
        && (lowered.contains("invalid_grant") || lowered.contains("token has been expired"))
    {
        return GmailApiError::AuthExpired;
    }
    GmailApiError::RefreshFailed(format!("HTTP {}: {}", status, body))
}

// ============================================================================
// Retry
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryDecision {
    Retryable,
    NonRetryable,
}

fn retry_decision_for_status(status: reqwest::StatusCode) -> RetryDecision {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RetryDecision::Retryable
    } else {
        RetryDecision::NonRetryable
    }
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(value) = retry_after.and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = value.parse::<u64>() {
            return Duration::from_secs(secs.min(30));
        }
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0))
        % 150;
    Duration::from_millis(base.saturating_add(jitter))
}

/// Send a request, retrying 429/408/5xx responses and transport-level
/// timeouts with capped exponential backoff. Honors Retry-After.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, GmailApiError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(GmailApiError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                let decision = retry_decision_for_status(status);
                if decision == RetryDecision::Retryable && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "gmail retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "gmail retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(GmailApiError::Http(err));
            }
        }
    }

    Err(GmailApiError::RefreshFailed(
        "request exhausted retries".to_string(),
    ))
}

// ============================================================================
// Tests
// ============================================================================
