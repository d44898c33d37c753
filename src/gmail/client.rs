//! Gmail API v1: list, fetch, mark read, and label inbound messages.
//!
//! Fetches use `format=full` so one round trip yields headers and body.
//! Bodies prefer `text/plain`, fall back to `text/html` rendered to text,
//! then to the provider snippet.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::config::OAuthConfig;

use super::{
    refresh_access_token, send_with_retry, GmailApiError, InboundMessage, MailboxApi,
    RefreshedToken, RetryPolicy, PROVIDER_TIMEOUT,
};

const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

// ============================================================================
// Query building
// ============================================================================

/// Listing options for one sync pass.
#[derive(Debug, Clone, Copy)]
pub struct ListOptions {
    pub only_unread: bool,
    pub newer_than_days: Option<u32>,
}

/// Build the provider query string for a listing: pass options plus the
/// account's optional label/query filter, space-joined.
pub fn build_list_query(label_filter: Option<&str>, opts: &ListOptions) -> String {
    let mut parts: Vec<String> = Vec::new();
    if opts.only_unread {
        parts.push("is:unread".to_string());
    }
    if let Some(days) = opts.newer_than_days {
        parts.push(format!("newer_than:{days}d"));
    }
    if let Some(filter) = label_filter {
        let trimmed = filter.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
    }
    parts.join(" ")
}

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullMessageDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    snippet: String,
    /// Epoch milliseconds, as a string, per the Gmail schema.
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PayloadBody>,
    #[serde(default)]
    parts: Vec<Payload>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelListResponse {
    #[serde(default)]
    labels: Vec<Label>,
}

#[derive(Debug, Deserialize)]
struct Label {
    id: String,
    name: String,
}

// ============================================================================
// Header parsing + body extraction
// ============================================================================

/// Parse a From header like `"Jane Doe" <jane@acme.com>` into
/// (display name, lowercased address). Bare addresses come back with no name.
pub fn parse_from_header(value: &str) -> (Option<String>, String) {
    let trimmed = value.trim();
    if let (Some(lt), Some(gt)) = (trimmed.find('<'), trimmed.rfind('>')) {
        if lt < gt {
            let email = trimmed[lt + 1..gt].trim().to_lowercase();
            let name = trimmed[..lt].trim().trim_matches('"').trim().to_string();
            let name = if name.is_empty() { None } else { Some(name) };
            return (name, email);
        }
    }
    (None, trimmed.to_lowercase())
}

/// Recursively walk MIME parts to find body data matching the target type.
fn extract_body_text(payload: &Payload, target_mime: &str) -> Option<String> {
    if payload.mime_type == target_mime {
        if let Some(ref body) = payload.body {
            if let Some(ref data) = body.data {
                return decode_url_safe_base64(data);
            }
        }
    }
    for part in &payload.parts {
        if let Some(text) = extract_body_text(part, target_mime) {
            return Some(text);
        }
    }
    None
}

/// Decode URL-safe base64 (no padding) as used by the Gmail API.
fn decode_url_safe_base64(data: &str) -> Option<String> {
    match base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(data) {
        Ok(bytes) => String::from_utf8(bytes).ok(),
        Err(_) => None,
    }
}

/// Extract a plain-text body: `text/plain` preferred, `text/html` rendered
/// to text as fallback, then the snippet, then empty.
fn extract_message_body(payload: Option<&Payload>, snippet: &str) -> String {
    let Some(payload) = payload else {
        return snippet.to_string();
    };
    if let Some(text) = extract_body_text(payload, "text/plain") {
        return text;
    }
    if let Some(html) = extract_body_text(payload, "text/html") {
        let rendered = html2text::from_read(html.as_bytes(), 80).unwrap_or_default();
        if !rendered.trim().is_empty() {
            return rendered;
        }
    }
    snippet.to_string()
}

fn parse_internal_date(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| s.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

// ============================================================================
// Client
// ============================================================================

pub struct GmailClient {
    http: reqwest::Client,
    oauth: OAuthConfig,
    retry: RetryPolicy,
}

impl GmailClient {
    pub fn new(oauth: OAuthConfig) -> Result<Self, GmailApiError> {
        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            oauth,
            retry: RetryPolicy::default(),
        })
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, GmailApiError> {
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GmailApiError::AuthExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GmailApiError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp)
    }

    /// Resolve a label id by name, creating the label when absent.
    async fn ensure_label_id(
        &self,
        access_token: &str,
        label_name: &str,
    ) -> Result<String, GmailApiError> {
        let resp = send_with_retry(
            self.http
                .get(format!("{GMAIL_BASE}/labels"))
                .bearer_auth(access_token),
            &self.retry,
        )
        .await?;
        let resp = Self::check_status(resp).await?;
        let list: LabelListResponse = resp.json().await?;

        if let Some(label) = list
            .labels
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(label_name))
        {
            return Ok(label.id.clone());
        }

        let body = serde_json::json!({
            "name": label_name,
            "labelListVisibility": "labelShow",
            "messageListVisibility": "show",
        });
        let resp = send_with_retry(
            self.http
                .post(format!("{GMAIL_BASE}/labels"))
                .bearer_auth(access_token)
                .json(&body),
            &self.retry,
        )
        .await?;
        let resp = Self::check_status(resp).await?;
        let created: Label = resp.json().await?;
        log::info!("Created Gmail label '{}' ({})", created.name, created.id);
        Ok(created.id)
    }
}

#[async_trait]
impl MailboxApi for GmailClient {
    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedToken, GmailApiError> {
        refresh_access_token(
            &self.http,
            &self.oauth.token_uri,
            &self.oauth.client_id,
            self.oauth.client_secret.as_deref(),
            refresh_token,
        )
        .await
    }

    async fn list_message_ids(
        &self,
        access_token: &str,
        query: &str,
        max_results: u32,
    ) -> Result<Vec<String>, GmailApiError> {
        let resp = send_with_retry(
            self.http
                .get(format!("{GMAIL_BASE}/messages"))
                .bearer_auth(access_token)
                .query(&[("q", query), ("maxResults", &max_results.to_string())]),
            &self.retry,
        )
        .await?;
        let resp = Self::check_status(resp).await?;
        let list: MessageListResponse = resp.json().await?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn fetch_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<InboundMessage, GmailApiError> {
        let resp = send_with_retry(
            self.http
                .get(format!("{GMAIL_BASE}/messages/{message_id}"))
                .bearer_auth(access_token)
                .query(&[("format", "full")]),
            &self.retry,
        )
        .await?;
        let resp = Self::check_status(resp).await?;
        let detail: FullMessageDetail = resp.json().await?;

        let headers = detail
            .payload
            .as_ref()
            .map(|p| &p.headers[..])
            .unwrap_or(&[]);
        let get_header = |name: &str| -> String {
            headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.clone())
                .unwrap_or_default()
        };

        let (from_name, from_email) = parse_from_header(&get_header("From"));
        let subject = get_header("Subject");
        let body = extract_message_body(detail.payload.as_ref(), &detail.snippet);
        let received_at = parse_internal_date(detail.internal_date.as_deref());

        Ok(InboundMessage {
            id: detail.id,
            thread_id: detail.thread_id,
            from_name,
            from_email,
            subject,
            body,
            received_at,
        })
    }

    async fn mark_read(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<(), GmailApiError> {
        let body = serde_json::json!({ "removeLabelIds": ["UNREAD"] });
        let resp = send_with_retry(
            self.http
                .post(format!("{GMAIL_BASE}/messages/{message_id}/modify"))
                .bearer_auth(access_token)
                .json(&body),
            &self.retry,
        )
        .await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn ensure_label(
        &self,
        access_token: &str,
        message_id: &str,
        label_name: &str,
    ) -> Result<(), GmailApiError> {
        let label_id = self.ensure_label_id(access_token, label_name).await?;
        let body = serde_json::json!({ "addLabelIds": [label_id] });
        let resp = send_with_retry(
            self.http
                .post(format!("{GMAIL_BASE}/messages/{message_id}/modify"))
                .bearer_auth(access_token)
                .json(&body),
            &self.retry,
        )
        .await?;
        Self::check_status(resp).await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_list_query_scheduled_shape() {
        let q = build_list_query(
            None,
            &ListOptions {
                only_unread: true,
                newer_than_days: None,
            },
        );
        assert_eq!(q, "is:unread");
    }

    #[test]
    fn test_build_list_query_on_demand_shape() {
        let q = build_list_query(
            None,
            &ListOptions {
                only_unread: false,
                newer_than_days: Some(7),
            },
        );
        assert_eq!(q, "newer_than:7d");
    }

    #[test]
    fn test_build_list_query_with_account_filter() {
        let q = build_list_query(
            Some("label:CRM"),
            &ListOptions {
                only_unread: true,
                newer_than_days: Some(1),
            },
        );
        assert_eq!(q, "is:unread newer_than:1d label:CRM");
    }

    #[test]
    fn test_build_list_query_blank_filter_ignored() {
        let q = build_list_query(
            Some("   "),
            &ListOptions {
                only_unread: true,
                newer_than_days: None,
            },
        );
        assert_eq!(q, "is:unread");
    }

    #[test]
    fn test_parse_from_header_with_display_name() {
        let (name, email) = parse_from_header("\"Jane Doe\" <Jane@Acme.com>");
        assert_eq!(name.as_deref(), Some("Jane Doe"));
        assert_eq!(email, "jane@acme.com");
    }

    #[test]
    fn test_parse_from_header_bare_address() {
        let (name, email) = parse_from_header("noreply@billing.com");
        assert!(name.is_none());
        assert_eq!(email, "noreply@billing.com");
    }

    #[test]
    fn test_parse_from_header_angle_only() {
        let (name, email) = parse_from_header("<bob@example.com>");
        assert!(name.is_none());
        assert_eq!(email, "bob@example.com");
    }

    fn b64(text: &str) -> String {
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(text.as_bytes())
    }

    #[test]
    fn test_body_prefers_text_plain_in_multipart() {
        let json = format!(
            r#"{{
                "id": "m1",
                "threadId": "t1",
                "snippet": "snippet text",
                "internalDate": "1754290800000",
                "payload": {{
                    "mimeType": "multipart/alternative",
                    "headers": [
                        {{"name": "From", "value": "Jane <jane@acme.com>"}},
                        {{"name": "Subject", "value": "Pricing?"}}
                    ],
                    "parts": [
                        {{"mimeType": "text/html", "body": {{"data": "{}"}}, "parts": []}},
                        {{"mimeType": "text/plain", "body": {{"data": "{}"}}, "parts": []}}
                    ]
                }}
            }}"#,
            b64("<p>HTML body</p>"),
            b64("plain body"),
        );
        let detail: FullMessageDetail = serde_json::from_str(&json).unwrap();
        let body = extract_message_body(detail.payload.as_ref(), &detail.snippet);
        assert_eq!(body, "plain body");
    }

    #[test]
    fn test_body_falls_back_to_html_stripped() {
        let json = format!(
            r#"{{
                "id": "m1",
                "threadId": "t1",
                "snippet": "snippet text",
                "payload": {{
                    "mimeType": "text/html",
                    "headers": [],
                    "body": {{"data": "{}"}},
                    "parts": []
                }}
            }}"#,
            b64("<html><body><p>Hello <b>there</b></p></body></html>"),
        );
        let detail: FullMessageDetail = serde_json::from_str(&json).unwrap();
        let body = extract_message_body(detail.payload.as_ref(), &detail.snippet);
        assert!(body.contains("Hello"));
        assert!(body.contains("there"));
        assert!(!body.contains('<'));
    }

    #[test]
    fn test_body_falls_back_to_snippet() {
        let json = r#"{
            "id": "m1",
            "threadId": "t1",
            "snippet": "attachment-only message",
            "payload": {
                "mimeType": "application/pdf",
                "headers": [],
                "parts": []
            }
        }"#;
        let detail: FullMessageDetail = serde_json::from_str(json).unwrap();
        let body = extract_message_body(detail.payload.as_ref(), &detail.snippet);
        assert_eq!(body, "attachment-only message");
    }

    #[test]
    fn test_internal_date_parsing() {
        let dt = parse_internal_date(Some("1754290800000"));
        assert_eq!(dt.timestamp_millis(), 1_754_290_800_000);
        // Garbage falls back to "now" rather than failing the fetch
        let fallback = parse_internal_date(Some("not-a-number"));
        assert!(fallback <= Utc::now());
    }

    #[test]
    fn test_message_list_empty_response() {
        let json = r#"{"resultSizeEstimate": 0}"#;
        let resp: MessageListResponse = serde_json::from_str(json).unwrap();
        assert!(resp.messages.is_empty());
    }
}
