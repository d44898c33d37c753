//! OAuth2 browser consent flow for connecting a mailbox account.
//!
//! Opens the user's browser for consent, captures the redirect on a
//! localhost TcpListener, exchanges the auth code for tokens, and fetches
//! the mailbox address. The caller persists the result through the
//! credential store (`upsert_account`); nothing is written to disk here.

use std::io::{Read, Write};
use std::net::TcpListener;

use chrono::{DateTime, Utc};

use crate::config::OAuthConfig;

use super::{GmailApiError, SCOPES};

/// Tokens and identity for a freshly consented mailbox account.
#[derive(Debug, Clone)]
pub struct ConnectedAccount {
    pub email: String,
    pub display_name: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Run the full OAuth2 consent flow.
///
/// 1. Start TcpListener on a random port
/// 2. Open browser with auth URL
/// 3. Wait for redirect with auth code
/// 4. Exchange code for tokens
/// 5. Fetch the mailbox address
pub async fn run_consent_flow(oauth: &OAuthConfig) -> Result<ConnectedAccount, GmailApiError> {
    if oauth.client_id.is_empty() {
        return Err(GmailApiError::RefreshFailed(
            "No OAuth client configured; set oauth.clientId in ~/.leadflow/config.json".into(),
        ));
    }

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    let redirect_uri = format!("http://localhost:{}", port);

    let scope_string = SCOPES.join(" ");
    let auth_url = format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
        oauth.auth_uri,
        urlencoding(&oauth.client_id),
        urlencoding(&redirect_uri),
        urlencoding(&scope_string),
    );

    log::info!("Opening browser for mailbox consent...");
    if let Err(e) = open::that(&auth_url) {
        log::warn!("Failed to open browser: {}. URL: {}", e, auth_url);
    }

    listener.set_nonblocking(false)?;
    let auth_code = wait_for_auth_code(&listener)?;

    // Exchange auth code for tokens
    let client = reqwest::Client::new();
    let mut form = vec![
        ("code", auth_code.as_str()),
        ("client_id", oauth.client_id.as_str()),
        ("redirect_uri", redirect_uri.as_str()),
        ("grant_type", "authorization_code"),
    ];
    if let Some(secret) = oauth.client_secret.as_deref() {
        form.push(("client_secret", secret));
    }

    let resp = client.post(&oauth.token_uri).form(&form).send().await?;
    if !resp.status().is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(GmailApiError::RefreshFailed(format!(
            "Token exchange failed: {}",
            body
        )));
    }

    let body: serde_json::Value = resp.json().await?;
    let access_token = body["access_token"]
        .as_str()
        .ok_or_else(|| GmailApiError::RefreshFailed("No access_token in response".into()))?
        .to_string();
    let refresh_token = body["refresh_token"]
        .as_str()
        .ok_or_else(|| {
            GmailApiError::RefreshFailed(
                "No refresh_token in response; revoke the app's access and reconnect".into(),
            )
        })?
        .to_string();
    let expires_in = body["expires_in"].as_u64().unwrap_or(3600);
    let expires_at = Utc::now() + chrono::Duration::seconds(expires_in as i64);

    let (email, display_name) = fetch_identity(&client, &access_token).await?;

    Ok(ConnectedAccount {
        email,
        display_name,
        access_token,
        refresh_token,
        expires_at,
    })
}

/// Wait for the OAuth redirect and extract the auth code from the URL.
fn wait_for_auth_code(listener: &TcpListener) -> Result<String, GmailApiError> {
    let (mut stream, _) = listener.accept()?;

    let mut buffer = [0u8; 4096];
    let n = stream.read(&mut buffer)?;
    let request = String::from_utf8_lossy(&buffer[..n]);

    // Extract the code parameter from GET /?code=xxx&scope=... HTTP/1.1
    let code = request
        .lines()
        .next()
        .and_then(|line| {
            let path = line.split_whitespace().nth(1)?;
            let query = path.split('?').nth(1)?;
            query
                .split('&')
                .find(|p| p.starts_with("code="))
                .map(|p| p.strip_prefix("code=").unwrap_or("").to_string())
        })
        .ok_or(GmailApiError::FlowCancelled)?;

    if code.is_empty() {
        if request.contains("error=") {
            send_response(&mut stream, "Authorization denied. You can close this tab.");
            return Err(GmailApiError::FlowCancelled);
        }
        send_response(
            &mut stream,
            "No authorization code received. You can close this tab.",
        );
        return Err(GmailApiError::FlowCancelled);
    }

    // URL-decode the auth code (it may contain %2F etc.)
    let code = url_decode(&code);

    send_response(
        &mut stream,
        "Mailbox connected! You can close this tab and return to leadflow.",
    );

    Ok(code)
}

/// Send an HTTP response to the browser.
fn send_response(stream: &mut impl Write, message: &str) {
    let body = format!(
        "<html><body style=\"font-family: system-ui; text-align: center; padding: 40px;\">\
         <h2>{}</h2></body></html>",
        message
    );
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

/// Fetch the mailbox address (and display name when available).
///
/// Gmail profile gives the address; the OAuth2 userinfo endpoint adds a
/// human name when the scope allows it.
async fn fetch_identity(
    client: &reqwest::Client,
    access_token: &str,
) -> Result<(String, Option<String>), GmailApiError> {
    let mut email = None;
    let mut name = None;

    if let Ok(resp) = client
        .get("https://gmail.googleapis.com/gmail/v1/users/me/profile")
        .bearer_auth(access_token)
        .send()
        .await
    {
        if resp.status().is_success() {
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                email = body["emailAddress"].as_str().map(|s| s.to_lowercase());
            }
        }
    }

    if let Ok(resp) = client
        .get("https://www.googleapis.com/oauth2/v2/userinfo")
        .bearer_auth(access_token)
        .send()
        .await
    {
        if resp.status().is_success() {
            if let Ok(body) = resp.json::<serde_json::Value>().await {
                if email.is_none() {
                    email = body["email"].as_str().map(|s| s.to_lowercase());
                }
                name = body["name"].as_str().map(|s| s.to_string());
            }
        }
    }

    match email {
        Some(email) => Ok((email, name)),
        None => Err(GmailApiError::RefreshFailed(
            "Could not resolve the mailbox address after consent".into(),
        )),
    }
}

/// Simple percent-encoding for URL parameters.
fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Simple URL decoding for a single query value.
fn url_decode(s: &str) -> String {
    url::form_urlencoded::parse(s.as_bytes())
        .map(|(key, val)| {
            if val.is_empty() {
                key.to_string()
            } else {
                format!("{}={}", key, val)
            }
        })
        .collect::<Vec<_>>()
        .join("&")
        .split('=')
        .next()
        .unwrap_or(s)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_decode_plain() {
        assert_eq!(url_decode("4%2Fabc123"), "4/abc123");
    }

    #[test]
    fn test_urlencoding_roundtrip() {
        let encoded = urlencoding("https://www.googleapis.com/auth/gmail.modify");
        assert!(!encoded.contains('/'));
        assert_eq!(url_decode(&encoded), "https://www.googleapis.com/auth/gmail.modify");
    }
}
