//! External text-generation collaborator for reply drafts.
//!
//! The generator is asked for a bare JSON object `{"subject", "body"}`.
//! Model output is treated as hostile input: parsing tolerates surrounding
//! prose and falls back to a "Re:" subject with the raw text as body, so
//! draft generation never fails merely because of response shape.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::GenerationConfig;

/// Per-call timeout for generation requests.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Generation API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Generation returned an empty response")]
    EmptyResponse,
}

/// CRM context handed to the generator alongside the message itself.
#[derive(Debug, Clone)]
pub struct ReplyContext<'a> {
    pub sender_name: Option<&'a str>,
    pub sender_email: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
    pub contact_name: Option<&'a str>,
    pub contact_company: Option<&'a str>,
    pub deal_title: &'a str,
    pub deal_stage: &'a str,
    pub tone: &'a str,
}

/// A parsed (or fallback-assembled) reply draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedReply {
    pub subject: String,
    pub body: String,
}

/// The generation collaborator the draft orchestrator drives.
///
/// Returns raw model text; shaping it into `GeneratedReply` is the caller's
/// job via [`parse_generated_reply`], which cannot fail.
#[async_trait]
pub trait DraftGenerator: Send + Sync {
    async fn generate_reply(&self, ctx: &ReplyContext<'_>) -> Result<String, GenerationError>;
}

// ============================================================================
// Response parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct ReplyPayload {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
}

/// Subject used when the model output is unusable as structured data.
fn fallback_subject(original_subject: &str) -> String {
    let trimmed = original_subject.trim();
    if trimmed.to_lowercase().starts_with("re:") {
        trimmed.to_string()
    } else if trimmed.is_empty() {
        "Re: your message".to_string()
    } else {
        format!("Re: {}", trimmed)
    }
}

/// Parse model output into `{subject, body}`.
///
/// Tolerates surrounding text by scanning for the first `{` and last `}`.
/// Anything unparseable becomes a fallback reply with the raw output as
/// body, never an error.
pub fn parse_generated_reply(output: &str, original_subject: &str) -> GeneratedReply {
    let trimmed = output.trim();

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            if let Ok(parsed) = serde_json::from_str::<ReplyPayload>(&trimmed[start..=end]) {
                if !parsed.body.trim().is_empty() {
                    let subject = if parsed.subject.trim().is_empty() {
                        fallback_subject(original_subject)
                    } else {
                        parsed.subject.trim().to_string()
                    };
                    return GeneratedReply {
                        subject,
                        body: parsed.body,
                    };
                }
            }
        }
    }

    GeneratedReply {
        subject: fallback_subject(original_subject),
        body: trimmed.to_string(),
    }
}

// ============================================================================
// HTTP implementation (OpenAI-compatible chat endpoint)
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

pub struct ChatCompletionsGenerator {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(GENERATION_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    fn build_user_prompt(ctx: &ReplyContext<'_>) -> String {
        let sender = match ctx.sender_name {
            Some(name) => format!("{} <{}>", name, ctx.sender_email),
            None => ctx.sender_email.to_string(),
        };
        let contact_line = match (ctx.contact_name, ctx.contact_company) {
            (Some(name), Some(company)) => format!("{} ({})", name, company),
            (Some(name), None) => name.to_string(),
            (None, Some(company)) => format!("unknown contact at {}", company),
            (None, None) => "new contact".to_string(),
        };

        format!(
            "Draft a reply to this inbound sales email.\n\
             From: {sender}\n\
             Subject: {subject}\n\
             CRM contact: {contact_line}\n\
             Deal: {deal_title} (stage: {deal_stage})\n\
             Tone: {tone}\n\n\
             Message:\n{body}\n\n\
             Return ONLY a JSON object with these fields:\n\
             - subject: string (reply subject line)\n\
             - body: string (plain-text reply body)\n\
             Do not include any text outside the JSON object.",
            sender = sender,
            subject = ctx.subject,
            contact_line = contact_line,
            deal_title = ctx.deal_title,
            deal_stage = ctx.deal_stage,
            tone = ctx.tone,
            body = ctx.body,
        )
    }
}

#[async_trait]
impl DraftGenerator for ChatCompletionsGenerator {
    async fn generate_reply(&self, ctx: &ReplyContext<'_>) -> Result<String, GenerationError> {
        let url = format!("{}/v1/chat/completions", self.endpoint);
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You draft concise, professional replies for a sales team. \
                                Keep replies short, helpful, and free of placeholders."
                },
                { "role": "user", "content": Self::build_user_prompt(ctx) }
            ],
            "temperature": 0.4,
            "stream": false
        });

        let mut request = self.http.post(&url).json(&payload);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clean_json() {
        let output = r#"{"subject": "Re: Pricing?", "body": "Hi Jane, happy to walk you through it."}"#;
        let reply = parse_generated_reply(output, "Pricing?");
        assert_eq!(reply.subject, "Re: Pricing?");
        assert_eq!(reply.body, "Hi Jane, happy to walk you through it.");
    }

    #[test]
    fn test_parse_wrapped_json() {
        let output = "Here is your draft:\n{\"subject\": \"Re: Demo\", \"body\": \"Thanks for reaching out.\"}\nLet me know!";
        let reply = parse_generated_reply(output, "Demo");
        assert_eq!(reply.subject, "Re: Demo");
        assert_eq!(reply.body, "Thanks for reaching out.");
    }

    #[test]
    fn test_parse_missing_subject_uses_fallback() {
        let output = r#"{"body": "Thanks, details attached."}"#;
        let reply = parse_generated_reply(output, "Pricing?");
        assert_eq!(reply.subject, "Re: Pricing?");
        assert_eq!(reply.body, "Thanks, details attached.");
    }

    #[test]
    fn test_parse_prose_falls_back_to_raw_body() {
        let output = "Dear Jane, thanks for your interest. Best, Sales";
        let reply = parse_generated_reply(output, "Pricing?");
        assert_eq!(reply.subject, "Re: Pricing?");
        assert_eq!(reply.body, output);
    }

    #[test]
    fn test_parse_empty_body_json_falls_back() {
        let output = r#"{"subject": "Re: x", "body": "  "}"#;
        let reply = parse_generated_reply(output, "Pricing?");
        assert_eq!(reply.subject, "Re: Pricing?");
        // Raw output preserved so a human still sees what came back
        assert_eq!(reply.body, output);
    }

    #[test]
    fn test_fallback_subject_keeps_existing_re_prefix() {
        let reply = parse_generated_reply("plain text", "RE: Pricing?");
        assert_eq!(reply.subject, "RE: Pricing?");
    }

    #[test]
    fn test_fallback_subject_for_empty_original() {
        let reply = parse_generated_reply("plain text", "   ");
        assert_eq!(reply.subject, "Re: your message");
    }

    #[test]
    fn test_chat_response_deserialization() {
        let json = r#"{
            "choices": [
                {"message": {"role": "assistant", "content": "{\"subject\":\"s\",\"body\":\"b\"}"}}
            ]
        }"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices.len(), 1);
        assert!(parsed.choices[0].message.content.contains("subject"));
    }

    #[test]
    fn test_user_prompt_includes_crm_context() {
        let ctx = ReplyContext {
            sender_name: Some("Jane Doe"),
            sender_email: "jane@acme.com",
            subject: "Pricing?",
            body: "What does a seat cost?",
            contact_name: Some("Jane Doe"),
            contact_company: Some("Acme"),
            deal_title: "Lead from Jane Doe",
            deal_stage: "new_lead",
            tone: "professional",
        };
        let prompt = ChatCompletionsGenerator::build_user_prompt(&ctx);
        assert!(prompt.contains("Jane Doe <jane@acme.com>"));
        assert!(prompt.contains("Jane Doe (Acme)"));
        assert!(prompt.contains("Lead from Jane Doe"));
        assert!(prompt.contains("stage: new_lead"));
        assert!(prompt.contains("Tone: professional"));
    }
}
