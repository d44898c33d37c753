//! Application configuration, loaded from `~/.leadflow/config.json`.
//!
//! Every field has a serde default so a partial (or absent) file still yields
//! a working configuration. The OAuth client id is the only value that must be
//! supplied before `leadflow connect` can run.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// OAuth2 client registration for the Gmail provider (Desktop App type).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    /// Optional for PKCE-style clients.
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            auth_uri: default_auth_uri(),
            token_uri: default_token_uri(),
        }
    }
}

/// External text-generation collaborator (OpenAI-compatible chat endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Tone label passed through to the prompt and stored on each draft.
    #[serde(default = "default_tone")]
    pub tone: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generation_endpoint(),
            api_key: String::new(),
            model: default_generation_model(),
            tone: default_tone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Cron expression (seconds-resolution, 6 fields) for the scheduled pass.
    #[serde(default = "default_schedule")]
    pub schedule: String,
    /// Label applied to imported messages. Empty string disables labeling.
    #[serde(default = "default_import_label")]
    pub import_label: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schedule: default_schedule(),
            import_label: default_import_label(),
        }
    }
}

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_generation_endpoint() -> String {
    "https://api.openai.com".to_string()
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_tone() -> String {
    "professional".to_string()
}

fn default_schedule() -> String {
    // Every 10 minutes
    "0 */10 * * * *".to_string()
}

fn default_import_label() -> String {
    "CRM/Imported".to_string()
}

/// Resolve `~/.leadflow/config.json`.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".leadflow").join("config.json"))
}

impl AppConfig {
    /// Load configuration from disk. A missing file yields defaults; a file
    /// that exists but does not parse is an error (silently ignoring a typo'd
    /// config would be worse than refusing to start).
    pub fn load() -> Result<Self, String> {
        let Some(path) = config_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        serde_json::from_str(&content).map_err(|e| format!("Invalid {}: {e}", path.display()))
    }

    pub fn import_label(&self) -> Option<&str> {
        let trimmed = self.sync.import_label.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert!(config.oauth.client_id.is_empty());
        assert_eq!(config.oauth.token_uri, "https://oauth2.googleapis.com/token");
        assert_eq!(config.generation.tone, "professional");
        assert_eq!(config.sync.schedule, "0 */10 * * * *");
        assert_eq!(config.import_label(), Some("CRM/Imported"));
    }

    #[test]
    fn test_partial_override() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "oauth": { "clientId": "abc.apps.googleusercontent.com" },
                "generation": { "model": "gpt-4o", "apiKey": "sk-test" },
                "sync": { "importLabel": "  " }
            }"#,
        )
        .unwrap();
        assert_eq!(config.oauth.client_id, "abc.apps.googleusercontent.com");
        assert_eq!(config.generation.model, "gpt-4o");
        assert_eq!(config.generation.api_key, "sk-test");
        // Defaults survive partial sections
        assert_eq!(config.generation.endpoint, "https://api.openai.com");
        // Blank label disables labeling
        assert_eq!(config.import_label(), None);
    }
}
