//! Configuration management for the action.

use std::env;

use crate::alexa::InvocationEnvelope;
use crate::assistant::Credentials;
use crate::{Error, Result};

/// Default dialogue service endpoint.
pub const DEFAULT_ASSISTANT_URL: &str = "https://gateway.watsonplatform.net/assistant/api/";

/// Default dialogue service API version date.
pub const DEFAULT_ASSISTANT_VERSION: &str = "2018-07-10";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Dialogue service username
    pub username: Option<String>,
    /// Dialogue service password
    pub password: Option<String>,
    /// ARN of a secret holding `{"username", "password"}`
    pub conversation_secret_arn: Option<String>,
    /// Dialogue workspace identifier
    pub workspace_id: Option<String>,
    /// Dialogue service endpoint
    pub assistant_url: String,
    /// Dialogue service API version
    pub assistant_version: String,
    /// Database host (enables the Postgres context store)
    pub db_host: Option<String>,
    /// Database name
    pub db_name: String,
    /// ARN of the secret containing database credentials
    pub db_secret_arn: Option<String>,
    /// Skip Alexa signature verification (local testing only)
    pub skip_verification: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            username: non_empty("CONVERSATION_USERNAME"),
            password: non_empty("CONVERSATION_PASSWORD"),
            conversation_secret_arn: non_empty("CONVERSATION_SECRET_ARN"),
            workspace_id: non_empty("WORKSPACE_ID"),
            assistant_url: non_empty("ASSISTANT_URL")
                .unwrap_or_else(|| DEFAULT_ASSISTANT_URL.to_string()),
            assistant_version: non_empty("ASSISTANT_VERSION")
                .unwrap_or_else(|| DEFAULT_ASSISTANT_VERSION.to_string()),
            db_host: non_empty("DATABASE_HOST"),
            db_name: non_empty("DATABASE_NAME").unwrap_or_else(|| "alexa_conversation".to_string()),
            db_secret_arn: non_empty("DATABASE_URL_SECRET_ARN"),
            skip_verification: non_empty("ALEXA_SKIP_VERIFICATION")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
        }
    }

    /// Overlay the parameters carried by an invocation on top of this configuration.
    pub fn with_args(&self, envelope: &InvocationEnvelope) -> Self {
        let mut config = self.clone();
        if let Some(username) = non_blank(&envelope.conversation_username) {
            config.username = Some(username);
        }
        if let Some(password) = non_blank(&envelope.conversation_password) {
            config.password = Some(password);
        }
        if let Some(workspace_id) = non_blank(&envelope.workspace_id) {
            config.workspace_id = Some(workspace_id);
        }
        config
    }

    /// Credentials for the dialogue service.
    pub fn credentials(&self) -> Result<Credentials> {
        let username = self
            .username
            .clone()
            .ok_or_else(|| Error::Config("CONVERSATION_USERNAME is not set".to_string()))?;
        let password = self
            .password
            .clone()
            .ok_or_else(|| Error::Config("CONVERSATION_PASSWORD is not set".to_string()))?;

        Ok(Credentials {
            username,
            password,
            url: self.assistant_url.clone(),
            version: self.assistant_version.clone(),
        })
    }

    /// The dialogue workspace to converse with.
    pub fn workspace_id(&self) -> Result<&str> {
        self.workspace_id
            .as_deref()
            .ok_or_else(|| Error::Config("WORKSPACE_ID is not set".to_string()))
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.assistant_url, DEFAULT_ASSISTANT_URL);
        assert_eq!(config.assistant_version, "2018-07-10");
        assert_eq!(config.db_name, "alexa_conversation");
        assert!(config.db_host.is_none());
        assert!(!config.skip_verification);
        assert!(config.credentials().is_err());
        assert!(config.workspace_id().is_err());
    }

    #[test]
    fn test_args_override_env() {
        let config = Config::from_lookup(lookup(&[
            ("CONVERSATION_USERNAME", "env-user"),
            ("CONVERSATION_PASSWORD", "env-pass"),
            ("WORKSPACE_ID", "env-ws"),
        ]));

        let envelope: InvocationEnvelope = serde_json::from_value(serde_json::json!({
            "CONVERSATION_USERNAME": "arg-user",
            "WORKSPACE_ID": "W1"
        }))
        .unwrap();

        let merged = config.with_args(&envelope);
        let creds = merged.credentials().unwrap();
        assert_eq!(creds.username, "arg-user");
        assert_eq!(creds.password, "env-pass");
        assert_eq!(merged.workspace_id().unwrap(), "W1");
    }

    #[test]
    fn test_blank_values_ignored() {
        let config = Config::from_lookup(lookup(&[
            ("WORKSPACE_ID", "  "),
            ("ALEXA_SKIP_VERIFICATION", "TRUE"),
        ]));
        assert!(config.workspace_id.is_none());
        assert!(config.skip_verification);
    }
}
