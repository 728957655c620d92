//! Watson Assistant (v1) dialogue client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::{Error, Result};

/// Credentials and endpoint for the dialogue service.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub url: String,
    pub version: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("url", &self.url)
            .field("version", &self.version)
            .finish()
    }
}

/// One conversational turn sent to the backend.
#[derive(Debug, Clone, Serialize)]
pub struct MessageRequest {
    /// Addressed through the URL rather than the body
    #[serde(skip)]
    pub workspace_id: String,
    pub input: MessageInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageInput {
    pub text: String,
}

/// Backend reply to a turn.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    pub output: MessageOutput,
    /// Dialogue state to send back on the next turn
    #[serde(default)]
    pub context: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageOutput {
    #[serde(default)]
    pub text: Vec<String>,
}

/// A remote dialogue manager.
#[async_trait]
pub trait DialogueBackend: Send + Sync {
    async fn message(&self, request: &MessageRequest) -> Result<MessageResponse>;
}

/// Hands out ready-to-call backends for a set of credentials.
#[async_trait]
pub trait BackendProvider: Send + Sync {
    async fn backend(&self, credentials: &Credentials) -> Result<Arc<dyn DialogueBackend>>;
}

/// HTTP client for the Watson Assistant message API.
pub struct AssistantClient {
    http_client: reqwest::Client,
    credentials: Credentials,
}

/// Configure a client for the dialogue service. Performs no network I/O.
pub fn init_client(http_client: reqwest::Client, credentials: Credentials) -> AssistantClient {
    info!(
        "Configured Watson Assistant client for {} (version {})",
        credentials.url, credentials.version
    );
    AssistantClient {
        http_client,
        credentials,
    }
}

impl AssistantClient {
    fn message_url(&self, workspace_id: &str) -> String {
        format!(
            "{}/v1/workspaces/{}/message",
            self.credentials.url.trim_end_matches('/'),
            workspace_id
        )
    }
}

#[async_trait]
impl DialogueBackend for AssistantClient {
    async fn message(&self, request: &MessageRequest) -> Result<MessageResponse> {
        let response = self
            .http_client
            .post(self.message_url(&request.workspace_id))
            .query(&[("version", self.credentials.version.as_str())])
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to reach Watson Assistant: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Watson Assistant returned {}: {}", status, body);
            return Err(Error::Backend(format!("Watson Assistant returned {}", status)));
        }

        response
            .json::<MessageResponse>()
            .await
            .map_err(|e| Error::Backend(format!("Failed to parse Watson Assistant response: {}", e)))
    }
}

/// Memoizes one client per credential set so warm invocations reuse it.
pub struct AssistantClients {
    http_client: reqwest::Client,
    clients: RwLock<HashMap<Credentials, Arc<AssistantClient>>>,
}

impl AssistantClients {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            clients: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BackendProvider for AssistantClients {
    async fn backend(&self, credentials: &Credentials) -> Result<Arc<dyn DialogueBackend>> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(credentials) {
                return Ok(Arc::clone(client) as Arc<dyn DialogueBackend>);
            }
        }

        let mut clients = self.clients.write().await;
        let client = clients
            .entry(credentials.clone())
            .or_insert_with(|| {
                Arc::new(init_client(self.http_client.clone(), credentials.clone()))
            })
            .clone();

        Ok(client as Arc<dyn DialogueBackend>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{basic_auth, body_json, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn credentials(url: &str) -> Credentials {
        Credentials {
            username: "user".to_string(),
            password: "pass".to_string(),
            url: url.to_string(),
            version: "2018-07-10".to_string(),
        }
    }

    fn request(text: &str, context: Option<Value>) -> MessageRequest {
        MessageRequest {
            workspace_id: "W1".to_string(),
            input: MessageInput {
                text: text.to_string(),
            },
            context,
        }
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(request("hello", None)).unwrap();
        assert_eq!(body, json!({ "input": { "text": "hello" } }));

        let body = serde_json::to_value(request("hello", Some(json!({ "turn": 1 })))).unwrap();
        assert_eq!(
            body,
            json!({ "input": { "text": "hello" }, "context": { "turn": 1 } })
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = credentials("https://example.com");
        let debug_output = format!("{:?}", creds);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("pass\""));
    }

    #[tokio::test]
    async fn test_message_request() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/assistant/api/v1/workspaces/W1/message"))
            .and(query_param("version", "2018-07-10"))
            .and(basic_auth("user", "pass"))
            .and(body_json(json!({
                "input": { "text": "hello" },
                "context": { "turn": 0 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "input": { "text": "hello" },
                "output": { "text": ["Hi", "there"], "nodes_visited": ["greeting"] },
                "context": { "turn": 1 }
            })))
            .mount(&mock_server)
            .await;

        let url = format!("{}/assistant/api/", mock_server.uri());
        let client = init_client(reqwest::Client::new(), credentials(&url));

        let response = client
            .message(&request("hello", Some(json!({ "turn": 0 }))))
            .await
            .unwrap();
        assert_eq!(response.output.text, vec!["Hi", "there"]);
        assert_eq!(response.context, json!({ "turn": 1 }));
    }

    #[tokio::test]
    async fn test_message_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({ "error": "Unauthorized" })),
            )
            .mount(&mock_server)
            .await;

        let client = init_client(reqwest::Client::new(), credentials(&mock_server.uri()));
        let err = client.message(&request("hello", None)).await.unwrap_err();
        assert!(matches!(err, Error::Backend(ref msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_message_unparseable_reply() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let client = init_client(reqwest::Client::new(), credentials(&mock_server.uri()));
        let err = client.message(&request("hello", None)).await.unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }

    #[tokio::test]
    async fn test_clients_are_memoized() {
        let clients = AssistantClients::new(reqwest::Client::new());
        let creds = credentials("https://example.com");

        let first = clients.backend(&creds).await.unwrap();
        let second = clients.backend(&creds).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let mut other = creds.clone();
        other.password = "rotated".to_string();
        let third = clients.backend(&other).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(clients.clients.read().await.len(), 2);
    }
}
