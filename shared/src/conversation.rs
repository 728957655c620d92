//! A single conversational exchange with the dialogue backend.

use serde_json::Value;
use tracing::{error, info};

use crate::alexa::RequestBody;
use crate::assistant::{DialogueBackend, MessageInput, MessageRequest};
use crate::{Error, Result};

/// Input sent when the user has not said anything yet, e.g. on launch.
pub const BOOTSTRAP_PHRASE: &str = "start skill";

/// Result of a successful exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// Backend output fragments joined with spaces
    pub output_text: String,
    /// Context to persist for the next turn
    pub context: Value,
}

/// Text to send for this request: the user's utterance or the bootstrap phrase.
pub fn input_text(request: &RequestBody) -> &str {
    request.utterance().unwrap_or(BOOTSTRAP_PHRASE)
}

/// Send one turn to the backend.
///
/// `prior_context` is forwarded untouched. On failure the caller keeps
/// whatever context it already had.
pub async fn converse(
    backend: &dyn DialogueBackend,
    request: &RequestBody,
    workspace_id: &str,
    prior_context: Option<&Value>,
) -> Result<Turn> {
    let text = input_text(request);
    info!("WORKSPACE_ID: {}", workspace_id);
    info!("Input text: {}", text);

    let message = MessageRequest {
        workspace_id: workspace_id.to_string(),
        input: MessageInput {
            text: text.to_string(),
        },
        context: prior_context.cloned(),
    };

    let response = backend.message(&message).await.map_err(|e| {
        error!("Error talking to Watson: {}", e);
        match e {
            Error::Backend(reason) => Error::Backend(reason),
            other => Error::Backend(other.to_string()),
        }
    })?;

    let output_text = response.output.text.join(" ");
    info!("Output text: {}", output_text);

    Ok(Turn {
        output_text,
        context: response.context,
    })
}
