//! Alexa request and response envelopes.
//!
//! The inbound side models the action invocation (headers plus a base64 body)
//! and the skill request decoded from it. The outbound side is the Alexa
//! response envelope together with the formatter that builds it.

use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::error::FALLBACK_SPEECH;
use crate::{Error, Result};

/// Slot carrying the free-form user utterance.
pub const UTTERANCE_SLOT: &str = "EveryThingSlot";

/// Alexa request type sent when a session closes.
pub const SESSION_ENDED_REQUEST: &str = "SessionEndedRequest";

/// Raw action invocation as delivered by the hosting runtime.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct InvocationEnvelope {
    /// HTTP headers of the original request, lower-cased by the runtime
    #[serde(rename = "__ow_headers", default, deserialize_with = "null_as_empty")]
    pub headers: HashMap<String, String>,
    /// Base64-encoded request body
    #[serde(rename = "__ow_body", default)]
    pub body: Option<String>,
    #[serde(rename = "CONVERSATION_USERNAME", default)]
    pub conversation_username: Option<String>,
    #[serde(rename = "CONVERSATION_PASSWORD", default)]
    pub conversation_password: Option<String>,
    #[serde(rename = "WORKSPACE_ID", default)]
    pub workspace_id: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Skill request decoded from an invocation, with the exact bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct DecodedRequest {
    /// Body bytes as signed by Alexa
    pub raw_body: Vec<u8>,
    pub skill_request: SkillRequest,
}

impl InvocationEnvelope {
    /// Parse a raw invocation payload.
    ///
    /// A payload that cannot be parsed and carries no body is reported as
    /// `MissingBody`, the same as a well-formed payload without one.
    pub fn from_payload(payload: serde_json::Value) -> Result<Self> {
        let has_body = payload
            .get("__ow_body")
            .and_then(|b| b.as_str())
            .is_some_and(|b| !b.is_empty());

        serde_json::from_value(payload).map_err(|e| {
            if has_body {
                Error::Decode(format!("Invalid invocation: {}", e))
            } else {
                Error::MissingBody
            }
        })
    }

    /// Look up a header by name, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Certificate chain URL header.
    pub fn cert_chain_url(&self) -> &str {
        self.header("signaturecertchainurl").unwrap_or("")
    }

    /// Request signature header, preferring the SHA-256 variant.
    ///
    /// Only RSA-SHA256 is verified; a legacy SHA-1 `signature` alone is rejected.
    pub fn signature(&self) -> &str {
        self.header("signature-256")
            .or_else(|| self.header("signature"))
            .unwrap_or("")
    }

    /// Decode the base64 body and parse the skill request out of it.
    pub fn decode(&self) -> Result<DecodedRequest> {
        let body = self
            .body
            .as_deref()
            .filter(|b| !b.is_empty())
            .ok_or(Error::MissingBody)?;

        let raw_body = base64::engine::general_purpose::STANDARD
            .decode(body.trim())
            .map_err(|e| Error::Decode(format!("Invalid base64 body: {}", e)))?;

        let skill_request: SkillRequest = serde_json::from_slice(&raw_body)
            .map_err(|e| Error::Decode(format!("Invalid skill request: {}", e)))?;

        Ok(DecodedRequest {
            raw_body,
            skill_request,
        })
    }
}

/// Decoded Alexa skill request.
#[derive(Debug, Clone, Deserialize)]
pub struct SkillRequest {
    pub session: Session,
    pub request: RequestBody,
}

/// Alexa session information.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    #[serde(default)]
    pub new: bool,
}

/// The `request` object of a skill request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestBody {
    #[serde(rename = "type", default)]
    pub request_type: Option<String>,
    /// ISO-8601 time Alexa sent the request
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub intent: Option<Intent>,
}

/// A recognized intent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Intent {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub slots: HashMap<String, Slot>,
}

/// A filled (or unfilled) intent slot.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Slot {
    #[serde(default)]
    pub value: Option<String>,
}

impl RequestBody {
    /// The free-form utterance, if the intent carries one.
    pub fn utterance(&self) -> Option<&str> {
        self.intent
            .as_ref()?
            .slots
            .get(UTTERANCE_SLOT)?
            .value
            .as_deref()
    }

    /// Whether Alexa is telling us the session has closed.
    pub fn is_session_ended(&self) -> bool {
        self.request_type.as_deref() == Some(SESSION_ENDED_REQUEST)
    }
}

/// Alexa response envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillResponse {
    pub version: String,
    pub response: SkillResponseBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillResponseBody {
    pub should_end_session: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_speech: Option<OutputSpeech>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSpeech {
    #[serde(rename = "type")]
    pub speech_type: String,
    pub text: String,
}

impl SkillResponse {
    /// Text actually spoken, if any.
    pub fn speech_text(&self) -> Option<&str> {
        self.response.output_speech.as_ref().map(|s| s.text.as_str())
    }

    /// Acknowledge a closed session. Alexa does not speak on this path.
    pub fn session_ended() -> Self {
        Self {
            version: "1.0".to_string(),
            response: SkillResponseBody {
                should_end_session: true,
                output_speech: None,
            },
        }
    }
}

/// Build the response envelope around a reply or failure reason.
///
/// An absent or blank reason is replaced by a generic apology.
pub fn format_response(reason_or_text: Option<&str>, end_session: bool) -> SkillResponse {
    let text = reason_or_text
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(FALLBACK_SPEECH);

    SkillResponse {
        version: "1.0".to_string(),
        response: SkillResponseBody {
            should_end_session: end_session,
            output_speech: Some(OutputSpeech {
                speech_type: "PlainText".to_string(),
                text: text.to_string(),
            }),
        },
    }
}

/// Build the terminal response for a failed turn.
pub fn error_response(err: &Error) -> SkillResponse {
    format_response(Some(err.speech()), true)
}
