//! Error types for the Alexa conversation action.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Spoken when a request does not come from Alexa at all.
pub const MISSING_BODY_SPEECH: &str = "Must be called from Alexa.";

/// Spoken when signature verification rejects a request.
pub const VERIFICATION_SPEECH: &str = "Alexa verification failed.";

/// Spoken when the dialogue backend cannot produce a reply.
pub const BACKEND_SPEECH: &str = "Error talking to Watson.";

/// Spoken for every other failure.
pub const FALLBACK_SPEECH: &str = "An unexpected error occurred. Please try again later.";

/// Errors that can occur while handling a skill turn.
#[derive(Error, Debug)]
pub enum Error {
    /// Invocation carried no body
    #[error("Request body is missing")]
    MissingBody,

    /// Body could not be decoded into a skill request
    #[error("Decode error: {0}")]
    Decode(String),

    /// Alexa signature or certificate check failed
    #[error("Verification error: {0}")]
    Verification(String),

    /// Dialogue backend unreachable or returned an error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// AWS SDK error
    #[error("AWS error: {0}")]
    Aws(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// A user-safe sentence for this error, suitable for speech output.
    ///
    /// The underlying detail is for logs only and never reaches the speaker.
    pub fn speech(&self) -> &'static str {
        match self {
            Error::MissingBody => MISSING_BODY_SPEECH,
            Error::Verification(_) => VERIFICATION_SPEECH,
            Error::Backend(_) => BACKEND_SPEECH,
            _ => FALLBACK_SPEECH,
        }
    }
}
