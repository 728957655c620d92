//! Shared library for the Alexa conversation action.
//!
//! This crate provides the Alexa envelope types, request verification, the dialogue
//! client and the per-session context stores used by the skill Lambda.

pub mod alexa;
pub mod assistant;
pub mod config;
pub mod context;
pub mod conversation;
pub mod db;
pub mod error;
pub mod secrets;
pub mod verify;

pub use alexa::{error_response, format_response, InvocationEnvelope, SkillRequest, SkillResponse};
pub use assistant::{init_client, AssistantClients, BackendProvider, Credentials, DialogueBackend};
pub use config::Config;
pub use context::{ContextStore, MemoryContextStore, PgContextStore};
pub use conversation::{converse, Turn, BOOTSTRAP_PHRASE};
pub use error::{Error, Result};
pub use secrets::{get_conversation_credentials, get_database_credentials, get_secret};
pub use verify::{verify_request, AlexaVerifier, NoopVerifier, RequestVerifier};
