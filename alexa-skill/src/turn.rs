//! Turn orchestration: one Alexa invocation in, exactly one response out.

use serde_json::Value;
use shared::{
    converse, error_response, format_response, verify_request, BackendProvider, Config,
    ContextStore, Error, InvocationEnvelope, RequestVerifier, Result, SkillRequest, SkillResponse,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Long-lived dependencies shared by every invocation of a warm container.
pub struct AppState {
    pub config: Config,
    pub verifier: Arc<dyn RequestVerifier>,
    pub backends: Arc<dyn BackendProvider>,
    pub contexts: Arc<dyn ContextStore>,
}

/// Handle a single Alexa turn. Never fails: errors become a spoken apology
/// that ends the session.
pub async fn handle_turn(state: &AppState, envelope: &InvocationEnvelope) -> SkillResponse {
    info!("Begin action");

    let decoded = match envelope.decode() {
        Ok(decoded) => decoded,
        Err(e) => return fail(e),
    };

    if let Err(e) = verify_request(
        state.verifier.as_ref(),
        envelope.cert_chain_url(),
        envelope.signature(),
        &decoded.raw_body,
    )
    .await
    {
        return fail(e);
    }

    let session_id = decoded.skill_request.session.session_id.as_str();
    match run_turn(state, envelope, &decoded.skill_request).await {
        Ok(response) => response,
        Err(e) => {
            // The error reply ends the session, and Alexa sends no
            // SessionEndedRequest for sessions the skill closes itself.
            if let Err(remove_err) = state.contexts.remove(session_id).await {
                warn!("Failed to discard context for session {}: {}", session_id, remove_err);
            }
            fail(e)
        }
    }
}

fn fail(e: Error) -> SkillResponse {
    error!("Caught error: {}", e);
    error_response(&e)
}

async fn run_turn(
    state: &AppState,
    envelope: &InvocationEnvelope,
    skill_request: &SkillRequest,
) -> Result<SkillResponse> {
    let session_id = skill_request.session.session_id.as_str();
    let request = &skill_request.request;

    if request.is_session_ended() {
        info!("Session {} ended, discarding its context", session_id);
        state.contexts.remove(session_id).await?;
        return Ok(SkillResponse::session_ended());
    }

    if skill_request.session.new {
        info!("New session {}", session_id);
    }
    if let Some(name) = request.intent.as_ref().and_then(|i| i.name.as_deref()) {
        info!("Intent: {}", name);
    }

    let config = state.config.with_args(envelope);
    let credentials = config.credentials()?;
    let workspace_id = config.workspace_id()?;
    let backend = state.backends.backend(&credentials).await?;

    let prior_context: Option<Value> = state.contexts.load(session_id).await?;
    let turn = converse(backend.as_ref(), request, workspace_id, prior_context.as_ref()).await?;

    if let Err(e) = state.contexts.save(session_id, &turn.context).await {
        warn!("Failed to save context for session {}: {}", session_id, e);
    }

    Ok(format_response(Some(&turn.output_text), false))
}
