//! Alexa Skill Lambda - Bridges Alexa voice turns to Watson Assistant.
//!
//! Each invocation verifies that the request was signed by Alexa, forwards the
//! user's utterance to the dialogue workspace with the session's stored
//! context, and speaks the reply back.

mod turn;

use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use shared::{
    error_response, AlexaVerifier, AssistantClients, Config, ContextStore, InvocationEnvelope,
    MemoryContextStore, NoopVerifier, PgContextStore, RequestVerifier, SkillResponse,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use turn::{handle_turn, AppState};

impl AppState {
    async fn new() -> Result<Self, Error> {
        let mut config = Config::from_env();
        let http_client = reqwest::Client::new();

        let needs_aws = config.conversation_secret_arn.is_some() || config.db_host.is_some();
        let secrets_client = if needs_aws {
            let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
            Some(aws_sdk_secretsmanager::Client::new(&aws_config))
        } else {
            None
        };

        if let (Some(client), Some(arn)) = (&secrets_client, config.conversation_secret_arn.clone()) {
            if config.username.is_none() || config.password.is_none() {
                let secret = shared::get_conversation_credentials(client, &arn).await?;
                config.username = Some(secret.username);
                config.password = Some(secret.password);
                info!("Loaded Watson Assistant credentials from Secrets Manager");
            }
        }

        let contexts: Arc<dyn ContextStore> = match (&secrets_client, config.db_secret_arn.clone()) {
            (Some(client), Some(arn)) if config.db_host.is_some() => {
                let credentials = shared::get_database_credentials(client, &arn).await?;
                let pool = shared::db::create_pool(&config, &credentials).await?;
                let store = PgContextStore::new(pool);
                store.ensure_schema().await?;
                info!("Using Postgres session context store");
                Arc::new(store)
            }
            _ => {
                info!("Using in-memory session context store");
                Arc::new(MemoryContextStore::new())
            }
        };

        let verifier: Arc<dyn RequestVerifier> = if config.skip_verification {
            warn!("ALEXA_SKIP_VERIFICATION is set; requests will not be verified");
            Arc::new(NoopVerifier)
        } else {
            Arc::new(AlexaVerifier::new(http_client.clone()))
        };

        Ok(Self {
            config,
            verifier,
            backends: Arc::new(AssistantClients::new(http_client)),
            contexts,
        })
    }
}

async fn handler(state: Arc<AppState>, event: LambdaEvent<Value>) -> Result<SkillResponse, Error> {
    let (payload, _context) = event.into_parts();

    let envelope = match InvocationEnvelope::from_payload(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("Failed to parse invocation: {}", e);
            return Ok(error_response(&e));
        }
    };

    Ok(handle_turn(&state, &envelope).await)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    lambda_runtime::run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}
