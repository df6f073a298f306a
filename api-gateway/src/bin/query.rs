//! Query Lambda - Handles the /v1/query endpoint.
//!
//! Endpoints:
//! - POST /v1/query - Answer a natural-language question about the risk map

use lambda_http::http::Method;
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::http::{error_response, json_response};
use shared::{
    get_warehouse_token, Config, DatabricksClient, GeminiClient, Pipeline, QueryExecutor,
    QueryRequest, TextGenerator,
};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Application state
struct AppState {
    pipeline: Pipeline<DatabricksClient, GeminiClient>,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let http = reqwest::Client::builder()
            .timeout(config.outbound_timeout)
            .build()?;

        let warehouse = match &config.warehouse {
            Some(warehouse_config) => {
                let token = match (&warehouse_config.token, &warehouse_config.token_secret_arn) {
                    (Some(token), _) => Some(token.clone()),
                    (None, Some(arn)) => {
                        let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
                        let secrets_client = aws_sdk_secretsmanager::Client::new(&aws);
                        match get_warehouse_token(&secrets_client, arn).await {
                            Ok(token) => Some(token),
                            Err(e) => {
                                warn!("Failed to load warehouse token: {}", e);
                                None
                            }
                        }
                    }
                    (None, None) => {
                        warn!("Warehouse host is set but no token was provided");
                        None
                    }
                };
                token.map(|token| DatabricksClient::new(http.clone(), warehouse_config, token))
            }
            None => None,
        };

        let generator = config
            .generative
            .as_ref()
            .map(|generative| GeminiClient::new(http.clone(), generative));

        info!(
            warehouse = warehouse.is_some(),
            generative_model = generator.as_ref().map(|g| g.model()).unwrap_or("none"),
            intent_assist = config.intent_assist_enabled,
            "Query service configured"
        );

        Ok(Self {
            pipeline: Pipeline::new(warehouse, generator, &config),
        })
    }
}

async fn handle<W, G>(pipeline: &Pipeline<W, G>, event: Request) -> Result<Response<Body>, Error>
where
    W: QueryExecutor,
    G: TextGenerator,
{
    if event.method() != Method::POST {
        return error_response(405, "Method not allowed");
    }

    let request: QueryRequest = shared::parse_body!(event.body());
    let question = request.question.trim();
    if question.is_empty() {
        return error_response(400, "Question is required");
    }

    let payload = pipeline.answer(question, request.mode).await;
    json_response(200, &payload)
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let span = info_span!("query", request_id = %Uuid::new_v4());
    async move {
        info!("Query request: {} {}", event.method(), event.uri().path());
        handle(&state.pipeline, event).await
    }
    .instrument(span)
    .await
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);
    let state_clone = state.clone();

    run(service_fn(move |event| {
        let state = state_clone.clone();
        async move { handler(state, event).await }
    }))
    .await
}
