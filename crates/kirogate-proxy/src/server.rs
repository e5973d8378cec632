//! Axum HTTP server.
//!
//! Exposes the Anthropic-compatible endpoints:
//! - `GET  /v1/models`, `GET /v1/models/{id}`
//! - `POST /v1/messages` (JSON or SSE per `stream`)
//! - `POST /v1/messages/count_tokens`
//! - `GET  /health`
//!
//! Within one request the whole pipeline — upstream body read, frame decode,
//! event classification, SSE emission — runs sequentially in the handler's
//! task; the response body stream owns the upstream response, so a client
//! disconnect drops it and cancels the upstream call with it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_stream::try_stream;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Response},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::{
    auth::{Credentials, TokenManager},
    config::Config,
    error::ApiError,
    models::{self, ModelInfo, ModelList},
    streaming::{ResponseAggregator, SseEmitter},
    tokens, translation,
    types::{MessagesRequest, TokenCountRequest, TokenCountResponse},
    upstream::UpstreamClient,
};
use kirogate_wire::{classify, FrameDecoder};

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    token_manager: Arc<TokenManager>,
    upstream: Arc<UpstreamClient>,
}

impl AppState {
    pub async fn new(
        config: Config,
        credentials: Credentials,
        credentials_path: PathBuf,
    ) -> Result<Self> {
        let token_manager = TokenManager::new(credentials, credentials_path, &config)
            .context("failed to build token manager")?;
        let machine_id = token_manager.machine_id().await;
        let upstream = UpstreamClient::new(&config, &machine_id)
            .context("failed to build upstream client")?;

        Ok(Self {
            config: Arc::new(config),
            token_manager: Arc::new(token_manager),
            upstream: Arc::new(upstream),
        })
    }
}

/// Create the Axum router.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/models", get(list_models))
        .route("/v1/models/{id}", get(get_model))
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve.
pub async fn serve(
    config: Config,
    credentials: Credentials,
    credentials_path: PathBuf,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config, credentials, credentials_path).await?;
    let app = create_app(state);

    info!(%addr, "kirogate listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}

async fn list_models() -> Json<ModelList> {
    Json(ModelList::catalog())
}

async fn get_model(Path(id): Path<String>) -> Result<Json<ModelInfo>, ApiError> {
    models::find(&id)
        .map(|spec| Json(ModelInfo::from(spec)))
        .ok_or_else(|| ApiError::NotFound(format!("model not found: {id}")))
}

async fn handle_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<MessagesRequest>,
) -> Result<axum::response::Response, ApiError> {
    check_api_key(&headers, &state.config)?;
    validate_messages_request(&req)?;
    // Catalog membership is exact; the upstream model follows family
    // (opus/sonnet/haiku substring) dispatch.
    let spec = models::map_model(&req.model);

    let upstream_request = translation::to_upstream(&req, spec);
    let access_token = state.token_manager.ensure_valid_token().await?;
    let response = state
        .upstream
        .generate_assistant_response(&upstream_request, &access_token)
        .await?;

    debug!(model = %req.model, stream = req.stream.unwrap_or(false), "upstream accepted request");

    if req.stream.unwrap_or(false) {
        Ok(stream_response(
            response,
            req.model.clone(),
            spec.context_window,
        ))
    } else {
        aggregate_response(response, &req.model, spec.context_window).await
    }
}

async fn handle_count_tokens(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TokenCountRequest>,
) -> Result<Json<TokenCountResponse>, ApiError> {
    check_api_key(&headers, &state.config)?;
    Ok(Json(TokenCountResponse {
        input_tokens: tokens::estimate_input_tokens(&req),
    }))
}

/// Edge validation: catalog membership, positive budget, non-empty turn list.
fn validate_messages_request(req: &MessagesRequest) -> Result<(), ApiError> {
    if models::find(&req.model).is_none() {
        return Err(ApiError::InvalidRequest(format!(
            "model is not in the catalog: {}",
            req.model
        )));
    }
    if req.max_tokens == 0 {
        return Err(ApiError::InvalidRequest(
            "max_tokens must be greater than 0".to_string(),
        ));
    }
    if req.messages.is_empty() {
        return Err(ApiError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn check_api_key(headers: &HeaderMap, config: &Config) -> Result<(), ApiError> {
    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    match presented {
        Some(key) if key == config.api_key => Ok(()),
        Some(_) => Err(ApiError::Authentication("invalid api key".to_string())),
        None => Err(ApiError::Authentication(
            "missing api key: pass x-api-key or Authorization: Bearer".to_string(),
        )),
    }
}

/// Drive the upstream body through decode → classify → emit, yielding one
/// SSE frame per write so socket back-pressure applies per event.
fn stream_response(
    upstream: reqwest::Response,
    model: String,
    context_window: u32,
) -> axum::response::Response {
    let stream = try_stream! {
        let mut decoder = FrameDecoder::new();
        let mut emitter = SseEmitter::new(model, context_window);
        let mut body = upstream.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(std::io::Error::other)?;
            for frame in decoder.feed(&chunk) {
                let event = classify(&frame);
                for sse in emitter.handle(&event) {
                    yield sse;
                }
            }
            if decoder.is_stopped() {
                warn!(
                    errors = decoder.error_count(),
                    "upstream event stream too corrupt to continue"
                );
                break;
            }
        }

        // Upstream body ended (or decode stopped) without a terminator.
        for sse in emitter.finish() {
            yield sse;
        }
    };

    let stream = stream.map(|r: std::result::Result<String, std::io::Error>| r);
    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response.into_response()
}

/// Consume the whole event stream into one JSON response.
async fn aggregate_response(
    upstream: reqwest::Response,
    model: &str,
    context_window: u32,
) -> Result<axum::response::Response, ApiError> {
    let mut decoder = FrameDecoder::new();
    let mut aggregator = ResponseAggregator::new(context_window);
    let mut body = upstream.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| ApiError::Api(format!("upstream read failed: {e}")))?;
        for frame in decoder.feed(&chunk) {
            aggregator.push(&classify(&frame));
        }
        if decoder.is_stopped() {
            warn!(
                errors = decoder.error_count(),
                "upstream event stream too corrupt to continue"
            );
            break;
        }
    }

    let response = aggregator.finish(model)?;
    Ok(Json(response).into_response())
}
