// src/api.rs
//! HTTP surface of the pipeline: content submission, summary polling,
//! translation, the transcription webhook, and feed-subscription CRUD.
//! Auth mechanics are out of scope; callers are identified by `X-User-Id`
//! and handlers only verify resource ownership.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::context::PipelineContext;
use crate::error::{parse_failure_marker, PipelineError};
use crate::extract::classify;
use crate::feeds::credential;
use crate::limits::tier::UsageMetric;
use crate::store::{
    ContentItem, ContentKind, ContentStatus, FeedKind, FeedSubscription, Summary, UserProfile,
};
use crate::translate::{self, TranslateOutcome};

#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<PipelineContext>,
}

pub fn create_router(ctx: Arc<PipelineContext>) -> Router {
    let state = AppState { ctx };
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/content", post(submit_content))
        .route("/content/{id}/summary", get(get_summary))
        .route("/content/{id}/translate", post(translate_content))
        .route("/webhooks/transcription", post(transcription_webhook))
        .route("/subscriptions", post(create_subscription))
        .route("/subscriptions/{id}", delete(remove_subscription))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(PipelineError::Internal(e))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, hint) = match &self.0 {
            PipelineError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
            PipelineError::PermanentInput(_) => (StatusCode::UNPROCESSABLE_ENTITY, None),
            PipelineError::ProviderRejected(_) => (StatusCode::BAD_GATEWAY, None),
            PipelineError::QuotaExceeded { tier, .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                Some(format!("current tier is {tier}; upgrade to raise the limit")),
            ),
            PipelineError::Internal(e) => {
                warn!(error = ?e, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };
        let message = match &self.0 {
            // Do not leak internals to callers.
            PipelineError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        (
            status,
            Json(ErrorBody {
                error: message,
                kind: self.0.kind(),
                hint,
            }),
        )
            .into_response()
    }
}

fn caller(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or_else(|| {
            ApiError(PipelineError::PermanentInput(
                "missing X-User-Id header".to_string(),
            ))
        })
}

async fn profile(state: &AppState, user_id: &str) -> Result<UserProfile, ApiError> {
    Ok(state
        .ctx
        .users
        .user(user_id)
        .await?
        .unwrap_or_else(|| UserProfile::free(user_id)))
}

fn rate_check(state: &AppState, key: &str, bucket: &'static str, max: u32) -> Result<(), Response> {
    let window_ms = state.ctx.config.rate.window_secs * 1_000;
    let decision = state.ctx.rate.check(key, bucket, max, window_ms);
    if decision.allowed {
        return Ok(());
    }
    Err((
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "rate limit exceeded",
            "retry_after_ms": decision.reset_in_ms,
        })),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SubmitReq {
    url: String,
}

#[derive(Serialize)]
struct SubmitResp {
    id: String,
    kind: ContentKind,
    status: ContentStatus,
}

async fn submit_content(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitReq>,
) -> Result<Response, ApiError> {
    let user_id = caller(&headers)?;
    if let Err(resp) = rate_check(&state, &user_id, "submit", state.ctx.config.rate.submit_max) {
        return Ok(resp);
    }

    let kind = classify(&body.url)?;

    // Ownership/feature preconditions pass before quota is consumed.
    let user = profile(&state, &user_id).await?;
    let decision = state
        .ctx
        .usage
        .check_and_increment(&user, UsageMetric::Analyses)
        .await?;
    if !decision.allowed {
        return Err(ApiError(PipelineError::QuotaExceeded {
            metric: UsageMetric::Analyses.as_str().to_string(),
            tier: decision.tier.as_str().to_string(),
            limit: decision.limit,
        }));
    }

    let item = ContentItem::new(&body.url, kind, &user_id);
    let resp = SubmitResp {
        id: item.id.clone(),
        kind,
        status: item.status,
    };
    state.ctx.contents.insert_content(item).await?;

    let ctx = state.ctx.clone();
    let id = resp.id.clone();
    tokio::spawn(async move {
        if let Err(e) = crate::pipeline::process_new_content(&ctx, &id).await {
            warn!(content_id = id.as_str(), error = %e, "pipeline run failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(resp)).into_response())
}

#[derive(Deserialize)]
struct SummaryQuery {
    lang: Option<String>,
}

#[derive(Serialize)]
struct FailureView {
    stage: String,
    reason: String,
}

#[derive(Serialize)]
struct SummaryView {
    content_status: ContentStatus,
    text_ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<FailureView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<Summary>,
}

async fn get_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SummaryQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = caller(&headers)?;
    let Some(item) = state.ctx.contents.content(&id).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    if item.owner != user_id {
        // Not distinguishable from a missing resource.
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    let lang = query
        .lang
        .unwrap_or_else(|| state.ctx.config.default_language.clone())
        .to_lowercase();
    let summary = state.ctx.summaries.summary(&id, &lang).await?;

    let failure = item
        .extracted_text
        .as_deref()
        .and_then(parse_failure_marker)
        .map(|(stage, reason)| FailureView {
            stage: stage.as_str().to_string(),
            reason: reason.to_string(),
        });

    Ok(Json(SummaryView {
        content_status: item.status,
        text_ready: item.text_ready(),
        failure,
        summary,
    })
    .into_response())
}

#[derive(Deserialize)]
struct TranslateReq {
    language: String,
}

async fn translate_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TranslateReq>,
) -> Result<Response, ApiError> {
    let user_id = caller(&headers)?;
    if let Err(resp) = rate_check(&state, &user_id, "translate", state.ctx.config.rate.translate_max)
    {
        return Ok(resp);
    }

    let Some(item) = state.ctx.contents.content(&id).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    if item.owner != user_id {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    let user = profile(&state, &user_id).await?;
    match translate::translate(&state.ctx, &id, &body.language, &user).await? {
        TranslateOutcome::Ready(summary) => Ok(Json(summary).into_response()),
        TranslateOutcome::InFlight => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "translating" })),
        )
            .into_response()),
    }
}

// ---------------------------------------------------------------------------
// Transcription webhook
// ---------------------------------------------------------------------------

async fn transcription_webhook(
    State(state): State<AppState>,
    Json(payload): Json<crate::transcribe::WebhookPayload>,
) -> Result<Response, ApiError> {
    // Idempotent: duplicate deliveries lose the conditional write downstream.
    crate::transcribe::handle_webhook(&state.ctx, payload).await?;
    Ok((StatusCode::OK, "ok").into_response())
}

// ---------------------------------------------------------------------------
// Feed subscriptions
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SubscriptionReq {
    url: String,
    kind: FeedKind,
    #[serde(default = "default_cadence")]
    cadence_hours: u32,
    /// Plain credential for private feeds; sealed before storage.
    credential: Option<String>,
}

fn default_cadence() -> u32 {
    6
}

#[derive(Serialize)]
struct SubscriptionResp {
    id: String,
    active: bool,
}

async fn create_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubscriptionReq>,
) -> Result<Response, ApiError> {
    let user_id = caller(&headers)?;
    if url::Url::parse(&body.url).is_err() {
        return Err(ApiError(PipelineError::PermanentInput(format!(
            "malformed feed URL: {}",
            body.url
        ))));
    }

    let mut sub = FeedSubscription::new(&user_id, &body.url, body.kind, body.cadence_hours);
    if let Some(plain) = body.credential.as_deref() {
        let Some(key) = credential::master_key_from_env() else {
            return Err(ApiError(PipelineError::PermanentInput(
                "credential sealing is not configured on this deployment".to_string(),
            )));
        };
        sub.credential = Some(credential::seal(plain, &key));
    }

    let resp = SubscriptionResp {
        id: sub.id.clone(),
        active: sub.active,
    };
    state.ctx.feeds.insert_subscription(sub).await?;
    Ok((StatusCode::CREATED, Json(resp)).into_response())
}

async fn remove_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user_id = caller(&headers)?;
    let Some(sub) = state.ctx.feeds.subscription(&id).await? else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    if sub.owner != user_id {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    state.ctx.feeds.remove_subscription(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
