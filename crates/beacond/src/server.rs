use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use beacon_core::RepoSummary;
use beacon_summary::SummaryError;
use chrono::{NaiveDate, Utc};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;

use crate::pipeline::{GENERATION_FAILED_MESSAGE, Pipeline};

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/summaries", get(get_summaries).post(post_summaries))
        .route("/generate", post(post_generate))
        .route("/dashboard", get(get_dashboard))
        .route("/refresh", post(post_refresh))
        .route("/checks", get(get_checks))
        .route("/export", get(get_export))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn health() -> Response {
    (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response()
}

async fn get_summaries(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(raw_date) = params.get("date") else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing required \"date\" query param",
        );
    };
    let Ok(date) = raw_date.parse::<NaiveDate>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid \"date\" query param");
    };

    match state.pipeline.stored_summaries_for_date(date) {
        Ok(grouped) => (StatusCode::OK, Json(grouped)).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "summary read failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not fetch summaries",
            )
        }
    }
}

async fn post_summaries(State(state): State<AppState>, body: String) -> Response {
    let Ok(value) = serde_json::from_str::<Value>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid request format");
    };

    let system = value.get("system").and_then(Value::as_str);
    let date = value
        .get("date")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<NaiveDate>().ok());
    let summaries = value
        .get("summaries")
        .and_then(Value::as_array)
        .and_then(|entries| {
            serde_json::from_value::<Vec<RepoSummary>>(Value::Array(entries.clone())).ok()
        });

    let (Some(system), Some(date), Some(summaries)) = (system, date, summaries) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid request format");
    };

    match state.pipeline.save_summaries(system, date, &summaries) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "summary write failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not save summaries",
            )
        }
    }
}

async fn post_generate(State(state): State<AppState>, body: String) -> Response {
    let prompt = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| {
            value
                .get("prompt")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .filter(|prompt| !prompt.trim().is_empty());
    let Some(prompt) = prompt else {
        return error_response(StatusCode::BAD_REQUEST, "Missing prompt");
    };

    let Some(provider) = state.pipeline.ai.clone() else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Gemini token not configured",
        );
    };

    match provider.generate(&prompt).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(SummaryError::Upstream(message)) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &message)
        }
        Err(err) => {
            tracing::warn!(error = %err, "generate request failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate summary",
            )
        }
    }
}

async fn get_dashboard(State(state): State<AppState>) -> Response {
    let view = state.pipeline.load_dashboard(Utc::now()).await;
    (StatusCode::OK, Json(view)).into_response()
}

async fn post_refresh(State(state): State<AppState>) -> Response {
    match state.pipeline.run_refresh(Utc::now()).await {
        Ok(generated) => {
            let view = state.pipeline.merge_known_systems(generated);
            (StatusCode::OK, Json(view)).into_response()
        }
        Err(err) => {
            tracing::warn!(error = %err, "manual refresh failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, GENERATION_FAILED_MESSAGE)
        }
    }
}

async fn get_checks(State(state): State<AppState>) -> Response {
    match state.pipeline.component_checks() {
        Ok(checks) => (StatusCode::OK, Json(checks)).into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "check evaluation failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not evaluate checks",
            )
        }
    }
}

async fn get_export(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(system) = params.get("system").filter(|value| !value.trim().is_empty()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing required \"system\" query param",
        );
    };

    let date = match params.get("date") {
        Some(raw) => match raw.parse::<NaiveDate>() {
            Ok(date) => date,
            Err(_) => {
                return error_response(StatusCode::BAD_REQUEST, "Invalid \"date\" query param");
            }
        },
        None => Utc::now().date_naive(),
    };

    match state.pipeline.export_summaries_text(system, date) {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "summary export failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not fetch summaries",
            )
        }
    }
}
