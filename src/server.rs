//! Minimal Serve surface (§6.1): five routes over the [`SessionHost`],
//! built the way this codebase's own `routes::build_router` composes a
//! `Router` from an `AppState`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::error::{EnvironmentActivationError, ProfileOrSessionNotFound};
use crate::session::coordinator::NewSessionArgs;
use crate::session::host::SessionHost;
use crate::transcript::Architecture;

#[derive(Clone)]
pub struct AppState {
    pub host: Arc<SessionHost>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(destroy_session))
        .route("/sessions/{id}/messages", post(send_message))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found(req: axum::extract::Request) -> impl IntoResponse {
    tracing::warn!(path = %req.uri(), "unhandled path");
    (StatusCode::NOT_FOUND, "Not Found")
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    agent_profile_ref: String,
    architecture: Architecture,
    #[serde(default)]
    session_options: serde_json::Value,
}

async fn create_session(State(state): State<AppState>, Json(body): Json<CreateSessionRequest>) -> impl IntoResponse {
    let result = state
        .host
        .create_session(NewSessionArgs {
            agent_profile_ref: body.agent_profile_ref,
            architecture: body.architecture,
            session_options: body.session_options,
            default_workspace_files: Vec::new(),
        })
        .await;
    match result {
        Ok(session) => (StatusCode::CREATED, Json(session.get_persisted_list_data())).into_response(),
        Err(e) => activation_error_response(&e),
    }
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    match state.host.list_all_sessions().await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to list sessions");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.host.load_session(&id).await {
        Ok(session) => Json(session.get_state()).into_response(),
        Err(e) => not_found_error_response(&e),
    }
}

#[derive(Deserialize)]
struct SendMessageRequest {
    text: String,
    #[serde(default)]
    model: Option<String>,
}

async fn send_message(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<SendMessageRequest>) -> impl IntoResponse {
    let session = match state.host.load_session(&id).await {
        Ok(session) => session,
        Err(e) => return not_found_error_response(&e),
    };
    match session.send_message(&body.text, body.model).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => activation_error_response(&e),
    }
}

async fn destroy_session(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    state.host.unload_session(&id).await;
    StatusCode::NO_CONTENT
}

fn not_found_error_response(e: &ProfileOrSessionNotFound) -> axum::response::Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": e.to_string()}))).into_response()
}

fn activation_error_response(e: &EnvironmentActivationError) -> axum::response::Response {
    tracing::error!(error = %e, "environment activation failed");
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
}
