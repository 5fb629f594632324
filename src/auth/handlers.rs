use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{session, users};
use crate::config::AuthConfig;
use crate::error::{AppError, AppResult};
use crate::extractors::session_token;
use crate::parking::domain::Role;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

// -- Cookie helpers --

fn session_cookie(auth: &AuthConfig, token: &str) -> String {
    let max_age_secs = auth.session_hours * 3600;
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}",
        auth.cookie_name, token, max_age_secs
    )
}

fn clear_session_cookie(auth: &AuthConfig) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0",
        auth.cookie_name
    )
}

/// POST /auth/register — create a regular user account
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> AppResult<Response> {
    let user = users::register(
        &state.db,
        &req.username,
        &req.password,
        Role::User,
        state.config.auth.bcrypt_cost,
    )?;

    Ok((StatusCode::CREATED, Json(user)).into_response())
}

/// POST /auth/login — check credentials and start a session
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> AppResult<Response> {
    let user = users::verify_credentials(&state.db, &req.username, &req.password)?
        .ok_or(AppError::Unauthorized)?;

    let token = session::create_session(&state.db, user.id, state.config.auth.session_hours)?;
    tracing::info!(user_id = %user.id, role = %user.role, "User logged in");

    Ok((
        [(header::SET_COOKIE, session_cookie(&state.config.auth, &token))],
        Json(user),
    )
        .into_response())
}

/// POST /auth/logout — delete session and clear the cookie
pub async fn logout(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> AppResult<Response> {
    let (parts, _body) = request.into_parts();

    if let Some(token) = session_token(&parts, &state.config.auth.cookie_name) {
        if let Err(e) = session::delete_session(&state.db, token) {
            tracing::warn!("Failed to delete session: {}", e);
        }
    }

    Ok((
        [(header::SET_COOKIE, clear_session_cookie(&state.config.auth))],
        Json(json!({ "logged_out": true })),
    )
        .into_response())
}
