use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::auth::cookie::{clear_session_cookie, session_cookie};
use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, JsonBody};
use crate::state::AppState;
use crate::store::users::Registration;

// -- Request types --

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub username: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

// -- Cookie helpers --

fn issue_cookie(state: &AppState, user_id: &str) -> String {
    let token = state.tokens.issue(user_id);
    session_cookie(
        &state.config.auth.cookie_name,
        &token,
        state.tokens.ttl().num_seconds(),
        state.config.secure_cookies(),
    )
}

// -- Handlers --

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<SignupRequest>,
) -> AppResult<Response> {
    let user = state.users.register(&Registration {
        name: body.name,
        email: body.email,
        password: body.password,
        username: body.username,
    })?;
    tracing::info!("Signed up {}", user.username);

    let cookie = issue_cookie(&state, &user.id);
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "message": "User created successfully.", "user": user })),
    )
        .into_response())
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<LoginRequest>,
) -> AppResult<Response> {
    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(AppError::BadRequest(
            "All fields are mandatory.".into(),
        ));
    }

    let user = state.users.authenticate(&body.email, &body.password)?;
    tracing::info!("Logged in {}", user.username);

    let cookie = issue_cookie(&state, &user.id);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "message": "Login successful.", "user": user })),
    )
        .into_response())
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Response> {
    tracing::info!("Logged out {}", user.username);

    let cookie = clear_session_cookie(
        &state.config.auth.cookie_name,
        state.config.secure_cookies(),
    );
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "message": "Logout successful." })),
    )
        .into_response())
}

/// GET /api/auth/me
pub async fn me(CurrentUser(user): CurrentUser) -> Json<serde_json::Value> {
    Json(json!({ "user": user }))
}
