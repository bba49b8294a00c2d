use axum::extract::{Form, State};
use axum::http::header::SET_COOKIE;
use axum::response::{AppendHeaders, IntoResponse, Json, Redirect};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::app_state::AppState;
use crate::auth::{self, SessionToken};
use crate::error::AppError;

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegisterForm {
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub password: String,
    pub confirmation: String,
}

pub async fn login_form() -> Json<Value> {
    Json(json!({"form": "login", "fields": ["username", "password"]}))
}

pub async fn register_form() -> Json<Value> {
    Json(json!({
        "form": "register",
        "fields": ["username", "email", "password", "confirmation"]
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .db
        .get_user_by_username(&form.username)
        .await?
        .filter(|user| auth::verify_password(&form.password, &user.password_hash))
        .ok_or_else(|| AppError::Unauthorized("Invalid username and/or password.".to_string()))?;

    let session = state
        .db
        .create_session(user.id, state.config.session.ttl_secs)
        .await?;

    info!("User {} logged in", user.username);
    Ok((
        AppendHeaders([(SET_COOKIE, auth::session_cookie(&session.token))]),
        Redirect::to("/"),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> Result<impl IntoResponse, AppError> {
    if let Some(token) = token {
        state.db.delete_session(&token).await?;
    }

    Ok((
        AppendHeaders([(SET_COOKIE, auth::clear_session_cookie())]),
        Redirect::to("/"),
    ))
}

pub async fn register(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> Result<impl IntoResponse, AppError> {
    let username = form.username.trim();
    if username.is_empty() {
        return Err(AppError::Validation("Username is required.".to_string()));
    }
    if form.password.is_empty() {
        return Err(AppError::Validation("Password is required.".to_string()));
    }
    if form.password != form.confirmation {
        return Err(AppError::Validation("Passwords must match.".to_string()));
    }

    let password_hash = auth::hash_password(&form.password)?;
    let user = state
        .db
        .create_user(username, &form.email, &password_hash)
        .await?
        .ok_or_else(|| AppError::Conflict("Username already taken.".to_string()))?;

    // Auto-login the new account
    let session = state
        .db
        .create_session(user.id, state.config.session.ttl_secs)
        .await?;

    info!("Registered user {}", user.username);
    Ok((
        AppendHeaders([(SET_COOKIE, auth::session_cookie(&session.token))]),
        Redirect::to("/"),
    ))
}
