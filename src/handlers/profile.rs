use axum::extract::{Path, State};
use axum::response::{Json, Redirect};
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::auth::{AuthUser, MaybeUser};
use crate::error::AppError;
use crate::models::User;

async fn lookup(state: &AppState, username: &str) -> Result<User, AppError> {
    state
        .db
        .get_user_by_username(username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No user named {}", username)))
}

pub async fn profile(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(username): Path<String>,
) -> Result<Json<Value>, AppError> {
    let profile_user = lookup(&state, &username).await?;

    let posts = state.db.posts_by_author(profile_user.id).await?;
    let is_following = match &viewer {
        Some(viewer) => state.db.is_following(viewer.id, profile_user.id).await?,
        None => false,
    };

    Ok(Json(json!({
        "username": profile_user.username,
        "joined": profile_user.created,
        "posts": posts,
        "is_following": is_following,
        "follower_count": state.db.follower_count(profile_user.id).await?,
        "following_count": state.db.following_count(profile_user.id).await?,
    })))
}

pub async fn toggle_follow(
    State(state): State<AppState>,
    AuthUser(viewer): AuthUser,
    Path(username): Path<String>,
) -> Result<Redirect, AppError> {
    let target = lookup(&state, &username).await?;
    let back = format!("/profile/{}", username);

    // Following yourself is a no-op
    if viewer.id == target.id {
        return Ok(Redirect::to(&back));
    }

    if state.db.is_following(viewer.id, target.id).await? {
        state.db.unfollow(viewer.id, target.id).await?;
    } else {
        state.db.follow(viewer.id, target.id).await?;
    }

    Ok(Redirect::to(&back))
}
