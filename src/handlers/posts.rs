use axum::extract::{Form, State};
use axum::response::Redirect;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::MAX_POST_LEN;

#[derive(Deserialize)]
pub struct NewPostForm {
    #[serde(alias = "text-input")]
    pub text: String,
}

pub async fn new_post(
    State(state): State<AppState>,
    AuthUser(author): AuthUser,
    Form(form): Form<NewPostForm>,
) -> Result<Redirect, AppError> {
    let text = form.text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("Post cannot be empty.".to_string()));
    }
    if text.chars().count() > MAX_POST_LEN {
        return Err(AppError::Validation(format!(
            "Post cannot exceed {} characters.",
            MAX_POST_LEN
        )));
    }

    let post = state.db.create_post(author.id, text).await?;
    tracing::info!("User {} created post {}", author.username, post.id);

    Ok(Redirect::to("/"))
}

/// Browsing to the submission endpoint just lands on the feed.
pub async fn new_post_redirect() -> Redirect {
    Redirect::to("/")
}
