use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::{Page, PostView};

#[derive(Deserialize)]
pub struct FeedQuery {
    // Kept as a string so a garbage page value falls back to page 1 instead
    // of rejecting the request.
    pub page: Option<String>,
}

impl FeedQuery {
    fn page_number(&self) -> Option<i64> {
        self.page.as_deref().and_then(|p| p.parse().ok())
    }
}

fn feed_json(title: &str, page: Page<PostView>) -> Json<Value> {
    Json(json!({
        "title": title,
        "posts": page.items,
        "page": page.page,
        "num_pages": page.num_pages,
        "total": page.total,
        "has_next": page.has_next,
        "has_previous": page.has_previous,
    }))
}

/// All posts, newest first.
pub async fn index(
    State(state): State<AppState>,
    Query(params): Query<FeedQuery>,
) -> Result<Json<Value>, AppError> {
    let page = state.db.feed_page(params.page_number()).await?;
    Ok(feed_json("All Posts", page))
}

/// Posts by users the viewer follows.
pub async fn following(
    State(state): State<AppState>,
    AuthUser(viewer): AuthUser,
    Query(params): Query<FeedQuery>,
) -> Result<Json<Value>, AppError> {
    let page = state
        .db
        .following_feed_page(viewer.id, params.page_number())
        .await?;
    Ok(feed_json("Following", page))
}
