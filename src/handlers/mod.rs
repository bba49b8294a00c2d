// Request handlers, grouped by concern. The route table mirrors the
// application's external interface exactly.

pub mod auth;
pub mod feed;
pub mod posts;
pub mod profile;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(feed::index))
        .route("/following", get(feed::following))
        .route("/login", get(auth::login_form).post(auth::login))
        .route("/logout", get(auth::logout).post(auth::logout))
        .route("/register", get(auth::register_form).post(auth::register))
        .route("/new_post", get(posts::new_post_redirect).post(posts::new_post))
        .route("/profile/{username}", get(profile::profile))
        .route("/toggle_follow/{username}", post(profile::toggle_follow))
        .with_state(state)
}
