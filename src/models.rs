use serde::Serialize;

/// Posts per feed page. Fixed, matching the feed contract.
pub const PAGE_SIZE: i64 = 10;

/// Upper bound on post text length, in characters.
pub const MAX_POST_LEN: usize = 280;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub id: i64,
    pub author_id: i64,
    pub text: String,
    pub created: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: i64,
    pub text: String,
    pub created: i64,
}

/// Server-side session backing the `session` cookie.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub created: i64,
    pub expires: i64,
}

/// Read model for feed and profile listings: a post joined with its author
/// plus like and comment counts.
#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: i64,
    pub author_id: i64,
    pub author: String,
    pub text: String,
    pub created: i64,
    pub like_count: i64,
    pub comment_count: i64,
}

/// One page of a reverse-chronological listing.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub num_pages: i64,
    pub total: i64,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Number of pages needed for `total` items. An empty dataset still has one
/// (empty) page.
pub fn num_pages(total: i64, page_size: i64) -> i64 {
    if total <= 0 {
        1
    } else {
        (total + page_size - 1) / page_size
    }
}

/// Clamp a requested 1-based page number to the nearest valid page. A missing
/// or unparsable page selects the first page.
pub fn clamp_page(requested: Option<i64>, num_pages: i64) -> i64 {
    requested.unwrap_or(1).clamp(1, num_pages.max(1))
}
