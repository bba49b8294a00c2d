use lru::LruCache;
use std::num::NonZeroUsize;

/// Which side of the follow relationship a cached count belongs to.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum CountKind {
    Followers,
    Following,
}

/// LRU cache for follower/following counts, keyed by relationship side and user id.
/// Entries are invalidated whenever a follow edge for the user changes.
pub struct CountCache {
    inner: LruCache<(CountKind, i64), i64>,
}

impl CountCache {
    pub fn new(capacity: usize) -> Self {
        CountCache {
            inner: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
        }
    }

    pub fn get(&mut self, kind: CountKind, user_id: i64) -> Option<i64> {
        self.inner.get(&(kind, user_id)).copied()
    }

    pub fn insert(&mut self, kind: CountKind, user_id: i64, count: i64) {
        self.inner.put((kind, user_id), count);
    }

    /// Drop the two entries affected by a follow/unfollow between these users.
    pub fn invalidate_pair(&mut self, follower_id: i64, followee_id: i64) {
        self.inner.pop(&(CountKind::Following, follower_id));
        self.inner.pop(&(CountKind::Followers, followee_id));
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
