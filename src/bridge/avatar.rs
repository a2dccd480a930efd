//! Avatar content-hash cache and the media size ceiling.
//!
//! The cache is written back: an entry appears only once the outbound leg has
//! seen the media server's hash for an uploaded avatar, never when the avatar
//! is downloaded. Entries live as long as the adapter.

use std::collections::HashMap;
use std::sync::Mutex;

/// User id → avatar content hash, shared by the normalizer and the
/// outbound translator.
#[derive(Debug, Default)]
pub struct AvatarCache {
    hashes: Mutex<HashMap<String, String>>,
}

impl AvatarCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff no hash is cached for `user_id`.
    pub fn should_fetch(&self, user_id: &str) -> bool {
        match self.hashes.lock() {
            Ok(map) => !map.contains_key(user_id),
            Err(_) => true,
        }
    }

    /// Record a confirmed upload. Empty hashes are ignored.
    pub fn confirm_upload(&self, user_id: &str, hash: &str) {
        if hash.is_empty() {
            return;
        }
        if let Ok(mut map) = self.hashes.lock() {
            map.insert(user_id.to_owned(), hash.to_owned());
        }
    }

    /// Cached hash for `user_id`.
    pub fn get(&self, user_id: &str) -> Option<String> {
        self.hashes.lock().ok()?.get(user_id).cloned()
    }

    /// Public avatar URL under the media server's download base.
    pub fn avatar_url(&self, user_id: &str, download_base: &str) -> Option<String> {
        let hash = self.get(user_id)?;
        let base = download_base.trim_end_matches('/');
        Some(format!("{base}/{hash}/{user_id}.png"))
    }

    /// Number of cached users.
    pub fn len(&self) -> usize {
        self.hashes.lock().map(|map| map.len()).unwrap_or_default()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Size ceiling for files and avatars fetched from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaGuard {
    max_bytes: u64,
}

impl MediaGuard {
    /// Guard with an inclusive ceiling of `max_bytes`.
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// The configured ceiling.
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// True iff `size` is within the ceiling (inclusive).
    pub fn check_size(&self, size: u64) -> bool {
        size <= self.max_bytes
    }
}
