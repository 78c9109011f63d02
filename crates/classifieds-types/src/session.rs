use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identity claims copied into the session at login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// One fixed-window counter. `expires` is absolute wall-clock seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub attempts: u32,
    pub expires: i64,
}

/// Server-side state for one browser session.
///
/// Serialized as JSON by the persistent session store, so every field must
/// stay serde-friendly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionData {
    #[serde(default)]
    pub user: Option<SessionUser>,
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub csrf_token: Option<String>,
    #[serde(default)]
    pub last_regeneration: Option<i64>,
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitEntry>,
}

impl SessionData {
    /// The logged-in identity, if any. Claims without the `logged_in` flag
    /// do not count.
    pub fn current_user(&self) -> Option<&SessionUser> {
        if self.logged_in { self.user.as_ref() } else { None }
    }
}
