//! Server-side sessions: storage, lifecycle, and the axum glue that loads a
//! session before each request and persists it afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{Request, State},
    http::{
        HeaderMap, HeaderValue,
        header::{COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    middleware::Next,
    response::Response,
};
use classifieds_db::{Database, DbError};
use classifieds_types::session::SessionData;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::csrf::generate_token;
use crate::error::AppError;
use crate::state::{AppState, run_blocking};

pub const SESSION_COOKIE_NAME: &str = "classifieds_session";

/// Opaque session identifier handed to the browser in a cookie.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(generate_token())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// Ids are bearer secrets; keep them out of logs.
impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}…)", &self.0[..self.0.len().min(6)])
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session storage failed: {0}")]
    Store(#[from] DbError),
    #[error("session data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("session store lock poisoned")]
    Poisoned,
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        AppError::Internal(err.into())
    }
}

/// Keyed storage for session state.
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &SessionId) -> Result<Option<SessionData>, SessionError>;
    fn put(&self, id: &SessionId, data: &SessionData) -> Result<(), SessionError>;
    fn destroy(&self, id: &SessionId) -> Result<(), SessionError>;
}

/// Process-local store. Sessions vanish on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, SessionData>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<SessionId, SessionData>>, SessionError> {
        self.sessions.lock().map_err(|_| SessionError::Poisoned)
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, id: &SessionId) -> Result<Option<SessionData>, SessionError> {
        Ok(self.lock()?.get(id).cloned())
    }

    fn put(&self, id: &SessionId, data: &SessionData) -> Result<(), SessionError> {
        self.lock()?.insert(id.clone(), data.clone());
        Ok(())
    }

    fn destroy(&self, id: &SessionId) -> Result<(), SessionError> {
        self.lock()?.remove(id);
        Ok(())
    }
}

/// Sessions persisted as JSON in the `sessions` table, expiring `ttl_secs`
/// after their last write.
pub struct SqliteSessionStore {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    ttl_secs: i64,
}

impl SqliteSessionStore {
    pub fn new(db: Arc<Database>, clock: Arc<dyn Clock>, ttl_secs: i64) -> Self {
        Self { db, clock, ttl_secs }
    }
}

impl SessionStore for SqliteSessionStore {
    fn get(&self, id: &SessionId) -> Result<Option<SessionData>, SessionError> {
        let raw = self.db.load_session(id.as_str(), self.clock.now())?;
        Ok(raw.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    fn put(&self, id: &SessionId, data: &SessionData) -> Result<(), SessionError> {
        let now = self.clock.now();
        let json = serde_json::to_string(data)?;
        self.db.save_session(id.as_str(), &json, now + self.ttl_secs, now)?;
        Ok(())
    }

    fn destroy(&self, id: &SessionId) -> Result<(), SessionError> {
        self.db.delete_session(id.as_str())?;
        Ok(())
    }
}

/// A session as loaded at the start of a request.
#[derive(Debug)]
pub struct OpenedSession {
    pub id: SessionId,
    pub data: SessionData,
    /// The browser's cookie did not name a live session.
    pub is_new: bool,
    /// The id was rotated by the regeneration policy.
    pub regenerated: bool,
}

/// Session lifecycle policy on top of a [`SessionStore`].
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    regenerate_after_secs: i64,
    ttl_secs: i64,
    cookie_secure: bool,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        regenerate_after_secs: i64,
        ttl_secs: i64,
        cookie_secure: bool,
    ) -> Self {
        Self {
            store,
            clock,
            regenerate_after_secs,
            ttl_secs,
            cookie_secure,
        }
    }

    /// Resolves the cookie value into a live session. Unknown ids are never
    /// adopted: the visitor gets a freshly generated one instead.
    pub fn open(&self, cookie_id: Option<&str>) -> Result<OpenedSession, SessionError> {
        let existing = match cookie_id {
            Some(raw) => {
                let id = SessionId::from(raw);
                self.store.get(&id)?.map(|data| (id, data))
            }
            None => None,
        };

        let (mut id, mut data, is_new) = match existing {
            Some((id, data)) => (id, data, false),
            None => (SessionId::generate(), SessionData::default(), true),
        };

        let regenerated = self.apply_regeneration_policy(&mut id, &mut data)?;
        Ok(OpenedSession {
            id,
            data,
            is_new,
            regenerated,
        })
    }

    /// Starts the regeneration timer on first sight and rotates the id once
    /// more than the configured interval has passed. Claims and the CSRF token
    /// travel with the data; only the id changes.
    pub fn apply_regeneration_policy(
        &self,
        id: &mut SessionId,
        data: &mut SessionData,
    ) -> Result<bool, SessionError> {
        let now = self.clock.now();
        match data.last_regeneration {
            None => {
                data.last_regeneration = Some(now);
                Ok(false)
            }
            Some(last) if now - last > self.regenerate_after_secs => {
                self.regenerate(id, data)?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Moves the session to a new id and drops the old entry.
    pub fn regenerate(&self, id: &mut SessionId, data: &mut SessionData) -> Result<(), SessionError> {
        self.store.destroy(id)?;
        *id = SessionId::generate();
        data.last_regeneration = Some(self.clock.now());
        debug!("Session id regenerated");
        Ok(())
    }

    pub fn save(&self, id: &SessionId, data: &SessionData) -> Result<(), SessionError> {
        self.store.put(id, data)
    }

    pub fn destroy(&self, id: &SessionId) -> Result<(), SessionError> {
        self.store.destroy(id)
    }

    /// `HttpOnly` + `SameSite=Strict` cookie carrying the session id.
    pub fn cookie(&self, id: &SessionId) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!(
            "{SESSION_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
            id.as_str(),
            self.ttl_secs
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }

    pub fn clear_cookie(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0");
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie)
    }
}

struct SessionSlot {
    id: SessionId,
    data: SessionData,
    destroyed: bool,
    rotate: bool,
}

/// The visitor's session for the current request, shared between the
/// session middleware and handlers through request extensions.
#[derive(Clone)]
pub struct CurrentSession {
    inner: Arc<Mutex<SessionSlot>>,
}

impl CurrentSession {
    pub fn new(id: SessionId, data: SessionData) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionSlot {
                id,
                data,
                destroyed: false,
                rotate: false,
            })),
        }
    }

    fn slot(&self) -> MutexGuard<'_, SessionSlot> {
        // A panicking handler cannot leave SessionData half-written in a way
        // that matters more than losing the request, so recover the guard.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn read<T>(&self, f: impl FnOnce(&SessionData) -> T) -> T {
        f(&self.slot().data)
    }

    pub fn update<T>(&self, f: impl FnOnce(&mut SessionData) -> T) -> T {
        f(&mut self.slot().data)
    }

    pub fn snapshot(&self) -> SessionData {
        self.slot().data.clone()
    }

    pub fn replace(&self, data: SessionData) {
        self.slot().data = data;
    }

    /// Ask for a fresh id once the handler finishes (e.g. after login).
    pub fn rotate_id(&self) {
        self.slot().rotate = true;
    }

    /// Drop the session entirely: store entry removed, cookie cleared.
    pub fn destroy(&self) {
        let mut slot = self.slot();
        slot.destroyed = true;
        slot.data = SessionData::default();
    }

    fn finish(&self) -> (SessionId, SessionData, bool, bool) {
        let slot = self.slot();
        (slot.id.clone(), slot.data.clone(), slot.destroyed, slot.rotate)
    }
}

/// Loads the visitor's session, runs the handler, then persists or destroys
/// the session and emits `Set-Cookie` when the id changed.
pub async fn session_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let cookie_id = extract_session_id(req.headers());

    let manager = state.sessions.clone();
    let requested = cookie_id.clone();
    let opened = run_blocking(move || Ok(manager.open(requested.as_deref())?)).await?;
    if opened.regenerated {
        info!("Session id rotated by regeneration policy");
    }

    let handle = CurrentSession::new(opened.id, opened.data);
    req.extensions_mut().insert(handle.clone());

    let mut response = next.run(req).await;

    let (mut id, mut data, destroyed, rotate) = handle.finish();
    let manager = state.sessions.clone();

    if destroyed {
        let had_cookie = cookie_id.is_some();
        run_blocking(move || Ok(manager.destroy(&id)?)).await?;
        if had_cookie {
            match state.sessions.clear_cookie() {
                Ok(cookie) => {
                    response.headers_mut().append(SET_COOKIE, cookie);
                }
                Err(e) => error!("Failed to build session cookie: {}", e),
            }
        }
        return Ok(response);
    }

    let id = run_blocking(move || {
        if rotate {
            manager.regenerate(&mut id, &mut data)?;
        }
        manager.save(&id, &data)?;
        Ok(id)
    })
    .await?;

    if cookie_id.as_deref() != Some(id.as_str()) {
        match state.sessions.cookie(&id) {
            Ok(cookie) => {
                response.headers_mut().append(SET_COOKIE, cookie);
            }
            Err(e) => error!("Failed to build session cookie: {}", e),
        }
    }

    Ok(response)
}

/// Pulls the session id out of the `Cookie` header, if present.
pub fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            if key.trim() == SESSION_COOKIE_NAME && !val.trim().is_empty() {
                return Some(val.trim().to_string());
            }
        }
    }
    None
}
