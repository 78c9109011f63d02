use std::net::SocketAddr;

use axum::{
    Extension, Json,
    extract::{ConnectInfo, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use classifieds_types::session::{SessionData, SessionUser};
use serde_json::json;
use tracing::warn;

use crate::security::{client_ip, is_bot};
use crate::session::CurrentSession;
use crate::state::AppState;

/// Where anonymous visitors are sent.
pub const LOGIN_PATH: &str = "/login";

/// Paths crawlers may still fetch.
const BOT_ALLOWED_PATHS: [&str; 2] = ["/robots.txt", "/sitemap.xml"];

/// Resolved caller address, inserted by [`client_guard`].
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

/// The visitor must sign in first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDenied {
    pub return_to: String,
}

impl AccessDenied {
    pub fn location(&self) -> String {
        if self.return_to.is_empty() {
            LOGIN_PATH.to_string()
        } else {
            format!("{LOGIN_PATH}?redirect={}", urlencoding::encode(&self.return_to))
        }
    }
}

impl IntoResponse for AccessDenied {
    fn into_response(self) -> Response {
        Redirect::to(&self.location()).into_response()
    }
}

/// Passes only sessions carrying a logged-in identity.
pub fn require_authenticated<'a>(
    session: &'a SessionData,
    return_to: &str,
) -> Result<&'a SessionUser, AccessDenied> {
    session.current_user().ok_or_else(|| AccessDenied {
        return_to: return_to.to_string(),
    })
}

/// Access gate for protected routes. Exposes the signed-in [`SessionUser`]
/// to handlers as an extension.
pub async fn require_auth(
    Extension(session): Extension<CurrentSession>,
    mut req: Request,
    next: Next,
) -> Result<Response, AccessDenied> {
    let return_to = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();

    let user = session.read(|data| require_authenticated(data, &return_to).cloned())?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Resolves the client address, then turns away blocked addresses and
/// crawlers before any other work happens.
pub async fn client_guard(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(req.headers(), peer, state.config.trust_proxy);

    if state.config.blocked_ips.iter().any(|blocked| blocked == &ip) {
        warn!(target: "security", ip = %ip, "Blocked IP attempted access");
        return (StatusCode::FORBIDDEN, Json(json!({ "error": "Access denied" }))).into_response();
    }

    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if is_bot(user_agent) && !BOT_ALLOWED_PATHS.contains(&req.uri().path()) {
        warn!(target: "security", ip = %ip, user_agent, path = req.uri().path(), "Bot request refused");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "error": "Too many requests" })),
        )
            .into_response();
    }

    req.extensions_mut().insert(ClientIp(ip));
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_session_is_denied_with_return_path() {
        let session = SessionData::default();
        let denied = require_authenticated(&session, "/me/listings?status=sold").unwrap_err();
        assert_eq!(
            denied.location(),
            "/login?redirect=%2Fme%2Flistings%3Fstatus%3Dsold"
        );

        let response = denied.into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }

    #[test]
    fn claims_without_logged_in_flag_do_not_pass() {
        let session = SessionData {
            user: Some(SessionUser {
                user_id: 1,
                username: "alice".into(),
                email: "alice@x.com".into(),
                first_name: String::new(),
                last_name: String::new(),
            }),
            logged_in: false,
            ..Default::default()
        };
        assert!(require_authenticated(&session, "/").is_err());

        let session = SessionData {
            logged_in: true,
            ..session
        };
        assert_eq!(require_authenticated(&session, "/").unwrap().username, "alice");
    }

    #[test]
    fn empty_return_path_goes_straight_to_login() {
        let denied = AccessDenied {
            return_to: String::new(),
        };
        assert_eq!(denied.location(), "/login");
    }
}
