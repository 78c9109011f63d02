use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{
        HeaderValue,
        header::{
            CONTENT_SECURITY_POLICY, REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
            X_XSS_PROTECTION,
        },
    },
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::{client_guard, require_auth};
use crate::security::CONTENT_SECURITY_POLICY as CSP;
use crate::session::session_layer;
use crate::state::AppState;
use crate::{auth, listings, search};

/// Headroom for the text fields that travel with an image.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let gate = || from_fn(require_auth);

    let app = Router::new()
        .route("/", get(search::home))
        .route("/robots.txt", get(robots))
        .route("/categories", get(listings::list_categories))
        .route(
            "/listings",
            get(search::search_listings).merge(post(listings::create_listing).layer(gate())),
        )
        .route(
            "/listings/{id}",
            get(listings::view_listing).merge(post(listings::update_listing).layer(gate())),
        )
        .route(
            "/listings/{id}/delete",
            post(listings::delete_listing).layer(gate()),
        )
        .route("/me/listings", get(listings::my_listings).layer(gate()))
        .route("/auth/csrf-token", get(auth::csrf_token))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me).layer(gate()))
        .route("/auth/password-strength", post(auth::password_strength))
        .layer(DefaultBodyLimit::max(
            state.config.max_upload_bytes + FORM_OVERHEAD_BYTES,
        ))
        .layer(from_fn_with_state(state.clone(), session_layer))
        // Static images skip the session machinery.
        .nest_service("/uploads", ServeDir::new(state.images.dir()))
        .layer(from_fn_with_state(state.clone(), client_guard))
        .layer(SetResponseHeaderLayer::overriding(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CSP),
        ))
        .layer(TraceLayer::new_for_http());

    app.with_state(state)
}

async fn robots() -> &'static str {
    "User-agent: *\nDisallow: /me/\nDisallow: /auth/\n"
}
