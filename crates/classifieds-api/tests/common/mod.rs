//! Shared harness: one router over an in-memory database, plus cookie-jar
//! clients that talk to it through `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{
        HeaderMap, Request, StatusCode,
        header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
    },
};
use classifieds_api::clock::ManualClock;
use classifieds_api::session::{MemorySessionStore, SESSION_COOKIE_NAME};
use classifieds_api::{AppConfig, AppStateInner, router};
use classifieds_db::Database;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

pub const START: i64 = 1_700_000_000;

pub struct TestApp {
    pub router: Router,
    pub db: Arc<Database>,
    pub clock: Arc<ManualClock>,
    pub sessions: Arc<MemorySessionStore>,
    pub config: AppConfig,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig {
            upload_dir: std::env::temp_dir().join(format!("classifieds-test-{}", Uuid::new_v4())),
            ..AppConfig::default()
        };
        tweak(&mut config);

        let db = Arc::new(Database::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(START));
        let sessions = Arc::new(MemorySessionStore::new());
        let state = Arc::new(AppStateInner::with_session_store(
            db.clone(),
            config.clone(),
            clock.clone(),
            sessions.clone(),
        ));

        Self {
            router: router(state),
            db,
            clock,
            sessions,
            config,
        }
    }

    pub fn client(&self) -> Client {
        Client {
            router: self.router.clone(),
            cookie: None,
            headers: Vec::new(),
            peer: None,
        }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.config.upload_dir);
    }
}

#[derive(Debug)]
pub struct Resp {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    pub text: String,
}

impl Resp {
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    pub fn error(&self) -> &str {
        self.body["error"].as_str().unwrap_or_default()
    }
}

/// A browser: remembers the session cookie between requests.
pub struct Client {
    router: Router,
    pub cookie: Option<String>,
    headers: Vec<(&'static str, String)>,
    peer: Option<SocketAddr>,
}

impl Client {
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Replaces any earlier value of `name` for subsequent requests.
    pub fn set_header(&mut self, name: &'static str, value: &str) {
        self.headers.retain(|(existing, _)| *existing != name);
        self.headers.push((name, value.to_string()));
    }

    /// Socket address the server sees, as `into_make_service_with_connect_info` would report it.
    pub fn with_peer(mut self, addr: &str) -> Self {
        self.peer = Some(addr.parse().unwrap());
        self
    }

    pub async fn send(&mut self, builder: axum::http::request::Builder, body: Body) -> Resp {
        let mut builder = builder;
        if let Some(cookie) = &self.cookie {
            builder = builder.header(COOKIE, format!("{SESSION_COOKIE_NAME}={cookie}"));
        }
        for (name, value) in &self.headers {
            builder = builder.header(*name, value.as_str());
        }
        if let Some(peer) = self.peer {
            builder = builder.extension(ConnectInfo(peer));
        }

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        for set_cookie in response.headers().get_all(SET_COOKIE) {
            let raw = set_cookie.to_str().unwrap();
            let pair = raw.split(';').next().unwrap();
            let (name, value) = pair.split_once('=').unwrap();
            if name == SESSION_COOKIE_NAME {
                self.cookie = if raw.contains("Max-Age=0") || value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
        }

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes).to_string();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        Resp {
            status,
            headers,
            body,
            text,
        }
    }

    pub async fn get(&mut self, uri: &str) -> Resp {
        self.send(Request::get(uri), Body::empty()).await
    }

    pub async fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> Resp {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.send(
            Request::post(uri).header(CONTENT_TYPE, "application/x-www-form-urlencoded"),
            Body::from(body),
        )
        .await
    }

    pub async fn post_multipart(
        &mut self,
        uri: &str,
        fields: &[(&str, &str)],
        file: Option<(&str, Vec<u8>)>,
    ) -> Resp {
        let boundary = "classifieds-test-boundary";
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((filename, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(&bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        self.send(
            Request::post(uri).header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            ),
            Body::from(body),
        )
        .await
    }

    pub async fn csrf(&mut self) -> String {
        let resp = self.get("/auth/csrf-token").await;
        assert_eq!(resp.status, StatusCode::OK);
        resp.body["csrf_token"].as_str().unwrap().to_string()
    }

    pub async fn register(&mut self, username: &str, email: &str, password: &str) -> Resp {
        let token = self.csrf().await;
        self.post_form(
            "/auth/register",
            &[
                ("csrf_token", token.as_str()),
                ("username", username),
                ("email", email),
                ("password", password),
                ("confirm_password", password),
                ("first_name", "Test"),
                ("last_name", "User"),
            ],
        )
        .await
    }

    pub async fn login(&mut self, login: &str, password: &str) -> Resp {
        let token = self.csrf().await;
        self.post_form(
            "/auth/login",
            &[("csrf_token", token.as_str()), ("username", login), ("password", password)],
        )
        .await
    }

    /// Registers and signs in, returning the new user's id.
    pub async fn sign_up(&mut self, username: &str) -> i64 {
        let email = format!("{username}@x.com");
        let resp = self.register(username, &email, "Passw0rd!").await;
        assert_eq!(resp.status, StatusCode::CREATED, "{}", resp.text);
        let resp = self.login(username, "Passw0rd!").await;
        assert_eq!(resp.status, StatusCode::OK, "{}", resp.text);
        resp.body["user"]["user_id"].as_i64().unwrap()
    }
}

pub fn png_bytes() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image::RgbImage::new(4, 4)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
