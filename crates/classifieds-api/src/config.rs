use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use crate::rate_limit::RateLimitPolicy;

/// Throttling policies for the sensitive actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub login: RateLimitPolicy,
    pub register: RateLimitPolicy,
    pub post_listing: RateLimitPolicy,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            login: RateLimitPolicy::new(5, 15 * 60),
            register: RateLimitPolicy::new(3, 60 * 60),
            post_listing: RateLimitPolicy::new(10, 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub session_ttl_secs: i64,
    pub session_regenerate_secs: i64,
    pub cookie_secure: bool,
    /// Read the client address from forwarding headers. Only safe behind a
    /// reverse proxy that overwrites them.
    pub trust_proxy: bool,
    pub rate_limits: RateLimits,
    pub blocked_ips: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            db_path: "classifieds.db".into(),
            upload_dir: "./uploads".into(),
            max_upload_bytes: 5 * 1024 * 1024,
            session_ttl_secs: 24 * 60 * 60,
            session_regenerate_secs: 300,
            cookie_secure: false,
            trust_proxy: false,
            rate_limits: RateLimits::default(),
            blocked_ips: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Reads `CLASSIFIEDS_*` variables, falling back to the defaults above.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match var("CLASSIFIEDS_PORT") {
            Some(v) => v.parse().with_context(|| format!("CLASSIFIEDS_PORT={v}"))?,
            None => defaults.port,
        };
        let max_upload_bytes = match var("CLASSIFIEDS_MAX_UPLOAD_BYTES") {
            Some(v) => v.parse().with_context(|| format!("CLASSIFIEDS_MAX_UPLOAD_BYTES={v}"))?,
            None => defaults.max_upload_bytes,
        };
        let session_ttl_secs = match var("CLASSIFIEDS_SESSION_TTL_SECS") {
            Some(v) => v.parse().with_context(|| format!("CLASSIFIEDS_SESSION_TTL_SECS={v}"))?,
            None => defaults.session_ttl_secs,
        };
        let session_regenerate_secs = match var("CLASSIFIEDS_SESSION_REGENERATE_SECS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("CLASSIFIEDS_SESSION_REGENERATE_SECS={v}"))?,
            None => defaults.session_regenerate_secs,
        };
        let cookie_secure = var("CLASSIFIEDS_COOKIE_SECURE")
            .map(|v| flag(&v))
            .unwrap_or(defaults.cookie_secure);
        let trust_proxy = var("CLASSIFIEDS_TRUST_PROXY")
            .map(|v| flag(&v))
            .unwrap_or(defaults.trust_proxy);

        let rate_limits = RateLimits {
            login: policy_var(var("CLASSIFIEDS_LOGIN_RATE"), defaults.rate_limits.login)?,
            register: policy_var(var("CLASSIFIEDS_REGISTER_RATE"), defaults.rate_limits.register)?,
            post_listing: policy_var(var("CLASSIFIEDS_POST_RATE"), defaults.rate_limits.post_listing)?,
        };

        let blocked_ips = var("CLASSIFIEDS_BLOCKED_IPS")
            .map(|v| {
                v.split(',')
                    .map(|ip| ip.trim().to_string())
                    .filter(|ip| !ip.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: var("CLASSIFIEDS_HOST").unwrap_or(defaults.host),
            port,
            db_path: var("CLASSIFIEDS_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            upload_dir: var("CLASSIFIEDS_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            max_upload_bytes,
            session_ttl_secs,
            session_regenerate_secs,
            cookie_secure,
            trust_proxy,
            rate_limits,
            blocked_ips,
        })
    }
}

fn flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Parses `attempts/window_secs`, e.g. `5/900`.
fn policy_var(value: Option<String>, default: RateLimitPolicy) -> Result<RateLimitPolicy> {
    let Some(value) = value else {
        return Ok(default);
    };
    let (attempts, window) = value
        .split_once('/')
        .with_context(|| format!("rate limit '{value}' must look like attempts/window_secs"))?;
    let max_attempts: u32 = attempts.trim().parse().context("rate limit attempts")?;
    let window_secs: i64 = window.trim().parse().context("rate limit window")?;
    if max_attempts == 0 || window_secs <= 0 {
        bail!("rate limit '{value}' must have positive attempts and window");
    }
    Ok(RateLimitPolicy::new(max_attempts, window_secs))
}
