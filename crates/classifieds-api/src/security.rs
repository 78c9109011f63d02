//! Input validation, attack-pattern detection and request hygiene helpers.

use std::net::{IpAddr, SocketAddr};
use std::sync::LazyLock;

use axum::http::HeaderMap;
use classifieds_types::api::{ListingForm, PasswordStrength};
use classifieds_types::models::ListingStatus;
use regex::{Regex, RegexSet};
use tracing::warn;

use crate::error::FieldErrors;

pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
     script-src 'self' 'unsafe-inline' https://cdn.jsdelivr.net; \
     style-src 'self' 'unsafe-inline' https://cdn.jsdelivr.net; \
     img-src 'self' data: https:; \
     font-src 'self' https://cdn.jsdelivr.net; \
     connect-src 'self'; \
     frame-ancestors 'none';";

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    )
    .expect("email regex")
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://[^\s/?#@]+(?:[/?#]\S*)?$").expect("url regex")
});

static XSS_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?is)<script\b.*?</script>",
        r"(?is)<iframe\b.*?</iframe>",
        r"(?i)javascript:",
        r"(?i)\bon\w+\s*=",
        r"(?is)<object\b.*?</object>",
        r"(?is)<embed\b.*?</embed>",
    ])
    .expect("xss patterns")
});

static SQLI_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\bunion\b.*\bselect\b",
        r"(?i)\bselect\b.*\bfrom\b",
        r"(?i)\binsert\b.*\binto\b",
        r"(?i)\bupdate\b.*\bset\b",
        r"(?i)\bdelete\b.*\bfrom\b",
        r"(?i)\bdrop\b.*\btable\b",
        r"(?i)\bor\b.*=",
        r"(?i)\band\b.*=",
        r"(?i)'.*or.*'.*=.*'",
        r#"(?i)".*or.*".*=.*""#,
    ])
    .expect("sqli patterns")
});

const BOT_MARKERS: [&str; 6] = ["bot", "crawler", "spider", "scraper", "curl", "wget"];

/// Strips NUL bytes and surrounding whitespace.
pub fn sanitize_input(input: &str) -> String {
    input.replace('\0', "").trim().to_string()
}

pub fn validate_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL_RE.is_match(email)
}

/// 7 to 15 digits once separators and punctuation are removed.
pub fn validate_phone(phone: &str) -> bool {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    (7..=15).contains(&digits)
}

pub fn validate_url(url: &str) -> bool {
    URL_RE.is_match(url)
}

pub fn check_password_strength(password: &str) -> PasswordStrength {
    let mut score = 0u8;
    let mut feedback = Vec::new();

    if password.chars().count() >= 8 {
        score += 2;
    } else {
        feedback.push("Password should be at least 8 characters long");
    }

    let checks: [(fn(&char) -> bool, &'static str); 4] = [
        (char::is_ascii_uppercase, "Include at least one uppercase letter"),
        (char::is_ascii_lowercase, "Include at least one lowercase letter"),
        (char::is_ascii_digit, "Include at least one number"),
        (|c: &char| !c.is_ascii_alphanumeric(), "Include at least one special character"),
    ];
    for (matches, hint) in checks {
        if password.chars().any(|c| matches(&c)) {
            score += 1;
        } else {
            feedback.push(hint);
        }
    }

    let strength = match score {
        5.. => "strong",
        3..=4 => "medium",
        _ => "weak",
    };

    PasswordStrength {
        score,
        strength,
        feedback,
    }
}

/// Flags script-injection markup. Hits are logged to the `security` target.
pub fn detect_xss(input: &str) -> bool {
    let hit = XSS_PATTERNS.is_match(input);
    if hit {
        warn!(target: "security", input = %preview(input), "XSS attempt detected");
    }
    hit
}

/// Flags SQL-looking input. Queries are always parameterized, so callers use
/// this for auditing rather than rejection.
pub fn detect_sql_injection(input: &str) -> bool {
    let hit = SQLI_PATTERNS.is_match(input);
    if hit {
        warn!(target: "security", input = %preview(input), "SQL injection attempt detected");
    }
    hit
}

fn preview(input: &str) -> String {
    input.chars().take(120).collect()
}

pub fn is_bot(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    BOT_MARKERS.iter().any(|marker| ua.contains(marker))
}

/// The caller's address. Forwarding headers (`X-Forwarded-For`, `X-Real-IP`,
/// `Client-IP`) are client-controlled, so they are only consulted when
/// `trust_proxy` is set; otherwise the socket peer is the answer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    let forwarded: &[&str] = if trust_proxy {
        &["x-forwarded-for", "x-real-ip", "client-ip"]
    } else {
        &[]
    };
    for name in forwarded {
        let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        let first = value.split(',').next().unwrap_or_default().trim();
        if let Ok(ip) = first.parse::<IpAddr>() {
            if is_public(&ip) {
                return ip.to_string();
            }
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn is_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, ..] = v4.octets();
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || a == 0
                || a >= 240)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            !(v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80)
        }
    }
}

/// A listing form that passed every check, with values normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidListing {
    pub category_id: i64,
    pub title: String,
    pub description: String,
    pub price: Option<f64>,
    pub location: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub status: ListingStatus,
}

pub fn validate_listing(form: &ListingForm) -> Result<ValidListing, FieldErrors> {
    let mut errors = FieldErrors::new();

    let title = sanitize_input(&form.title);
    if title.is_empty() {
        errors.insert("title", "Title is required".into());
    } else if !(3..=200).contains(&title.chars().count()) {
        errors.insert("title", "Title must be between 3 and 200 characters".into());
    } else if detect_xss(&title) {
        errors.insert("title", "Invalid characters in title".into());
    }

    let description = sanitize_input(&form.description);
    if description.is_empty() {
        errors.insert("description", "Description is required".into());
    } else if !(10..=5000).contains(&description.chars().count()) {
        errors.insert(
            "description",
            "Description must be between 10 and 5000 characters".into(),
        );
    } else if detect_xss(&description) {
        errors.insert("description", "Invalid characters in description".into());
    }

    let category_id = match form.category_id.trim().parse::<i64>() {
        Ok(id) if id > 0 => id,
        _ => {
            errors.insert("category_id", "Valid category is required".into());
            0
        }
    };

    let raw_price = form.price.trim();
    let price = if raw_price.is_empty() {
        None
    } else {
        match raw_price.parse::<f64>() {
            Ok(p) if p.is_finite() && p >= 0.0 => Some(p),
            _ => {
                errors.insert("price", "Price must be a valid positive number".into());
                None
            }
        }
    };

    let location = sanitize_input(&form.location);
    if location.chars().count() > 100 {
        errors.insert("location", "Location must be less than 100 characters".into());
    } else if !location.is_empty() && detect_xss(&location) {
        errors.insert("location", "Invalid characters in location".into());
    }

    let contact_email = sanitize_input(&form.contact_email);
    if !contact_email.is_empty() && !validate_email(&contact_email) {
        errors.insert("contact_email", "Invalid email address".into());
    }

    let contact_phone = sanitize_input(&form.contact_phone);
    if !contact_phone.is_empty() && !validate_phone(&contact_phone) {
        errors.insert("contact_phone", "Invalid phone number".into());
    }

    let raw_status = form.status.trim();
    let status = if raw_status.is_empty() {
        ListingStatus::Active
    } else {
        match ListingStatus::parse(raw_status) {
            Some(status) => status,
            None => {
                errors.insert("status", "Invalid status".into());
                ListingStatus::Active
            }
        }
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidListing {
        category_id,
        title,
        description,
        price,
        location,
        contact_email,
        contact_phone,
        status,
    })
}
