//! Per-session anti-forgery tokens.

use classifieds_types::session::SessionData;
use rand_core::{OsRng, RngCore};
use tracing::warn;

use crate::error::AppError;

/// Token byte length before hex encoding (32 bytes = 64 hex chars).
const TOKEN_BYTES: usize = 32;

/// 32 bytes from the OS CSPRNG, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Returns the session's token, minting one on first use. The token then
/// stays stable until the session is destroyed.
pub fn issue_token(session: &mut SessionData) -> String {
    session.csrf_token.get_or_insert_with(generate_token).clone()
}

/// True only if the session holds a token and `supplied` matches it.
pub fn verify_token(session: &SessionData, supplied: &str) -> bool {
    match session.csrf_token.as_deref() {
        Some(expected) => constant_time_eq(expected.as_bytes(), supplied.as_bytes()),
        None => false,
    }
}

/// Gate for state-changing handlers: must run before any mutation.
pub fn require_valid_token(session: &SessionData, supplied: &str) -> Result<(), AppError> {
    if verify_token(session, supplied) {
        Ok(())
    } else {
        warn!(target: "security", "CSRF token rejected");
        Err(AppError::InvalidRequest)
    }
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
