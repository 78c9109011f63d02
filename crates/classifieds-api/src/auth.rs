use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Form, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use classifieds_db::DbError;
use classifieds_types::api::{
    CsrfForm, CsrfTokenResponse, LoginForm, LoginResponse, MessageResponse,
    PasswordStrength, PasswordStrengthRequest, RegisterForm, RegisterResponse,
};
use classifieds_types::models::User;
use classifieds_types::session::{SessionData, SessionUser};
use tracing::{info, warn};

use crate::credentials::{CredentialStore, NewUserRecord};
use crate::csrf::{issue_token, require_valid_token};
use crate::error::AppError;
use crate::middleware::ClientIp;
use crate::rate_limit::RateLimitAction;
use crate::security::{check_password_strength, sanitize_input, validate_email, validate_phone};
use crate::session::CurrentSession;
use crate::state::{AppState, run_blocking};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Username or email already exists")]
    DuplicateIdentity,
    #[error("Invalid username/email or password")]
    InvalidCredentials,
    #[error("{0}")]
    Validation(String),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Persistence(DbError),
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::DuplicateIdentity => AppError::DuplicateIdentity,
            AuthError::InvalidCredentials => AppError::InvalidCredentials,
            AuthError::Validation(msg) => AppError::Validation(msg),
            AuthError::Hashing(msg) => AppError::Internal(anyhow::anyhow!(msg)),
            AuthError::Persistence(e) => AppError::PersistenceFailure(e),
        }
    }
}

/// Registration input after the form layer has done its own checks.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

/// Verifies credentials and owns the password hashing policy.
#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Creates an identity. The existence check is only a fast path; the
    /// store's unique constraint decides races.
    pub fn register(&self, reg: &Registration) -> Result<User, AuthError> {
        let username = sanitize_input(&reg.username);
        let email = sanitize_input(&reg.email);
        let first_name = sanitize_input(&reg.first_name);
        let last_name = sanitize_input(&reg.last_name);
        let phone = sanitize_input(&reg.phone);

        if !(3..=50).contains(&username.chars().count()) {
            return Err(AuthError::Validation(
                "Username must be between 3 and 50 characters".into(),
            ));
        }
        // Emails always contain '@', so a username can never shadow one at login.
        if username.contains('@') {
            return Err(AuthError::Validation("Username may not contain '@'".into()));
        }
        if !validate_email(&email) {
            return Err(AuthError::Validation("Invalid email address".into()));
        }
        if reg.password.chars().count() < 6 {
            return Err(AuthError::Validation(
                "Password must be at least 6 characters long".into(),
            ));
        }
        if first_name.chars().count() > 50 || last_name.chars().count() > 50 {
            return Err(AuthError::Validation(
                "Names must be at most 50 characters".into(),
            ));
        }
        if !phone.is_empty() && !validate_phone(&phone) {
            return Err(AuthError::Validation("Invalid phone number".into()));
        }

        if self
            .store
            .identity_exists(&username, &email)
            .map_err(AuthError::Persistence)?
        {
            return Err(AuthError::DuplicateIdentity);
        }

        let password_hash = hash_password(&reg.password)?;

        let record = NewUserRecord {
            username,
            email,
            password_hash,
            first_name,
            last_name,
            phone,
        };
        let id = self.store.insert_user(&record).map_err(|e| match e {
            DbError::UniqueViolation => AuthError::DuplicateIdentity,
            other => AuthError::Persistence(other),
        })?;

        info!("User registered: {} (id {})", record.username, id);

        Ok(User {
            id,
            username: record.username,
            email: record.email,
            first_name: record.first_name,
            last_name: record.last_name,
            phone: record.phone,
        })
    }

    /// Looks up an active user by username or email and checks the password.
    /// Unknown identity and wrong password are indistinguishable.
    pub fn verify_credentials(&self, login: &str, password: &str) -> Result<SessionUser, AuthError> {
        let login = sanitize_input(login);
        let user = self
            .store
            .find_active_by_login(&login)
            .map_err(AuthError::Persistence)?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, &user.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(SessionUser {
            user_id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
        })
    }

    /// Verifies credentials and, only on success, writes identity claims into
    /// the session.
    pub fn login(
        &self,
        session: &mut SessionData,
        login: &str,
        password: &str,
    ) -> Result<SessionUser, AuthError> {
        let user = self.verify_credentials(login, password)?;
        session.user = Some(user.clone());
        session.logged_in = true;
        Ok(user)
    }
}

pub fn current_user(session: &SessionData) -> Option<SessionUser> {
    session.current_user().cloned()
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// Only same-site absolute paths are honoured as post-login destinations.
fn safe_redirect(target: Option<&str>) -> String {
    match target.map(str::trim) {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

// -- Handlers --

pub async fn csrf_token(Extension(session): Extension<CurrentSession>) -> Json<CsrfTokenResponse> {
    let csrf_token = session.update(issue_token);
    Json(CsrfTokenResponse { csrf_token })
}

pub async fn register(
    State(state): State<AppState>,
    Extension(session): Extension<CurrentSession>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Form(form): Form<RegisterForm>,
) -> Result<impl IntoResponse, AppError> {
    session.read(|data| require_valid_token(data, &form.csrf_token))?;

    // A mistyped confirmation does not spend a registration attempt.
    if form.password != form.confirm_password {
        return Err(AppError::Validation("Passwords do not match".into()));
    }

    let decision = session.update(|data| {
        state.limiter.check_and_consume(
            data,
            RateLimitAction::Register,
            &ip,
            state.config.rate_limits.register,
        )
    });
    if !decision.is_allowed() {
        return Err(AppError::RateLimited);
    }

    let registration = Registration {
        username: form.username,
        email: form.email,
        password: form.password,
        first_name: form.first_name,
        last_name: form.last_name,
        phone: form.phone,
    };
    let auth = state.auth.clone();
    let user = run_blocking(move || Ok(auth.register(&registration)?)).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Registration successful".into(),
            user,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Extension(session): Extension<CurrentSession>,
    Extension(ClientIp(ip)): Extension<ClientIp>,
    Form(form): Form<LoginForm>,
) -> Result<Json<LoginResponse>, AppError> {
    session.read(|data| require_valid_token(data, &form.csrf_token))?;

    let decision = session.update(|data| {
        state.limiter.check_and_consume(
            data,
            RateLimitAction::Login,
            &ip,
            state.config.rate_limits.login,
        )
    });
    if !decision.is_allowed() {
        return Err(AppError::RateLimited);
    }

    let redirect = safe_redirect(form.redirect.as_deref());
    let auth = state.auth.clone();
    let mut data = session.snapshot();
    let (data, outcome) = run_blocking(move || {
        let outcome = auth.login(&mut data, &form.username, &form.password);
        Ok((data, outcome))
    })
    .await?;

    let user = match outcome {
        Ok(user) => user,
        Err(e) => {
            if matches!(e, AuthError::InvalidCredentials) {
                warn!(target: "security", ip = %ip, "Failed login attempt");
            }
            return Err(e.into());
        }
    };

    session.replace(data);
    session.rotate_id();
    info!("User logged in: {} (id {})", user.username, user.user_id);

    Ok(Json(LoginResponse {
        message: "Login successful".into(),
        user,
        redirect,
    }))
}

pub async fn logout(
    Extension(session): Extension<CurrentSession>,
    Form(form): Form<CsrfForm>,
) -> Result<Json<MessageResponse>, AppError> {
    session.read(|data| require_valid_token(data, &form.csrf_token))?;

    if let Some(user) = session.read(current_user) {
        info!("User logged out: {} (id {})", user.username, user.user_id);
    }
    session.destroy();

    Ok(Json(MessageResponse {
        message: "Logged out".into(),
    }))
}

/// Identity claims of the signed-in user. Mounted behind the access gate.
pub async fn me(Extension(user): Extension<SessionUser>) -> Json<SessionUser> {
    Json(user)
}

pub async fn password_strength(Form(req): Form<PasswordStrengthRequest>) -> Json<PasswordStrength> {
    Json(check_password_strength(&req.password))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use classifieds_db::Database;
    use classifieds_db::models::UserRow;

    use super::*;

    fn authenticator() -> (Authenticator, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (Authenticator::new(db.clone()), db)
    }

    fn bob() -> Registration {
        Registration {
            username: "bob".into(),
            email: "bob@x.com".into(),
            password: "Passw0rd!".into(),
            first_name: "Bob".into(),
            last_name: "Builder".into(),
            phone: String::new(),
        }
    }

    #[test]
    fn register_succeeds_once_then_reports_duplicates() {
        let (auth, db) = authenticator();
        let user = auth.register(&bob()).unwrap();
        assert_eq!(user.username, "bob");

        let same_name = Registration {
            email: "other@x.com".into(),
            ..bob()
        };
        let same_email = Registration {
            username: "bobby".into(),
            email: "BOB@x.com".into(),
            ..bob()
        };
        assert!(matches!(auth.register(&same_name), Err(AuthError::DuplicateIdentity)));
        assert!(matches!(auth.register(&same_email), Err(AuthError::DuplicateIdentity)));
        assert_eq!(db.count_users().unwrap(), 1);
    }

    #[test]
    fn password_is_stored_hashed() {
        let (auth, db) = authenticator();
        let user = auth.register(&bob()).unwrap();
        let row = db.get_user_by_id(user.id).unwrap().unwrap();
        assert_ne!(row.password_hash, "Passw0rd!");
        assert!(row.password_hash.starts_with("$argon2"));
    }

    #[test]
    fn register_validates_input() {
        let (auth, _db) = authenticator();
        let cases = [
            Registration { username: "bo".into(), ..bob() },
            Registration { username: "dave@x.com".into(), ..bob() },
            Registration { email: "bob-at-x".into(), ..bob() },
            Registration { password: "12345".into(), ..bob() },
            Registration { first_name: "B".repeat(51), ..bob() },
            Registration { phone: "123".into(), ..bob() },
        ];
        for case in cases {
            assert!(matches!(auth.register(&case), Err(AuthError::Validation(_))));
        }
    }

    #[test]
    fn username_cannot_shadow_someone_elses_email() {
        let (auth, _db) = authenticator();
        let squatter = Registration {
            username: "bob@x.com".into(),
            email: "mallory@x.com".into(),
            ..bob()
        };
        assert!(matches!(auth.register(&squatter), Err(AuthError::Validation(_))));

        auth.register(&bob()).unwrap();
        let user = auth.verify_credentials("bob@x.com", "Passw0rd!").unwrap();
        assert_eq!(user.username, "bob");
    }

    #[test]
    fn login_by_email_populates_claims() {
        let (auth, _db) = authenticator();
        auth.register(&bob()).unwrap();

        let mut session = SessionData::default();
        let user = auth.login(&mut session, "bob@x.com", "Passw0rd!").unwrap();
        assert_eq!(user.username, "bob");
        assert!(session.logged_in);
        assert_eq!(session.current_user().map(|u| u.username.as_str()), Some("bob"));
    }

    #[test]
    fn failed_login_is_enumeration_resistant_and_leaves_no_claims() {
        let (auth, _db) = authenticator();
        auth.register(&bob()).unwrap();

        let mut session = SessionData::default();
        let wrong_password = auth.login(&mut session, "bob", "wrongpass").unwrap_err();
        let unknown_user = auth.login(&mut session, "doesnotexist", "x").unwrap_err();

        assert!(matches!(wrong_password, AuthError::InvalidCredentials));
        assert!(matches!(unknown_user, AuthError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_user.to_string());
        assert!(session.user.is_none());
        assert!(!session.logged_in);
    }

    /// A store whose pre-check always misses, as if a concurrent registration
    /// committed between the check and the insert.
    struct RacingStore {
        inner: Database,
        checks: Mutex<u32>,
    }

    impl CredentialStore for RacingStore {
        fn identity_exists(&self, _username: &str, _email: &str) -> Result<bool, DbError> {
            *self.checks.lock().unwrap() += 1;
            Ok(false)
        }

        fn insert_user(&self, user: &NewUserRecord) -> Result<i64, DbError> {
            self.inner.insert_user(user)
        }

        fn find_active_by_login(&self, login: &str) -> Result<Option<UserRow>, DbError> {
            self.inner.find_active_by_login(login)
        }
    }

    #[test]
    fn unique_constraint_catches_what_the_precheck_missed() {
        let store = Arc::new(RacingStore {
            inner: Database::open_in_memory().unwrap(),
            checks: Mutex::new(0),
        });
        let auth = Authenticator::new(store.clone());

        auth.register(&bob()).unwrap();
        let second = auth.register(&Registration {
            username: "robert".into(),
            ..bob()
        });

        assert!(matches!(second, Err(AuthError::DuplicateIdentity)));
        assert_eq!(*store.checks.lock().unwrap(), 2);
        assert_eq!(store.inner.count_users().unwrap(), 1);
    }

    #[test]
    fn concurrent_registrations_with_same_email_yield_one_user() {
        let (auth, db) = authenticator();

        let handles: Vec<_> = ["alice1", "alice2"]
            .into_iter()
            .map(|username| {
                let auth = auth.clone();
                std::thread::spawn(move || {
                    auth.register(&Registration {
                        username: username.into(),
                        email: "alice@x.com".into(),
                        ..bob()
                    })
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let dup = results
            .iter()
            .filter(|r| matches!(r, Err(AuthError::DuplicateIdentity)))
            .count();

        assert_eq!((ok, dup), (1, 1));
        assert_eq!(db.count_users().unwrap(), 1);
    }

    #[test]
    fn redirect_targets_are_kept_on_site() {
        assert_eq!(safe_redirect(Some("/me/listings")), "/me/listings");
        assert_eq!(safe_redirect(Some("//evil.example")), "/");
        assert_eq!(safe_redirect(Some("https://evil.example")), "/");
        assert_eq!(safe_redirect(None), "/");
    }
}
