use classifieds_db::models::{NewUserRow, UserRow};
use classifieds_db::{Database, DbError};

/// A user ready to be persisted. Holds the password hash, never the password.
#[derive(Debug, Clone)]
pub struct NewUserRecord {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

/// Where identities and their password hashes live.
///
/// `insert_user` must reject a taken username or email with
/// [`DbError::UniqueViolation`] even when `identity_exists` said otherwise.
pub trait CredentialStore: Send + Sync {
    fn identity_exists(&self, username: &str, email: &str) -> Result<bool, DbError>;
    fn insert_user(&self, user: &NewUserRecord) -> Result<i64, DbError>;
    fn find_active_by_login(&self, login: &str) -> Result<Option<UserRow>, DbError>;
}

impl CredentialStore for Database {
    fn identity_exists(&self, username: &str, email: &str) -> Result<bool, DbError> {
        Database::identity_exists(self, username, email)
    }

    fn insert_user(&self, user: &NewUserRecord) -> Result<i64, DbError> {
        self.create_user(&NewUserRow {
            username: &user.username,
            email: &user.email,
            password_hash: &user.password_hash,
            first_name: &user.first_name,
            last_name: &user.last_name,
            phone: &user.phone,
        })
    }

    fn find_active_by_login(&self, login: &str) -> Result<Option<UserRow>, DbError> {
        self.get_active_user_by_login(login)
    }
}
