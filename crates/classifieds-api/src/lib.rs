pub mod auth;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod csrf;
pub mod error;
pub mod listings;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod search;
pub mod security;
pub mod session;
pub mod state;
pub mod uploads;

pub use config::AppConfig;
pub use error::AppError;
pub use routes::router;
pub use state::{AppState, AppStateInner};
