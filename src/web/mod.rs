pub mod auth;
pub mod responses;
pub mod router;
pub mod state;

pub use auth::{AuthUser, SESSION_COOKIE, SESSION_TTL_DAYS};
pub use responses::{ApiMessage, json_error, server_error};
pub use state::AppState;
