//! Authentication surface: login handlers plus the request middleware
//! that resolves the two principals.

pub mod handlers;
pub mod middleware;

pub use middleware::{admin_only, staff_auth, student_auth};

/// Session header checked before the cookie fallback.
pub const SESSION_HEADER: &str = "x-session-id";
pub const SESSION_COOKIE: &str = "paperflow_session";
