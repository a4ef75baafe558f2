pub mod session;

pub use session::{require_session, CurrentSession, CSRF_HEADER, SESSION_COOKIE, SESSION_HEADER};
