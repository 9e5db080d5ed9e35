pub mod session;

pub use session::{session_token, AdminSession, CurrentSession};
