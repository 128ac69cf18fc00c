//! Chat sessions over a single backend client
//!
//! Module structure:
//! - types.rs: SessionConfig, SessionState
//! - session.rs: Session, message log and the tool-calling turn loop

pub mod types;
pub mod session;

pub use types::{SessionConfig, SessionState, DEFAULT_MAX_TOOL_ROUNDS};
pub use session::Session;
