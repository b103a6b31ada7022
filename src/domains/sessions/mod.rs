//! Sessions domain module.
//!
//! Per-session capability state for the gateway. A session is keyed by a
//! stable identifier derived from the caller identity (not the transport
//! connection, which may be stateless HTTP) and holds the dynamically
//! loaded capability set, the scope override and the sliding liveness
//! window.

mod error;
pub mod manager;
pub mod session;

pub use error::SessionError;
pub use manager::SessionManager;
pub use session::{Session, SessionInfo};
