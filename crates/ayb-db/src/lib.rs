pub mod error;
pub mod migrate;
pub mod session;

pub use error::{MigrateError, SessionError};
pub use session::{SessionContext, SessionGuard};
