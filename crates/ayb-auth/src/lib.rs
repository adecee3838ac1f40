pub mod api_key;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod principal;

pub use error::AuthError;
pub use jwt::TokenIssuer;
pub use middleware::AuthState;
pub use principal::{Principal, Role, Scope};
