//! Authentication module

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtService};
pub use middleware::{extract_token, optional_auth_middleware, AuthContext};
