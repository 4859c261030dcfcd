pub mod auth;
pub mod error;
pub mod scorer;

pub use auth::{AuthUser, JwtClaims, JwtHeader, Role};
pub use error::AppError;
pub use scorer::{ModelScore, SymptomModel};
