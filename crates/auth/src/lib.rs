//! `classbook-auth`: token and authorization boundary.
//!
//! This crate is decoupled from HTTP and storage: it defines who a caller is
//! (claims, roles), how tokens are signed and verified (HS256), and the
//! permission check applied before any command is dispatched.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod secret;

pub use authorize::{authorize, AuthzError, CommandAuthorization, Principal};
pub use claims::{
    validate_claims, JwtClaims, TokenValidationError, ADMIN_TOKEN_TTL_HOURS,
    STUDENT_TOKEN_TTL_DAYS,
};
pub use jwt::{Hs256JwtIssuer, Hs256JwtValidator, JwtIssuer, JwtValidator, TokenError};
pub use permissions::Permission;
pub use principal::PrincipalId;
pub use roles::Role;
pub use secret::secrets_match;
