//! Middleware modules for the RECSYS service
//!
//! - `identity`: caller resolution through the identity collaborator
//!
//! The identity layer sits inside the trace and timeout layers so its collaborator call
//! is covered by the request timeout.

pub mod identity;

pub use identity::{
    identity_middleware, AdminIdentity, AuthClient, AuthError, HttpAuthClient, Identity,
};
