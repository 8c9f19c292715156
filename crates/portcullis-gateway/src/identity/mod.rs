//! Typed facade over the identity and authorization services.
//!
//! Each operation is the composition `cache -> coalesce -> breaker ->
//! HTTP`. The cache sits outermost so a valid cached verdict survives a
//! collaborator outage; the coalescer guarantees one outbound call per
//! credential no matter how many requests race on a cold cache; the
//! breaker fails fast once the collaborator is sick.

mod client;
mod revocation;
mod types;

pub use client::{CallError, IdentityClient, IdentityClientBuilder, IdentityError};
pub use revocation::RevocationList;
pub use types::{token_fingerprint, AccessDecision, AccessKey, VerifiedApiKey, VerifiedToken};
