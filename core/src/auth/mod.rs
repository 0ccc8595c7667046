//! Age verification through an OpenID Connect identity provider
//!
//! `/auth/start` sends the browser to the provider with a PKCE challenge,
//! `/auth/callback` exchanges the code, reads the `birthdate` claim and
//! redirects back into the shop with a verdict.

pub mod age;
pub mod handlers;
pub mod oidc;
pub mod pkce;
pub mod session;

pub use age::VerificationVerdict;

pub const AUTH_PREFIX: &str = "/auth";

/// Where verdicts are delivered and which age passes.
#[derive(Debug, Clone)]
pub struct VerificationTarget {
    /// Relative path or absolute URL, depending on deployment mode.
    pub redirect_base: String,
    pub minimum_age: i32,
}
