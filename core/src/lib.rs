//! Edge Gateway Core Library
//! Reverse proxy and WebSocket relay to the Gemini API, plus OpenID Connect
//! age verification

pub mod auth;
pub mod config;
pub mod error;
pub mod proxy;

#[cfg(test)]
pub(crate) mod test_support;
