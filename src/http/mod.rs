//! The resilient per-source HTTP client (spec §4.3): auth resolution,
//! retry/backoff, and coordination with the [`crate::resilience`] layer.

pub mod auth;
pub mod backoff;
pub mod client;

pub use auth::{AuthError, AuthProvider};
pub use client::{HttpClient, HttpClientError, HttpRequest, HttpResponse};
