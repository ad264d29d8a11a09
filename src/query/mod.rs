//! Query Façade & REST Surface
//!
//! [`service::QueryService`] is the uniform read API: it resolves where the data
//! for a request lives and either serves it from the local engine or names the
//! owning node. The HTTP layer on top relays redirected reads to that owner.
//!
//! ## Components
//! - **`lifecycle`**: the per-request phase machine, traced at debug level.
//! - **`service`**: routing plus local serving.
//! - **`protocol`**: routes, headers and JSON bodies.
//! - **`forward`**: HTTP relay with retry and backoff.
//! - **`handlers`**: axum handlers and the error-to-status mapping.

pub mod forward;
pub mod handlers;
pub mod lifecycle;
pub mod protocol;
pub mod service;

#[cfg(test)]
mod tests;
