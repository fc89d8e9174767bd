//! HTTP API layer for escrutinio.
//!
//! Thin axum handlers over the core services:
//!
//! - **Endpoints**: ballot tallies under `/ballots`, the voter roll under `/voters`
//! - **Extractors**: the acting operator forwarded by the upstream auth layer
//! - **Middleware**: shared application state
//!
//! Built on Axum 0.8.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;

pub use endpoints::router;
