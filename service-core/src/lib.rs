//! service-core: Shared infrastructure for the invoice lifecycle services.
pub mod error;
pub mod middleware;
pub mod observability;
