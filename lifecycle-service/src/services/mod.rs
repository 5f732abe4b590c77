//! Services module for lifecycle-service.

pub mod metrics;
pub mod notify;
pub mod processor;
pub mod store;

pub use metrics::{get_metrics, init_metrics};
