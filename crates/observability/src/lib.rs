//! `wareflow-observability` — process-wide logging setup.

pub mod tracing;

pub use crate::tracing::{init, init_with_default_filter};
