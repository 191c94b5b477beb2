//! Shared service plumbing
//!
//! - logging setup and HTTP access logging
//! - shutdown signal handling

pub mod logging;
pub mod shutdown;

pub use logging::init_logging;
pub use shutdown::{shutdown_token, wait_for_shutdown};
