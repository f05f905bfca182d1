//! Shared service plumbing for the hmbridge workspace
//!
//! Provides the functions every service binary needs before it does real work:
//! - logging initialization with the bracketed-level console format
//! - graceful shutdown signal handling
//! - the common library error type

pub mod error;
pub mod logging;
pub mod shutdown;

pub use error::{Error, Result};
pub use logging::{init_logging, parse_level, LogConfig};
pub use shutdown::{wait_for_shutdown, ShutdownSignal};
