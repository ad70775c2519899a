//! Executor registry daemon.
//!
//! Multiplexes many remote clients over a small number of expensive backend
//! executors: clients acquire an executor for a population shape, issue
//! graph-construction and materialization operations against it by opaque
//! value reference, then release values and the executor itself.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod resolver;
pub mod server;
pub mod service;

pub use resolver::{ExecutorEntry, ExecutorResolver};
pub use server::{handle_line, serve, serve_stream, ServerConfig};
pub use service::ExecutorService;

/// Default service instance id: pid plus startup time. Distinct across
/// restarts, so identifiers minted by different incarnations never collide.
pub fn default_service_id() -> String {
    let now_unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    format!("{}-{}", std::process::id(), now_unix_ms)
}
