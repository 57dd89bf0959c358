//! Streamer supervision.
//!
//! One external streaming process per configured sink, with output-driven
//! health tracking and two-tier respawn backoff.

pub mod backoff;
pub mod classifier;
mod entry;
pub mod process;
mod registry;
mod supervisor;

pub use backoff::RetryPolicy;
pub use classifier::{KeywordClassifier, LineClassifier, LineSignal};
pub use entry::{EndpointStatus, StreamStatus, Supervision};
pub use process::StreamerCommand;
pub use registry::EndpointRegistry;
pub use supervisor::StreamSupervisor;
