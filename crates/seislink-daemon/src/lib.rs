//! seislink Daemon Library
//!
//! Core functionality for the seislink device agent:
//! - Hub token lifecycle (classification, on-demand and proactive refresh)
//! - Hub REST client (link, unlink, refresh, ringserver hosts)
//! - Streamer supervision with two-tier respawn backoff
//! - Desired endpoint list reconciliation
//! - The [`DeviceAgent`] facade used by the binary and control surfaces

pub mod auth;
pub mod error;
pub mod hub;
pub mod reconcile;
pub mod service;
pub mod stream;

pub use error::{Error, ErrorKind, Result};
pub use service::{DeviceAgent, DeviceReport, RemoteUnlink, UnlinkReport};
