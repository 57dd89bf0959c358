//! `seislink` Core Library
//!
//! Shared functionality for the seislink device agent:
//! - Configuration resolution and hierarchy
//! - JSON local file store (token record, desired endpoints, device info)
//! - Host device identity with a read-through cache
//! - Common error types

pub mod config;
pub mod error;
pub mod identity;
pub mod store;
pub mod tracing_init;

pub use config::AgentConfig;
pub use error::{Error, Result};
pub use identity::{DeviceIdentity, HostConfig, HostSettings, IdentityCache, IdentitySource};
pub use store::{DeviceInfo, FileStore, LinkCredentials, ServerEntry, TokenRecord};
