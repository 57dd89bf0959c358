//! Hub API integration.
//!
//! Provides a reqwest-based client for the hub endpoints used by the daemon:
//! device link/unlink, token refresh and ringserver host discovery.

mod client;
pub mod types;


pub use client::{ALREADY_LINKED_MESSAGE, HubClient};
pub use types::{LinkRequest, RingserverHost, TokenGrant, UnlinkRequest};
