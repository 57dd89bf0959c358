//! Hub token lifecycle: classification, on-demand and proactive refresh.

mod manager;
mod scheduler;
pub mod token;

pub use manager::{RefreshOutcome, TokenManager, TokenStatusReport};
pub use scheduler::spawn_refresh_scheduler;
pub use token::{TokenState, TokenStatus, classify, decode_expiry};
