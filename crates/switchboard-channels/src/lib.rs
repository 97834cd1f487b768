//! Channel contract, router and adapters for switchboard
//!
//! This crate provides the outbound routing layer and the platform adapters
//! that feed normalized messages into the bridge.

pub mod channel;
pub mod router;
pub mod slack;

// Re-export main types
pub use channel::Channel;
pub use router::ChannelRouter;
pub use slack::{SlackChannel, SlackOptions};
