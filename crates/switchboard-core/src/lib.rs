//! switchboard-core - message model and text handling for the chat bridge
//!
//! This crate provides:
//! - The canonical inbound message, chat metadata and registered group types
//! - JID helpers for `<platform>:<id>` destination identifiers
//! - The outbound sanitizer that strips internal-only markup
//! - The transcript formatter used to feed history back to an agent

pub mod error;
pub mod jid;
pub mod sanitize;
pub mod transcript;
pub mod types;

// Re-export main types for convenience
pub use error::ChannelError;
pub use sanitize::{format_outbound, strip_internal};
pub use transcript::{escape_xml, format_messages};
pub use types::{
    ChatMetadata, InboundEvent, InboundMessage, RegisteredGroup, RegisteredGroupsFn,
};
