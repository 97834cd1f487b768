//! The capability contract every platform adapter implements

use async_trait::async_trait;
use switchboard_core::error::Result;

/// Trait that all channel adapters implement
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable adapter name, e.g. "slack"
    fn name(&self) -> &str;

    /// Establish the platform connection.
    /// On failure the adapter stays disconnected and returns `ChannelError::Connection`.
    async fn connect(&self) -> Result<()>;

    /// Deliver `text` to the conversation `jid`.
    /// Delivery failures are logged by the adapter and never fatal to the bridge.
    async fn send_message(&self, jid: &str, text: &str) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Pure string check on the JID prefix, never touches the network
    fn owns_jid(&self, jid: &str) -> bool;

    /// Release the connection. Safe to call when already disconnected.
    async fn disconnect(&self);

    /// Show or clear a typing indicator, if the platform has one
    async fn set_typing(&self, _jid: &str, _is_typing: bool) -> Result<()> {
        Ok(())
    }
}
