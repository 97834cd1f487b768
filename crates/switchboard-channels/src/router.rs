//! Outbound router: picks the channel that owns a destination and dispatches to it

use crate::channel::Channel;
use std::sync::Arc;
use switchboard_core::error::{ChannelError, Result};
use switchboard_core::sanitize;
use tracing::{debug, error, info, warn};

/// Registration-ordered collection of channel adapters.
///
/// Channels are added once at startup. When two adapters claim the same
/// prefix the first registered one wins.
#[derive(Default)]
pub struct ChannelRouter {
    channels: Vec<Arc<dyn Channel>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel adapter with the router
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        info!("Registering channel: {}", channel.name());
        self.channels.push(channel);
    }

    /// Connect every registered channel in registration order.
    /// Stops at the first connection error and returns it.
    pub async fn connect_all(&self) -> Result<()> {
        info!("Connecting all {} registered channels", self.channels.len());

        for channel in &self.channels {
            debug!("Connecting channel: {}", channel.name());
            if let Err(e) = channel.connect().await {
                error!("Failed to connect channel {}: {}", channel.name(), e);
                return Err(e);
            }
            info!("Successfully connected channel: {}", channel.name());
        }

        Ok(())
    }

    pub async fn disconnect_all(&self) {
        for channel in &self.channels {
            channel.disconnect().await;
        }
        info!("All channels disconnected");
    }

    /// First channel that owns `jid`, connected or not
    pub fn find_channel(&self, jid: &str) -> Option<Arc<dyn Channel>> {
        self.channels.iter().find(|c| c.owns_jid(jid)).cloned()
    }

    fn connected_owner(&self, jid: &str) -> Option<&Arc<dyn Channel>> {
        self.channels
            .iter()
            .find(|c| c.owns_jid(jid) && c.is_connected())
    }

    /// Send already-sanitized text to the first connected owner of `jid`.
    /// Fails with `ChannelError::NoChannel` when there is none. Never retries.
    pub async fn route_outbound(&self, jid: &str, text: &str) -> Result<()> {
        let channel = self
            .connected_owner(jid)
            .ok_or_else(|| ChannelError::NoChannel(jid.to_string()))?;

        debug!("Routing outgoing message for {} to {}", jid, channel.name());
        channel.send_message(jid, text).await
    }

    /// Sanitize raw agent output and route it.
    /// Returns `Ok(false)` when nothing was left to send.
    pub async fn deliver(&self, jid: &str, raw: &str) -> Result<bool> {
        let Some(text) = sanitize::format_outbound(raw) else {
            return Ok(false);
        };
        self.route_outbound(jid, &text).await?;
        Ok(true)
    }

    /// Forward a typing indicator to the owning connected channel, if any
    pub async fn set_typing(&self, jid: &str, is_typing: bool) {
        if let Some(channel) = self.connected_owner(jid)
            && let Err(e) = channel.set_typing(jid, is_typing).await
        {
            warn!("Failed to set typing on {}: {}", jid, e);
        }
    }

    /// Get the number of registered channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Mock channel for testing
    struct MockChannel {
        name: String,
        prefix: String,
        connected: AtomicBool,
        fail_connect: bool,
        sent: Mutex<Vec<(String, String)>>,
        typing: AtomicBool,
    }

    impl MockChannel {
        fn new(name: &str, prefix: &str, connected: bool) -> Self {
            Self {
                name: name.to_string(),
                prefix: prefix.to_string(),
                connected: AtomicBool::new(connected),
                fail_connect: false,
                sent: Mutex::new(Vec::new()),
                typing: AtomicBool::new(false),
            }
        }

        fn failing(name: &str, prefix: &str) -> Self {
            Self {
                fail_connect: true,
                ..Self::new(name, prefix, false)
            }
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn connect(&self) -> Result<()> {
            if self.fail_connect {
                return Err(ChannelError::Connection("bad token".to_string()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send_message(&self, jid: &str, text: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((jid.to_string(), text.to_string()));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn owns_jid(&self, jid: &str) -> bool {
            jid.starts_with(&self.prefix)
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        async fn set_typing(&self, _jid: &str, is_typing: bool) -> Result<()> {
            self.typing.store(is_typing, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_router_creation() {
        let router = ChannelRouter::new();
        assert_eq!(router.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_routes_to_connected_owner() {
        let a = Arc::new(MockChannel::new("a", "x:", false));
        let b = Arc::new(MockChannel::new("b", "x:", true));
        let mut router = ChannelRouter::new();
        router.register(a.clone());
        router.register(b.clone());

        router.route_outbound("x:1", "hi").await.unwrap();
        assert!(a.sent().is_empty());
        assert_eq!(b.sent(), vec![("x:1".to_string(), "hi".to_string())]);
    }

    #[tokio::test]
    async fn test_first_registered_wins() {
        let a = Arc::new(MockChannel::new("a", "x:", true));
        let b = Arc::new(MockChannel::new("b", "x:", true));
        let mut router = ChannelRouter::new();
        router.register(a.clone());
        router.register(b.clone());

        for _ in 0..3 {
            router.route_outbound("x:1", "hi").await.unwrap();
        }
        assert_eq!(a.sent().len(), 3);
        assert!(b.sent().is_empty());
    }

    #[tokio::test]
    async fn test_no_owner_fails() {
        let mut router = ChannelRouter::new();
        router.register(Arc::new(MockChannel::new("a", "x:", true)));

        let err = router.route_outbound("y:1", "hi").await.unwrap_err();
        assert!(matches!(err, ChannelError::NoChannel(_)));
        assert_eq!(err.to_string(), "no channel for destination: y:1");
    }

    #[tokio::test]
    async fn test_only_disconnected_owners_fails() {
        let mut router = ChannelRouter::new();
        router.register(Arc::new(MockChannel::new("a", "x:", false)));
        router.register(Arc::new(MockChannel::new("b", "x:", false)));

        let err = router.route_outbound("x:1", "hi").await.unwrap_err();
        assert!(matches!(err, ChannelError::NoChannel(ref jid) if jid == "x:1"));
    }

    #[tokio::test]
    async fn test_disconnect_stops_routing() {
        let a = Arc::new(MockChannel::new("a", "x:", true));
        let mut router = ChannelRouter::new();
        router.register(a.clone());

        router.route_outbound("x:1", "one").await.unwrap();
        a.disconnect().await;
        a.disconnect().await;
        assert!(router.route_outbound("x:1", "two").await.is_err());
        assert_eq!(a.sent().len(), 1);
    }

    #[test]
    fn test_find_channel_ignores_connectivity() {
        let a = Arc::new(MockChannel::new("a", "x:", false));
        let mut router = ChannelRouter::new();
        router.register(Arc::new(MockChannel::new("other", "z:", true)));
        router.register(a.clone());

        let found = router.find_channel("x:1").unwrap();
        assert_eq!(found.name(), "a");
        assert!(found.owns_jid("x:1"));
        assert!(router.find_channel("y:1").is_none());
    }

    #[tokio::test]
    async fn test_sends_keep_order() {
        let a = Arc::new(MockChannel::new("a", "x:", true));
        let mut router = ChannelRouter::new();
        router.register(a.clone());

        for text in ["1", "2", "3"] {
            router.route_outbound("x:1", text).await.unwrap();
        }
        let texts: Vec<String> = a.sent().into_iter().map(|(_, t)| t).collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_deliver_sanitizes() {
        let a = Arc::new(MockChannel::new("a", "x:", true));
        let mut router = ChannelRouter::new();
        router.register(a.clone());

        let sent = router
            .deliver("x:1", "hello <internal>secret</invoke> world")
            .await
            .unwrap();
        assert!(sent);
        assert_eq!(a.sent()[0].1, "hello  world");
    }

    #[tokio::test]
    async fn test_deliver_empty_is_not_sent() {
        let a = Arc::new(MockChannel::new("a", "x:", true));
        let mut router = ChannelRouter::new();
        router.register(a.clone());

        let sent = router
            .deliver("x:1", "<internal>just thinking</internal>")
            .await
            .unwrap();
        assert!(!sent);
        assert!(a.sent().is_empty());

        // nothing to send wins over a missing route
        assert!(!router.deliver("y:1", "  ").await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_all() {
        let a = Arc::new(MockChannel::new("a", "x:", false));
        let b = Arc::new(MockChannel::new("b", "y:", false));
        let mut router = ChannelRouter::new();
        router.register(a.clone());
        router.register(b.clone());

        router.connect_all().await.unwrap();
        assert!(a.is_connected());
        assert!(b.is_connected());

        router.disconnect_all().await;
        assert!(!a.is_connected());
        assert!(!b.is_connected());
    }

    #[tokio::test]
    async fn test_connect_all_propagates_failure() {
        let bad = Arc::new(MockChannel::failing("bad", "x:"));
        let later = Arc::new(MockChannel::new("later", "y:", false));
        let mut router = ChannelRouter::new();
        router.register(bad.clone());
        router.register(later.clone());

        let err = router.connect_all().await.unwrap_err();
        assert!(matches!(err, ChannelError::Connection(_)));
        assert!(!bad.is_connected());
        assert!(!later.is_connected());
    }

    #[tokio::test]
    async fn test_set_typing_forwards_to_owner() {
        let a = Arc::new(MockChannel::new("a", "x:", true));
        let mut router = ChannelRouter::new();
        router.register(a.clone());

        router.set_typing("x:1", true).await;
        assert!(a.typing.load(Ordering::SeqCst));
        router.set_typing("y:1", false).await;
        assert!(a.typing.load(Ordering::SeqCst));
    }
}
