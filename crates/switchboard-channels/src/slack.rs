//! Slack channel adapter using Web API polling

use crate::channel::Channel;
use anyhow::{Result as AnyResult, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use switchboard_core::error::{ChannelError, Result};
use switchboard_core::jid;
use switchboard_core::types::{
    ChatMetadata, InboundEvent, InboundMessage, RegisteredGroupsFn,
};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const JID_PREFIX: &str = "slack";

/// Slack rejects longer `chat.postMessage` texts
const MAX_MESSAGE_LENGTH: usize = 4000;

/// Upper bound for the one-time conversation sync during connect
const METADATA_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_BASE_URL: &str = "https://slack.com/api";

/// Outbound chunks kept while Slack is unreachable; the oldest are dropped first
const MAX_QUEUED_MESSAGES: usize = 500;

/// Settings for a [`SlackChannel`]
#[derive(Clone)]
pub struct SlackOptions {
    /// Slack bot token (starts with xoxb-)
    pub bot_token: String,
    pub base_url: String,
    pub poll_interval: Duration,
    pub assistant_name: String,
    /// Prefix every reply with `<assistant_name>: ` so the bot is recognizable in shared channels
    pub prefix_bot_name: bool,
}

impl SlackOptions {
    pub fn new(bot_token: impl Into<String>, assistant_name: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(3),
            assistant_name: assistant_name.into(),
            prefix_bot_name: true,
        }
    }
}

/// Slack channel adapter using Web API polling
pub struct SlackChannel {
    inner: Arc<SlackInner>,
    cancel: std::sync::Mutex<Option<CancellationToken>>,
}

struct SlackInner {
    opts: SlackOptions,
    client: reqwest::Client,
    connected: AtomicBool,
    bot_user_id: RwLock<Option<String>>,
    /// Slack user id -> display name
    user_names: DashMap<String, String>,
    /// (channel_id, text) not yet delivered, in send order
    outgoing_queue: Mutex<VecDeque<(String, String)>>,
    flushing: AtomicBool,
    inbound: mpsc::Sender<InboundEvent>,
    registered_groups: RegisteredGroupsFn,
}

impl SlackChannel {
    /// Create a new Slack channel adapter
    ///
    /// # Arguments
    /// * `opts` - token, endpoint and reply formatting
    /// * `inbound` - where normalized messages and chat metadata go
    /// * `registered_groups` - lookup of the chats that get full delivery
    pub fn new(
        opts: SlackOptions,
        inbound: mpsc::Sender<InboundEvent>,
        registered_groups: RegisteredGroupsFn,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            inner: Arc::new(SlackInner {
                opts,
                client,
                connected: AtomicBool::new(false),
                bot_user_id: RwLock::new(None),
                user_names: DashMap::new(),
                outgoing_queue: Mutex::new(VecDeque::new()),
                flushing: AtomicBool::new(false),
                inbound,
                registered_groups,
            }),
            cancel: std::sync::Mutex::new(None),
        }
    }

    /// Bot user id learned from `auth.test`, once connected
    pub async fn bot_user_id(&self) -> Option<String> {
        self.inner.bot_user_id.read().await.clone()
    }

    /// Number of outbound chunks not yet delivered
    pub async fn queued_len(&self) -> usize {
        self.inner.outgoing_queue.lock().await.len()
    }

    fn replace_cancel_token(&self, token: Option<CancellationToken>) {
        let old = match self.cancel.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, token),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), token),
        };
        if let Some(old) = old {
            old.cancel();
        }
    }
}

impl SlackInner {
    /// Call a Slack Web API method
    async fn api_call(&self, method: &str, params: &[(&str, &str)]) -> AnyResult<Value> {
        let url = format!("{}/{}", self.opts.base_url, method);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.opts.bot_token)
            .query(params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Slack API HTTP error: {}", response.status()));
        }

        let body: Value = response.json().await?;
        check_ok(&body, method)?;
        Ok(body)
    }

    /// Post a message to a Slack channel, returning the message timestamp (ts)
    async fn post_message(&self, channel: &str, text: &str) -> AnyResult<String> {
        let url = format!("{}/chat.postMessage", self.opts.base_url);
        let body = serde_json::json!({
            "channel": channel,
            "text": text,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.opts.bot_token)
            .json(&body)
            .send()
            .await?;

        let result: Value = response.json().await?;
        check_ok(&result, "chat.postMessage")?;

        Ok(result
            .get("ts")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string())
    }

    async fn emit(&self, event: InboundEvent) {
        if let Err(e) = self.inbound.send(event).await {
            error!("Failed to forward Slack event: {}", e);
        }
    }

    /// Report every conversation the bot can see, registered or not
    async fn sync_channel_metadata(&self) -> AnyResult<usize> {
        let mut cursor = String::new();
        let mut count = 0;
        let now = now_iso();

        loop {
            let mut params = vec![
                ("types", "public_channel,private_channel,im,mpim"),
                ("limit", "200"),
                ("exclude_archived", "true"),
            ];
            if !cursor.is_empty() {
                params.push(("cursor", cursor.as_str()));
            }

            let body = self.api_call("conversations.list", &params).await?;
            if let Some(channels) = body.get("channels").and_then(|v| v.as_array()) {
                for ch in channels {
                    let Some(id) = ch.get("id").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    let is_im = ch.get("is_im").and_then(|v| v.as_bool()).unwrap_or(false);
                    let name = ch
                        .get("name")
                        .and_then(|v| v.as_str())
                        .filter(|n| !n.is_empty())
                        .map(str::to_string);

                    self.emit(InboundEvent::ChatMetadata(ChatMetadata {
                        chat_jid: jid::make(JID_PREFIX, id),
                        timestamp: now.clone(),
                        name,
                        channel: JID_PREFIX.to_string(),
                        is_group: !is_im,
                    }))
                    .await;
                    count += 1;
                }
            }

            cursor = body
                .get("response_metadata")
                .and_then(|m| m.get("next_cursor"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            if cursor.is_empty() {
                break;
            }
        }

        Ok(count)
    }

    async fn resolve_user_name(&self, user_id: &str) -> String {
        if let Some(name) = self.user_names.get(user_id) {
            return name.clone();
        }

        let name = match self.api_call("users.info", &[("user", user_id)]).await {
            Ok(body) => {
                let user = body.get("user");
                let profile_name = user
                    .and_then(|u| u.get("profile"))
                    .and_then(|p| p.get("display_name"))
                    .and_then(|v| v.as_str());
                let real_name = user
                    .and_then(|u| u.get("real_name"))
                    .and_then(|v| v.as_str());
                let handle = user.and_then(|u| u.get("name")).and_then(|v| v.as_str());
                [profile_name, real_name, handle]
                    .into_iter()
                    .flatten()
                    .find(|n| !n.is_empty())
                    .unwrap_or(user_id)
                    .to_string()
            }
            Err(e) => {
                debug!("Failed to resolve Slack user {}: {}", user_id, e);
                return user_id.to_string();
            }
        };

        self.user_names.insert(user_id.to_string(), name.clone());
        name
    }

    async fn sender_name(&self, event: &Value, bot_user_id: &str) -> String {
        let user = event.get("user").and_then(|v| v.as_str()).unwrap_or("");
        if !user.is_empty() && user == bot_user_id {
            return self.opts.assistant_name.clone();
        }
        if user.is_empty() {
            return event
                .get("username")
                .and_then(|v| v.as_str())
                .or_else(|| event.get("bot_id").and_then(|v| v.as_str()))
                .unwrap_or("unknown")
                .to_string();
        }
        self.resolve_user_name(user).await
    }

    /// Append chunks behind anything already pending, dropping the oldest
    /// entries once the queue is full.
    async fn enqueue(&self, channel_id: &str, chunks: impl IntoIterator<Item = String>) -> usize {
        let mut queue = self.outgoing_queue.lock().await;
        for chunk in chunks {
            queue.push_back((channel_id.to_string(), chunk));
        }
        if queue.len() > MAX_QUEUED_MESSAGES {
            let overflow = queue.len() - MAX_QUEUED_MESSAGES;
            if let Some((dropped_to, _)) = queue.drain(..overflow).last() {
                warn!(
                    "Slack outgoing queue full, dropped {} oldest messages (last for {})",
                    overflow, dropped_to
                );
            }
        }
        queue.len()
    }

    /// Send queued chunks in order. A failure puts the chunk back and stops.
    ///
    /// Returns how many chunks went out. When another flush is already running
    /// this one does nothing and reports zero.
    async fn flush_outgoing_queue(&self) -> AnyResult<usize> {
        if self.flushing.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }

        let mut sent = 0;
        let mut result = Ok(());
        loop {
            let next = self.outgoing_queue.lock().await.pop_front();
            let Some((channel_id, text)) = next else {
                break;
            };
            if let Err(e) = self.post_message(&channel_id, &text).await {
                warn!("Failed to flush queued Slack message to {}: {}", channel_id, e);
                self.outgoing_queue
                    .lock()
                    .await
                    .push_front((channel_id, text));
                result = Err(e);
                break;
            }
            sent += 1;
        }

        if sent > 0 {
            info!("Flushed {} queued Slack messages", sent);
        }
        self.flushing.store(false, Ordering::SeqCst);
        result.map(|()| sent)
    }

    async fn poll_loop(self: Arc<Self>, bot_user_id: String, cancel: CancellationToken) {
        info!("Slack polling task started");

        // Track latest timestamp per chat, starting at "now" so old history is not replayed
        let start_ts = format!("{}.000000", Utc::now().timestamp());
        let mut latest_ts: HashMap<String, String> = HashMap::new();
        let mut interval = tokio::time::interval(self.opts.poll_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Slack polling task stopped");
                    break;
                }
                _ = interval.tick() => {}
            }

            let pending = self.outgoing_queue.lock().await.len();
            if pending > 0 {
                if let Err(e) = self.flush_outgoing_queue().await {
                    debug!("Slack outgoing queue still pending: {}", e);
                }
            }

            debug!("Polling Slack for new messages");
            let groups = (self.registered_groups)();

            for (chat_jid, group) in groups.iter() {
                if !jid::has_prefix(chat_jid, JID_PREFIX) {
                    continue;
                }
                let Some(channel_id) = jid::native_id(chat_jid) else {
                    continue;
                };

                let oldest = latest_ts
                    .entry(chat_jid.clone())
                    .or_insert_with(|| start_ts.clone())
                    .clone();

                let history = match self
                    .api_call(
                        "conversations.history",
                        &[("channel", channel_id), ("oldest", &oldest), ("limit", "50")],
                    )
                    .await
                {
                    Ok(h) => h,
                    Err(e) => {
                        debug!("Failed to poll channel {}: {}", chat_jid, e);
                        continue;
                    }
                };

                let Some(messages) = history.get("messages").and_then(|v| v.as_array()) else {
                    continue;
                };

                let mut max_ts = oldest.clone();

                // Slack returns newest first
                for event in messages.iter().rev() {
                    let ts = event.get("ts").and_then(|v| v.as_str()).unwrap_or("");
                    if ts <= oldest.as_str() {
                        continue;
                    }
                    if ts > max_ts.as_str() {
                        max_ts = ts.to_string();
                    }

                    let sender_name = self.sender_name(event, &bot_user_id).await;
                    let Some(message) = normalize_event(
                        chat_jid,
                        event,
                        &bot_user_id,
                        &sender_name,
                        Some(group.trigger.as_str()),
                    ) else {
                        continue;
                    };

                    debug!(
                        "Forwarding Slack message {} from {} ({} chars)",
                        message.id,
                        message.sender_name,
                        message.content.len()
                    );
                    self.emit(InboundEvent::Message {
                        chat_jid: chat_jid.clone(),
                        message,
                    })
                    .await;
                }

                if max_ts > oldest {
                    self.emit(InboundEvent::ChatMetadata(ChatMetadata {
                        chat_jid: chat_jid.clone(),
                        timestamp: ts_to_iso(&max_ts),
                        name: Some(group.name.clone()),
                        channel: JID_PREFIX.to_string(),
                        is_group: !channel_id.starts_with('D'),
                    }))
                    .await;
                    latest_ts.insert(chat_jid.clone(), max_ts);
                }
            }
        }
    }
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        JID_PREFIX
    }

    async fn connect(&self) -> Result<()> {
        info!("Connecting Slack channel adapter");

        if self.inner.opts.bot_token.is_empty() {
            return Err(ChannelError::Connection(
                "Slack bot token is empty".to_string(),
            ));
        }

        // Verify token and get bot user ID
        let auth = self
            .inner
            .api_call("auth.test", &[])
            .await
            .map_err(|e| ChannelError::Connection(e.to_string()))?;
        let bot_user_id = auth
            .get("user_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ChannelError::Connection("Could not get bot user_id from auth.test".to_string())
            })?
            .to_string();

        info!("Slack bot authenticated as user_id: {}", bot_user_id);
        *self.inner.bot_user_id.write().await = Some(bot_user_id.clone());
        self.inner.connected.store(true, Ordering::SeqCst);

        match tokio::time::timeout(METADATA_SYNC_TIMEOUT, self.inner.sync_channel_metadata()).await
        {
            Ok(Ok(count)) => info!("Synced metadata for {} Slack conversations", count),
            Ok(Err(e)) => warn!("Slack conversation sync failed: {}", e),
            Err(_) => warn!("Slack conversation sync timed out"),
        }

        let cancel = CancellationToken::new();
        self.replace_cancel_token(Some(cancel.clone()));
        tokio::spawn(self.inner.clone().poll_loop(bot_user_id, cancel));

        if let Err(e) = self.inner.flush_outgoing_queue().await {
            warn!("Queued Slack messages left pending after connect: {}", e);
        }

        info!("Slack channel adapter connected");
        Ok(())
    }

    async fn send_message(&self, jid: &str, text: &str) -> Result<()> {
        let channel_id = jid::native_id(jid)
            .filter(|id| !id.is_empty() && jid::has_prefix(jid, JID_PREFIX))
            .ok_or_else(|| ChannelError::Delivery(format!("not a Slack destination: {}", jid)))?;

        let text = if self.inner.opts.prefix_bot_name {
            format!("{}: {}", self.inner.opts.assistant_name, text)
        } else {
            text.to_string()
        };
        let chunks = split_message(&text, MAX_MESSAGE_LENGTH);

        if !self.is_connected() {
            let pending = self.inner.enqueue(channel_id, chunks).await;
            info!(
                "Slack disconnected, message for {} queued ({} pending)",
                jid, pending
            );
            return Ok(());
        }

        // Earlier chunks still waiting must go out first
        if !self.inner.outgoing_queue.lock().await.is_empty() {
            let pending = self.inner.enqueue(channel_id, chunks).await;
            debug!("Slack message for {} queued behind {} pending", jid, pending);
            return match self.inner.flush_outgoing_queue().await {
                Ok(flushed) => {
                    info!("Slack queue flushed {} chunks, latest for {}", flushed, jid);
                    Ok(())
                }
                Err(e) => Err(ChannelError::Delivery(format!(
                    "Slack delivery to {} deferred, message queued: {}",
                    jid, e
                ))),
            };
        }

        let mut chunks = chunks.into_iter();
        while let Some(chunk) = chunks.next() {
            if let Err(e) = self.inner.post_message(channel_id, &chunk).await {
                warn!("Failed to send Slack message to {}, queued for retry: {}", jid, e);
                self.inner
                    .enqueue(channel_id, std::iter::once(chunk).chain(chunks))
                    .await;
                return Err(ChannelError::Delivery(format!(
                    "Slack chat.postMessage to {} failed, message queued: {}",
                    jid, e
                )));
            }
        }

        info!("Slack message sent to {} ({} chars)", jid, text.len());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn owns_jid(&self, jid: &str) -> bool {
        jid::has_prefix(jid, JID_PREFIX)
    }

    async fn disconnect(&self) {
        self.replace_cancel_token(None);
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            info!("Slack channel adapter disconnected");
        }
    }
}

fn check_ok(body: &Value, method: &str) -> AnyResult<()> {
    if body.get("ok").and_then(|v| v.as_bool()) != Some(true) {
        let err = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        return Err(anyhow!("Slack {} error: {}", method, err));
    }
    Ok(())
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Convert a Slack `ts` ("1700000000.123456") to ISO-8601, falling back to now
pub fn ts_to_iso(ts: &str) -> String {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let micros = format!("{:0<6}", frac).get(..6).and_then(|f| f.parse::<u32>().ok());
    match (secs.parse::<i64>().ok(), micros) {
        (Some(secs), Some(micros)) => DateTime::from_timestamp(secs, micros * 1000)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(now_iso),
        _ => now_iso(),
    }
}

/// Split text into chunks of at most `max_chars` characters
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Normalize one `conversations.history` entry into an [`InboundMessage`].
///
/// Returns `None` for edits, joins and other non-message subtypes, and for
/// events with neither text nor files. A direct mention of the bot gets the
/// chat's trigger prepended so trigger matching downstream sees it.
pub fn normalize_event(
    chat_jid: &str,
    event: &Value,
    bot_user_id: &str,
    sender_name: &str,
    trigger: Option<&str>,
) -> Option<InboundMessage> {
    let subtype = event.get("subtype").and_then(|v| v.as_str());
    if subtype.is_some_and(|s| s != "bot_message" && s != "file_share") {
        return None;
    }

    let ts = event.get("ts").and_then(|v| v.as_str()).unwrap_or("");
    if ts.is_empty() {
        return None;
    }

    let user = event.get("user").and_then(|v| v.as_str()).unwrap_or("");
    let bot_id = event.get("bot_id").and_then(|v| v.as_str());
    let is_from_me = !user.is_empty() && user == bot_user_id;
    let is_bot_message = is_from_me || bot_id.is_some() || subtype == Some("bot_message");

    let mut content = event
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    if content.is_empty() {
        let files: Vec<String> = event
            .get("files")
            .and_then(|v| v.as_array())
            .map(|files| {
                files
                    .iter()
                    .map(|f| {
                        let name = f.get("name").and_then(|v| v.as_str()).unwrap_or("file");
                        format!("[File: {}]", name)
                    })
                    .collect()
            })
            .unwrap_or_default();
        if files.is_empty() {
            return None;
        }
        content = files.join(" ");
    }

    if !is_bot_message
        && !bot_user_id.is_empty()
        && let Some(trigger) = trigger.filter(|t| !t.is_empty())
    {
        let mention = format!("<@{}>", bot_user_id);
        if content.contains(&mention) && !content.to_lowercase().starts_with(&trigger.to_lowercase())
        {
            content = format!("{} {}", trigger, content);
        }
    }

    let sender = if user.is_empty() {
        bot_id.unwrap_or("").to_string()
    } else {
        user.to_string()
    };

    Some(InboundMessage {
        id: ts.to_string(),
        chat_jid: chat_jid.to_string(),
        sender,
        sender_name: sender_name.to_string(),
        content,
        timestamp: ts_to_iso(ts),
        is_from_me,
        is_bot_message,
    })
}
