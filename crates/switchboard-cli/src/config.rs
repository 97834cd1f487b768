use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use switchboard_core::types::RegisteredGroup;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
    /// Buffer size of the inbound event queue shared by all channels
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,
}

fn default_assistant_name() -> String {
    "Andy".to_string()
}

fn default_inbound_buffer() -> usize {
    256
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            assistant_name: default_assistant_name(),
            inbound_buffer: default_inbound_buffer(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub slack: SlackConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_slack_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_true")]
    pub prefix_bot_name: bool,
    #[serde(default = "default_slack_base_url")]
    pub base_url: String,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("enabled", &self.enabled)
            .field("bot_token", &mask_secret(&self.bot_token))
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("prefix_bot_name", &self.prefix_bot_name)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            poll_interval_secs: default_slack_poll_interval(),
            prefix_bot_name: true,
            base_url: default_slack_base_url(),
        }
    }
}

fn default_slack_poll_interval() -> u64 {
    3
}

fn default_slack_base_url() -> String {
    "https://slack.com/api".to_string()
}

fn default_true() -> bool {
    true
}

/// A registered chat as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub jid: String,
    pub name: String,
    pub folder: String,
    /// Defaults to `@<assistant_name>`
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default = "default_true")]
    pub requires_trigger: bool,
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".switchboard")
}

pub const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

impl SwitchboardConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        // The config may hold a bot token
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow::anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `switchboard init` first.",
                path.display()
            )
        })?;

        Self::parse(&content).with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        // Expand environment variables before parsing
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)?;

        if !config.channels.slack.bot_token.is_empty()
            && !content.contains("${SLACK_BOT_TOKEN}")
        {
            warn!(
                "Slack bot token is hardcoded in config file. For security, use environment variables: bot_token = \"${{SLACK_BOT_TOKEN}}\""
            );
        }

        for group in &config.groups {
            if !group.jid.contains(':') {
                warn!(
                    "Group {} has JID {:?} without a platform prefix; no channel will own it",
                    group.name, group.jid
                );
            }
        }

        Ok(config)
    }

    /// Registered groups keyed by JID, in the shape adapters consume
    pub fn registered_groups(&self) -> HashMap<String, RegisteredGroup> {
        let added_at = chrono::Utc::now().to_rfc3339();
        self.groups
            .iter()
            .map(|g| {
                let trigger = g
                    .trigger
                    .clone()
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| format!("@{}", self.bridge.assistant_name));
                (
                    g.jid.clone(),
                    RegisteredGroup {
                        name: g.name.clone(),
                        folder: g.folder.clone(),
                        trigger,
                        added_at: added_at.clone(),
                        requires_trigger: g.requires_trigger,
                    },
                )
            })
            .collect()
    }
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &[
    "SLACK_BOT_TOKEN",
    "SWITCHBOARD_ASSISTANT_NAME",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = &result[abs_start + 2..abs_start + end];

        if !ALLOWED_ENV_VARS.contains(&var_name) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(var_name).unwrap_or_default();
        result.replace_range(abs_start..abs_start + end + 1, &value);
        pos = abs_start + value.len();
    }
    result
}
