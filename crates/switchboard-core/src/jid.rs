//! Destination identifiers of the form `<platform-prefix>:<native-id>`

/// Platform prefix of a JID, `None` when there is no `:` separator
pub fn platform_prefix(jid: &str) -> Option<&str> {
    jid.split_once(':').map(|(prefix, _)| prefix)
}

/// Platform-native part of a JID, `None` when there is no `:` separator
pub fn native_id(jid: &str) -> Option<&str> {
    jid.split_once(':').map(|(_, id)| id)
}

pub fn make(prefix: &str, native_id: &str) -> String {
    format!("{}:{}", prefix, native_id)
}

/// True iff `jid` carries exactly `prefix` as its platform prefix
pub fn has_prefix(jid: &str, prefix: &str) -> bool {
    platform_prefix(jid) == Some(prefix)
}
