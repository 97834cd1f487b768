//! Render message history as a compact transcript for an agent's context

use crate::types::InboundMessage;

/// Escape the characters that would break an attribute or element body
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// One `<message>` line per message, in the order given, wrapped in `<messages>`
pub fn format_messages(messages: &[InboundMessage]) -> String {
    let lines: Vec<String> = messages.iter().map(format_message).collect();
    format!("<messages>\n{}\n</messages>", lines.join("\n"))
}

pub fn format_message(msg: &InboundMessage) -> String {
    format!(
        "<message sender=\"{}\" time=\"{}\">{}</message>",
        escape_xml(&msg.sender_name),
        escape_xml(&msg.timestamp),
        escape_xml(&msg.content)
    )
}
