//! Inbound message handling and the keyword auto-responder.

use serde::{Deserialize, Serialize};

/// Keyword that triggers the auto-reply, compared case-insensitively.
pub const REPLY_KEYWORD: &str = "ping";

/// Fixed reply sent back to the originating conversation.
pub const REPLY_TEXT: &str = "pong 🟢";

/// Inbound message envelope as delivered by the transport.
///
/// Only the fields the auto-responder needs: the originating conversation id
/// and the two places a plain-text body can live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Conversation the message arrived from (reply target).
    pub chat_id: String,

    /// Direct text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Text body of an extended/quoted message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text: Option<String>,
}

impl MessageEnvelope {
    /// Plain text of the message: first non-empty of the direct body and the
    /// extended body. `None` means the message carries nothing we handle.
    pub fn extract_text(&self) -> Option<&str> {
        [self.text.as_deref(), self.extended_text.as_deref()]
            .into_iter()
            .flatten()
            .find(|text| !text.is_empty())
    }
}

/// The reply to send for `text`, if it matches the keyword.
pub fn auto_reply(text: &str) -> Option<&'static str> {
    if text.eq_ignore_ascii_case(REPLY_KEYWORD) {
        Some(REPLY_TEXT)
    } else {
        None
    }
}
