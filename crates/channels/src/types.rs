use serde::{Deserialize, Serialize};

/// A message received from an external platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    /// Channel id the message arrived on.
    pub source: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub text: String,
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

/// An outbound message for a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelReply {
    pub channel_id: String,
    pub chat_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

impl ChannelReply {
    /// Reply addressed to the chat `msg` came from.
    pub fn to_message(msg: &ChannelMessage, text: impl Into<String>) -> Self {
        Self {
            channel_id: msg.source.clone(),
            chat_id: msg.chat_id.clone(),
            text: text.into(),
            reply_to_id: None,
        }
    }
}
