use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(MessageId);
id_newtype!(ChatId);
id_newtype!(SenderId);

/// Chat metadata as reported by the chat client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub id: ChatId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_group: bool,
}

/// A message observed in a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: MessageId,
    pub chat: ChatInfo,
    pub body: String,
    #[serde(default)]
    pub mentioned_ids: Vec<SenderId>,
    /// Group author when present, otherwise the direct sender.
    pub sender_id: SenderId,
    /// Epoch seconds as reported by the chat client.
    pub timestamp: i64,
}

impl InboundMessage {
    pub fn mentions(&self, id: &SenderId) -> bool {
        self.mentioned_ids.iter().any(|mentioned| mentioned == id)
    }
}

/// One entry of the recent-history window handed to the automation webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentMessage {
    pub from: SenderId,
    pub body: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyButton {
    pub id: String,
    pub title: String,
}

/// What to deliver to a chat. The transport decides the wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text { text: String },
    Buttons { text: String, buttons: Vec<ReplyButton> },
}

impl OutboundPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn with_reply_button(
        text: impl Into<String>,
        button_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self::Buttons {
            text: text.into(),
            buttons: vec![ReplyButton {
                id: button_id.into(),
                title: title.into(),
            }],
        }
    }

    pub fn body_text(&self) -> &str {
        match self {
            Self::Text { text } | Self::Buttons { text, .. } => text,
        }
    }
}

/// Lifecycle and message events pushed by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A pairing code the operator must scan to link the session.
    Qr(String),
    /// The session is linked; `own_id` is the bot's identifier in mentions.
    Ready { own_id: SenderId },
    Message(InboundMessage),
}
