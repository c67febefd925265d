//! Chat transport boundary for groupbridge.
//!
//! Transports are pure I/O: they turn chat-client events into
//! [`TransportEvent`]s and expose the send/typing/history primitives the
//! bridge needs. The question lifecycle lives in `bridge-app`.

mod http_bridge;
mod traits;
mod types;

pub use http_bridge::HttpBridgeTransport;
pub use traits::ChatTransport;
pub use types::{
    ChatId, ChatInfo, InboundMessage, MessageId, OutboundPayload, RecentMessage, ReplyButton,
    SenderId, TransportEvent,
};
