//! Realtime notifications: push channel, pull feed bootstrap and the urgent
//! buffer.

mod buffer;
mod channel;
mod transport;
mod types;

pub use buffer::{NotificationInbox, UrgentBuffer, UrgentOrder, URGENT_CAPACITY};
pub use channel::{
    ChannelState, Escalation, NotificationChannel, NotificationFeed, ReconnectPolicy,
    SharedChannel, DEFAULT_RECONNECT_INTERVAL,
};
pub use transport::{PushStream, PushTransport, SseTransport};
pub use types::{Notification, NotificationId, NotificationPriority, PushMessage, ReadState};
