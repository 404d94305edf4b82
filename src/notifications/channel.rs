//! Realtime notification channel.
//!
//! ```text
//!  disconnected ──► connecting ──► connected ──► closed_normal   (teardown)
//!                      ▲   │                 └─► closed_abnormal
//!                      │   └──(connect failed)──────────┘   │
//!                      └────────── sleep(reconnect delay) ◄─┘
//! ```
//!
//! Pull listings bootstrap the inbox; push messages keep it current. Both
//! land in the same identity-keyed [`NotificationInbox`], and every change to
//! the urgent projection is broadcast to subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::buffer::{NotificationInbox, URGENT_CAPACITY};
use super::transport::PushTransport;
use super::types::{Notification, NotificationId, NotificationPriority, PushMessage};
use crate::events::{Listeners, SubscriptionId};
use crate::workflow::WorkflowError;

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// State and reconnect policy
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    ClosedNormal,
    ClosedAbnormal,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ClosedNormal => "closed_normal",
            Self::ClosedAbnormal => "closed_abnormal",
        }
    }

    /// Only an abnormal closure schedules another attempt.
    pub fn should_reconnect(&self) -> bool {
        matches!(self, Self::ClosedAbnormal)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Growth of the reconnect delay across consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escalation {
    pub factor: u32,
    pub max_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub escalation: Option<Escalation>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_INTERVAL)
    }
}

impl ReconnectPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            escalation: None,
        }
    }

    pub fn with_escalation(mut self, escalation: Option<Escalation>) -> Self {
        self.escalation = escalation;
        self
    }

    /// Delay before the reconnect that follows the `failures`-th consecutive
    /// failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let Some(escalation) = self.escalation else {
            return self.interval;
        };
        let exponent = failures.saturating_sub(1);
        let multiplier = escalation
            .factor
            .max(1)
            .checked_pow(exponent)
            .unwrap_or(u32::MAX);
        let max = Duration::from_millis(escalation.max_ms).max(self.interval);
        self.interval
            .checked_mul(multiplier)
            .map_or(max, |delay| delay.min(max))
    }
}

/// Pull side of the notification service.
#[async_trait]
pub trait NotificationFeed: Send + Sync {
    /// Unread notifications of one priority, newest first.
    async fn list_unread(
        &self,
        priority: NotificationPriority,
        limit: usize,
    ) -> Result<Vec<Notification>, WorkflowError>;

    async fn mark_read(&self, id: NotificationId) -> Result<(), WorkflowError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────────────────────────

pub struct NotificationChannel {
    transport: Arc<dyn PushTransport>,
    credential: String,
    policy: ReconnectPolicy,
    inbox: RwLock<NotificationInbox>,
    listeners: Listeners<Vec<Notification>>,
    state: watch::Sender<ChannelState>,
    connect_attempts: AtomicU64,
    shutdown: CancellationToken,
}

pub type SharedChannel = Arc<NotificationChannel>;

impl NotificationChannel {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        credential: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            transport,
            credential: credential.into(),
            policy,
            inbox: RwLock::new(NotificationInbox::new()),
            listeners: Listeners::new(),
            state,
            connect_attempts: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Number of connection attempts made so far.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Vec<Notification>>) {
        self.listeners.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub async fn urgent(&self) -> Vec<Notification> {
        self.inbox.read().await.urgent().to_vec()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.inbox.read().await.list()
    }

    pub async fn unread_count(&self) -> usize {
        self.inbox.read().await.unread_count()
    }

    /// Start the connect/consume/reconnect loop on the runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let channel = Arc::clone(self);
        tokio::spawn(async move { channel.run().await })
    }

    /// Close the channel normally. No reconnect follows.
    pub fn teardown(&self) {
        self.shutdown.cancel();
        self.set_state(ChannelState::ClosedNormal);
        tracing::info!("Notification channel torn down");
    }

    /// Fill the urgent buffer from the pull feed: unread critical first, then
    /// unread high up to capacity.
    pub async fn bootstrap(
        &self,
        feed: &dyn NotificationFeed,
    ) -> Result<Vec<Notification>, WorkflowError> {
        let critical = feed
            .list_unread(NotificationPriority::Critical, URGENT_CAPACITY)
            .await?;
        let high = if critical.len() < URGENT_CAPACITY {
            feed.list_unread(NotificationPriority::High, URGENT_CAPACITY - critical.len())
                .await?
        } else {
            Vec::new()
        };
        tracing::debug!(
            critical = critical.len(),
            high = high.len(),
            "Bootstrapping urgent notifications"
        );

        let mut inbox = self.inbox.write().await;
        let changed = inbox.bootstrap(critical, high);
        let urgent = inbox.urgent().to_vec();
        drop(inbox);

        if changed {
            self.listeners.emit(&urgent);
        }
        Ok(urgent)
    }

    /// Mark a notification read on the feed, then locally.
    pub async fn mark_read(
        &self,
        feed: &dyn NotificationFeed,
        id: NotificationId,
    ) -> Result<(), WorkflowError> {
        feed.mark_read(id).await?;
        let mut inbox = self.inbox.write().await;
        let changed = inbox.mark_read(id);
        let urgent = inbox.urgent().to_vec();
        drop(inbox);

        if changed {
            self.listeners.emit(&urgent);
        }
        Ok(())
    }

    /// Parse and fold one push message. Malformed frames are dropped.
    pub async fn handle_message(&self, text: &str) {
        let message = match PushMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Ignoring malformed push message: {}", e);
                return;
            }
        };
        if let PushMessage::Other(kind) = &message {
            tracing::debug!(kind = %kind, "Ignoring push message");
            return;
        }

        let mut inbox = self.inbox.write().await;
        let changed = inbox.apply(message);
        let urgent = inbox.urgent().to_vec();
        drop(inbox);

        if changed {
            self.listeners.emit(&urgent);
        }
    }

    fn set_state(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Notification channel state");
        }
    }

    async fn run(&self) {
        let mut failures: u32 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                self.set_state(ChannelState::ClosedNormal);
                return;
            }

            self.set_state(ChannelState::Connecting);
            let attempt = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.set_state(ChannelState::ClosedNormal);
                    return;
                }
                result = self.transport.connect(&self.credential) => result,
            };

            match connected {
                Ok(mut stream) => {
                    failures = 0;
                    self.set_state(ChannelState::Connected);
                    tracing::info!(attempt, "Notification channel connected");
                    loop {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => {
                                self.set_state(ChannelState::ClosedNormal);
                                return;
                            }
                            next = stream.next() => match next {
                                Some(text) => self.handle_message(&text).await,
                                None => break,
                            },
                        }
                    }
                    let e = WorkflowError::ChannelDisconnected("stream closed".to_string());
                    tracing::warn!(attempt, "{}", e);
                }
                Err(e) => {
                    tracing::warn!(attempt, "{}", e);
                }
            }

            let closed = if self.shutdown.is_cancelled() {
                ChannelState::ClosedNormal
            } else {
                ChannelState::ClosedAbnormal
            };
            self.set_state(closed);
            if !closed.should_reconnect() {
                return;
            }
            failures = failures.saturating_add(1);
            let delay = self.policy.delay_for(failures);
            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                failures,
                "Reconnecting notification channel"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.set_state(ChannelState::ClosedNormal);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_abnormal_closure_reconnects() {
        assert!(ChannelState::ClosedAbnormal.should_reconnect());
        assert!(!ChannelState::ClosedNormal.should_reconnect());
        assert!(!ChannelState::Connected.should_reconnect());
    }

    #[test]
    fn fixed_policy_never_grows() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(50), Duration::from_secs(5));
    }

    #[test]
    fn escalation_doubles_up_to_cap() {
        let policy = ReconnectPolicy::fixed(Duration::from_secs(1)).with_escalation(Some(
            Escalation {
                factor: 2,
                max_ms: 10_000,
            },
        ));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ChannelState::ClosedAbnormal).unwrap(),
            "\"closed_abnormal\""
        );
    }
}
