//! Push transport for the notification channel.
//!
//! A transport yields the raw text of each push message. The stream ending,
//! for whatever reason, is an abnormal closure: only the channel's owner can
//! close it normally, by tearing the channel down.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};

use crate::workflow::WorkflowError;

pub type PushStream = BoxStream<'static, String>;

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open a subscription keyed by `credential`.
    ///
    /// Resolves once the subscription is established; connection failures are
    /// reported as `ChannelDisconnected`.
    async fn connect(&self, credential: &str) -> Result<PushStream, WorkflowError>;
}

/// Server-sent events subscription.
pub struct SseTransport {
    client: reqwest::Client,
    url: String,
}

impl SseTransport {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl PushTransport for SseTransport {
    async fn connect(&self, credential: &str) -> Result<PushStream, WorkflowError> {
        let mut request = self
            .client
            .get(&self.url)
            .header("Accept", "text/event-stream");
        if !credential.is_empty() {
            request = request.bearer_auth(credential);
        }

        let mut source = EventSource::new(request)
            .map_err(|e| WorkflowError::ChannelDisconnected(e.to_string()))?;

        // The first event tells us whether the subscription was accepted.
        let first = match source.next().await {
            Some(Ok(Event::Open)) => None,
            Some(Ok(Event::Message(message))) => Some(message.data),
            Some(Err(e)) => {
                source.close();
                return Err(WorkflowError::ChannelDisconnected(e.to_string()));
            }
            None => {
                return Err(WorkflowError::ChannelDisconnected(
                    "stream ended before open".to_string(),
                ))
            }
        };

        // Reconnects are owned by the channel, so the first error ends the
        // stream instead of letting the event source retry on its own.
        let rest = source
            .take_while(|event| {
                if let Err(e) = event {
                    tracing::warn!("SSE stream error: {}", e);
                }
                futures::future::ready(event.is_ok())
            })
            .filter_map(|event| async move {
                match event {
                    Ok(Event::Message(message)) => Some(message.data),
                    _ => None,
                }
            });
        Ok(futures::stream::iter(first).chain(rest).boxed())
    }
}
