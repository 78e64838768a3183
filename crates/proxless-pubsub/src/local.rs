//! In-process transport.
//!
//! A [`LocalHub`] is the shared "broker"; each replica holds its own
//! [`LocalPubSub`] handle obtained from [`LocalHub::connect`]. Every
//! subscription runs one receive task that filters the hub's broadcast
//! stream for its channel.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{PubSubError, PubSubResult};
use crate::{MessageHandler, PubSub};

/// Messages buffered per receiver before a slow subscriber starts lagging.
pub const HUB_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Envelope {
    channel: String,
    payload: String,
}

/// Shared in-process broker.
#[derive(Clone)]
pub struct LocalHub {
    sender: broadcast::Sender<Envelope>,
}

impl LocalHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    /// Open a replica-side handle on this hub.
    pub fn connect(&self) -> LocalPubSub {
        LocalPubSub {
            hub: self.clone(),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One replica's connection to a [`LocalHub`].
pub struct LocalPubSub {
    hub: LocalHub,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl LocalPubSub {
    /// Channels with a live receive task.
    pub fn subscribed_channels(&self) -> Vec<String> {
        let subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut channels: Vec<String> = subs.keys().cloned().collect();
        channels.sort();
        channels
    }
}

impl PubSub for LocalPubSub {
    fn publish(&self, channel: &str, payload: String) {
        let envelope = Envelope {
            channel: channel.to_string(),
            payload,
        };
        // No receivers is not an error for a fire-and-forget publish.
        if self.hub.sender.send(envelope).is_err() {
            debug!(channel, "published with no subscribers");
        }
    }

    fn subscribe(&self, channel: &str, handler: MessageHandler) -> PubSubResult<()> {
        let runtime = Handle::try_current()
            .map_err(|e| PubSubError::Closed(format!("no tokio runtime: {e}")))?;

        let mut receiver = self.hub.sender.subscribe();
        let name = channel.to_string();
        let task = runtime.spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(envelope) if envelope.channel == name => handler(envelope.payload),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %name, skipped, "subscriber lagged; messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = subs.insert(channel.to_string(), task) {
            previous.abort();
        }
        Ok(())
    }

    fn unsubscribe(&self, channel: &str) -> PubSubResult<()> {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match subs.remove(channel) {
            Some(task) => {
                task.abort();
                Ok(())
            }
            None => Err(PubSubError::Closed(format!("not subscribed to {channel}"))),
        }
    }
}

impl Drop for LocalPubSub {
    fn drop(&mut self) {
        let subs = self
            .subscriptions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, task) in subs.drain() {
            task.abort();
        }
    }
}
