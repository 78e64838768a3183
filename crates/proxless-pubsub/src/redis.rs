//! Redis transport.
//!
//! Two long-lived connections per replica:
//!
//! ```text
//!  publish() ──mpsc──▶ publisher task ──PUBLISH──▶ ┐
//!                                                 ├── Redis
//!  subscribe() ─mpsc─▶ subscriber task ◀─message── ┘
//!                        └─ handler(payload)
//! ```
//!
//! Both tasks reconnect with capped exponential backoff. After a reconnect
//! the subscriber re-issues `SUBSCRIBE` for every channel that still has a
//! handler. Redis being unreachable never fails the caller: publishes queue
//! up to `publish_buffer` and are dropped beyond that, subscriptions are
//! applied once the connection comes back.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub as RedisSubscriber};
use redis::{AsyncCommands, Client, ErrorKind, Msg, RedisResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{PubSubError, PubSubResult};
use crate::{MessageHandler, PubSub};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Redis connection settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// `redis://[user:password@]host[:port][/db]`, or a bare `host:port`.
    pub url: String,
    pub connect_timeout: Duration,
    pub max_backoff: Duration,
    /// Publishes queued while the publisher connection is busy or down.
    pub publish_buffer: usize,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// The configured URL, with `redis://` added to a bare address.
    fn connection_url(&self) -> String {
        if self.url.contains("://") {
            self.url.clone()
        } else {
            format!("redis://{}", self.url)
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            max_backoff: Duration::from_secs(5),
            publish_buffer: 4096,
        }
    }
}

// ── Connection helpers ─────────────────────────────────────────────

/// Connect, retrying with capped exponential backoff until it succeeds.
async fn connect_with_backoff<T, F, Fut>(config: &RedisConfig, role: &str, mut connect: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RedisResult<T>>,
{
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let error = match tokio::time::timeout(config.connect_timeout, connect()).await {
            Ok(Ok(connection)) => {
                info!(role, "connected to redis");
                return connection;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", config.connect_timeout),
        };
        warn!(
            role,
            error = %error,
            retry_in_ms = backoff.as_millis() as u64,
            "cannot reach redis"
        );
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.max_backoff);
    }
}

// ── Publisher ──────────────────────────────────────────────────────

async fn run_publisher(
    client: Client,
    config: RedisConfig,
    mut outgoing: mpsc::Receiver<(String, String)>,
) {
    'reconnect: loop {
        let mut connection: MultiplexedConnection =
            connect_with_backoff(&config, "publisher", || {
                client.get_multiplexed_async_connection()
            })
            .await;

        while let Some((channel, payload)) = outgoing.recv().await {
            let result: RedisResult<i64> = connection.publish(&channel, &payload).await;
            match result {
                Ok(receivers) => debug!(channel = %channel, receivers, "published"),
                Err(e) if e.kind() == ErrorKind::ResponseError => {
                    warn!(channel = %channel, error = %e, "redis rejected PUBLISH");
                }
                Err(e) => {
                    warn!(channel = %channel, error = %e, "cannot PUBLISH; reconnecting");
                    continue 'reconnect;
                }
            }
        }
        // Sender dropped: the transport is shutting down.
        return;
    }
}

// ── Subscriber ─────────────────────────────────────────────────────

type Handlers = Arc<Mutex<HashMap<String, MessageHandler>>>;

#[derive(Debug)]
enum SubscriberCommand {
    Subscribe(String),
    Unsubscribe(String),
}

enum SubscriberEvent {
    Message(Option<Msg>),
    Command(Option<SubscriberCommand>),
}

fn dispatch(handlers: &Handlers, message: Msg) {
    let channel = message.get_channel_name().to_string();
    let payload: String = match message.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(channel = %channel, error = %e, "ignoring non-text payload");
            return;
        }
    };
    let handler = handlers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&channel)
        .cloned();
    match handler {
        Some(handler) => handler(payload),
        None => debug!(channel = %channel, "message for channel without handler"),
    }
}

async fn apply_command(
    subscriber: &mut RedisSubscriber,
    command: &SubscriberCommand,
) -> RedisResult<()> {
    match command {
        SubscriberCommand::Subscribe(channel) => subscriber.subscribe(channel).await,
        SubscriberCommand::Unsubscribe(channel) => subscriber.unsubscribe(channel).await,
    }
}

async fn run_subscriber(
    client: Client,
    config: RedisConfig,
    handlers: Handlers,
    mut commands: mpsc::UnboundedReceiver<SubscriberCommand>,
) {
    'reconnect: loop {
        let mut subscriber = connect_with_backoff(&config, "subscriber", || {
            client.get_async_pubsub()
        })
        .await;

        let channels: Vec<String> = handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for channel in &channels {
            if let Err(e) = subscriber.subscribe(channel).await {
                warn!(channel = %channel, error = %e, "cannot resubscribe; reconnecting");
                tokio::time::sleep(INITIAL_BACKOFF).await;
                continue 'reconnect;
            }
        }
        if !channels.is_empty() {
            info!(channels = channels.len(), "resubscribed to redis channels");
        }

        loop {
            let event = {
                let mut messages = std::pin::pin!(subscriber.on_message());
                tokio::select! {
                    message = messages.next() => SubscriberEvent::Message(message),
                    command = commands.recv() => SubscriberEvent::Command(command),
                }
            };
            match event {
                SubscriberEvent::Message(Some(message)) => dispatch(&handlers, message),
                SubscriberEvent::Message(None) => {
                    warn!("redis subscriber connection lost");
                    break;
                }
                SubscriberEvent::Command(None) => return,
                SubscriberEvent::Command(Some(command)) => {
                    if let Err(e) = apply_command(&mut subscriber, &command).await {
                        warn!(?command, error = %e, "cannot send to redis; reconnecting");
                        break;
                    }
                }
            }
        }
        tokio::time::sleep(INITIAL_BACKOFF).await;
    }
}

// ── RedisPubSub ────────────────────────────────────────────────────

/// [`PubSub`] over Redis `PUBLISH` / `SUBSCRIBE`.
pub struct RedisPubSub {
    client: Client,
    outgoing: mpsc::Sender<(String, String)>,
    commands: mpsc::UnboundedSender<SubscriberCommand>,
    handlers: Handlers,
    tasks: Vec<JoinHandle<()>>,
}

impl RedisPubSub {
    /// Spawn the publisher and subscriber tasks. Only a malformed URL is an
    /// error; an unreachable server is retried in the background.
    pub fn start(config: RedisConfig) -> PubSubResult<Self> {
        let client = Client::open(config.connection_url())
            .map_err(|e| PubSubError::Connect(format!("invalid redis url {:?}: {e}", config.url)))?;
        let (outgoing, outgoing_rx) = mpsc::channel(config.publish_buffer.max(1));
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let handlers: Handlers = Arc::new(Mutex::new(HashMap::new()));

        let publisher = tokio::spawn(run_publisher(client.clone(), config.clone(), outgoing_rx));
        let subscriber = tokio::spawn(run_subscriber(
            client.clone(),
            config,
            handlers.clone(),
            commands_rx,
        ));

        let pubsub = Self {
            client,
            outgoing,
            commands,
            handlers,
            tasks: vec![publisher, subscriber],
        };
        info!(addr = %pubsub.addr(), "redis replication transport started");
        Ok(pubsub)
    }

    /// `host:port` of the server, for logging.
    pub fn addr(&self) -> String {
        self.client.get_connection_info().addr.to_string()
    }
}

impl PubSub for RedisPubSub {
    fn publish(&self, channel: &str, payload: String) {
        if let Err(e) = self.outgoing.try_send((channel.to_string(), payload)) {
            warn!(channel, error = %e, "dropping publish");
        }
    }

    fn subscribe(&self, channel: &str, handler: MessageHandler) -> PubSubResult<()> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.to_string(), handler);
        self.commands
            .send(SubscriberCommand::Subscribe(channel.to_string()))
            .map_err(|_| PubSubError::Closed("redis subscriber stopped".to_string()))
    }

    fn unsubscribe(&self, channel: &str) -> PubSubResult<()> {
        let removed = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel);
        if removed.is_none() {
            return Err(PubSubError::Closed(format!("not subscribed to {channel}")));
        }
        self.commands
            .send(SubscriberCommand::Unsubscribe(channel.to_string()))
            .map_err(|_| PubSubError::Closed("redis subscriber stopped".to_string()))
    }
}

impl Drop for RedisPubSub {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
