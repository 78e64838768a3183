//! Proxless state replication.
//!
//! Replicas share the volatile part of each route (last-used time and the
//! running flag) over a publish/subscribe channel. Every route gets two
//! channels keyed by its id:
//!
//! ```text
//! last_used_<id>    payload: Unix seconds, decimal      e.g. "1700000000"
//! is_running_<id>   payload: "true" | "false"           ("1"/"0", "t"/"f" accepted)
//! ```
//!
//! [`StateReplicator`] plugs into the route index as its replication hook.
//! The transport underneath is either [`LocalHub`] (in-process, for tests
//! and single-host setups) or [`RedisPubSub`].

pub mod channel;
pub mod error;
pub mod local;
pub mod redis;
pub mod replicator;

use std::sync::Arc;

pub use channel::{
    decode_is_running, decode_last_used, encode_is_running, encode_last_used,
    is_running_channel, last_used_channel,
};
pub use error::{PubSubError, PubSubResult};
pub use local::{LocalHub, LocalPubSub};
pub use redis::{RedisConfig, RedisPubSub};
pub use replicator::StateReplicator;

/// Callback invoked with each payload received on a subscribed channel.
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Publish/subscribe transport.
///
/// Publishing is fire-and-forget: delivery failures are logged by the
/// transport, never returned. A second `subscribe` on the same channel
/// replaces the handler.
pub trait PubSub: Send + Sync {
    fn publish(&self, channel: &str, payload: String);

    fn subscribe(&self, channel: &str, handler: MessageHandler) -> PubSubResult<()>;

    fn unsubscribe(&self, channel: &str) -> PubSubResult<()>;
}
