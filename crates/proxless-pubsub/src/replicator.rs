//! Route index replication over any [`PubSub`] transport.

use std::sync::Arc;

use proxless_state::{RouteIndex, RouteReplication, WeakRouteIndex};
use tracing::{debug, warn};

use crate::channel::{
    decode_is_running, decode_last_used, encode_is_running, encode_last_used,
    is_running_channel, last_used_channel,
};
use crate::{MessageHandler, PubSub};

/// Mirrors `last_used` and `is_running` between replicas.
///
/// Incoming values are applied with the index's local-only update
/// operations, so a received message is never published again.
pub struct StateReplicator {
    pubsub: Arc<dyn PubSub>,
}

impl StateReplicator {
    pub fn new(pubsub: Arc<dyn PubSub>) -> Self {
        Self { pubsub }
    }
}

fn last_used_handler(index: WeakRouteIndex, id: String) -> MessageHandler {
    Arc::new(move |payload: String| {
        let Some(last_used) = decode_last_used(&payload) else {
            warn!(route_id = %id, payload = %payload, "ignoring malformed last_used payload");
            return;
        };
        let Some(index) = index.upgrade() else {
            return;
        };
        if let Err(e) = index.update_last_used(&id, last_used) {
            debug!(route_id = %id, error = %e, "cannot apply replicated last_used");
        }
    })
}

fn is_running_handler(index: WeakRouteIndex, id: String) -> MessageHandler {
    Arc::new(move |payload: String| {
        let Some(is_running) = decode_is_running(&payload) else {
            warn!(route_id = %id, payload = %payload, "ignoring malformed is_running payload");
            return;
        };
        let Some(index) = index.upgrade() else {
            return;
        };
        if let Err(e) = index.update_is_running(&id, is_running) {
            debug!(route_id = %id, error = %e, "cannot apply replicated is_running");
        }
    })
}

impl RouteReplication for StateReplicator {
    fn subscribe(&self, id: &str, index: &RouteIndex) {
        let subscriptions = [
            (
                last_used_channel(id),
                last_used_handler(index.downgrade(), id.to_string()),
            ),
            (
                is_running_channel(id),
                is_running_handler(index.downgrade(), id.to_string()),
            ),
        ];
        for (channel, handler) in subscriptions {
            if let Err(e) = self.pubsub.subscribe(&channel, handler) {
                warn!(route_id = %id, channel = %channel, error = %e, "cannot subscribe");
            }
        }
    }

    fn unsubscribe(&self, id: &str) {
        for channel in [last_used_channel(id), is_running_channel(id)] {
            if let Err(e) = self.pubsub.unsubscribe(&channel) {
                warn!(route_id = %id, channel = %channel, error = %e, "cannot unsubscribe");
            }
        }
    }

    fn publish_last_used(&self, id: &str, last_used: u64) {
        self.pubsub
            .publish(&last_used_channel(id), encode_last_used(last_used));
    }

    fn publish_is_running(&self, id: &str, is_running: bool) {
        self.pubsub
            .publish(&is_running_channel(id), encode_is_running(is_running));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use proxless_core::{RouteDefaults, RouteSpec};

    use crate::error::PubSubResult;

    /// Records calls and keeps handlers so tests can inject messages.
    #[derive(Default)]
    struct ScriptedPubSub {
        published: Mutex<Vec<(String, String)>>,
        handlers: Mutex<Vec<(String, MessageHandler)>>,
        unsubscribed: Mutex<Vec<String>>,
    }

    impl ScriptedPubSub {
        fn deliver(&self, channel: &str, payload: &str) {
            let handlers: Vec<MessageHandler> = self
                .handlers
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _)| c == channel)
                .map(|(_, h)| h.clone())
                .collect();
            for handler in handlers {
                handler(payload.to_string());
            }
        }
    }

    impl PubSub for ScriptedPubSub {
        fn publish(&self, channel: &str, payload: String) {
            self.published
                .lock()
                .unwrap()
                .push((channel.to_string(), payload));
        }

        fn subscribe(&self, channel: &str, handler: MessageHandler) -> PubSubResult<()> {
            self.handlers
                .lock()
                .unwrap()
                .push((channel.to_string(), handler));
            Ok(())
        }

        fn unsubscribe(&self, channel: &str) -> PubSubResult<()> {
            self.unsubscribed.lock().unwrap().push(channel.to_string());
            Ok(())
        }
    }

    fn setup() -> (Arc<ScriptedPubSub>, RouteIndex) {
        let pubsub = Arc::new(ScriptedPubSub::default());
        let replicator = Arc::new(StateReplicator::new(pubsub.clone()));
        let index = RouteIndex::replicated(RouteDefaults::default(), replicator);
        index
            .upsert(RouteSpec::new("r1", "svc1", "d1", "n1", vec!["a.io".into()]))
            .unwrap();
        (pubsub, index)
    }

    #[test]
    fn creation_subscribes_both_channels() {
        let (pubsub, _index) = setup();
        let channels: Vec<String> = pubsub
            .handlers
            .lock()
            .unwrap()
            .iter()
            .map(|(c, _)| c.clone())
            .collect();
        assert_eq!(channels, vec!["last_used_r1", "is_running_r1"]);
    }

    #[test]
    fn local_mutations_are_published() {
        let (pubsub, index) = setup();
        index.mark_used("r1", 1_700_000_000).unwrap();
        index.mark_running("r1", true).unwrap();

        assert_eq!(
            *pubsub.published.lock().unwrap(),
            vec![
                ("last_used_r1".to_string(), "1700000000".to_string()),
                ("is_running_r1".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn incoming_messages_update_without_republishing() {
        let (pubsub, index) = setup();
        let far_future = u64::MAX / 2;

        pubsub.deliver("last_used_r1", &far_future.to_string());
        pubsub.deliver("is_running_r1", "1");

        let route = index.get_by_id("r1").unwrap();
        assert_eq!(route.last_used, far_future);
        assert!(route.is_running);
        assert!(pubsub.published.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_payloads_are_ignored() {
        let (pubsub, index) = setup();
        let before = index.get_by_id("r1").unwrap();

        pubsub.deliver("last_used_r1", "soon");
        pubsub.deliver("is_running_r1", "perhaps");

        assert_eq!(index.get_by_id("r1").unwrap(), before);
    }

    #[test]
    fn delete_unsubscribes_both_channels() {
        let (pubsub, index) = setup();
        index.delete("r1").unwrap();
        assert_eq!(
            *pubsub.unsubscribed.lock().unwrap(),
            vec!["last_used_r1", "is_running_r1"]
        );

        // A late message for the deleted route is harmless.
        pubsub.deliver("is_running_r1", "true");
        assert!(index.get_by_id("r1").is_err());
    }

    #[test]
    fn handlers_do_not_keep_the_index_alive() {
        let (pubsub, index) = setup();
        drop(index);
        pubsub.deliver("is_running_r1", "true");
    }
}
