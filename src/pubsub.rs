use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::resp::RespValue;

pub type PushSender = mpsc::UnboundedSender<RespValue>;
pub type PushReceiver = mpsc::UnboundedReceiver<RespValue>;

/// Channel → subscriber fan-out for publish/subscribe.
///
/// Channel names are literal (no patterns). Subscriber sets are ordered
/// so a PUBLISH delivers in a deterministic order.
#[derive(Default)]
pub struct PubSubBus {
    /// channel name -> ordered set of subscribed client IDs
    channels: BTreeMap<String, BTreeSet<u64>>,
    /// client_id -> sender for pushing messages to the client's connection
    senders: HashMap<u64, PushSender>,
    /// client_id -> channels subscribed
    client_channels: HashMap<u64, BTreeSet<String>>,
}

impl PubSubBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a client to a channel. Returns the client's total
    /// subscription count afterwards.
    pub fn subscribe(&mut self, client_id: u64, channel: &str, sender: PushSender) -> usize {
        self.senders.entry(client_id).or_insert(sender);
        self.channels
            .entry(channel.to_string())
            .or_default()
            .insert(client_id);
        self.client_channels
            .entry(client_id)
            .or_default()
            .insert(channel.to_string());
        self.subscription_count(client_id)
    }

    /// Unsubscribe a client from a channel. Returns the client's
    /// remaining subscription count.
    pub fn unsubscribe(&mut self, client_id: u64, channel: &str) -> usize {
        if let Some(clients) = self.channels.get_mut(channel) {
            clients.remove(&client_id);
            if clients.is_empty() {
                self.channels.remove(channel);
            }
        }
        if let Some(chans) = self.client_channels.get_mut(&client_id) {
            chans.remove(channel);
        }
        let count = self.subscription_count(client_id);
        if count == 0 {
            self.senders.remove(&client_id);
            self.client_channels.remove(&client_id);
        }
        count
    }

    /// Publish a message to a channel. Returns the number of clients
    /// the message was delivered to.
    pub fn publish(&self, channel: &str, message: &[u8]) -> usize {
        let mut delivered = 0;

        if let Some(client_ids) = self.channels.get(channel) {
            for &client_id in client_ids {
                if let Some(sender) = self.senders.get(&client_id) {
                    let msg = RespValue::array(vec![
                        RespValue::bulk_string(b"message".to_vec()),
                        RespValue::bulk_string(channel.as_bytes().to_vec()),
                        RespValue::bulk_string(message.to_vec()),
                    ]);
                    if sender.send(msg).is_ok() {
                        delivered += 1;
                    }
                }
            }
        }

        delivered
    }

    /// Remove all subscriptions for a client (called on disconnect).
    pub fn unsubscribe_all(&mut self, client_id: u64) {
        if let Some(chans) = self.client_channels.remove(&client_id) {
            for channel in chans {
                if let Some(clients) = self.channels.get_mut(&channel) {
                    clients.remove(&client_id);
                    if clients.is_empty() {
                        self.channels.remove(&channel);
                    }
                }
            }
        }
        self.senders.remove(&client_id);
    }

    /// The channels a specific client is subscribed to.
    pub fn client_channel_list(&self, client_id: u64) -> Vec<String> {
        self.client_channels
            .get(&client_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Active channels (those with at least one subscriber).
    pub fn channels(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Subscriber counts for the named channels.
    pub fn numsub(&self, channel_names: &[String]) -> Vec<(String, usize)> {
        channel_names
            .iter()
            .map(|ch| {
                let count = self.channels.get(ch).map_or(0, |s| s.len());
                (ch.clone(), count)
            })
            .collect()
    }

    pub fn subscription_count(&self, client_id: u64) -> usize {
        self.client_channels.get(&client_id).map_or(0, |s| s.len())
    }
}

pub type SharedPubSub = Arc<RwLock<PubSubBus>>;

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> (PushSender, PushReceiver) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn test_subscribe_counts() {
        let mut bus = PubSubBus::new();
        let (tx, _rx) = sender();
        assert_eq!(bus.subscribe(1, "a", tx.clone()), 1);
        assert_eq!(bus.subscribe(1, "b", tx), 2);
        assert_eq!(bus.subscription_count(1), 2);
    }

    #[test]
    fn test_publish_delivers_to_subscribers() {
        let mut bus = PubSubBus::new();
        let (tx1, mut rx1) = sender();
        let (tx2, mut rx2) = sender();
        bus.subscribe(1, "news", tx1);
        bus.subscribe(2, "news", tx2);

        assert_eq!(bus.publish("news", b"hello"), 2);
        assert_eq!(bus.publish("empty", b"hello"), 0);

        let expected = RespValue::array(vec![
            RespValue::bulk_string(b"message".to_vec()),
            RespValue::bulk_string(b"news".to_vec()),
            RespValue::bulk_string(b"hello".to_vec()),
        ]);
        assert_eq!(rx1.try_recv().unwrap(), expected);
        assert_eq!(rx2.try_recv().unwrap(), expected);
    }

    #[test]
    fn test_unsubscribe_and_cleanup() {
        let mut bus = PubSubBus::new();
        let (tx, _rx) = sender();
        bus.subscribe(1, "a", tx.clone());
        bus.subscribe(1, "b", tx);
        assert_eq!(bus.unsubscribe(1, "a"), 1);
        assert_eq!(bus.unsubscribe(1, "b"), 0);
        assert!(bus.channels().is_empty());
        assert_eq!(bus.subscription_count(1), 0);
    }

    #[test]
    fn test_disconnect_removes_from_every_channel() {
        let mut bus = PubSubBus::new();
        let (tx1, _rx1) = sender();
        let (tx2, _rx2) = sender();
        bus.subscribe(1, "a", tx1.clone());
        bus.subscribe(1, "b", tx1);
        bus.subscribe(2, "a", tx2);

        bus.unsubscribe_all(1);
        assert_eq!(bus.channels(), vec!["a".to_string()]);
        assert_eq!(bus.numsub(&["a".to_string(), "b".to_string()]), vec![
            ("a".to_string(), 1),
            ("b".to_string(), 0),
        ]);
    }
}
