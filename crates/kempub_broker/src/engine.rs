//! Broker engine
//!
//! Owns the live-client table, the subscription side table (subscriptions
//! are records keyed by id, clients hold no pointers back), the topic
//! index and the retained cache.
//!
//! Delivery rules:
//! - fan-out never blocks a publisher: a full subscriber queue drops that
//!   subscriber's copy with a warning
//! - retained messages are enqueued at subscribe time, before the
//!   SUBSCRIBE_ACK is sent
//! - persistent messages are handed to the store's bounded add channel,
//!   which may briefly suspend the publisher on bursts

use std::collections::HashMap;
use std::sync::RwLock;

use kempub_persistence::StoredMessage;
use kempub_protocol::{Message, MessageKind, Properties};
use kempub_users::User;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{ClientHandle, ClientRecord};
use crate::error::BrokerError;
use crate::topic::{topic_matches, valid_pattern, TopicRecord};

/// Default bound of a client's outbound queue.
const OUTBOUND_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Subscription {
    pub client_id: String,
    pub pattern: String,
}

#[derive(Default)]
struct BrokerState {
    clients: HashMap<String, ClientRecord>,
    subscriptions: HashMap<String, Subscription>,
    topics: HashMap<String, TopicRecord>,
    retained: HashMap<String, Message>,
}

pub struct Broker {
    state: RwLock<BrokerState>,
    persist_tx: mpsc::Sender<StoredMessage>,
    outbound_capacity: usize,
}

impl Broker {
    pub fn new(persist_tx: mpsc::Sender<StoredMessage>) -> Self {
        Self::with_outbound_capacity(persist_tx, OUTBOUND_CAPACITY)
    }

    pub fn with_outbound_capacity(persist_tx: mpsc::Sender<StoredMessage>, capacity: usize) -> Self {
        Self {
            state: RwLock::new(BrokerState::default()),
            persist_tx,
            outbound_capacity: capacity,
        }
    }

    /// Seed the retained cache and topic index from the store's persisted
    /// messages. Persistent implies retained after a restart.
    pub fn load_persisted(&self, messages: Vec<StoredMessage>) {
        let mut state = self.state.write().unwrap();
        let count = messages.len();
        for stored in messages {
            let properties = Properties::from_byte(stored.properties);
            state.topics.insert(
                stored.topic.clone(),
                TopicRecord {
                    topic: stored.topic.clone(),
                    retained: true,
                    persistent: properties.persistent,
                },
            );
            state.retained.insert(
                stored.topic.clone(),
                Message {
                    properties,
                    topic: stored.topic,
                    payload: stored.payload,
                    ..Message::new(MessageKind::Message)
                },
            );
        }
        if count > 0 {
            info!("loaded {count} persisted messages as retained");
        }
    }

    /// Create the record for a freshly authenticated client. A live record
    /// under the same id is an error; the peer must pick a new id or close
    /// the old session first.
    pub fn register_client(&self, client_id: &str, user: User) -> Result<(), BrokerError> {
        let mut state = self.state.write().unwrap();
        if state.clients.contains_key(client_id) {
            return Err(BrokerError::ClientExists(client_id.to_string()));
        }
        let (sender, receiver) = mpsc::channel(self.outbound_capacity);
        state.clients.insert(
            client_id.to_string(),
            ClientRecord {
                handle: ClientHandle {
                    id: client_id.to_string(),
                    user,
                    sender,
                },
                receiver: Some(receiver),
            },
        );
        Ok(())
    }

    /// Remove the record, drop all of its subscriptions and close its
    /// outbound channel (the publish-channel sender observes the close and
    /// exits).
    pub fn unregister_client(&self, client_id: &str) {
        let mut state = self.state.write().unwrap();
        state.clients.remove(client_id);
        state.subscriptions.retain(|_, sub| sub.client_id != client_id);
    }

    /// Hand out the receiving half of a client's outbound queue. The
    /// publish channel claims it exactly once.
    pub fn take_publish_receiver(&self, client_id: &str) -> Option<mpsc::Receiver<Message>> {
        let mut state = self.state.write().unwrap();
        state
            .clients
            .get_mut(client_id)
            .and_then(|record| record.receiver.take())
    }

    pub fn client(&self, client_id: &str) -> Option<ClientHandle> {
        let state = self.state.read().unwrap();
        state.clients.get(client_id).map(|record| record.handle.clone())
    }

    pub fn all_clients(&self) -> Vec<ClientHandle> {
        let state = self.state.read().unwrap();
        state.clients.values().map(|record| record.handle.clone()).collect()
    }

    pub fn all_topics(&self) -> Vec<TopicRecord> {
        let state = self.state.read().unwrap();
        state.topics.values().cloned().collect()
    }

    /// Record a subscription and replay matching retained messages onto the
    /// client's outbound queue before returning the new subscription id.
    pub fn subscribe(&self, client_id: &str, pattern: &str) -> Result<String, BrokerError> {
        if !valid_pattern(pattern) {
            return Err(BrokerError::InvalidPattern(pattern.to_string()));
        }

        let mut state = self.state.write().unwrap();
        let sender = state
            .clients
            .get(client_id)
            .ok_or_else(|| BrokerError::ClientNotFound(client_id.to_string()))?
            .handle
            .sender
            .clone();

        let subscription_id = Uuid::new_v4().to_string();

        let replayed: Vec<Message> = state
            .retained
            .iter()
            .filter(|(topic, _)| topic_matches(pattern, topic))
            .map(|(_, msg)| Message {
                subscription_id: subscription_id.clone(),
                ..msg.clone()
            })
            .collect();
        for msg in replayed {
            if let Err(e) = sender.try_send(msg) {
                warn!("retained replay to client '{client_id}' failed: {e}");
            }
        }

        state.subscriptions.insert(
            subscription_id.clone(),
            Subscription {
                client_id: client_id.to_string(),
                pattern: pattern.to_string(),
            },
        );
        Ok(subscription_id)
    }

    /// Remove a subscription. A missing entry is a no-op.
    pub fn unsubscribe(&self, client_id: &str, pattern: &str, subscription_id: &str) {
        let mut state = self.state.write().unwrap();
        if let Some(sub) = state.subscriptions.get(subscription_id) {
            if sub.client_id == client_id && sub.pattern == pattern {
                state.subscriptions.remove(subscription_id);
            }
        }
    }

    /// Fan a publish out to every matching subscription, then apply the
    /// retained/persistent properties.
    pub async fn publish(
        &self,
        properties: Properties,
        topic: &str,
        payload: Vec<u8>,
        publisher_id: &str,
    ) {
        let base = Message {
            properties,
            topic: topic.to_string(),
            payload,
            ..Message::new(MessageKind::Message)
        };

        let targets: Vec<(String, String, mpsc::Sender<Message>)> = {
            let state = self.state.read().unwrap();
            state
                .subscriptions
                .iter()
                .filter(|(_, sub)| topic_matches(&sub.pattern, topic))
                .filter_map(|(sub_id, sub)| {
                    match state.clients.get(&sub.client_id) {
                        Some(record) => Some((
                            sub_id.clone(),
                            sub.client_id.clone(),
                            record.handle.sender.clone(),
                        )),
                        None => {
                            warn!("subscription {sub_id} references unknown client '{}'", sub.client_id);
                            None
                        }
                    }
                })
                .collect()
        };

        for (subscription_id, client_id, sender) in targets {
            let msg = Message {
                subscription_id,
                ..base.clone()
            };
            match sender.try_send(msg) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("outbound queue of client '{client_id}' full, dropping message for topic '{topic}'");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!("outbound queue of client '{client_id}' closed, dropping message for topic '{topic}'");
                }
            }
        }

        {
            let mut state = self.state.write().unwrap();
            state.topics.insert(
                topic.to_string(),
                TopicRecord {
                    topic: topic.to_string(),
                    retained: properties.retained,
                    persistent: properties.persistent,
                },
            );
            if properties.retained {
                state.retained.insert(topic.to_string(), base.clone());
            }
        }

        if properties.persistent {
            let stored = StoredMessage {
                properties: properties.to_byte(),
                topic: topic.to_string(),
                payload: base.payload,
            };
            if self.persist_tx.send(stored).await.is_err() {
                warn!("persistence channel closed, message for topic '{topic}' not stored");
            }
        }

        tracing::debug!("publish from '{publisher_id}' on topic '{topic}' done");
    }
}
