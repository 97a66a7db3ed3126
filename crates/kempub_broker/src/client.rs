//! Broker-side client records
//!
//! A `ClientHandle` is what the rest of the broker sees: the peer-chosen
//! id, the authenticated user and the sending half of the bounded outbound
//! queue. The receiving half is parked inside the broker until the
//! client's publish channel claims it.

use kempub_protocol::Message;
use kempub_users::User;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub id: String,
    pub user: User,
    pub(crate) sender: mpsc::Sender<Message>,
}

/// Full per-client state owned by the broker.
pub(crate) struct ClientRecord {
    pub(crate) handle: ClientHandle,
    /// Parked until the publish channel's sender task takes it.
    pub(crate) receiver: Option<mpsc::Receiver<Message>>,
}
