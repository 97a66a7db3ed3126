//! Component wiring
//!
//! The store, user directory, broker and transport are the process-wide
//! singletons. They start in dependency order and shut down in reverse:
//! listeners first, the final persistence flush last.

use std::sync::Arc;

use kempub_broker::Broker;
use kempub_config::Settings;
use kempub_persistence::Store;
use kempub_transport::{Transport, TransportHandle};
use kempub_users::UserDirectory;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] kempub_persistence::StoreError),
    #[error(transparent)]
    Transport(#[from] kempub_transport::TransportError),
}

pub struct App {
    store: Arc<Store>,
    transport: TransportHandle,
}

impl App {
    pub async fn start(settings: &Settings) -> Result<App, AppError> {
        let store = Store::open(&settings.storage.db_file).await?;

        let users = Arc::new(UserDirectory::new(store.clone()));
        users.start();

        let broker = Arc::new(Broker::new(store.add_message_sender()));
        broker.load_persisted(store.all_messages());

        let transport = Transport::new(settings, broker, users)?.start().await?;

        info!("application started");
        Ok(App { store, transport })
    }

    /// Address the command listener actually bound.
    pub fn command_addr(&self) -> &str {
        &self.transport.command_addr
    }

    /// Address the publish listener actually bound.
    pub fn publish_addr(&self) -> &str {
        &self.transport.publish_addr
    }

    /// Reverse-order shutdown: stop accepting, then drain and close the
    /// store.
    pub async fn shutdown(self) {
        self.transport.shutdown().await;
        self.store.shutdown().await;
        info!("application shut down");
    }
}
