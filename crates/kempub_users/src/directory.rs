//! User directory
//!
//! Holds every known user behind one reader/writer lock. Adding a user
//! generates the Kyber key pair; the public half goes into the record and
//! the store, the private half is returned to the caller exactly once and
//! never kept.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kempub_persistence::{Store, StoredUser};
use kempub_protocol::keys;
use kempub_protocol::KyberPublicKey;
use tracing::{error, info};

use crate::error::UserError;

#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub admin: bool,
    pub public_key_pem: String,
    /// Parsed form of `public_key_pem`; absent when a stored PEM fails to
    /// parse, in which case the user cannot complete a handshake.
    pub public_key: Option<KyberPublicKey>,
}

pub struct UserDirectory {
    store: Arc<Store>,
    users: RwLock<HashMap<String, User>>,
}

impl UserDirectory {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Populate the directory from the persistence store.
    pub fn start(&self) {
        let mut users = self.users.write().unwrap();
        for record in self.store.all_users() {
            let public_key = match KyberPublicKey::from_pem(record.public_key_pem.as_bytes()) {
                Ok(key) => Some(key),
                Err(e) => {
                    error!("load public key failed for user '{}': {e}", record.name);
                    None
                }
            };
            users.insert(
                record.name.clone(),
                User {
                    name: record.name,
                    admin: record.admin,
                    public_key_pem: record.public_key_pem,
                    public_key,
                },
            );
        }
        info!("user directory loaded {} users", users.len());
    }

    pub fn lookup(&self, name: &str) -> Option<User> {
        self.users.read().unwrap().get(name).cloned()
    }

    /// Create a user with a fresh key pair. Returns the private-key PEM,
    /// the only copy that will ever exist.
    pub fn add_user(&self, name: &str, admin: bool) -> Result<String, UserError> {
        if self.users.read().unwrap().contains_key(name) {
            return Err(UserError::AlreadyExists(name.to_string()));
        }

        let (public_key, private_key) = keys::generate_key_pair();
        let public_key_pem = public_key.to_pem();
        let private_key_pem = private_key.to_pem();

        self.store.add_user(&StoredUser {
            name: name.to_string(),
            admin,
            public_key_pem: public_key_pem.clone(),
        })?;

        self.users.write().unwrap().insert(
            name.to_string(),
            User {
                name: name.to_string(),
                admin,
                public_key_pem,
                public_key: Some(public_key),
            },
        );
        info!("user '{name}' added (admin: {admin})");
        Ok(private_key_pem)
    }

    pub fn remove_user(&self, name: &str) -> Result<(), UserError> {
        if !self.users.read().unwrap().contains_key(name) {
            return Err(UserError::NotFound(name.to_string()));
        }
        self.store.remove_user(name)?;
        self.users.write().unwrap().remove(name);
        info!("user '{name}' removed");
        Ok(())
    }

    pub fn all_users(&self) -> Vec<User> {
        self.users.read().unwrap().values().cloned().collect()
    }
}
