//! Administrative command dispatcher
//!
//! Served inside the command channel's steady state: CLI_COMMAND payloads
//! carry a JSON record with a one-byte `type` field; the response shares a
//! common `{error, errorMessage}` envelope plus per-kind fields. Every
//! command requires the caller's user to be an admin. Dispatcher failures
//! are reported in the ack record and never close the connection.

use std::sync::Arc;

use kempub_broker::Broker;
use kempub_users::UserDirectory;
use serde::{Deserialize, Serialize};
use tracing::error;

pub const COMMAND_ADD_USER: u8 = 0;
pub const COMMAND_REMOVE_USER: u8 = 1;
pub const COMMAND_LIST_USERS: u8 = 2;
pub const COMMAND_LIST_CONNECTIONS: u8 = 3;
pub const COMMAND_LIST_TOPICS: u8 = 4;

#[derive(Debug, Serialize, Deserialize)]
pub struct CliRequest {
    #[serde(rename = "type")]
    pub kind: u8,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddUserRequest {
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: String,
    pub admin: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveUserRequest {
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CliResponse {
    pub error: bool,
    #[serde(rename = "errorMessage")]
    pub error_message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddUserResponse {
    #[serde(flatten)]
    pub status: CliResponse,
    #[serde(rename = "privateKeyPem")]
    pub private_key_pem: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserEntry {
    pub name: String,
    pub admin: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListUsersResponse {
    #[serde(flatten)]
    pub status: CliResponse,
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub id: String,
    pub username: String,
    pub admin: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListConnectionsResponse {
    #[serde(flatten)]
    pub status: CliResponse,
    pub connections: Vec<ConnectionEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TopicEntry {
    pub topic: String,
    pub retained: bool,
    pub persistent: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListTopicsResponse {
    #[serde(flatten)]
    pub status: CliResponse,
    pub topics: Vec<TopicEntry>,
}

#[derive(Clone)]
pub struct CommandDispatcher {
    broker: Arc<Broker>,
    users: Arc<UserDirectory>,
}

impl CommandDispatcher {
    pub fn new(broker: Arc<Broker>, users: Arc<UserDirectory>) -> Self {
        Self { broker, users }
    }

    /// Execute one command on behalf of the connection identified by
    /// `client_id`. Always returns a response record; errors are carried
    /// inside it.
    pub fn execute(&self, client_id: &str, payload: &[u8]) -> Vec<u8> {
        let request: CliRequest = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => return error_response(&format!("malformed command: {e}")),
        };

        let caller = match self.broker.client(client_id) {
            Some(client) => client,
            None => return error_response(&format!("unknown client '{client_id}'")),
        };
        if !caller.user.admin {
            return error_response(&format!("user '{}' is not admin", caller.user.name));
        }

        match request.kind {
            COMMAND_ADD_USER => self.add_user(payload),
            COMMAND_REMOVE_USER => self.remove_user(&caller.user.name, payload),
            COMMAND_LIST_USERS => self.list_users(),
            COMMAND_LIST_CONNECTIONS => self.list_connections(),
            COMMAND_LIST_TOPICS => self.list_topics(),
            other => {
                error!("unknown cli command type: {other}");
                error_response(&format!("unknown cli command type: {other}"))
            }
        }
    }

    fn add_user(&self, payload: &[u8]) -> Vec<u8> {
        let request: AddUserRequest = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => return error_response(&format!("malformed add-user command: {e}")),
        };
        match self.users.add_user(&request.name, request.admin) {
            Ok(private_key_pem) => encode_response(&AddUserResponse {
                status: CliResponse::default(),
                private_key_pem,
            }),
            Err(e) => error_response(&e.to_string()),
        }
    }

    fn remove_user(&self, caller_name: &str, payload: &[u8]) -> Vec<u8> {
        let request: RemoveUserRequest = match serde_json::from_slice(payload) {
            Ok(r) => r,
            Err(e) => return error_response(&format!("malformed remove-user command: {e}")),
        };
        if request.name == caller_name {
            return error_response(&format!("user '{caller_name}' cannot be removed"));
        }
        match self.users.remove_user(&request.name) {
            Ok(()) => encode_response(&CliResponse::default()),
            Err(e) => error_response(&e.to_string()),
        }
    }

    fn list_users(&self) -> Vec<u8> {
        let users = self
            .users
            .all_users()
            .into_iter()
            .map(|u| UserEntry {
                name: u.name,
                admin: u.admin,
            })
            .collect();
        encode_response(&ListUsersResponse {
            status: CliResponse::default(),
            users,
        })
    }

    fn list_connections(&self) -> Vec<u8> {
        let connections = self
            .broker
            .all_clients()
            .into_iter()
            .map(|c| ConnectionEntry {
                id: c.id,
                username: c.user.name,
                admin: c.user.admin,
            })
            .collect();
        encode_response(&ListConnectionsResponse {
            status: CliResponse::default(),
            connections,
        })
    }

    fn list_topics(&self) -> Vec<u8> {
        let topics = self
            .broker
            .all_topics()
            .into_iter()
            .map(|t| TopicEntry {
                topic: t.topic,
                retained: t.retained,
                persistent: t.persistent,
            })
            .collect();
        encode_response(&ListTopicsResponse {
            status: CliResponse::default(),
            topics,
        })
    }
}

fn encode_response<T: Serialize>(response: &T) -> Vec<u8> {
    serde_json::to_vec(response).unwrap_or_default()
}

fn error_response(message: &str) -> Vec<u8> {
    encode_response(&CliResponse {
        error: true,
        error_message: message.to_string(),
    })
}
