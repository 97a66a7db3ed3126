//! Two-channel broker client
//!
//! `connect` opens the command socket, walks the CONNECT -> AUTHENTICATE ->
//! SESSION_KEY handshake, then opens the publish socket against the address
//! the broker advertised in AUTHENTICATE_ACK and repeats the handshake
//! there. Each socket derives its own session key. A background task drains
//! the publish socket into an in-memory channel consumed via [`Client::recv`].

use kempub_protocol::cipher::{KemCipher, PlainCipher, SessionCipher};
use kempub_protocol::codec::{receive, Message, MessageKind, Properties};
use kempub_protocol::keys::{self, KyberPrivateKey, KyberPublicKey};
use kempub_protocol::net::{self, Stream};
use kempub_protocol::ProtocolError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::ClientError;

/// Capacity of the in-memory buffer between the publish-socket reader and
/// [`Client::recv`].
const INCOMING_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// "tcp" or "unix", matching the broker's listeners.
    pub network: String,
    /// Address of the broker's command listener.
    pub command_addr: String,
    /// User to authenticate as.
    pub user: String,
    /// The user's private-key PEM as handed out at creation time.
    pub private_key_pem: String,
    /// Client id; a random UUID when not set.
    pub client_id: Option<String>,
}

impl ClientOptions {
    pub fn new(command_addr: &str, user: &str, private_key_pem: &str) -> Self {
        Self {
            network: "tcp".to_string(),
            command_addr: command_addr.to_string(),
            user: user.to_string(),
            private_key_pem: private_key_pem.to_string(),
            client_id: None,
        }
    }

    pub(crate) fn effective_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

pub struct Client {
    client_id: String,
    command: Stream,
    session: SessionCipher,
    incoming: mpsc::Receiver<Message>,
    reader: JoinHandle<()>,
}

impl Client {
    /// Open both channels and complete their handshakes.
    pub async fn connect(options: ClientOptions) -> Result<Client, ClientError> {
        let client_id = options.effective_client_id();
        let private_key = KyberPrivateKey::from_pem(options.private_key_pem.as_bytes())?;

        let mut command = net::connect(&options.network, &options.command_addr).await?;
        let (session, publish_addr) =
            handshake(&mut command, &client_id, &options.user, &private_key).await?;
        debug!("command channel established, publish channel at {publish_addr}");

        let mut publish = net::connect(&options.network, &publish_addr).await?;
        let (publish_session, _) =
            handshake(&mut publish, &client_id, &options.user, &private_key).await?;

        let (tx, incoming) = mpsc::channel(INCOMING_CAPACITY);
        let reader = tokio::spawn(async move {
            loop {
                match receive(&mut publish, &publish_session).await {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(ProtocolError::Closed) => break,
                    Err(e) => {
                        error!("publish channel receive error: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Client {
            client_id,
            command,
            session,
            incoming,
            reader,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Publish a payload. Waits for the broker's PUBLISH_ACK.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        properties: Properties,
    ) -> Result<(), ClientError> {
        let msg = Message {
            properties,
            topic: topic.to_string(),
            payload: payload.to_vec(),
            client_id: self.client_id.clone(),
            ..Message::new(MessageKind::Publish)
        };
        msg.send(&mut self.command, &self.session).await?;
        self.expect_ack(MessageKind::PublishAck, "PUBLISH_ACK").await?;
        Ok(())
    }

    /// Subscribe to a topic pattern; returns the server-assigned
    /// subscription id.
    pub async fn subscribe(&mut self, pattern: &str) -> Result<String, ClientError> {
        let msg = Message {
            topic: pattern.to_string(),
            client_id: self.client_id.clone(),
            ..Message::new(MessageKind::Subscribe)
        };
        msg.send(&mut self.command, &self.session).await?;
        let ack = self
            .expect_ack(MessageKind::SubscribeAck, "SUBSCRIBE_ACK")
            .await?;
        Ok(ack.subscription_id)
    }

    pub async fn unsubscribe(
        &mut self,
        pattern: &str,
        subscription_id: &str,
    ) -> Result<(), ClientError> {
        let msg = Message {
            topic: pattern.to_string(),
            client_id: self.client_id.clone(),
            subscription_id: subscription_id.to_string(),
            ..Message::new(MessageKind::Unsubscribe)
        };
        msg.send(&mut self.command, &self.session).await?;
        self.expect_ack(MessageKind::UnsubscribeAck, "UNSUBSCRIBE_ACK")
            .await?;
        Ok(())
    }

    pub async fn ping(&mut self) -> Result<(), ClientError> {
        let msg = Message {
            client_id: self.client_id.clone(),
            ..Message::new(MessageKind::Ping)
        };
        msg.send(&mut self.command, &self.session).await?;
        self.expect_ack(MessageKind::Pong, "PONG").await?;
        Ok(())
    }

    /// Run an administrative command; returns the raw response record.
    pub async fn send_command(&mut self, payload: &[u8]) -> Result<Vec<u8>, ClientError> {
        let msg = Message {
            payload: payload.to_vec(),
            client_id: self.client_id.clone(),
            ..Message::new(MessageKind::CliCommand)
        };
        msg.send(&mut self.command, &self.session).await?;
        let ack = self
            .expect_ack(MessageKind::CliCommandAck, "CLI_COMMAND_ACK")
            .await?;
        Ok(ack.payload)
    }

    /// Next message pushed by the broker on the publish channel. `None`
    /// after the channel closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.incoming.recv().await
    }

    /// Announce the disconnect and tear both channels down.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        let msg = Message {
            client_id: self.client_id.clone(),
            ..Message::new(MessageKind::Disconnect)
        };
        msg.send(&mut self.command, &self.session).await?;
        self.reader.abort();
        Ok(())
    }

    async fn expect_ack(
        &mut self,
        kind: MessageKind,
        expected: &'static str,
    ) -> Result<Message, ClientError> {
        let ack = receive(&mut self.command, &self.session).await?;
        if ack.kind != kind {
            return Err(ClientError::UnexpectedKind {
                expected,
                got: ack.kind,
            });
        }
        Ok(ack)
    }
}

/// Client side of the three handshake phases. Returns the session cipher
/// and the publish-channel address from AUTHENTICATE_ACK.
async fn handshake(
    stream: &mut Stream,
    client_id: &str,
    user: &str,
    private_key: &KyberPrivateKey,
) -> Result<(SessionCipher, String), ClientError> {
    // CONNECT under the pass-through cipher; the ack carries the broker's
    // public-key PEM.
    let connect = Message {
        client_id: client_id.to_string(),
        ..Message::new(MessageKind::Connect)
    };
    connect.send(stream, &PlainCipher).await?;
    let connect_ack = receive(stream, &PlainCipher).await?;
    if connect_ack.kind != MessageKind::ConnectAck {
        return Err(ClientError::UnexpectedKind {
            expected: "CONNECT_ACK",
            got: connect_ack.kind,
        });
    }
    let broker_public = KyberPublicKey::from_pem(&connect_ack.payload)?;

    // AUTHENTICATE under the handshake cipher; we encrypt toward the
    // broker, the broker answers toward our public key.
    let kem = KemCipher::with_peer(private_key.clone(), broker_public.clone());
    let auth = Message {
        payload: user.as_bytes().to_vec(),
        client_id: client_id.to_string(),
        ..Message::new(MessageKind::Authenticate)
    };
    auth.send(stream, &kem).await?;
    let auth_ack = receive(stream, &kem).await?;
    if auth_ack.kind != MessageKind::AuthenticateAck {
        return Err(ClientError::UnexpectedKind {
            expected: "AUTHENTICATE_ACK",
            got: auth_ack.kind,
        });
    }
    let publish_addr = String::from_utf8_lossy(&auth_ack.payload).into_owned();

    // SESSION_KEY: encapsulate against the broker, both ends now hold the
    // 32-byte session key.
    let (key, kem_ct) = keys::encapsulate(&broker_public);
    let session_key = Message {
        payload: kem_ct,
        client_id: client_id.to_string(),
        ..Message::new(MessageKind::SessionKey)
    };
    session_key.send(stream, &kem).await?;
    let key_ack = receive(stream, &kem).await?;
    if key_ack.kind != MessageKind::SessionKeyAck {
        return Err(ClientError::UnexpectedKind {
            expected: "SESSION_KEY_ACK",
            got: key_ack.kind,
        });
    }

    Ok((SessionCipher::new(key), publish_addr))
}
