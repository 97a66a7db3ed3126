//! Listeners and connection state machines
//!
//! Two listeners are bound at startup. Every connection on either runs the
//! same three handshake phases:
//!
//! 1. CONNECT under the pass-through cipher; the ack carries the broker's
//!    public-key PEM
//! 2. AUTHENTICATE under a decrypt-only KEM cipher; after the user lookup
//!    the cipher is rebound with the user's public key and the ack carries
//!    the publish-channel address
//! 3. SESSION_KEY: the payload is decapsulated into the 32-byte session
//!    key; the ack is the last frame under the handshake cipher
//!
//! After the handshake the command channel runs a receive-and-dispatch
//! loop; the publish channel is write-only and drains the client's
//! outbound queue. The two sockets of one client share nothing but the
//! peer-chosen client id.

use std::sync::Arc;

use kempub_broker::Broker;
use kempub_config::Settings;
use kempub_protocol::cipher::{KemCipher, PlainCipher, SessionCipher};
use kempub_protocol::codec::{receive, Message, MessageKind};
use kempub_protocol::keys::{self, KyberPrivateKey, KyberPublicKey};
use kempub_protocol::net::{Listener, Stream};
use kempub_users::{User, UserDirectory};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::commands::CommandDispatcher;
use crate::error::TransportError;

pub struct Transport {
    network: String,
    command_addr: String,
    publish_addr: String,
    broker: Arc<Broker>,
    users: Arc<UserDirectory>,
    private_key: KyberPrivateKey,
    public_key_pem: Vec<u8>,
}

/// Running listeners. Dropping the handle does not stop them; call
/// [`TransportHandle::shutdown`].
pub struct TransportHandle {
    /// Address the command listener actually bound.
    pub command_addr: String,
    /// Address the publish listener actually bound; this is what clients
    /// are told in AUTHENTICATE_ACK.
    pub publish_addr: String,
    network: String,
    command_task: JoinHandle<()>,
    publish_task: JoinHandle<()>,
}

impl Transport {
    /// Load the broker's key pair from the configured PEM files and prepare
    /// the listeners' configuration. Key-file problems are fatal here, at
    /// startup.
    pub fn new(
        settings: &Settings,
        broker: Arc<Broker>,
        users: Arc<UserDirectory>,
    ) -> Result<Self, TransportError> {
        let private_key = KyberPrivateKey::load(&settings.crypto.private_key_file)?;
        let public_key_pem = std::fs::read(&settings.crypto.public_key_file)?;
        Ok(Self {
            network: settings.transport.network.clone(),
            command_addr: settings.transport.command_addr.clone(),
            publish_addr: settings.transport.publish_addr.clone(),
            broker,
            users,
            private_key,
            public_key_pem,
        })
    }

    /// Bind both listeners and start their accept loops.
    pub async fn start(self) -> Result<TransportHandle, TransportError> {
        let publish_listener = Listener::bind(&self.network, &self.publish_addr).await?;
        let publish_addr = publish_listener.local_addr_string()?;
        let command_listener = Listener::bind(&self.network, &self.command_addr).await?;
        let command_addr = command_listener.local_addr_string()?;

        let ctx = Arc::new(ConnCtx {
            broker: self.broker.clone(),
            users: self.users.clone(),
            dispatcher: CommandDispatcher::new(self.broker, self.users),
            private_key: self.private_key,
            public_key_pem: self.public_key_pem,
            publish_addr: publish_addr.clone(),
        });

        info!("transport listening on {command_addr} (command), {publish_addr} (publish)");

        let command_task = {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                loop {
                    match command_listener.accept().await {
                        Ok(stream) => {
                            let ctx = ctx.clone();
                            tokio::spawn(handle_command_connection(stream, ctx));
                        }
                        Err(e) => {
                            info!("command accept error: {e}");
                        }
                    }
                }
            })
        };

        let publish_task = tokio::spawn(async move {
            loop {
                match publish_listener.accept().await {
                    Ok(stream) => {
                        let ctx = ctx.clone();
                        tokio::spawn(handle_publish_connection(stream, ctx));
                    }
                    Err(e) => {
                        info!("publish accept error: {e}");
                    }
                }
            }
        });

        Ok(TransportHandle {
            command_addr,
            publish_addr,
            network: self.network,
            command_task,
            publish_task,
        })
    }
}

impl TransportHandle {
    /// Stop accepting connections and unlink unix socket files. In-flight
    /// connections are closed by their own task cancellation when the
    /// process winds down.
    pub async fn shutdown(self) {
        self.command_task.abort();
        self.publish_task.abort();
        let _ = self.command_task.await;
        let _ = self.publish_task.await;
        if self.network == "unix" {
            let _ = std::fs::remove_file(&self.command_addr);
            let _ = std::fs::remove_file(&self.publish_addr);
        }
        info!("transport shut down");
    }
}

pub(crate) struct ConnCtx {
    pub(crate) broker: Arc<Broker>,
    pub(crate) users: Arc<UserDirectory>,
    pub(crate) dispatcher: CommandDispatcher,
    pub(crate) private_key: KyberPrivateKey,
    pub(crate) public_key_pem: Vec<u8>,
    pub(crate) publish_addr: String,
}

async fn handle_command_connection(mut stream: Stream, ctx: Arc<ConnCtx>) {
    if let Err(e) = run_command_connection(&mut stream, &ctx).await {
        error!("command connection closed: {e}");
    }
}

async fn handle_publish_connection(mut stream: Stream, ctx: Arc<ConnCtx>) {
    if let Err(e) = run_publish_connection(&mut stream, &ctx).await {
        error!("publish connection closed: {e}");
    }
}

/// CONNECT phase, shared by both channels: only the client id matters; the
/// ack carries the broker's public-key PEM verbatim.
async fn connect_phase<S>(stream: &mut S, ctx: &ConnCtx) -> Result<Message, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let msg = receive(stream, &PlainCipher).await?;
    if msg.kind != MessageKind::Connect {
        return Err(TransportError::UnexpectedKind {
            expected: "CONNECT",
            got: kind_name(msg.kind),
        });
    }
    let ack = Message {
        payload: ctx.public_key_pem.clone(),
        client_id: msg.client_id.clone(),
        ..Message::new(MessageKind::ConnectAck)
    };
    ack.send(stream, &PlainCipher).await?;
    Ok(msg)
}

/// AUTHENTICATE phase, shared by both channels: receive under a
/// decrypt-only KEM cipher, look the user up and return a cipher rebound
/// with the user's public key. The ack is sent by the caller.
async fn authenticate_phase<S>(
    stream: &mut S,
    ctx: &ConnCtx,
) -> Result<(Message, User, KemCipher), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let cipher = KemCipher::new(ctx.private_key.clone());
    let msg = receive(stream, &cipher).await?;
    if msg.kind != MessageKind::Authenticate {
        return Err(TransportError::UnexpectedKind {
            expected: "AUTHENTICATE",
            got: kind_name(msg.kind),
        });
    }
    let user_name = String::from_utf8_lossy(&msg.payload).into_owned();
    let user = ctx
        .users
        .lookup(&user_name)
        .ok_or_else(|| TransportError::UnknownUser(user_name.clone()))?;
    let peer_public: KyberPublicKey = user
        .public_key
        .clone()
        .ok_or_else(|| TransportError::UnusableKey(user_name))?;
    let bound = KemCipher::with_peer(ctx.private_key.clone(), peer_public);
    Ok((msg, user, bound))
}

fn authenticate_ack(ctx: &ConnCtx, client_id: &str) -> Message {
    Message {
        client_id: client_id.to_string(),
        payload: ctx.publish_addr.clone().into_bytes(),
        ..Message::new(MessageKind::AuthenticateAck)
    }
}

/// SESSION_KEY phase: decapsulate the peer's KEM ciphertext into the
/// session key and ack under the handshake cipher, which is then discarded.
async fn session_key_phase<S>(
    stream: &mut S,
    ctx: &ConnCtx,
    handshake: &KemCipher,
    client_id: &str,
) -> Result<SessionCipher, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let msg = receive(stream, handshake).await?;
    if msg.kind != MessageKind::SessionKey {
        return Err(TransportError::UnexpectedKind {
            expected: "SESSION_KEY",
            got: kind_name(msg.kind),
        });
    }
    let key = keys::decapsulate(&ctx.private_key, &msg.payload)?;
    let session = SessionCipher::new(key);

    let ack = Message {
        client_id: client_id.to_string(),
        ..Message::new(MessageKind::SessionKeyAck)
    };
    ack.send(stream, handshake).await?;
    Ok(session)
}

pub(crate) async fn run_command_connection<S>(stream: &mut S, ctx: &ConnCtx) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    connect_phase(stream, ctx).await?;
    let (auth, user, handshake) = authenticate_phase(stream, ctx).await?;
    let client_id = auth.client_id;
    info!("new connection for user '{}' as client '{client_id}'", user.name);

    ctx.broker.register_client(&client_id, user)?;
    let result = command_session(stream, ctx, &client_id, &handshake).await;
    ctx.broker.unregister_client(&client_id);
    info!("client '{client_id}' disconnected");
    result
}

async fn command_session<S>(
    stream: &mut S,
    ctx: &ConnCtx,
    client_id: &str,
    handshake: &KemCipher,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    authenticate_ack(ctx, client_id).send(stream, handshake).await?;
    let session = session_key_phase(stream, ctx, handshake, client_id).await?;

    loop {
        let msg = match receive(stream, &session).await {
            Ok(msg) => msg,
            Err(kempub_protocol::ProtocolError::Closed) => return Ok(()),
            Err(kempub_protocol::ProtocolError::Io(e)) => return Err(e.into()),
            Err(e) => {
                // A bad frame is fatal to that frame only; the stream is
                // still length-aligned, so keep serving the client.
                error!("client '{client_id}' receive error: {e}");
                continue;
            }
        };

        match msg.kind {
            MessageKind::Publish => {
                ctx.broker
                    .publish(msg.properties, &msg.topic, msg.payload, client_id)
                    .await;
                let ack = Message {
                    client_id: client_id.to_string(),
                    ..Message::new(MessageKind::PublishAck)
                };
                ack.send(stream, &session).await?;
            }
            MessageKind::Subscribe => match ctx.broker.subscribe(client_id, &msg.topic) {
                Ok(subscription_id) => {
                    let ack = Message {
                        client_id: client_id.to_string(),
                        subscription_id,
                        ..Message::new(MessageKind::SubscribeAck)
                    };
                    ack.send(stream, &session).await?;
                }
                Err(e) => {
                    error!("subscribe error for client '{client_id}': {e}");
                }
            },
            MessageKind::Unsubscribe => {
                ctx.broker
                    .unsubscribe(client_id, &msg.topic, &msg.subscription_id);
                let ack = Message {
                    client_id: client_id.to_string(),
                    ..Message::new(MessageKind::UnsubscribeAck)
                };
                ack.send(stream, &session).await?;
            }
            MessageKind::Ping => {
                let pong = Message {
                    client_id: client_id.to_string(),
                    ..Message::new(MessageKind::Pong)
                };
                pong.send(stream, &session).await?;
            }
            MessageKind::CliCommand => {
                let result = ctx.dispatcher.execute(client_id, &msg.payload);
                let ack = Message {
                    client_id: client_id.to_string(),
                    payload: result,
                    ..Message::new(MessageKind::CliCommandAck)
                };
                ack.send(stream, &session).await?;
            }
            MessageKind::Disconnect => {
                info!("client '{client_id}' requested disconnect");
                return Ok(());
            }
            other => {
                info!("unexpected message kind from client '{client_id}': {other:?}");
            }
        }
    }
}

pub(crate) async fn run_publish_connection<S>(stream: &mut S, ctx: &ConnCtx) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    connect_phase(stream, ctx).await?;
    let (auth, user, handshake) = authenticate_phase(stream, ctx).await?;
    let client_id = auth.client_id;
    if client_id.is_empty() {
        return Err(TransportError::EmptyClientId);
    }
    info!("new publish connection for user '{}' as client '{client_id}'", user.name);

    authenticate_ack(ctx, &client_id).send(stream, &handshake).await?;
    let session = session_key_phase(stream, ctx, &handshake, &client_id).await?;

    // The command channel registers the record; this socket only claims
    // the outbound queue. Both sockets proved possession of the user's
    // private key independently, the id is the only coupling.
    let mut outbound = match ctx.broker.take_publish_receiver(&client_id) {
        Some(receiver) => receiver,
        None => {
            warn!("broker client '{client_id}' not found");
            return Ok(());
        }
    };

    info!("client '{client_id}' connected to publish");
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = msg.send(stream, &session).await {
            error!("failed to publish message to client '{client_id}': {e}");
        }
    }
    // Outbound queue closed by unregister; the sender exits cleanly.
    Ok(())
}

fn kind_name(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Message => "MESSAGE",
        MessageKind::MessageAck => "MESSAGE_ACK",
        MessageKind::Connect => "CONNECT",
        MessageKind::ConnectAck => "CONNECT_ACK",
        MessageKind::Authenticate => "AUTHENTICATE",
        MessageKind::AuthenticateAck => "AUTHENTICATE_ACK",
        MessageKind::SessionKey => "SESSION_KEY",
        MessageKind::SessionKeyAck => "SESSION_KEY_ACK",
        MessageKind::Publish => "PUBLISH",
        MessageKind::PublishAck => "PUBLISH_ACK",
        MessageKind::Subscribe => "SUBSCRIBE",
        MessageKind::SubscribeAck => "SUBSCRIBE_ACK",
        MessageKind::Unsubscribe => "UNSUBSCRIBE",
        MessageKind::UnsubscribeAck => "UNSUBSCRIBE_ACK",
        MessageKind::Ping => "PING",
        MessageKind::Pong => "PONG",
        MessageKind::CliCommand => "CLI_COMMAND",
        MessageKind::CliCommandAck => "CLI_COMMAND_ACK",
        MessageKind::Disconnect => "DISCONNECT",
    }
}
