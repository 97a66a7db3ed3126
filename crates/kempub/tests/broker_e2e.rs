//! End-to-end scenarios over real sockets: a full broker on ephemeral
//! ports, driven through the client library.

use std::time::Duration;

use kempub::App;
use kempub_client::{Client, ClientOptions};
use kempub_config::Settings;
use kempub_persistence::Store;
use kempub_protocol::{keys, Properties};
use kempub_transport::commands::{
    AddUserRequest, CliRequest, CliResponse, ListUsersResponse, COMMAND_ADD_USER,
    COMMAND_LIST_USERS,
};
use kempub_users::UserDirectory;
use tempfile::TempDir;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

const RETAINED: Properties = Properties {
    retained: true,
    persistent: false,
};

const PERSISTENT: Properties = Properties {
    retained: false,
    persistent: true,
};

fn path(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_str().unwrap().to_string()
}

fn make_settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.transport.command_addr = "127.0.0.1:0".to_string();
    settings.transport.publish_addr = "127.0.0.1:0".to_string();
    settings.crypto.public_key_file = path(dir, "broker_public.pem");
    settings.crypto.private_key_file = path(dir, "broker_private.pem");
    settings.storage.db_file = path(dir, "broker.db");
    settings
}

/// Write broker keys and bootstrap the given users, returning their
/// private-key PEMs in order.
async fn setup(users: &[(&str, bool)]) -> (TempDir, Settings, Vec<String>) {
    let dir = tempfile::tempdir().unwrap();
    let settings = make_settings(&dir);

    let (public, private) = keys::generate_key_pair();
    public.save(&settings.crypto.public_key_file).unwrap();
    private.save(&settings.crypto.private_key_file).unwrap();

    let mut pems = Vec::new();
    {
        let store = Store::open(&settings.storage.db_file).await.unwrap();
        let directory = UserDirectory::new(store.clone());
        directory.start();
        for (name, admin) in users {
            pems.push(directory.add_user(name, *admin).unwrap());
        }
        store.shutdown().await;
    }

    (dir, settings, pems)
}

async fn connect(app: &App, user: &str, pem: &str, client_id: &str) -> Client {
    let mut options = ClientOptions::new(app.command_addr(), user, pem);
    options.client_id = Some(client_id.to_string());
    Client::connect(options).await.unwrap()
}

#[tokio::test]
async fn test_single_publish_subscribe() {
    let (_dir, settings, pems) = setup(&[("alice", false), ("bob", false)]).await;
    let app = App::start(&settings).await.unwrap();

    let mut alice = connect(&app, "alice", &pems[0], "alice-1").await;
    let mut bob = connect(&app, "bob", &pems[1], "bob-1").await;

    alice.subscribe("t/+").await.unwrap();
    bob.publish("t/x", b"hi", Properties::default()).await.unwrap();

    let msg = timeout(RECV_TIMEOUT, alice.recv()).await.unwrap().unwrap();
    assert_eq!(msg.topic, "t/x");
    assert_eq!(msg.payload, b"hi");

    alice.disconnect().await.unwrap();
    bob.disconnect().await.unwrap();
    app.shutdown().await;
}

#[tokio::test]
async fn test_retained_replay_to_late_subscriber() {
    let (_dir, settings, pems) = setup(&[("alice", false), ("bob", false)]).await;
    let app = App::start(&settings).await.unwrap();

    let mut bob = connect(&app, "bob", &pems[1], "bob-1").await;
    bob.publish("cfg/a", b"1", RETAINED).await.unwrap();

    let mut alice = connect(&app, "alice", &pems[0], "alice-1").await;
    alice.subscribe("cfg/#").await.unwrap();

    let msg = timeout(RECV_TIMEOUT, alice.recv()).await.unwrap().unwrap();
    assert_eq!(msg.topic, "cfg/a");
    assert_eq!(msg.payload, b"1");

    alice.disconnect().await.unwrap();
    bob.disconnect().await.unwrap();
    app.shutdown().await;
}

#[tokio::test]
async fn test_persistent_message_survives_restart() {
    let (_dir, settings, pems) = setup(&[("alice", false), ("bob", false)]).await;

    {
        let app = App::start(&settings).await.unwrap();
        let mut bob = connect(&app, "bob", &pems[1], "bob-1").await;
        bob.publish("d/a", b"x", PERSISTENT).await.unwrap();
        bob.disconnect().await.unwrap();

        // Let the store's router move the publish off the add channel
        // before the clean shutdown drains the cache.
        tokio::time::sleep(Duration::from_millis(200)).await;
        app.shutdown().await;
    }

    let app = App::start(&settings).await.unwrap();
    let mut alice = connect(&app, "alice", &pems[0], "alice-1").await;
    alice.subscribe("d/#").await.unwrap();

    let msg = timeout(RECV_TIMEOUT, alice.recv()).await.unwrap().unwrap();
    assert_eq!(msg.topic, "d/a");
    assert_eq!(msg.payload, b"x");

    alice.disconnect().await.unwrap();
    app.shutdown().await;
}

#[tokio::test]
async fn test_admin_commands_enforced_and_served() {
    let (_dir, settings, pems) = setup(&[("root", true), ("bob", false)]).await;
    let app = App::start(&settings).await.unwrap();

    let mut root = connect(&app, "root", &pems[0], "root-1").await;
    let mut bob = connect(&app, "bob", &pems[1], "bob-1").await;

    // Non-admin is refused, connection stays usable.
    let request = serde_json::to_vec(&AddUserRequest {
        kind: COMMAND_ADD_USER,
        name: "eve".to_string(),
        admin: false,
    })
    .unwrap();
    let response: CliResponse =
        serde_json::from_slice(&bob.send_command(&request).await.unwrap()).unwrap();
    assert!(response.error);
    assert!(response.error_message.contains("not admin"));
    bob.ping().await.unwrap();

    // Admin succeeds and sees the new user in the listing.
    let response: CliResponse =
        serde_json::from_slice(&root.send_command(&request).await.unwrap()).unwrap();
    assert!(!response.error);

    let request = serde_json::to_vec(&CliRequest {
        kind: COMMAND_LIST_USERS,
    })
    .unwrap();
    let listing: ListUsersResponse =
        serde_json::from_slice(&root.send_command(&request).await.unwrap()).unwrap();
    assert!(listing.users.iter().any(|u| u.name == "eve"));

    root.disconnect().await.unwrap();
    bob.disconnect().await.unwrap();
    app.shutdown().await;
}

#[tokio::test]
async fn test_publisher_never_blocks_on_slow_consumer() {
    let (_dir, settings, pems) = setup(&[("alice", false), ("bob", false)]).await;
    let app = App::start(&settings).await.unwrap();

    let mut alice = connect(&app, "alice", &pems[0], "alice-1").await;
    let mut bob = connect(&app, "bob", &pems[1], "bob-1").await;

    alice.subscribe("burst/#").await.unwrap();

    // Alice never drains; every publish must still be acked promptly.
    for i in 0..100u32 {
        let ack = timeout(
            RECV_TIMEOUT,
            bob.publish("burst/x", &i.to_be_bytes(), Properties::default()),
        )
        .await
        .expect("publish ack stalled");
        ack.unwrap();
    }

    // The subscriber still receives a prefix of the stream in order.
    let first = timeout(RECV_TIMEOUT, alice.recv()).await.unwrap().unwrap();
    assert_eq!(first.payload, 0u32.to_be_bytes());

    alice.disconnect().await.unwrap();
    bob.disconnect().await.unwrap();
    app.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let (_dir, settings, pems) = setup(&[("alice", false), ("bob", false)]).await;
    let app = App::start(&settings).await.unwrap();

    let mut alice = connect(&app, "alice", &pems[0], "alice-1").await;
    let mut bob = connect(&app, "bob", &pems[1], "bob-1").await;

    let subscription = alice.subscribe("t/#").await.unwrap();
    alice.unsubscribe("t/#", &subscription).await.unwrap();

    bob.publish("t/x", b"hi", Properties::default()).await.unwrap();

    // Nothing may arrive for the dropped subscription.
    assert!(timeout(Duration::from_millis(500), alice.recv()).await.is_err());

    alice.disconnect().await.unwrap();
    bob.disconnect().await.unwrap();
    app.shutdown().await;
}
