use crate::store::{Store, StoredMessage, StoredUser};

use tempfile::tempdir;

fn message(topic: &str, payload: &[u8]) -> StoredMessage {
    StoredMessage {
        properties: 0x02,
        topic: topic.to_string(),
        payload: payload.to_vec(),
    }
}

#[tokio::test]
async fn test_user_records_roundtrip() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();

    let alice = StoredUser {
        name: "alice".to_string(),
        admin: true,
        public_key_pem: "-----BEGIN KYBER768 PUBLIC KEY-----\n".to_string(),
    };
    store.add_user(&alice).unwrap();

    let users = store.all_users();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0], alice);

    store.remove_user("alice").unwrap();
    assert!(store.all_users().is_empty());

    store.shutdown().await;
}

#[tokio::test]
async fn test_buffered_message_add_lands_after_flush() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();

    store
        .add_message_sender()
        .send(message("d/a", b"x"))
        .await
        .unwrap();

    // Give the router a moment to move the event into the cache, then
    // drain it explicitly instead of waiting for the 20s tick.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    store.flush_now();

    let messages = store.all_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "d/a");
    assert_eq!(messages[0].payload, b"x");

    store.shutdown().await;
}

#[tokio::test]
async fn test_newer_publish_overwrites_older() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();

    let tx = store.add_message_sender();
    tx.send(message("cfg/a", b"1")).await.unwrap();
    tx.send(message("cfg/a", b"2")).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    store.flush_now();

    let messages = store.all_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload, b"2");

    store.shutdown().await;
}

#[tokio::test]
async fn test_remove_deletes_immediately() {
    let dir = tempdir().unwrap();
    let store = Store::open(dir.path().to_str().unwrap()).await.unwrap();

    store
        .add_message_sender()
        .send(message("t/gone", b"v"))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    store.flush_now();
    assert_eq!(store.all_messages().len(), 1);

    store
        .remove_message_sender()
        .send("t/gone".to_string())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(store.all_messages().is_empty());

    store.shutdown().await;
}

#[tokio::test]
async fn test_messages_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().to_str().unwrap().to_string();

    {
        let store = Store::open(&path).await.unwrap();
        store
            .add_message_sender()
            .send(message("d/a", b"persisted"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // Shutdown performs the final drain; no explicit flush here.
        store.shutdown().await;
    }

    let store = Store::open(&path).await.unwrap();
    let messages = store.all_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "d/a");
    assert_eq!(messages[0].payload, b"persisted");
    store.shutdown().await;
}

#[test]
fn test_record_serialization_roundtrip() {
    let msg = message("round/trip", b"\x00\x01\xff");
    let data = serde_json::to_vec(&msg).unwrap();
    let parsed: StoredMessage = serde_json::from_slice(&data).unwrap();
    assert_eq!(parsed, msg);

    let user = StoredUser {
        name: "bob".to_string(),
        admin: false,
        public_key_pem: "pem".to_string(),
    };
    let data = serde_json::to_vec(&user).unwrap();
    let parsed: StoredUser = serde_json::from_slice(&data).unwrap();
    assert_eq!(parsed, user);
}
