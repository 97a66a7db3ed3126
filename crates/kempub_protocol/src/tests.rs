use crate::cipher::{Cipher, KemCipher, PlainCipher, SessionCipher};
use crate::codec::{
    receive, Message, MessageKind, Properties, MAX_CLIENT_ID_LENGTH, MAX_PAYLOAD_LENGTH,
    MAX_TOPIC_LENGTH,
};
use crate::error::ProtocolError;
use crate::keys;

fn sample_message() -> Message {
    Message {
        properties: Properties {
            retained: true,
            persistent: false,
        },
        topic: "sensors/temp/kitchen".to_string(),
        payload: b"21.5".to_vec(),
        client_id: "client-1".to_string(),
        subscription_id: "sub-1".to_string(),
        ..Message::new(MessageKind::Publish)
    }
}

#[test]
fn test_kind_from_u8_roundtrip() {
    for value in 0u8..=18 {
        let kind = MessageKind::from_u8(value).unwrap();
        assert_eq!(kind as u8, value);
    }
    assert!(MessageKind::from_u8(19).is_none());
    assert!(MessageKind::from_u8(255).is_none());
}

#[test]
fn test_properties_byte_roundtrip() {
    let all = [
        Properties {
            retained: false,
            persistent: false,
        },
        Properties {
            retained: true,
            persistent: false,
        },
        Properties {
            retained: false,
            persistent: true,
        },
        Properties {
            retained: true,
            persistent: true,
        },
    ];
    for props in all {
        assert_eq!(Properties::from_byte(props.to_byte()), props);
    }
    assert_eq!(Properties::from_byte(0x01).to_byte(), 0x01);
    assert_eq!(Properties::from_byte(0x02).to_byte(), 0x02);
}

#[test]
fn test_encode_decode_roundtrip() {
    let msg = sample_message();
    let encoded = msg.encode().unwrap();
    let decoded = Message::decode(&encoded).unwrap();
    assert_eq!(decoded, msg);
}

#[test]
fn test_decode_truncated_frame() {
    let encoded = sample_message().encode().unwrap();
    for cut in [0, 1, 5, encoded.len() - 1] {
        let err = Message::decode(&encoded[..cut]).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated), "cut at {cut}");
    }
}

#[test]
fn test_topic_length_bounds() {
    let mut msg = sample_message();
    msg.topic = "t".repeat(MAX_TOPIC_LENGTH);
    assert!(msg.encode().is_ok());

    msg.topic = "t".repeat(MAX_TOPIC_LENGTH + 1);
    assert!(matches!(
        msg.encode().unwrap_err(),
        ProtocolError::FieldTooLong { field: "topic", .. }
    ));
}

#[test]
fn test_payload_length_bounds() {
    let mut msg = sample_message();
    msg.payload = vec![0u8; MAX_PAYLOAD_LENGTH];
    assert!(msg.encode().is_ok());

    msg.payload = vec![0u8; MAX_PAYLOAD_LENGTH + 1];
    assert!(matches!(
        msg.encode().unwrap_err(),
        ProtocolError::FieldTooLong {
            field: "payload",
            ..
        }
    ));
}

#[test]
fn test_client_id_length_bounds() {
    let mut msg = sample_message();
    msg.client_id = "c".repeat(MAX_CLIENT_ID_LENGTH);
    assert!(msg.encode().is_ok());

    msg.client_id = "c".repeat(MAX_CLIENT_ID_LENGTH + 1);
    assert!(msg.encode().is_err());
}

#[tokio::test]
async fn test_send_receive_plain() {
    let (mut a, mut b) = tokio::io::duplex(1 << 16);
    let msg = sample_message();
    msg.send(&mut a, &PlainCipher).await.unwrap();
    let received = receive(&mut b, &PlainCipher).await.unwrap();
    assert_eq!(received, msg);
}

#[tokio::test]
async fn test_send_receive_session_cipher() {
    let key = [7u8; 32];
    let (mut a, mut b) = tokio::io::duplex(1 << 16);
    let msg = sample_message();
    msg.send(&mut a, &SessionCipher::new(key)).await.unwrap();
    let received = receive(&mut b, &SessionCipher::new(key)).await.unwrap();
    assert_eq!(received, msg);
}

#[tokio::test]
async fn test_send_oversized_frame_refused() {
    let (mut a, _b) = tokio::io::duplex(1 << 16);
    let mut msg = sample_message();
    // Within the payload bound but beyond what one u16-framed unit can carry.
    msg.payload = vec![0u8; 100_000];
    let err = msg.send(&mut a, &PlainCipher).await.unwrap_err();
    assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
}

#[tokio::test]
async fn test_receive_on_closed_stream() {
    let (a, mut b) = tokio::io::duplex(1 << 16);
    drop(a);
    let err = receive(&mut b, &PlainCipher).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Closed));
}

#[test]
fn test_session_cipher_roundtrip() {
    let cipher = SessionCipher::new([42u8; 32]);
    let plaintext = b"the quick brown fox";
    let sealed = cipher.encrypt(plaintext).unwrap();
    assert_ne!(&sealed[12..], plaintext.as_slice());
    assert_eq!(cipher.decrypt(&sealed).unwrap(), plaintext);
}

#[test]
fn test_session_cipher_rejects_any_bit_flip() {
    let cipher = SessionCipher::new([42u8; 32]);
    let sealed = cipher.encrypt(b"payload").unwrap();

    // Every bit of the sealed frame, nonce included, must be covered.
    for byte in 0..sealed.len() {
        for bit in 0..8 {
            let mut tampered = sealed.clone();
            tampered[byte] ^= 1 << bit;
            assert!(
                matches!(
                    cipher.decrypt(&tampered).unwrap_err(),
                    ProtocolError::DecryptionFailed
                ),
                "flip at byte {byte} bit {bit} was accepted"
            );
        }
    }
}

#[test]
fn test_session_cipher_short_ciphertext() {
    let cipher = SessionCipher::new([1u8; 32]);
    assert!(cipher.decrypt(&[0u8; 4]).is_err());
    assert!(cipher.decrypt(&[]).is_err());
}

#[test]
fn test_session_cipher_disabled_passthrough() {
    let mut cipher = SessionCipher::new([9u8; 32]);
    cipher.set_enabled(false);
    assert_eq!(cipher.encrypt(b"abc").unwrap(), b"abc");
    assert_eq!(cipher.decrypt(b"abc").unwrap(), b"abc");

    cipher.set_enabled(true);
    assert_ne!(cipher.encrypt(b"abc").unwrap(), b"abc");
}

#[test]
fn test_session_cipher_aad_binding() {
    let cipher = SessionCipher::new([3u8; 32]);
    let sealed = cipher.encrypt_with_aad(b"body", b"topic/a").unwrap();
    assert_eq!(cipher.decrypt_with_aad(&sealed, b"topic/a").unwrap(), b"body");
    assert!(cipher.decrypt_with_aad(&sealed, b"topic/b").is_err());
}

#[test]
fn test_kem_cipher_roundtrip() {
    let (server_pub, server_priv) = keys::generate_key_pair();
    let (client_pub, client_priv) = keys::generate_key_pair();

    // Client encrypts toward the server, server decrypts with its own key.
    let to_server = KemCipher::with_peer(client_priv, server_pub);
    let at_server = KemCipher::with_peer(server_priv, client_pub);

    let sealed = to_server.encrypt(b"authenticate alice").unwrap();
    assert_eq!(at_server.decrypt(&sealed).unwrap(), b"authenticate alice");

    // And the reverse direction, with fresh encapsulation per frame.
    let sealed_a = at_server.encrypt(b"ack").unwrap();
    let sealed_b = at_server.encrypt(b"ack").unwrap();
    assert_ne!(sealed_a, sealed_b);
    assert_eq!(to_server.decrypt(&sealed_a).unwrap(), b"ack");
}

#[test]
fn test_kem_cipher_decrypt_only_refuses_encrypt() {
    let (_, server_priv) = keys::generate_key_pair();
    let cipher = KemCipher::new(server_priv);
    assert!(cipher.encrypt(b"anything").is_err());
}

#[test]
fn test_kem_cipher_rejects_tampering() {
    let (server_pub, server_priv) = keys::generate_key_pair();
    let (_, client_priv) = keys::generate_key_pair();

    let to_server = KemCipher::with_peer(client_priv, server_pub);
    let at_server = KemCipher::new(server_priv);

    let sealed = to_server.encrypt(b"hello").unwrap();

    // Tamper inside the KEM ciphertext and inside the AEAD body.
    for index in [0, keys::kem_ciphertext_length() + 2, sealed.len() - 1] {
        let mut tampered = sealed.clone();
        tampered[index] ^= 0x80;
        assert!(at_server.decrypt(&tampered).is_err(), "tamper at {index}");
    }

    // Far too short to contain a KEM ciphertext at all.
    assert!(at_server.decrypt(&sealed[..10]).is_err());
}

#[test]
fn test_key_pem_roundtrip() {
    let (public, private) = keys::generate_key_pair();

    let public2 = keys::KyberPublicKey::from_pem(public.to_pem().as_bytes()).unwrap();
    let private2 = keys::KyberPrivateKey::from_pem(private.to_pem().as_bytes()).unwrap();

    // The reconstructed pair must still agree on a session key.
    let (key, ct) = keys::encapsulate(&public2);
    assert_eq!(keys::decapsulate(&private2, &ct).unwrap(), key);
}

#[test]
fn test_key_pem_wrong_tag() {
    let (public, private) = keys::generate_key_pair();
    assert!(keys::KyberPublicKey::from_pem(private.to_pem().as_bytes()).is_err());
    assert!(keys::KyberPrivateKey::from_pem(public.to_pem().as_bytes()).is_err());
    assert!(keys::KyberPublicKey::from_pem(b"not pem at all").is_err());
}

#[test]
fn test_key_save_load() {
    let dir = tempfile::tempdir().unwrap();
    let pub_path = dir.path().join("pub.pem");
    let priv_path = dir.path().join("priv.pem");

    let (public, private) = keys::generate_key_pair();
    public.save(pub_path.to_str().unwrap()).unwrap();
    private.save(priv_path.to_str().unwrap()).unwrap();

    let public2 = keys::KyberPublicKey::load(pub_path.to_str().unwrap()).unwrap();
    let private2 = keys::KyberPrivateKey::load(priv_path.to_str().unwrap()).unwrap();

    let (key, ct) = keys::encapsulate(&public2);
    assert_eq!(keys::decapsulate(&private2, &ct).unwrap(), key);
}
