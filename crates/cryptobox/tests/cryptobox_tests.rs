//! End-to-end tests for the cryptobox
//!
//! Two boxes over separate in-memory engines exchange messages the way two
//! devices would.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cryptobox::prelude::*;
use cryptobox::store::tables;
use proteus::derived::MacKey;
use proteus::keys::MAX_PREKEY_ID;
use proteus::message::Envelope;
use proteus::{DecryptError, ProteusError};
use tokio::sync::broadcast::error::TryRecvError;

fn new_box(engine: &Arc<MemoryEngine>, minimum_prekeys: u16) -> Cryptobox {
    Cryptobox::new(engine.clone(), CryptoboxConfig::with_minimum_prekeys(minimum_prekeys)).unwrap()
}

async fn created(minimum_prekeys: u16) -> (Arc<MemoryEngine>, Cryptobox) {
    let engine = Arc::new(MemoryEngine::new());
    let cbox = new_box(&engine, minimum_prekeys);
    cbox.create().await.unwrap();
    (engine, cbox)
}

fn last_resort_bundle(cbox: &Cryptobox) -> Vec<u8> {
    BASE64.decode(cbox.get_serialized_last_resort_prekey().unwrap().key).unwrap()
}

#[test_log::test(tokio::test)]
async fn test_hello_world_exchange() {
    let (_, alice) = created(1).await;
    let (_, bob) = created(1).await;
    alice.add_entropy(b"caller supplied entropy").unwrap();
    let mut bob_events = bob.subscribe();

    let bundle = last_resort_bundle(&bob);
    let ciphertext = alice
        .encrypt("session-a-b", b"Hello, World!", Some(&bundle))
        .await
        .unwrap();
    let plaintext = bob.decrypt("session-b-a", &ciphertext).await.unwrap();
    assert_eq!(plaintext, b"Hello, World!");

    match bob_events.try_recv() {
        Ok(CryptoboxEvent::NewSession(id)) => assert_eq!(id, "session-b-a"),
        other => panic!("unexpected event: {:?}", other),
    }
    // The last-resort key survives, so nothing needs refilling
    assert!(matches!(bob_events.try_recv(), Err(TryRecvError::Empty)));

    let reply = bob.encrypt("session-b-a", b"Hi Alice", None).await.unwrap();
    assert_eq!(alice.decrypt("session-a-b", &reply).await.unwrap(), b"Hi Alice");

    let session = alice.session_load("session-a-b").await.unwrap();
    assert_eq!(
        session.fingerprint_remote(),
        bob.identity().unwrap().public_key.fingerprint()
    );
    assert_eq!(
        session.fingerprint_local(),
        alice.identity().unwrap().public_key.fingerprint()
    );
}

#[test_log::test(tokio::test)]
async fn test_create_fills_pool_without_event() {
    let engine = Arc::new(MemoryEngine::new());
    let cbox = new_box(&engine, 10);
    let mut events = cbox.subscribe();

    let prekeys = cbox.create().await.unwrap();
    assert_eq!(prekeys.len(), 10);
    assert_eq!(prekeys.iter().filter(|p| p.key_id == MAX_PREKEY_ID).count(), 1);
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(engine.len(tables::PREKEYS), 10);
}

#[test_log::test(tokio::test)]
async fn test_load_replaces_missing_prekey() {
    let (engine, cbox) = created(10).await;
    let fingerprint = cbox.identity().unwrap().public_key.fingerprint();
    drop(cbox);

    assert!(engine.delete(tables::PREKEYS, "3").await.unwrap());

    let reloaded = new_box(&engine, 10);
    let mut events = reloaded.subscribe();
    let prekeys = reloaded.load().await.unwrap();
    assert_eq!(prekeys.len(), 10);
    assert_eq!(reloaded.identity().unwrap().public_key.fingerprint(), fingerprint);

    match events.try_recv() {
        Ok(CryptoboxEvent::NewPreKeys(fresh)) => {
            assert_eq!(fresh.len(), 1);
            assert_eq!(fresh[0].key_id, 9);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[test_log::test(tokio::test)]
async fn test_consumed_prekey_is_replaced() {
    let (_, alice) = created(1).await;
    let (bob_engine, bob) = created(3).await;
    let mut bob_events = bob.subscribe();

    let bundle = bob.get_prekey_bundle(0).await.unwrap().to_bytes().unwrap();
    let ciphertext = alice.encrypt("a-b", b"one-time", Some(&bundle)).await.unwrap();
    assert_eq!(bob.decrypt("b-a", &ciphertext).await.unwrap(), b"one-time");

    assert!(bob_engine.read(tables::PREKEYS, "0").await.unwrap().is_none());
    assert!(matches!(bob_events.try_recv(), Ok(CryptoboxEvent::NewSession(_))));
    match bob_events.try_recv() {
        Ok(CryptoboxEvent::NewPreKeys(fresh)) => {
            let ids: Vec<u16> = fresh.iter().map(|p| p.key_id).collect();
            assert_eq!(ids, vec![2]);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[test_log::test(tokio::test)]
async fn test_missing_prekey_fails_decrypt() {
    let (_, alice) = created(1).await;
    let (bob_engine, bob) = created(3).await;

    let bundle = bob.get_prekey_bundle(1).await.unwrap().to_bytes().unwrap();
    let ciphertext = alice.encrypt("a-b", b"lost", Some(&bundle)).await.unwrap();
    bob_engine.delete(tables::PREKEYS, "1").await.unwrap();

    let err = bob.decrypt("b-a", &ciphertext).await.unwrap_err();
    assert!(matches!(err, CryptoboxError::Proteus(ProteusError::PreKeyNotFound(1))));
    assert!(matches!(
        bob.session_load("b-a").await,
        Err(CryptoboxError::SessionNotFound(_))
    ));
}

#[test_log::test(tokio::test)]
async fn test_forged_message_leaves_stored_session_untouched() {
    let (alice_engine, alice) = created(1).await;
    let (_, bob) = created(1).await;
    let bundle = last_resort_bundle(&bob);

    let hello = alice.encrypt("a-b", b"hello", Some(&bundle)).await.unwrap();
    bob.decrypt("b-a", &hello).await.unwrap();

    // A new ratchet key on Bob's side, and a gap when m1 arrives first
    let m0 = bob.encrypt("b-a", b"zero", None).await.unwrap();
    let m1 = bob.encrypt("b-a", b"one", None).await.unwrap();
    let genuine = Envelope::from_bytes(&m1).unwrap();
    let forged = Envelope::new(&MacKey::new([0; 32]), genuine.message().clone())
        .unwrap()
        .to_bytes()
        .unwrap();

    let stored = alice_engine.read(tables::SESSIONS, "a-b").await.unwrap();
    let cached = alice.session_load("a-b").await.unwrap().session.to_bytes().unwrap();
    let err = alice.decrypt("a-b", &forged).await.unwrap_err();
    assert!(matches!(
        err,
        CryptoboxError::Proteus(ProteusError::Decrypt(DecryptError::InvalidSignature))
    ));
    assert_eq!(alice_engine.read(tables::SESSIONS, "a-b").await.unwrap(), stored);
    assert_eq!(
        alice.session_load("a-b").await.unwrap().session.to_bytes().unwrap(),
        cached
    );

    assert_eq!(alice.decrypt("a-b", &m1).await.unwrap(), b"one");
    assert_eq!(alice.decrypt("a-b", &m0).await.unwrap(), b"zero");
}

#[test_log::test(tokio::test)]
async fn test_empty_ciphertext_rejected() {
    let (_, cbox) = created(1).await;
    assert!(matches!(
        cbox.decrypt("anyone", &[]).await,
        Err(CryptoboxError::Decryption(_))
    ));
}

#[test_log::test(tokio::test)]
async fn test_malformed_bundle_rejected() {
    let (_, alice) = created(1).await;
    let err = alice
        .encrypt("a-b", b"hi", Some(&[0xff, 0x00, 0x13]))
        .await
        .unwrap_err();
    assert!(matches!(err, CryptoboxError::InvalidPreKeyFormat(_)));
}

#[test_log::test(tokio::test)]
async fn test_load_requires_identity_and_last_resort() {
    let engine = Arc::new(MemoryEngine::new());
    assert!(matches!(
        new_box(&engine, 1).load().await,
        Err(CryptoboxError::MissingIdentity)
    ));

    let (engine, cbox) = created(2).await;
    drop(cbox);
    engine
        .delete(tables::PREKEYS, &MAX_PREKEY_ID.to_string())
        .await
        .unwrap();
    assert!(matches!(
        new_box(&engine, 2).load().await,
        Err(CryptoboxError::MissingLastResortPreKey)
    ));
}

#[test_log::test(tokio::test)]
async fn test_bundle_reuses_existing_session() {
    let (_, alice) = created(1).await;
    let (_, bob) = created(1).await;
    let bundle = last_resort_bundle(&bob);

    let first = alice.encrypt("a-b", b"first", Some(&bundle)).await.unwrap();
    let tag = alice.session_load("a-b").await.unwrap().session.session_tag();
    let second = alice.encrypt("a-b", b"second", Some(&bundle)).await.unwrap();
    assert_eq!(alice.session_load("a-b").await.unwrap().session.session_tag(), tag);

    assert_eq!(bob.decrypt("b-a", &first).await.unwrap(), b"first");
    assert_eq!(bob.decrypt("b-a", &second).await.unwrap(), b"second");
}

#[test_log::test(tokio::test)]
async fn test_concurrent_encrypts_on_one_session() {
    let (_, alice) = created(1).await;
    let (_, bob) = created(1).await;
    let bundle = last_resort_bundle(&bob);

    let hello = alice.encrypt("a-b", b"hello", Some(&bundle)).await.unwrap();
    bob.decrypt("b-a", &hello).await.unwrap();

    let messages: Vec<String> = (0..10).map(|i| format!("message {}", i)).collect();
    let ciphertexts = futures::future::join_all(
        messages
            .iter()
            .map(|m| alice.encrypt("a-b", m.as_bytes(), None)),
    )
    .await;

    for (message, ciphertext) in messages.iter().zip(ciphertexts) {
        let plaintext = bob.decrypt("b-a", &ciphertext.unwrap()).await.unwrap();
        assert_eq!(plaintext, message.as_bytes());
    }
}

#[test_log::test(tokio::test)]
async fn test_deleted_session_is_gone() {
    let (_, alice) = created(1).await;
    let (_, bob) = created(1).await;
    let bundle = last_resort_bundle(&bob);

    alice.encrypt("a-b", b"hi", Some(&bundle)).await.unwrap();
    assert!(alice.session_delete("a-b").await.unwrap());
    assert!(!alice.session_delete("a-b").await.unwrap());
    assert!(matches!(
        alice.encrypt("a-b", b"again", None).await,
        Err(CryptoboxError::SessionNotFound(_))
    ));
}

#[test_log::test(tokio::test)]
async fn test_serialize_then_deserialize() {
    let (_, alice) = created(1).await;
    let (_, bob) = created(5).await;
    let bundle = last_resort_bundle(&bob);

    let hello = alice.encrypt("a-b", b"hello", Some(&bundle)).await.unwrap();
    bob.decrypt("b-a", &hello).await.unwrap();

    let snapshot = bob.serialize().await.unwrap();
    let json = serde_json::to_string(&snapshot).unwrap();
    let snapshot: SerializedCryptobox = serde_json::from_str(&json).unwrap();

    let restored = new_box(&Arc::new(MemoryEngine::new()), 5);
    let prekeys = restored.deserialize(&snapshot).await.unwrap();

    assert_eq!(
        restored.identity().unwrap().public_key.fingerprint(),
        bob.identity().unwrap().public_key.fingerprint()
    );
    let imported: BTreeSet<u16> = prekeys.iter().map(|p| p.key_id).collect();
    let original: BTreeSet<u16> = snapshot.prekeys.keys().copied().collect();
    assert_eq!(imported, original);
    assert_eq!(restored.last_resort_prekey().unwrap().key_id, MAX_PREKEY_ID);
    assert_eq!(restored.serialize().await.unwrap(), snapshot);

    let next = alice.encrypt("a-b", b"after restore", None).await.unwrap();
    assert_eq!(restored.decrypt("b-a", &next).await.unwrap(), b"after restore");
}

#[test_log::test(tokio::test)]
async fn test_standard_prekeys_exclude_last_resort() {
    let (_, cbox) = created(4).await;
    let bundles = cbox.get_serialized_standard_prekeys().await.unwrap();
    let ids: Vec<u16> = bundles.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![0, 1, 2]);

    let last_resort = cbox.get_serialized_last_resort_prekey().unwrap();
    assert_eq!(last_resort.id, MAX_PREKEY_ID);
    assert!(matches!(
        cbox.get_prekey_bundle(42).await,
        Err(CryptoboxError::PreKeyNotFound(42))
    ));
}
