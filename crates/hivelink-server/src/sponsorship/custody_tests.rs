//! Tests for custodial key management.

use std::sync::Arc;

use hivelink_crypto::{ChainPrivateKey, CredentialVault};

use super::side_effects::BACKUP_EMAIL;
use super::{CustodyError, CustodyService};
use crate::identity::IdentityCandidate;
use crate::storage::{AppDatabase, KeyType, NewCustodialKey};
use crate::testing::{FakeChain, RecordingNotifier};

struct Harness {
    db: AppDatabase,
    chain: Arc<FakeChain>,
    notifier: Arc<RecordingNotifier>,
    vault: Arc<CredentialVault>,
    service: CustodyService,
}

async fn harness() -> Harness {
    let db = AppDatabase::open_in_memory().await.unwrap();
    db.create_user("u-bob", "bob", None, Some("bob@example.com"))
        .await
        .unwrap();
    db.create_user("u-carol", "carol", None, None).await.unwrap();

    let chain = Arc::new(FakeChain::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let vault = Arc::new(CredentialVault::from_key(&[9u8; 32]));
    let service = CustodyService::new(db.clone(), chain.clone(), notifier.clone(), vault.clone());
    Harness {
        db,
        chain,
        notifier,
        vault,
        service,
    }
}

async fn link_chain_account(h: &Harness, user_id: &str, account: &str, key: &ChainPrivateKey) {
    h.db.insert_identity_if_absent(
        &IdentityCandidate::chain_account(account).to_new_identity(user_id, None),
    )
    .await
    .unwrap();
    h.chain
        .add_account(account, &[key.public_key().to_string()]);
}

async fn store_sponsored_key(h: &Harness, user_id: &str, account: &str, wif: &str) {
    let (encrypted_secret, iv, auth_tag) = h.vault.encrypt(wif.as_bytes()).unwrap().to_hex();
    h.db.upsert_custodial_key(&NewCustodialKey {
        user_id,
        hive_username: account,
        encrypted_secret: &encrypted_secret,
        iv: &iv,
        auth_tag: &auth_tag,
        key_type: KeyType::Sponsored,
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn store_requires_linked_chain_account() {
    let h = harness().await;
    let key = ChainPrivateKey::generate();
    let err = h
        .service
        .store_user_key("u-bob", &key.to_wif())
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::IdentityNotLinked));
}

#[tokio::test]
async fn store_checks_posting_authority() {
    let h = harness().await;
    let key = ChainPrivateKey::generate();
    link_chain_account(&h, "u-bob", "bobskates", &key).await;

    let err = h
        .service
        .store_user_key("u-bob", &ChainPrivateKey::generate().to_wif())
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::KeyMismatch { .. }));

    let err = h.service.store_user_key("u-bob", "not-a-wif").await.unwrap_err();
    assert!(matches!(err, CustodyError::InvalidKey(_)));

    let status = h.service.store_user_key("u-bob", &key.to_wif()).await.unwrap();
    assert!(status.stored);
    assert_eq!(status.custody, Some(KeyType::UserProvided));
    assert_eq!(status.hive_username.as_deref(), Some("bobskates"));
}

#[tokio::test]
async fn user_key_replaces_sponsored_key() {
    let h = harness().await;
    let key = ChainPrivateKey::generate();
    link_chain_account(&h, "u-bob", "bobskates", &key).await;
    store_sponsored_key(&h, "u-bob", "bobskates", "5Kold").await;

    h.service.store_user_key("u-bob", &key.to_wif()).await.unwrap();
    let record = h.db.get_custodial_key("u-bob").await.unwrap().unwrap();
    assert_eq!(record.key_type, KeyType::UserProvided);
    let plaintext = h
        .vault
        .decrypt_hex_to_string(&record.encrypted_secret, &record.iv, &record.auth_tag)
        .unwrap();
    assert_eq!(plaintext.as_str(), key.to_wif().as_str());
}

#[tokio::test]
async fn status_and_delete() {
    let h = harness().await;
    let status = h.service.status("u-bob").await.unwrap();
    assert!(!status.stored);
    assert!(status.custody.is_none());

    store_sponsored_key(&h, "u-bob", "bobskates", "5Kposting").await;
    let status = h.service.status("u-bob").await.unwrap();
    assert!(status.stored);
    assert_eq!(status.custody, Some(KeyType::Sponsored));

    h.service.delete("u-bob").await.unwrap();
    assert!(!h.service.status("u-bob").await.unwrap().stored);
    assert!(matches!(
        h.service.delete("u-bob").await.unwrap_err(),
        CustodyError::NoKeys
    ));
}

#[tokio::test]
async fn resend_backup_sends_partial_posting_backup() {
    let h = harness().await;
    store_sponsored_key(&h, "u-bob", "bobskates", "5Kposting").await;

    h.service.resend_backup("u-bob").await.unwrap();

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].partial_backup);
    assert_eq!(sent[0].to, "bob@example.com");
    assert!(sent[0].text.contains("5Kposting"));

    let record = h.db.get_custodial_key("u-bob").await.unwrap().unwrap();
    assert!(record.last_used_at.is_some());
    assert_eq!(
        h.db.count_side_effect_failures(BACKUP_EMAIL, 0).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn resend_backup_without_keys_is_not_found() {
    let h = harness().await;
    assert!(matches!(
        h.service.resend_backup("u-bob").await.unwrap_err(),
        CustodyError::NoKeys
    ));
}

#[tokio::test]
async fn resend_backup_without_contact_fails() {
    let h = harness().await;
    store_sponsored_key(&h, "u-carol", "carolskates", "5Kposting").await;
    assert!(matches!(
        h.service.resend_backup("u-carol").await.unwrap_err(),
        CustodyError::ContactNotFound
    ));
}

#[tokio::test]
async fn undecryptable_record_is_reported() {
    let h = harness().await;
    let other_vault = CredentialVault::from_key(&[1u8; 32]);
    let (encrypted_secret, iv, auth_tag) = other_vault.encrypt(b"5Kposting").unwrap().to_hex();
    h.db.upsert_custodial_key(&NewCustodialKey {
        user_id: "u-bob",
        hive_username: "bobskates",
        encrypted_secret: &encrypted_secret,
        iv: &iv,
        auth_tag: &auth_tag,
        key_type: KeyType::Sponsored,
    })
    .await
    .unwrap();

    assert!(matches!(
        h.service.resend_backup("u-bob").await.unwrap_err(),
        CustodyError::Crypto(_)
    ));
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn send_failure_is_reported_and_logged() {
    let h = harness().await;
    store_sponsored_key(&h, "u-bob", "bobskates", "5Kposting").await;
    h.notifier.set_failing(true);

    assert!(matches!(
        h.service.resend_backup("u-bob").await.unwrap_err(),
        CustodyError::Notification(_)
    ));
    assert_eq!(
        h.db.count_side_effect_failures(BACKUP_EMAIL, 0).await.unwrap(),
        1
    );
    let record = h.db.get_custodial_key("u-bob").await.unwrap().unwrap();
    assert!(record.last_used_at.is_none());
}
