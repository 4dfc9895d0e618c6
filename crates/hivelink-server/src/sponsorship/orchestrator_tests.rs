//! Tests for the sponsorship workflow.

use std::sync::Arc;

use hivelink_crypto::{ChainPrivateKey, CredentialVault};

use super::side_effects::{CREDENTIAL_EMAIL, PROFILE_SYNC};
use super::{
    CreateSponsorship, CustodyService, GeneratedKeys, ProcessStep, SponsorshipError,
    SponsorshipService,
};
use crate::identity::IdentityCandidate;
use crate::storage::{AppDatabase, CostType, IdentityType, KeyType, SponsorshipStatus};
use crate::testing::{FakeChain, FakeProfilePublisher, RecordingNotifier};

const TX_ID: &str = "0123456789abcdef0123456789abcdef01234567";

struct Harness {
    db: AppDatabase,
    chain: Arc<FakeChain>,
    publisher: Arc<FakeProfilePublisher>,
    notifier: Arc<RecordingNotifier>,
    vault: Arc<CredentialVault>,
    service: SponsorshipService,
}

async fn harness_with(publisher: FakeProfilePublisher) -> Harness {
    let db = AppDatabase::open_in_memory().await.unwrap();
    db.create_user("u-alice", "alice", Some("Alice"), Some("alice@example.com"))
        .await
        .unwrap();
    db.create_user("u-bob", "bob", Some("Bob"), Some("bob@example.com"))
        .await
        .unwrap();
    db.create_user("u-carol", "carol", None, None).await.unwrap();
    db.insert_identity_if_absent(
        &IdentityCandidate::chain_account("alice").to_new_identity("u-alice", None),
    )
    .await
    .unwrap();

    let chain = Arc::new(FakeChain::default());
    chain.add_account("alice", &[]);
    let publisher = Arc::new(publisher);
    let notifier = Arc::new(RecordingNotifier::default());
    let vault = Arc::new(CredentialVault::from_key(&[7u8; 32]));
    let service = SponsorshipService::new(
        db.clone(),
        chain.clone(),
        publisher.clone(),
        notifier.clone(),
        vault.clone(),
    );
    Harness {
        db,
        chain,
        publisher,
        notifier,
        vault,
        service,
    }
}

async fn harness() -> Harness {
    harness_with(FakeProfilePublisher::default()).await
}

fn request(sponsor: &str, recipient: &str, name: &str) -> CreateSponsorship {
    CreateSponsorship {
        sponsor_user_id: sponsor.to_string(),
        lite_user_id: recipient.to_string(),
        hive_username: name.to_string(),
        cost_type: CostType::AccountToken,
        cost_amount: None,
    }
}

fn keys_for(key: &ChainPrivateKey) -> GeneratedKeys {
    GeneratedKeys {
        posting: key.to_wif().to_string(),
        active: Some("5Kactive".to_string()),
        owner: Some("5Kowner".to_string()),
        memo: None,
        master_password: Some("P5Kmaster".to_string()),
    }
}

/// Create a sponsorship for bob and make its creation transaction exist.
async fn pending_for_bob(h: &Harness) -> (String, ChainPrivateKey) {
    let sponsorship = h
        .service
        .create(&request("u-alice", "u-bob", "bobskates"))
        .await
        .unwrap();
    let key = ChainPrivateKey::generate();
    h.chain.record_creation(TX_ID, "bobskates", &key);
    (sponsorship.id, key)
}

#[tokio::test]
async fn create_returns_pending_sponsorship() {
    let h = harness().await;
    let s = h
        .service
        .create(&request("u-alice", "u-bob", "BobSkates"))
        .await
        .unwrap();
    assert_eq!(s.status, SponsorshipStatus::Pending);
    assert_eq!(s.hive_username, "bobskates");
    assert_eq!(s.cost_type, CostType::AccountToken);
    assert!(s.cost_amount.is_none());
}

#[tokio::test]
async fn create_preconditions() {
    let h = harness().await;

    let err = h
        .service
        .create(&request("u-alice", "u-alice", "bobskates"))
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::SelfSponsorship));

    let err = h
        .service
        .create(&request("u-alice", "", "bobskates"))
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::Validation(_)));

    let err = h
        .service
        .create(&request("u-alice", "u-nobody", "bobskates"))
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::UserNotFound(_)));

    let err = h
        .service
        .create(&request("u-bob", "u-carol", "carolskates"))
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::SponsorLacksChainAccount));

    let err = h
        .service
        .create(&request("u-alice", "u-bob", "b_b"))
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::InvalidAccountName(_)));

    h.chain.add_account("taken", &[]);
    let err = h
        .service
        .create(&request("u-alice", "u-bob", "taken"))
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::NameTaken(_)));

    // No row was written by any failed attempt.
    assert!(
        h.db.get_active_sponsorship_for_recipient("u-bob")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn hive_cost_requires_decimal_amount() {
    let h = harness().await;
    let mut req = request("u-alice", "u-bob", "bobskates");
    req.cost_type = CostType::Hive;

    for bad in [None, Some("abc"), Some("3.0001"), Some("-1")] {
        req.cost_amount = bad.map(str::to_string);
        let err = h.service.create(&req).await.unwrap_err();
        assert!(matches!(err, SponsorshipError::Validation(_)), "{bad:?}");
    }

    req.cost_amount = Some("3.000".to_string());
    let s = h.service.create(&req).await.unwrap();
    assert_eq!(s.cost_amount.as_deref(), Some("3.000"));
}

#[tokio::test]
async fn second_create_for_same_recipient_conflicts() {
    let h = harness().await;
    h.service
        .create(&request("u-alice", "u-bob", "bobskates"))
        .await
        .unwrap();
    let err = h
        .service
        .create(&request("u-alice", "u-bob", "bobskates2"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SponsorshipError::AlreadySponsoredOrPending(SponsorshipStatus::Pending)
    ));
}

#[tokio::test]
async fn end_to_end_sponsorship_completes() {
    let h = harness().await;
    let (id, key) = pending_for_bob(&h).await;

    let report = h
        .service
        .process("u-alice", &id, TX_ID, &keys_for(&key))
        .await
        .unwrap();
    assert_eq!(report.status, SponsorshipStatus::Completed);
    assert!(report.account_created);
    assert!(report.key_encrypted);
    assert!(report.identity_linked);
    assert!(report.email_sent);
    assert!(report.profile_synced);
    assert!(report.error.is_none());

    let stored = h.db.get_sponsorship(&id).await.unwrap();
    assert_eq!(stored.status, SponsorshipStatus::Completed);
    assert_eq!(stored.hive_tx_id.as_deref(), Some(TX_ID));
    assert!(stored.completed_at.is_some());

    let record = h.db.get_custodial_key("u-bob").await.unwrap().unwrap();
    assert_eq!(record.key_type, KeyType::Sponsored);
    assert_eq!(record.hive_username, "bobskates");
    let decrypted = h
        .vault
        .decrypt_hex_to_string(&record.encrypted_secret, &record.iv, &record.auth_tag)
        .unwrap();
    assert_eq!(decrypted.as_str(), key.to_wif().as_str());

    let identity = h
        .db
        .get_primary_identity("u-bob", IdentityType::ChainAccount)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(identity.handle.as_deref(), Some("bobskates"));
    assert!(identity.is_sponsored);
    assert_eq!(identity.sponsor_user_id.as_deref(), Some("u-alice"));

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "bob@example.com");
    assert!(!sent[0].partial_backup);
    assert!(sent[0].text.contains(key.to_wif().as_str()));
    assert!(sent[0].text.contains("5Kactive"));

    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "bobskates");
    assert_eq!(published[0].1.name.as_deref(), Some("Bob"));

    let log = h.db.list_side_effects_for_sponsorship(&id).await.unwrap();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|entry| entry.succeeded));
}

#[tokio::test]
async fn completed_sponsorship_is_final() {
    let h = harness().await;
    let (id, key) = pending_for_bob(&h).await;
    h.service
        .process("u-alice", &id, TX_ID, &keys_for(&key))
        .await
        .unwrap();

    let err = h
        .service
        .process("u-alice", &id, TX_ID, &keys_for(&key))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SponsorshipError::InvalidStateTransition {
            current: SponsorshipStatus::Completed
        }
    ));

    let err = h
        .service
        .create(&request("u-alice", "u-bob", "bobskates2"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SponsorshipError::AlreadySponsoredOrPending(SponsorshipStatus::Completed)
    ));
    assert_eq!(
        h.db.get_sponsorship(&id).await.unwrap().status,
        SponsorshipStatus::Completed
    );
}

#[tokio::test]
async fn unverified_transaction_fails_the_workflow() {
    let h = harness().await;
    let s = h
        .service
        .create(&request("u-alice", "u-bob", "bobskates"))
        .await
        .unwrap();

    let report = h
        .service
        .process("u-alice", &s.id, TX_ID, &keys_for(&ChainPrivateKey::generate()))
        .await
        .unwrap();
    assert_eq!(report.status, SponsorshipStatus::Failed);
    assert_eq!(report.failed_step, Some(ProcessStep::Verify));
    assert!(!report.account_created);
    assert!(!report.key_encrypted);

    let stored = h.db.get_sponsorship(&s.id).await.unwrap();
    assert_eq!(stored.status, SponsorshipStatus::Failed);
    assert!(stored.error_message.unwrap().contains("not found"));
    assert!(h.db.get_custodial_key("u-bob").await.unwrap().is_none());
    assert!(h.notifier.sent().is_empty());

    // A failed sponsorship frees the recipient for another attempt.
    h.service
        .create(&request("u-alice", "u-bob", "bobskates"))
        .await
        .unwrap();
}

#[tokio::test]
async fn posting_key_must_belong_to_created_account() {
    let h = harness().await;
    let (id, _key) = pending_for_bob(&h).await;

    let report = h
        .service
        .process("u-alice", &id, TX_ID, &keys_for(&ChainPrivateKey::generate()))
        .await
        .unwrap();
    assert_eq!(report.failed_step, Some(ProcessStep::Verify));
    assert!(report.error.unwrap().contains("posting key"));
}

#[tokio::test]
async fn unavailable_chain_fails_with_terminal_state() {
    let h = harness().await;
    let (id, key) = pending_for_bob(&h).await;
    h.chain.set_unavailable(true);

    let report = h
        .service
        .process("u-alice", &id, TX_ID, &keys_for(&key))
        .await
        .unwrap();
    assert_eq!(report.status, SponsorshipStatus::Failed);
    assert_eq!(
        h.db.get_sponsorship(&id).await.unwrap().status,
        SponsorshipStatus::Failed
    );
}

#[tokio::test]
async fn recipient_without_contact_fails() {
    let h = harness().await;
    let s = h
        .service
        .create(&request("u-alice", "u-carol", "carolskates"))
        .await
        .unwrap();
    let key = ChainPrivateKey::generate();
    h.chain.record_creation(TX_ID, "carolskates", &key);

    let report = h
        .service
        .process("u-alice", &s.id, TX_ID, &keys_for(&key))
        .await
        .unwrap();
    assert_eq!(report.failed_step, Some(ProcessStep::ResolveContact));
    assert_eq!(report.error.as_deref(), Some("contact not found"));
    assert!(report.account_created);
    assert!(h.db.get_custodial_key("u-carol").await.unwrap().is_none());
}

#[tokio::test]
async fn account_linked_elsewhere_rolls_back_custody() {
    let h = harness().await;
    let (id, key) = pending_for_bob(&h).await;
    h.db.insert_identity_if_absent(
        &IdentityCandidate::chain_account("bobskates").to_new_identity("u-carol", None),
    )
    .await
    .unwrap();

    let report = h
        .service
        .process("u-alice", &id, TX_ID, &keys_for(&key))
        .await
        .unwrap();
    assert_eq!(report.failed_step, Some(ProcessStep::AttachIdentity));
    assert!(!report.key_encrypted);
    assert!(h.db.get_custodial_key("u-bob").await.unwrap().is_none());
    assert_eq!(
        h.db.get_sponsorship(&id).await.unwrap().status,
        SponsorshipStatus::Failed
    );
}

#[tokio::test]
async fn best_effort_failures_do_not_fail_the_workflow() {
    let h = harness_with(FakeProfilePublisher::failing()).await;
    h.notifier.set_failing(true);
    let (id, key) = pending_for_bob(&h).await;

    let report = h
        .service
        .process("u-alice", &id, TX_ID, &keys_for(&key))
        .await
        .unwrap();
    assert_eq!(report.status, SponsorshipStatus::Completed);
    assert!(!report.profile_synced);
    assert!(!report.email_sent);

    let log = h.db.list_side_effects_for_sponsorship(&id).await.unwrap();
    let failed: Vec<_> = log.iter().filter(|e| !e.succeeded).map(|e| e.kind.as_str()).collect();
    assert!(failed.contains(&PROFILE_SYNC));
    assert!(failed.contains(&CREDENTIAL_EMAIL));
}

#[tokio::test]
async fn backup_resend_works_after_failed_profile_sync() {
    let h = harness_with(FakeProfilePublisher::failing()).await;
    let (id, key) = pending_for_bob(&h).await;

    let report = h
        .service
        .process("u-alice", &id, TX_ID, &keys_for(&key))
        .await
        .unwrap();
    assert_eq!(report.status, SponsorshipStatus::Completed);
    assert!(!report.profile_synced);

    let custody = CustodyService::new(
        h.db.clone(),
        h.chain.clone(),
        h.notifier.clone(),
        h.vault.clone(),
    );
    custody.resend_backup("u-bob").await.unwrap();

    let sent = h.notifier.sent();
    let backup = sent.last().unwrap();
    assert!(backup.partial_backup);
    assert_eq!(backup.to, "bob@example.com");
    assert!(backup.text.contains(key.to_wif().as_str()));
}

#[tokio::test]
async fn only_sponsor_can_process() {
    let h = harness().await;
    let (id, key) = pending_for_bob(&h).await;

    let err = h
        .service
        .process("u-bob", &id, TX_ID, &keys_for(&key))
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::NotSponsor));

    let err = h
        .service
        .process("u-alice", "missing", TX_ID, &keys_for(&key))
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::NotFound(_)));
}

#[tokio::test]
async fn malformed_inputs_leave_sponsorship_pending() {
    let h = harness().await;
    let (id, key) = pending_for_bob(&h).await;

    let err = h
        .service
        .process("u-alice", &id, "not-a-tx", &keys_for(&key))
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::Validation(_)));

    let bad_keys = GeneratedKeys {
        posting: "garbage".to_string(),
        active: None,
        owner: None,
        memo: None,
        master_password: None,
    };
    let err = h
        .service
        .process("u-alice", &id, TX_ID, &bad_keys)
        .await
        .unwrap_err();
    assert!(matches!(err, SponsorshipError::Validation(_)));

    assert_eq!(
        h.db.get_sponsorship(&id).await.unwrap().status,
        SponsorshipStatus::Pending
    );
}

#[tokio::test]
async fn eligibility_reflects_state() {
    let h = harness().await;

    let e = h.service.eligibility("u-bob").await.unwrap();
    assert!(e.eligible);
    assert!(e.reason.is_none());

    let e = h.service.eligibility("u-alice").await.unwrap();
    assert!(!e.eligible);
    assert!(e.reason.unwrap().contains("chain account"));

    let (id, key) = pending_for_bob(&h).await;
    let e = h.service.eligibility("u-bob").await.unwrap();
    assert!(!e.eligible);
    assert!(e.reason.unwrap().contains("pending"));

    h.service
        .process("u-alice", &id, TX_ID, &keys_for(&key))
        .await
        .unwrap();
    let e = h.service.eligibility("u-bob").await.unwrap();
    assert!(!e.eligible);

    assert!(matches!(
        h.service.eligibility("u-nobody").await.unwrap_err(),
        SponsorshipError::UserNotFound(_)
    ));
}

#[tokio::test]
async fn my_info_reports_completed_sponsorship() {
    let h = harness().await;
    assert!(!h.service.my_info("u-bob").await.unwrap().sponsored);

    let (id, key) = pending_for_bob(&h).await;
    assert!(!h.service.my_info("u-bob").await.unwrap().sponsored);

    h.service
        .process("u-alice", &id, TX_ID, &keys_for(&key))
        .await
        .unwrap();
    let info = h.service.my_info("u-bob").await.unwrap();
    assert!(info.sponsored);
    assert_eq!(info.sponsor_username.as_deref(), Some("alice"));
    assert_eq!(info.hive_username.as_deref(), Some("bobskates"));
    assert!(info.sponsored_at.is_some());
}

#[tokio::test]
async fn stale_processing_is_swept_to_failed() {
    let h = harness().await;
    let (id, _key) = pending_for_bob(&h).await;
    assert!(h.db.claim_sponsorship_for_processing(&id).await.unwrap());

    // Nothing is older than an hour yet.
    assert_eq!(h.service.sweep_stale(3600).await.unwrap(), 0);
    // A negative window puts the cutoff in the future.
    assert_eq!(h.service.sweep_stale(-10).await.unwrap(), 1);

    let stored = h.db.get_sponsorship(&id).await.unwrap();
    assert_eq!(stored.status, SponsorshipStatus::Failed);
    assert_eq!(
        stored.error_message.as_deref(),
        Some("interrupted before completion")
    );
}
