//! In-memory collaborators for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use hivelink_crypto::ChainPrivateKey;

use crate::chain::{AccountCreation, ChainError, ChainVerifier, ProfileMetadata, ProfilePublisher};
use crate::directory::{DirectoryError, DirectoryProfile, IdentityDirectory};
use crate::notify::{EmailMessage, NotificationDispatcher, NotificationError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Directory backed by a map of profiles.
#[derive(Default)]
pub struct FakeDirectory {
    profiles: Mutex<HashMap<u64, DirectoryProfile>>,
    lookups: AtomicUsize,
}

impl FakeDirectory {
    pub fn add_profile(&self, fid: u64, username: &str, custody_address: &str) {
        lock(&self.profiles).insert(
            fid,
            DirectoryProfile {
                fid,
                username: username.to_string(),
                display_name: Some(username.to_string()),
                avatar_url: None,
                bio: None,
                custody_address: custody_address.to_ascii_lowercase(),
                verified_addresses: Vec::new(),
            },
        );
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityDirectory for FakeDirectory {
    async fn lookup_profile(&self, fid: u64) -> Result<DirectoryProfile, DirectoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        lock(&self.profiles)
            .get(&fid)
            .cloned()
            .ok_or(DirectoryError::NotFound(fid))
    }
}

/// Chain state: existing accounts with their posting keys, and creation
/// transactions.
#[derive(Default)]
pub struct FakeChain {
    accounts: Mutex<HashMap<String, Vec<String>>>,
    creations: Mutex<HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl FakeChain {
    pub fn add_account(&self, name: &str, posting_keys: &[String]) {
        lock(&self.accounts).insert(name.to_string(), posting_keys.to_vec());
    }

    /// Record that `transaction_id` created `account` with `posting_key`.
    pub fn record_creation(&self, transaction_id: &str, account: &str, posting_key: &ChainPrivateKey) {
        self.add_account(account, &[posting_key.public_key().to_string()]);
        lock(&self.creations).insert(transaction_id.to_string(), account.to_string());
    }

    /// Make every call fail as if all nodes were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ChainError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChainError::ApiError {
                status: 503,
                body: "all nodes unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainVerifier for FakeChain {
    async fn verify_account_creation(
        &self,
        transaction_id: &str,
        account: &str,
    ) -> Result<AccountCreation, ChainError> {
        self.check_available()?;
        let created = lock(&self.creations)
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| ChainError::TransactionNotFound(transaction_id.to_string()))?;
        if created != account {
            return Err(ChainError::AccountMismatch {
                transaction_id: transaction_id.to_string(),
                expected: account.to_string(),
            });
        }
        if !lock(&self.accounts).contains_key(account) {
            return Err(ChainError::AccountMissing(account.to_string()));
        }
        Ok(AccountCreation {
            account: account.to_string(),
            transaction_id: transaction_id.to_string(),
            block_num: 1,
            operation: "create_claimed_account".to_string(),
            irreversible: true,
        })
    }

    async fn account_exists(&self, account: &str) -> Result<bool, ChainError> {
        self.check_available()?;
        Ok(lock(&self.accounts).contains_key(account))
    }

    async fn posting_public_keys(&self, account: &str) -> Result<Vec<String>, ChainError> {
        self.check_available()?;
        lock(&self.accounts)
            .get(account)
            .cloned()
            .ok_or_else(|| ChainError::AccountMissing(account.to_string()))
    }
}

/// Records published profiles; can be switched to fail.
#[derive(Default)]
pub struct FakeProfilePublisher {
    published: Mutex<Vec<(String, ProfileMetadata)>>,
    failing: AtomicBool,
}

impl FakeProfilePublisher {
    pub fn failing() -> Self {
        Self {
            failing: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<(String, ProfileMetadata)> {
        lock(&self.published).clone()
    }
}

#[async_trait]
impl ProfilePublisher for FakeProfilePublisher {
    async fn publish_profile(
        &self,
        account: &str,
        _posting_key: &ChainPrivateKey,
        profile: &ProfileMetadata,
    ) -> Result<String, ChainError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc {
                code: -32000,
                message: "missing required posting authority".to_string(),
            });
        }
        lock(&self.published).push((account.to_string(), profile.clone()));
        Ok("f".repeat(40))
    }
}

/// Keeps every message it is asked to send; can be switched to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn send(&self, message: &EmailMessage) -> Result<Option<String>, NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::ApiError {
                status: 503,
                body: "mail relay down".to_string(),
            });
        }
        let mut sent = lock(&self.sent);
        sent.push(message.clone());
        Ok(Some(format!("msg_{}", sent.len())))
    }
}
