//! Condenser JSON-RPC client with node failover.
//!
//! Each retry attempt goes to the next configured node, so a single dead
//! node costs one attempt rather than the whole call.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use hivelink_core::RetryPolicy;
use hivelink_core::config::ChainConfig;
use hivelink_crypto::ChainPrivateKey;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use super::transaction::{AccountUpdate2, TaPoS};
use super::{
    ACCOUNT_CREATION_OPS, AccountCreation, ChainError, ChainVerifier, ProfileMetadata,
    ProfilePublisher,
};
use crate::http::build_client;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct TransactionResult {
    #[serde(default)]
    block_num: u64,
    #[serde(default)]
    operations: Vec<(String, Value)>,
}

#[derive(Debug, Deserialize)]
struct AccountResult {
    name: String,
    #[serde(default)]
    posting: Option<Authority>,
    #[serde(default)]
    json_metadata: String,
    #[serde(default)]
    posting_json_metadata: String,
}

#[derive(Debug, Deserialize)]
struct Authority {
    #[serde(default)]
    key_auths: Vec<(String, u32)>,
}

#[derive(Debug, Deserialize)]
struct GlobalProperties {
    head_block_number: u64,
    head_block_id: String,
    time: String,
    last_irreversible_block_num: u64,
}

/// JSON-RPC client for Hive API nodes.
#[derive(Debug)]
pub struct HiveRpcClient {
    http: reqwest::Client,
    nodes: Vec<String>,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl HiveRpcClient {
    pub fn new(config: &ChainConfig) -> Result<Self, ChainError> {
        if config.rpc_urls.is_empty() {
            return Err(ChainError::Config("no chain RPC nodes configured".to_string()));
        }
        let http = build_client().map_err(|e| ChainError::Config(e.to_string()))?;
        Ok(Self {
            http,
            nodes: config.rpc_urls.clone(),
            retry: RetryPolicy::from(&config.retry),
            next_id: AtomicU64::new(1),
        })
    }

    fn node_for_attempt(&self, attempt: u32) -> &str {
        let index = attempt as usize % self.nodes.len();
        &self.nodes[index]
    }

    /// Call `method` with `params`, retrying transient failures across nodes.
    /// A `null` result is returned as `Value::Null`.
    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let params = &params;
        self.retry
            .run(method, move |attempt| {
                self.call_once(self.node_for_attempt(attempt), method, params)
            })
            .await
    }

    async fn call_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| ChainError::Decode(format!("{method}: {e}")))
    }

    async fn call_once(
        &self,
        node: &str,
        method: &str,
        params: &Value,
    ) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        debug!(node, method, id, "Chain RPC call");
        let response = self
            .http
            .post(node)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Request(format!("{node}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            warn!(node, method, status = status.as_u16(), "Chain node returned error");
            return Err(ChainError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Decode(format!("{node}: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }

    async fn get_account(&self, account: &str) -> Result<Option<AccountResult>, ChainError> {
        let accounts: Vec<AccountResult> = self
            .call_typed("condenser_api.get_accounts", json!([[account]]))
            .await?;
        Ok(accounts.into_iter().find(|a| a.name == account))
    }

    async fn global_properties(&self) -> Result<GlobalProperties, ChainError> {
        self.call_typed("condenser_api.get_dynamic_global_properties", json!([]))
            .await
    }
}

/// Whether an RPC error means the node has never seen the transaction.
fn is_unknown_transaction(err: &ChainError) -> bool {
    match err {
        ChainError::Rpc { message, .. } => {
            let message = message.to_ascii_lowercase();
            message.contains("unknown transaction") || message.contains("unknown_transaction")
        }
        _ => false,
    }
}

fn is_duplicate_transaction(err: &ChainError) -> bool {
    matches!(err, ChainError::Rpc { message, .. } if message.to_ascii_lowercase().contains("duplicate transaction"))
}

/// Merge `profile` into the account's existing posting metadata so unrelated
/// keys survive the update.
fn merged_posting_metadata(existing: &str, profile: &ProfileMetadata) -> String {
    let mut root = serde_json::from_str::<Value>(existing)
        .ok()
        .and_then(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    let mut merged = match root.remove("profile") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Value::Object(fields) = serde_json::to_value(profile).unwrap_or_default() {
        merged.extend(fields);
    }
    root.insert("profile".to_string(), Value::Object(merged));
    Value::Object(root).to_string()
}

#[async_trait]
impl ChainVerifier for HiveRpcClient {
    #[instrument(skip(self))]
    async fn verify_account_creation(
        &self,
        transaction_id: &str,
        account: &str,
    ) -> Result<AccountCreation, ChainError> {
        let tx = match self
            .call("condenser_api.get_transaction", json!([transaction_id]))
            .await
        {
            Ok(Value::Null) => return Err(ChainError::TransactionNotFound(transaction_id.to_string())),
            Ok(value) => serde_json::from_value::<TransactionResult>(value)
                .map_err(|e| ChainError::Decode(format!("get_transaction: {e}")))?,
            Err(e) if is_unknown_transaction(&e) => {
                return Err(ChainError::TransactionNotFound(transaction_id.to_string()));
            }
            Err(e) => return Err(e),
        };

        let operation = tx
            .operations
            .iter()
            .find(|(name, body)| {
                ACCOUNT_CREATION_OPS.contains(&name.as_str())
                    && body.get("new_account_name").and_then(Value::as_str) == Some(account)
            })
            .map(|(name, _)| name.clone())
            .ok_or_else(|| ChainError::AccountMismatch {
                transaction_id: transaction_id.to_string(),
                expected: account.to_string(),
            })?;

        if self.get_account(account).await?.is_none() {
            return Err(ChainError::AccountMissing(account.to_string()));
        }

        let props = self.global_properties().await?;
        let creation = AccountCreation {
            account: account.to_string(),
            transaction_id: transaction_id.to_string(),
            block_num: tx.block_num,
            operation,
            irreversible: tx.block_num <= props.last_irreversible_block_num,
        };
        info!(
            account,
            transaction_id,
            block_num = creation.block_num,
            irreversible = creation.irreversible,
            "Account creation verified on chain"
        );
        Ok(creation)
    }

    async fn account_exists(&self, account: &str) -> Result<bool, ChainError> {
        Ok(self.get_account(account).await?.is_some())
    }

    async fn posting_public_keys(&self, account: &str) -> Result<Vec<String>, ChainError> {
        let found = self
            .get_account(account)
            .await?
            .ok_or_else(|| ChainError::AccountMissing(account.to_string()))?;
        Ok(found
            .posting
            .map(|auth| auth.key_auths.into_iter().map(|(key, _)| key).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ProfilePublisher for HiveRpcClient {
    #[instrument(skip(self, posting_key, profile))]
    async fn publish_profile(
        &self,
        account: &str,
        posting_key: &ChainPrivateKey,
        profile: &ProfileMetadata,
    ) -> Result<String, ChainError> {
        let existing = self
            .get_account(account)
            .await?
            .ok_or_else(|| ChainError::AccountMissing(account.to_string()))?;
        let props = self.global_properties().await?;

        let update = AccountUpdate2 {
            tapos: TaPoS::from_head(props.head_block_number, &props.head_block_id, &props.time)?,
            account: account.to_string(),
            json_metadata: existing.json_metadata,
            posting_json_metadata: merged_posting_metadata(&existing.posting_json_metadata, profile),
        };
        let signed = update.sign(posting_key)?;

        match self
            .call("condenser_api.broadcast_transaction", json!([signed.json]))
            .await
        {
            Ok(_) => {}
            // An earlier attempt landed but its response was lost.
            Err(e) if is_duplicate_transaction(&e) => {
                debug!(transaction_id = %signed.transaction_id, "Broadcast already accepted");
            }
            Err(e) => return Err(e),
        }

        info!(account, transaction_id = %signed.transaction_id, "Profile metadata published");
        Ok(signed.transaction_id)
    }
}
