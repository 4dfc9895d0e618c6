//! Binary serialization and signing of `account_update2` transactions.
//!
//! Layout (little-endian, varint = unsigned LEB128):
//!
//! ```text
//! ref_block_num: u16 | ref_block_prefix: u32 | expiration: u32
//! operations: varint count, then per op: varint op id | op body
//! extensions: varint 0
//! ```
//!
//! The signing digest is `sha256(chain_id || tx)`; the transaction id is the
//! first 20 bytes of `sha256(tx)` in hex.

use chrono::{DateTime, NaiveDateTime, Utc};
use hivelink_crypto::ChainPrivateKey;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use super::ChainError;

/// Hive mainnet chain id.
pub const CHAIN_ID: [u8; 32] = [
    0xbe, 0xea, 0xb0, 0xde, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0,
];

/// Operation id of `account_update2`.
pub const ACCOUNT_UPDATE2_OP: u64 = 43;

/// Seconds a broadcast transaction stays valid after the head block time.
pub const EXPIRATION_SECS: i64 = 60;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Reference block fields derived from the current head block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaPoS {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    /// Unix seconds.
    pub expiration: u32,
}

impl TaPoS {
    /// Derive from `head_block_number`, `head_block_id` (hex) and the head
    /// block `time` as reported by `get_dynamic_global_properties`.
    pub fn from_head(
        head_block_number: u64,
        head_block_id: &str,
        head_time: &str,
    ) -> Result<Self, ChainError> {
        let id = hex::decode(head_block_id)
            .map_err(|e| ChainError::Decode(format!("head_block_id is not hex: {e}")))?;
        let prefix: [u8; 4] = id
            .get(4..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| ChainError::Decode("head_block_id is too short".to_string()))?;

        let head = NaiveDateTime::parse_from_str(head_time, TIME_FORMAT)
            .map_err(|e| ChainError::Decode(format!("head block time {head_time:?}: {e}")))?
            .and_utc();
        let expiration = u32::try_from(head.timestamp() + EXPIRATION_SECS)
            .map_err(|_| ChainError::Decode(format!("head block time {head_time:?} out of range")))?;

        #[allow(clippy::cast_possible_truncation)]
        let ref_block_num = (head_block_number & 0xffff) as u16;

        Ok(Self {
            ref_block_num,
            ref_block_prefix: u32::from_le_bytes(prefix),
            expiration,
        })
    }

    fn expiration_string(&self) -> String {
        DateTime::<Utc>::from_timestamp(i64::from(self.expiration), 0)
            .unwrap_or_default()
            .format(TIME_FORMAT)
            .to_string()
    }
}

/// An unsigned transaction carrying one `account_update2` that only touches
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUpdate2 {
    pub tapos: TaPoS,
    pub account: String,
    pub json_metadata: String,
    pub posting_json_metadata: String,
}

impl AccountUpdate2 {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.posting_json_metadata.len());
        buf.extend_from_slice(&self.tapos.ref_block_num.to_le_bytes());
        buf.extend_from_slice(&self.tapos.ref_block_prefix.to_le_bytes());
        buf.extend_from_slice(&self.tapos.expiration.to_le_bytes());

        write_varint(&mut buf, 1);
        write_varint(&mut buf, ACCOUNT_UPDATE2_OP);
        write_string(&mut buf, &self.account);
        // owner, active, posting, memo_key: all absent.
        buf.extend_from_slice(&[0, 0, 0, 0]);
        write_string(&mut buf, &self.json_metadata);
        write_string(&mut buf, &self.posting_json_metadata);
        write_varint(&mut buf, 0); // op extensions

        write_varint(&mut buf, 0); // tx extensions
        buf
    }

    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(CHAIN_ID);
        hasher.update(self.serialize());
        hasher.finalize().into()
    }

    pub fn transaction_id(&self) -> String {
        let hash = Sha256::digest(self.serialize());
        hex::encode(&hash[..20])
    }

    /// Sign with `key` and render the condenser JSON form for broadcast.
    pub fn sign(&self, key: &ChainPrivateKey) -> Result<SignedTransaction, ChainError> {
        let signature = key
            .sign_digest_canonical(&self.digest())
            .map_err(|e| ChainError::Signing(e.to_string()))?;

        let json = json!({
            "ref_block_num": self.tapos.ref_block_num,
            "ref_block_prefix": self.tapos.ref_block_prefix,
            "expiration": self.tapos.expiration_string(),
            "operations": [[
                "account_update2",
                {
                    "account": self.account,
                    "json_metadata": self.json_metadata,
                    "posting_json_metadata": self.posting_json_metadata,
                    "extensions": [],
                }
            ]],
            "extensions": [],
            "signatures": [hex::encode(signature)],
        });

        Ok(SignedTransaction {
            transaction_id: self.transaction_id(),
            json,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub transaction_id: String,
    pub json: Value,
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use hivelink_crypto::ChainPublicKey;

    use super::*;

    fn tapos() -> TaPoS {
        TaPoS {
            ref_block_num: 0x1234,
            ref_block_prefix: 0xdead_beef,
            expiration: 1_700_000_060,
        }
    }

    fn update(posting: &str) -> AccountUpdate2 {
        AccountUpdate2 {
            tapos: tapos(),
            account: "bobskates".to_string(),
            json_metadata: String::new(),
            posting_json_metadata: posting.to_string(),
        }
    }

    #[test]
    fn varint_encoding() {
        let cases: [(u64, &[u8]); 4] = [
            (0, &[0x00]),
            (43, &[0x2b]),
            (127, &[0x7f]),
            (300, &[0xac, 0x02]),
        ];
        for (value, expected) in cases {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            assert_eq!(buf, expected, "{value}");
        }
    }

    #[test]
    fn tapos_from_head_block() {
        let tapos = TaPoS::from_head(
            0x0123_4567,
            "0123456789abcdef00000000000000000000000000",
            "2023-11-14T22:13:20",
        )
        .unwrap();
        assert_eq!(tapos.ref_block_num, 0x4567);
        assert_eq!(tapos.ref_block_prefix, u32::from_le_bytes([0x89, 0xab, 0xcd, 0xef]));
        assert_eq!(tapos.expiration, 1_700_000_000 + 60);
        assert_eq!(tapos.expiration_string(), "2023-11-14T22:14:20");
    }

    #[test]
    fn tapos_rejects_bad_inputs() {
        assert!(TaPoS::from_head(1, "zz", "2023-11-14T22:13:20").is_err());
        assert!(TaPoS::from_head(1, "0123", "2023-11-14T22:13:20").is_err());
        assert!(TaPoS::from_head(1, "0123456789abcdef", "yesterday").is_err());
    }

    #[test]
    fn serialized_layout() {
        let bytes = update("{}").serialize();
        let mut expected = Vec::new();
        expected.extend_from_slice(&0x1234u16.to_le_bytes());
        expected.extend_from_slice(&0xdead_beefu32.to_le_bytes());
        expected.extend_from_slice(&1_700_000_060u32.to_le_bytes());
        expected.extend_from_slice(&[1, 43]);
        expected.push(9);
        expected.extend_from_slice(b"bobskates");
        expected.extend_from_slice(&[0, 0, 0, 0]);
        expected.push(0);
        expected.push(2);
        expected.extend_from_slice(b"{}");
        expected.extend_from_slice(&[0, 0]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn transaction_id_is_forty_hex_chars_and_content_sensitive() {
        let a = update("{}");
        let b = update(r#"{"profile":{}}"#);
        assert_eq!(a.transaction_id().len(), 40);
        assert_ne!(a.transaction_id(), b.transaction_id());
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn signature_recovers_to_signer() {
        let key = ChainPrivateKey::generate();
        let tx = update(r#"{"profile":{"name":"Bob"}}"#);
        let signed = tx.sign(&key).unwrap();

        assert_eq!(signed.transaction_id, tx.transaction_id());
        let sig_hex = signed.json["signatures"][0].as_str().unwrap();
        let sig: [u8; 65] = hex::decode(sig_hex).unwrap().try_into().unwrap();
        let recovered = ChainPublicKey::recover(&tx.digest(), &sig).unwrap();
        assert_eq!(recovered, key.public_key());

        let op = &signed.json["operations"][0];
        assert_eq!(op[0], "account_update2");
        assert_eq!(op[1]["account"], "bobskates");
        assert_eq!(signed.json["expiration"], "2023-11-14T22:14:20");
    }
}
