//! Starknet JSON-RPC block source.

use super::{Block, BlockSource, BlockSourceError};
use crate::decoder::{Felt, RawEvent};
use crate::domain::BlockNumber;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// `BLOCK_NOT_FOUND` in the Starknet RPC error table.
const BLOCK_NOT_FOUND: i64 = 24;

#[derive(Debug, Clone)]
pub struct RpcBlockSource {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct BlockWithReceipts {
    /// Absent on pending blocks.
    block_hash: Option<Felt>,
    parent_hash: Felt,
    block_number: Option<u64>,
    #[serde(default)]
    transactions: Vec<TransactionWithReceipt>,
}

#[derive(Debug, Deserialize)]
struct TransactionWithReceipt {
    receipt: Receipt,
}

#[derive(Debug, Deserialize)]
struct Receipt {
    #[serde(default)]
    execution_status: Option<String>,
    #[serde(default)]
    events: Vec<RawEvent>,
}

impl RpcBlockSource {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, BlockSourceError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .post(&self.url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(BlockSourceError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 || status.is_server_error() {
                return Err(backoff::Error::transient(BlockSourceError::Http {
                    status: status.as_u16(),
                    message: "Server busy".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(BlockSourceError::Http {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            let body = response
                .json::<RpcResponse<T>>()
                .await
                .map_err(|e| backoff::Error::permanent(BlockSourceError::Parse(e.to_string())))?;

            match (body.result, body.error) {
                (_, Some(err)) => Err(backoff::Error::permanent(BlockSourceError::Rpc {
                    code: err.code,
                    message: err.message,
                })),
                (Some(result), None) => Ok(result),
                (None, None) => Err(backoff::Error::permanent(BlockSourceError::Parse(
                    format!("{} returned neither result nor error", method),
                ))),
            }
        })
        .await
    }
}

#[async_trait]
impl BlockSource for RpcBlockSource {
    async fn latest_block_number(&self) -> Result<BlockNumber, BlockSourceError> {
        let number: u64 = self.call("starknet_blockNumber", serde_json::json!([])).await?;
        Ok(BlockNumber::new(number))
    }

    async fn block(&self, number: BlockNumber) -> Result<Option<Block>, BlockSourceError> {
        debug!(block = %number, "Fetching block");
        let params = serde_json::json!({ "block_id": { "block_number": number.as_u64() } });
        match self
            .call::<BlockWithReceipts>("starknet_getBlockWithReceipts", params)
            .await
        {
            Ok(raw) => into_block(number, raw).map(Some),
            Err(BlockSourceError::Rpc { code, .. }) if code == BLOCK_NOT_FOUND => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn into_block(requested: BlockNumber, raw: BlockWithReceipts) -> Result<Block, BlockSourceError> {
    let hash = raw.block_hash.ok_or_else(|| {
        BlockSourceError::Parse(format!("block {} has no hash (pending)", requested))
    })?;
    if let Some(n) = raw.block_number {
        if n != requested.as_u64() {
            return Err(BlockSourceError::Parse(format!(
                "asked for block {}, got {}",
                requested, n
            )));
        }
    }

    // Reverted transactions keep their receipts but emit nothing that counts.
    let events = raw
        .transactions
        .into_iter()
        .filter(|tx| tx.receipt.execution_status.as_deref() != Some("REVERTED"))
        .flat_map(|tx| tx.receipt.events)
        .collect();

    Ok(Block {
        number: requested,
        hash: hash.to_hex(),
        parent_hash: raw.parent_hash.to_hex(),
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_with_receipts_skips_reverted() {
        let json = serde_json::json!({
            "block_hash": "0x0abc",
            "parent_hash": "0x9",
            "block_number": 7,
            "transactions": [
                { "transaction": {}, "receipt": {
                    "execution_status": "SUCCEEDED",
                    "events": [{ "from_address": "0x1", "keys": ["0x2"], "data": ["0x3", "0x4"] }]
                }},
                { "transaction": {}, "receipt": {
                    "execution_status": "REVERTED",
                    "events": [{ "from_address": "0x1", "keys": ["0x2"], "data": [] }]
                }},
                { "transaction": {}, "receipt": {
                    "events": [{ "from_address": "0x5", "keys": [], "data": [] }]
                }}
            ]
        });
        let raw: BlockWithReceipts = serde_json::from_value(json).unwrap();
        let block = into_block(BlockNumber::new(7), raw).unwrap();
        assert_eq!(block.hash, "0xabc");
        assert_eq!(block.parent_hash, "0x9");
        assert_eq!(block.events.len(), 2);
        assert_eq!(block.events[0].data.len(), 2);
        assert_eq!(block.events[1].from_address, Felt::from_u64(5));
    }

    #[test]
    fn test_pending_block_is_rejected() {
        let json = serde_json::json!({ "parent_hash": "0x9", "transactions": [] });
        let raw: BlockWithReceipts = serde_json::from_value(json).unwrap();
        assert!(matches!(
            into_block(BlockNumber::new(3), raw),
            Err(BlockSourceError::Parse(_))
        ));
    }

    #[test]
    fn test_block_number_mismatch_is_rejected() {
        let json = serde_json::json!({
            "block_hash": "0x1", "parent_hash": "0x0", "block_number": 4, "transactions": []
        });
        let raw: BlockWithReceipts = serde_json::from_value(json).unwrap();
        assert!(into_block(BlockNumber::new(5), raw).is_err());
    }

    #[test]
    fn test_rpc_error_body_parses() {
        let json = serde_json::json!({
            "jsonrpc": "2.0", "id": 1,
            "error": { "code": 24, "message": "Block not found" }
        });
        let body: RpcResponse<u64> = serde_json::from_value(json).unwrap();
        assert!(body.result.is_none());
        assert_eq!(body.error.unwrap().code, BLOCK_NOT_FOUND);
    }
}
