use chrono::DateTime;
use tracing::warn;

use crate::models::common::{EthItem, ExportItem};
use crate::utils::to_hex;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn compute_item_id(item: &EthItem) -> Option<String> {
    let id = match item {
        EthItem::Block(block) => Some(format!("block_{}", to_hex(block.hash))),
        EthItem::Transaction(tx) => Some(format!("transaction_{}", to_hex(tx.hash))),
        EthItem::Log(log) => Some(format!(
            "log_{}_{}",
            to_hex(log.transaction_hash),
            log.log_index
        )),
        EthItem::TokenTransfer(transfer) => Some(format!(
            "token_transfer_{}_{}",
            to_hex(transfer.transaction_hash),
            transfer.log_index
        )),
        EthItem::Trace(trace) => trace.trace_id.as_ref().map(|id| format!("trace_{id}")),
        EthItem::Contract(contract) => Some(format!(
            "contract_{}_{}",
            contract.block_number,
            to_hex(contract.address)
        )),
        EthItem::Token(token) => Some(format!(
            "token_{}_{}",
            token.block_number,
            to_hex(token.address)
        )),
    };

    if id.is_none() {
        warn!("Could not compute item id for {} item", item.entity_type());
    }
    id
}

/// Blocks use their own timestamp, everything else the timestamp attached during enrichment.
pub fn compute_item_timestamp(item: &EthItem) -> Option<String> {
    let seconds = match item {
        EthItem::Block(block) => Some(block.timestamp),
        EthItem::Transaction(tx) => Some(tx.block_timestamp),
        EthItem::Log(log) => log.block_timestamp,
        EthItem::TokenTransfer(transfer) => transfer.block_timestamp,
        EthItem::Trace(trace) => trace.block_timestamp,
        EthItem::Contract(contract) => contract.block_timestamp,
        EthItem::Token(token) => token.block_timestamp,
    };

    let formatted = seconds
        .and_then(|seconds| i64::try_from(seconds).ok())
        .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        .map(|time| time.format(TIMESTAMP_FORMAT).to_string());

    if formatted.is_none() {
        warn!("Could not compute item timestamp for {} item", item.entity_type());
    }
    formatted
}

pub fn assign_identity(items: Vec<EthItem>) -> Vec<ExportItem> {
    items
        .into_iter()
        .map(|item| ExportItem {
            item_id: compute_item_id(&item),
            item_timestamp: compute_item_timestamp(&item),
            item,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::datasets::logs::Log;
    use crate::models::datasets::tokens::Token;
    use alloy_primitives::{Address, B256, Bytes};

    fn log(block_timestamp: Option<u64>) -> Log {
        Log {
            log_index: 4,
            transaction_hash: B256::repeat_byte(0xab),
            transaction_index: 1,
            block_hash: B256::repeat_byte(0x01),
            block_number: 10,
            address: Address::ZERO,
            data: Bytes::new(),
            topics: Vec::new(),
            block_timestamp,
        }
    }

    #[test]
    fn test_log_identity() {
        let items = assign_identity(vec![EthItem::Log(log(Some(1_438_269_988)))]);
        let tx = to_hex(B256::repeat_byte(0xab));
        assert_eq!(items[0].item_id.as_deref(), Some(format!("log_{tx}_4").as_str()));
        assert_eq!(items[0].item_timestamp.as_deref(), Some("2015-07-30T15:26:28Z"));
    }

    #[test]
    fn test_missing_fields_yield_none() {
        let item = EthItem::Log(log(None));
        assert!(compute_item_timestamp(&item).is_none());
        assert!(compute_item_id(&item).is_some());
    }

    #[test]
    fn test_token_id_uses_block_and_lowercase_address() {
        let token = Token {
            address: Address::repeat_byte(0xcd),
            symbol: None,
            name: None,
            decimals: None,
            total_supply: None,
            block_number: 99,
            block_timestamp: Some(0),
            block_hash: None,
        };
        let item = EthItem::Token(token);
        assert_eq!(
            compute_item_id(&item).as_deref(),
            Some(format!("token_99_0x{}", "cd".repeat(20)).as_str())
        );
        assert_eq!(compute_item_timestamp(&item).as_deref(), Some("1970-01-01T00:00:00Z"));
    }
}
