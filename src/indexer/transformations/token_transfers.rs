use alloy_primitives::{Address, B256, U256, b256};
use tracing::warn;

use crate::models::datasets::logs::Log;
use crate::models::datasets::token_transfers::TokenTransfer;
use crate::utils::to_hex;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_EVENT_TOPIC: B256 =
    b256!("0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

pub trait TokenTransferExtractor {
    fn extract_token_transfers(&self) -> Vec<TokenTransfer>;
}

impl TokenTransferExtractor for [Log] {
    fn extract_token_transfers(&self) -> Vec<TokenTransfer> {
        self.iter().filter_map(decode_transfer).collect()
    }
}

/// ERC-20 indexes `from` and `to`, ERC-721 also indexes the token id, so the four words may be
/// split between topics and data in either way.
fn decode_transfer(log: &Log) -> Option<TokenTransfer> {
    if log.topics.first() != Some(&TRANSFER_EVENT_TOPIC) {
        return None;
    }

    let words: Vec<B256> = log
        .topics
        .iter()
        .copied()
        .chain(log.data.chunks(32).map(B256::left_padding_from))
        .collect();

    if words.len() != 4 {
        warn!(
            "The number of topics and data parts is not equal to 4 in log {} of transaction {}",
            log.log_index,
            to_hex(log.transaction_hash)
        );
        return None;
    }

    Some(TokenTransfer {
        token_address: log.address,
        from_address: word_to_address(&words[1]),
        to_address: word_to_address(&words[2]),
        value: U256::from_be_bytes(words[3].0),
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
        block_number: log.block_number,
        block_timestamp: log.block_timestamp,
        block_hash: Some(log.block_hash),
    })
}

fn word_to_address(word: &B256) -> Address {
    Address::from_word(*word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;

    fn log(topics: Vec<B256>, data: Vec<u8>) -> Log {
        Log {
            log_index: 3,
            transaction_hash: B256::repeat_byte(0xaa),
            transaction_index: 0,
            block_hash: B256::repeat_byte(0xbb),
            block_number: 42,
            address: Address::repeat_byte(0x77),
            data: Bytes::from(data),
            topics,
            block_timestamp: Some(1_600_000_000),
        }
    }

    fn address_word(byte: u8) -> B256 {
        Address::repeat_byte(byte).into_word()
    }

    #[test]
    fn test_erc20_transfer_is_decoded() {
        let value = U256::from(1_000_000u64).to_be_bytes::<32>().to_vec();
        let logs = vec![log(
            vec![TRANSFER_EVENT_TOPIC, address_word(0x01), address_word(0x02)],
            value,
        )];

        let transfers = logs.extract_token_transfers();
        assert_eq!(transfers.len(), 1);
        let transfer = &transfers[0];
        assert_eq!(transfer.token_address, Address::repeat_byte(0x77));
        assert_eq!(transfer.from_address, Address::repeat_byte(0x01));
        assert_eq!(transfer.to_address, Address::repeat_byte(0x02));
        assert_eq!(transfer.value, U256::from(1_000_000u64));
        assert_eq!(transfer.block_hash, Some(B256::repeat_byte(0xbb)));
    }

    #[test]
    fn test_erc721_transfer_with_indexed_token_id() {
        let token_id = B256::from(U256::from(7u64));
        let logs = vec![log(
            vec![TRANSFER_EVENT_TOPIC, address_word(0x01), address_word(0x02), token_id],
            Vec::new(),
        )];
        let transfers = logs.extract_token_transfers();
        assert_eq!(transfers[0].value, U256::from(7u64));
    }

    #[test]
    fn test_non_standard_transfer_is_skipped() {
        // Indexed from/to/value plus a data word is five words
        let logs = vec![
            log(
                vec![TRANSFER_EVENT_TOPIC, address_word(0x01), address_word(0x02), address_word(0x03)],
                vec![0; 32],
            ),
            log(vec![B256::repeat_byte(0x11)], vec![0; 32]),
        ];
        assert!(logs.extract_token_transfers().is_empty());
    }
}
