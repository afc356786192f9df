use std::collections::HashMap;
use std::hash::Hash;

use crate::models::datasets::blocks::Block;
use crate::models::datasets::contracts::Contract;
use crate::models::datasets::logs::Log;
use crate::models::datasets::receipts::Receipt;
use crate::models::datasets::token_transfers::TokenTransfer;
use crate::models::datasets::tokens::Token;
use crate::models::datasets::traces::Trace;
use crate::models::datasets::transactions::Transaction;
use crate::models::errors::ExtractionError;

/// In-memory equi-join. Every left item is merged with every right item sharing its key, so a
/// left item with no match is dropped and one with several matches is repeated.
pub fn join<L, R, K, O>(
    left: &[L],
    right: &[R],
    left_key: impl Fn(&L) -> K,
    right_key: impl Fn(&R) -> K,
    merge: impl Fn(&L, &R) -> O,
) -> Vec<O>
where
    K: Eq + Hash,
{
    let mut index: HashMap<K, Vec<&R>> = HashMap::with_capacity(right.len());
    for item in right {
        index.entry(right_key(item)).or_default().push(item);
    }

    let mut output = Vec::with_capacity(left.len());
    for item in left {
        if let Some(matches) = index.get(&left_key(item)) {
            output.extend(matches.iter().map(|m| merge(item, m)));
        }
    }
    output
}

/// [`join`] for 1:1 relations: the output must have exactly one row per left item.
pub fn join_exact<L, R, K, O>(
    entity: &'static str,
    left: &[L],
    right: &[R],
    left_key: impl Fn(&L) -> K,
    right_key: impl Fn(&R) -> K,
    merge: impl Fn(&L, &R) -> O,
) -> Result<Vec<O>, ExtractionError>
where
    K: Eq + Hash,
{
    let output = join(left, right, left_key, right_key, merge);
    if output.len() != left.len() {
        return Err(ExtractionError::JoinCardinality {
            entity,
            expected: left.len(),
            actual: output.len(),
        });
    }
    Ok(output)
}

pub fn enrich_transactions(
    transactions: &[Transaction],
    receipts: &[Receipt],
) -> Result<Vec<Transaction>, ExtractionError> {
    join_exact(
        "transactions",
        transactions,
        receipts,
        |tx| tx.hash,
        |receipt| receipt.transaction_hash,
        |tx, receipt| Transaction {
            receipt_cumulative_gas_used: Some(receipt.cumulative_gas_used),
            receipt_gas_used: Some(receipt.gas_used),
            receipt_contract_address: receipt.contract_address,
            receipt_root: receipt.root,
            receipt_status: receipt.status,
            receipt_effective_gas_price: receipt.effective_gas_price,
            ..tx.clone()
        },
    )
}

pub fn enrich_logs(blocks: &[Block], logs: &[Log]) -> Result<Vec<Log>, ExtractionError> {
    join_exact(
        "logs",
        logs,
        blocks,
        |log| log.block_number,
        |block| block.number,
        |log, block| Log {
            block_timestamp: Some(block.timestamp),
            block_hash: block.hash,
            ..log.clone()
        },
    )
}

pub fn enrich_token_transfers(
    blocks: &[Block],
    transfers: &[TokenTransfer],
) -> Result<Vec<TokenTransfer>, ExtractionError> {
    join_exact(
        "token_transfers",
        transfers,
        blocks,
        |transfer| transfer.block_number,
        |block| block.number,
        |transfer, block| TokenTransfer {
            block_timestamp: Some(block.timestamp),
            block_hash: Some(block.hash),
            ..transfer.clone()
        },
    )
}

pub fn enrich_traces(blocks: &[Block], traces: &[Trace]) -> Result<Vec<Trace>, ExtractionError> {
    join_exact(
        "traces",
        traces,
        blocks,
        |trace| trace.block_number,
        |block| block.number,
        |trace, block| Trace {
            block_timestamp: Some(block.timestamp),
            block_hash: Some(block.hash),
            ..trace.clone()
        },
    )
}

pub fn enrich_contracts(
    blocks: &[Block],
    contracts: &[Contract],
) -> Result<Vec<Contract>, ExtractionError> {
    join_exact(
        "contracts",
        contracts,
        blocks,
        |contract| contract.block_number,
        |block| block.number,
        |contract, block| Contract {
            block_timestamp: Some(block.timestamp),
            block_hash: Some(block.hash),
            ..contract.clone()
        },
    )
}

pub fn enrich_tokens(blocks: &[Block], tokens: &[Token]) -> Result<Vec<Token>, ExtractionError> {
    join_exact(
        "tokens",
        tokens,
        blocks,
        |token| token.block_number,
        |block| block.number,
        |token, block| Token {
            block_timestamp: Some(block.timestamp),
            block_hash: Some(block.hash),
            ..token.clone()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_supports_one_to_many() {
        let left = [1, 2, 3];
        let right = [(1, "a"), (1, "b"), (3, "c")];
        let joined = join(&left, &right, |l| *l, |r| r.0, |l, r| (*l, r.1));
        assert_eq!(joined, vec![(1, "a"), (1, "b"), (3, "c")]);
    }

    #[test]
    fn test_join_exact_preserves_cardinality() {
        let left = [1, 2];
        let right = [(2, "b"), (1, "a")];
        let joined = join_exact("items", &left, &right, |l| *l, |r| r.0, |_, r| r.1).unwrap();
        assert_eq!(joined, vec!["a", "b"]);
    }

    #[test]
    fn test_join_exact_rejects_duplicate_or_missing_keys() {
        let left = [1, 2];

        let duplicate = [(1, "a"), (1, "again"), (2, "b")];
        let err = join_exact("items", &left, &duplicate, |l| *l, |r| r.0, |_, r| r.1).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::JoinCardinality { expected: 2, actual: 3, .. }
        ));

        let missing = [(1, "a")];
        let err = join_exact("items", &left, &missing, |l| *l, |r| r.0, |_, r| r.1).unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::JoinCardinality { expected: 2, actual: 1, .. }
        ));
    }
}
