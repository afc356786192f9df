use alloy_primitives::{Address, Bytes, hex};
use std::collections::BTreeSet;

use crate::indexer::rpc::tokens::function_selector;
use crate::models::datasets::contracts::Contract;
use crate::models::datasets::traces::{Trace, TraceType};

const PUSH1: u8 = 0x60;
const PUSH4: u8 = 0x63;
const PUSH32: u8 = 0x7f;

const ERC20_FUNCTIONS: [&str; 6] = [
    "totalSupply()",
    "balanceOf(address)",
    "transfer(address,uint256)",
    "transferFrom(address,address,uint256)",
    "approve(address,uint256)",
    "allowance(address,address)",
];

/// Decides which standard interfaces a deployed contract implements.
pub trait ContractClassifier: Send + Sync {
    fn function_sighashes(&self, bytecode: &Bytes) -> Vec<String>;
    fn is_erc20(&self, sighashes: &[String]) -> bool;
    fn is_erc721(&self, sighashes: &[String]) -> bool;
}

/// Reads function selectors from the `PUSH4` operands of the dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectorClassifier;

impl ContractClassifier for SelectorClassifier {
    fn function_sighashes(&self, bytecode: &Bytes) -> Vec<String> {
        let mut sighashes = BTreeSet::new();
        let mut pc = 0;
        while pc < bytecode.len() {
            let opcode = bytecode[pc];
            if (PUSH1..=PUSH32).contains(&opcode) {
                let width = (opcode - PUSH1 + 1) as usize;
                if opcode == PUSH4 {
                    if let Some(operand) = bytecode.get(pc + 1..pc + 1 + width) {
                        sighashes.insert(hex::encode_prefixed(operand));
                    }
                }
                pc += width;
            }
            pc += 1;
        }
        sighashes.into_iter().collect()
    }

    fn is_erc20(&self, sighashes: &[String]) -> bool {
        ERC20_FUNCTIONS.iter().all(|f| implements(sighashes, f))
    }

    fn is_erc721(&self, sighashes: &[String]) -> bool {
        implements(sighashes, "balanceOf(address)")
            && implements(sighashes, "ownerOf(uint256)")
            && (implements(sighashes, "transfer(address,uint256)")
                || implements(sighashes, "transferFrom(address,address,uint256)"))
            && implements(sighashes, "approve(address,uint256)")
    }
}

fn implements(sighashes: &[String], signature: &str) -> bool {
    let selector = hex::encode_prefixed(function_selector(signature));
    sighashes.iter().any(|s| *s == selector)
}

/// Successful `create` traces with a known address.
pub fn contract_creations(traces: &[Trace]) -> Vec<&Trace> {
    traces
        .iter()
        .filter(|t| t.trace_type == TraceType::Create && t.to_address.is_some() && t.status == 1)
        .collect()
}

pub fn build_contract(
    address: Address,
    bytecode: Bytes,
    block_number: u64,
    classifier: &dyn ContractClassifier,
) -> Contract {
    let function_sighashes = classifier.function_sighashes(&bytecode);
    Contract {
        address,
        is_erc20: classifier.is_erc20(&function_sighashes),
        is_erc721: classifier.is_erc721(&function_sighashes),
        function_sighashes,
        bytecode,
        block_number,
        block_timestamp: None,
        block_hash: None,
    }
}
