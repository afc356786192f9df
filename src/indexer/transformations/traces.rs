use alloy_primitives::B256;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

use crate::models::datasets::traces::{Trace, TraceType};
use crate::utils::to_hex;

pub trait TraceTransformer {
    fn calculate_statuses(&mut self);
    fn calculate_trace_ids(&mut self);
}

impl TraceTransformer for Vec<Trace> {
    /// A trace fails when it has an error or when its parent failed.
    ///
    /// Traces are visited in order of depth so every parent is resolved before its children.
    fn calculate_statuses(&mut self) {
        let mut by_transaction: HashMap<B256, Vec<usize>> = HashMap::new();
        for (index, trace) in self.iter_mut().enumerate() {
            match trace.transaction_hash {
                Some(tx_hash) => by_transaction.entry(tx_hash).or_default().push(index),
                // Rewards have no call tree
                None => trace.status = own_status(trace),
            }
        }

        for (tx_hash, mut indices) in by_transaction {
            indices.sort_by_key(|&index| self[index].trace_address.len());

            let mut statuses: HashMap<Vec<u64>, u8> = HashMap::with_capacity(indices.len());
            for index in indices {
                let trace = &mut self[index];
                let mut status = own_status(trace);

                if status == 1 {
                    if let Some((_, parent_address)) = trace.trace_address.split_last() {
                        match statuses.get(parent_address) {
                            Some(0) => status = 0,
                            Some(_) => {}
                            None => warn!(
                                "Parent trace {:?} not found for trace {:?} in transaction {}",
                                parent_address,
                                trace.trace_address,
                                to_hex(tx_hash)
                            ),
                        }
                    }
                }

                trace.status = status;
                statuses.insert(trace.trace_address.clone(), status);
            }
        }
    }

    /// Transaction traces are keyed by their position in the call tree. Block rewards have no
    /// natural key and are ranked within their block and type instead.
    fn calculate_trace_ids(&mut self) {
        let mut block_scoped: BTreeMap<(u64, TraceType), Vec<usize>> = BTreeMap::new();

        for (index, trace) in self.iter_mut().enumerate() {
            match trace.transaction_hash {
                Some(tx_hash) => {
                    let address = trace
                        .trace_address
                        .iter()
                        .map(u64::to_string)
                        .collect::<Vec<_>>()
                        .join("_");
                    trace.trace_id = Some(format!("{}_{}_{}", trace.trace_type, to_hex(tx_hash), address));
                }
                None => block_scoped
                    .entry((trace.block_number, trace.trace_type))
                    .or_default()
                    .push(index),
            }
        }

        for ((block_number, trace_type), mut indices) in block_scoped {
            indices.sort_by(|&a, &b| rank_key(&self[a]).cmp(&rank_key(&self[b])));
            for (rank, index) in indices.into_iter().enumerate() {
                self[index].trace_id = Some(format!("{trace_type}_{block_number}_{rank}"));
            }
        }
    }
}

fn own_status(trace: &Trace) -> u8 {
    if trace.error.is_some() { 0 } else { 1 }
}

// Ties are possible; identical keys get consecutive ranks in input order
fn rank_key(trace: &Trace) -> impl Ord + '_ {
    (
        trace.reward_type.as_deref(),
        trace.from_address,
        trace.to_address,
        trace.value,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, U256};

    fn trace(tx: Option<u8>, trace_address: Vec<u64>, error: Option<&str>) -> Trace {
        Trace {
            block_number: 5,
            transaction_hash: tx.map(B256::repeat_byte),
            transaction_index: tx.map(u64::from),
            from_address: None,
            to_address: None,
            value: None,
            input: None,
            output: None,
            trace_type: TraceType::Call,
            call_type: Some("call".into()),
            reward_type: None,
            gas: None,
            gas_used: None,
            subtraces: 0,
            trace_address,
            error: error.map(String::from),
            status: 1,
            trace_id: None,
            trace_index: 0,
            block_timestamp: None,
            block_hash: None,
        }
    }

    fn reward(author: u8, value: u64) -> Trace {
        Trace {
            trace_type: TraceType::Reward,
            call_type: None,
            reward_type: Some("block".into()),
            to_address: Some(Address::repeat_byte(author)),
            value: Some(U256::from(value)),
            ..trace(None, vec![], None)
        }
    }

    #[test]
    fn test_failed_ancestor_fails_descendants() {
        // Children listed before parents to exercise depth ordering
        let mut traces = vec![
            trace(Some(1), vec![0, 0, 1], None),
            trace(Some(1), vec![0, 0], None),
            trace(Some(1), vec![1], None),
            trace(Some(1), vec![0], Some("Reverted")),
            trace(Some(1), vec![], None),
            trace(Some(2), vec![], None),
        ];
        traces.calculate_statuses();

        let statuses: Vec<u8> = traces.iter().map(|t| t.status).collect();
        assert_eq!(statuses, vec![0, 0, 1, 0, 1, 1]);
    }

    #[test]
    fn test_own_error_fails_even_without_parent() {
        let mut traces = vec![trace(Some(3), vec![2, 1], Some("out of gas")), reward(9, 1)];
        traces.calculate_statuses();
        assert_eq!(traces[0].status, 0);
        assert_eq!(traces[1].status, 1);
    }

    #[test]
    fn test_trace_id_format() {
        let mut traces = vec![trace(Some(0xab), vec![], None), trace(Some(0xab), vec![1, 0], None)];
        traces.calculate_trace_ids();

        let tx = to_hex(B256::repeat_byte(0xab));
        assert_eq!(traces[0].trace_id.as_deref(), Some(format!("call_{tx}_").as_str()));
        assert_eq!(traces[1].trace_id.as_deref(), Some(format!("call_{tx}_1_0").as_str()));
    }

    #[test]
    fn test_reward_ids_are_independent_of_input_order() {
        let mut forward = vec![reward(1, 10), reward(2, 5), reward(3, 7)];
        let mut backward: Vec<Trace> = forward.iter().rev().cloned().collect();
        forward.calculate_trace_ids();
        backward.calculate_trace_ids();

        let ids = |traces: &[Trace]| {
            let mut pairs: Vec<(Option<Address>, String)> = traces
                .iter()
                .map(|t| (t.to_address, t.trace_id.clone().unwrap_or_default()))
                .collect();
            pairs.sort();
            pairs
        };
        assert_eq!(ids(&forward), ids(&backward));
        assert_eq!(
            forward.iter().filter_map(|t| t.trace_id.as_deref()).collect::<Vec<_>>(),
            vec!["reward_5_0", "reward_5_1", "reward_5_2"]
        );
    }
}
