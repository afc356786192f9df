use alloy_primitives::{B256, U256};
use alloy_rpc_types_trace::common::TraceResult;
use alloy_rpc_types_trace::geth::CallFrame;
use alloy_rpc_types_trace::parity::{Action, LocalizedTransactionTrace, TraceOutput};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use crate::models::datasets::traces::{Trace, TraceType};
use crate::models::errors::ExtractionError;

/// Per-transaction `callTracer` entry: a root frame, or the error the tracer hit.
pub type GethTransactionTrace = TraceResult<CallFrame, String>;

pub trait TraceParser {
    fn parse_traces(self, block_number: u64, tx_hashes: &[B256]) -> Result<Vec<Trace>>;
}

/// `trace_block` output is already flat and carries each trace's address in the call tree.
impl TraceParser for Vec<LocalizedTransactionTrace> {
    fn parse_traces(self, block_number: u64, _tx_hashes: &[B256]) -> Result<Vec<Trace>> {
        Ok(self
            .into_iter()
            .enumerate()
            .map(|(index, raw)| parse_parity_trace(raw, block_number, index as u64))
            .collect())
    }
}

/// `callTracer` output is one nested frame per transaction, flattened depth-first here.
impl TraceParser for Vec<GethTransactionTrace> {
    fn parse_traces(self, block_number: u64, tx_hashes: &[B256]) -> Result<Vec<Trace>> {
        let mut traces = Vec::new();
        for (position, tx_trace) in self.into_iter().enumerate() {
            let (frame, tx_hash) = match tx_trace {
                TraceResult::Success { result, tx_hash } => (result, tx_hash),
                TraceResult::Error { error, tx_hash } => {
                    let tx = tx_hash
                        .or_else(|| tx_hashes.get(position).copied())
                        .map_or_else(|| format!("at position {position}"), |hash| hash.to_string());
                    return Err(ExtractionError::InvalidPayload {
                        entity: "trace",
                        reason: format!("block {block_number}: tracer failed for transaction {tx}: {error}"),
                    }
                    .into());
                }
            };
            let tx_hash = tx_hash.or_else(|| tx_hashes.get(position).copied());
            if tx_hash.is_none() {
                return Err(ExtractionError::InvalidPayload {
                    entity: "trace",
                    reason: format!(
                        "block {block_number}: no transaction hash for trace at position {position}"
                    ),
                }
                .into());
            }
            flatten_frame(
                frame,
                block_number,
                tx_hash,
                position as u64,
                Vec::new(),
                &mut traces,
            )?;
        }
        Ok(traces)
    }
}

fn parse_parity_trace(raw: LocalizedTransactionTrace, block_number: u64, trace_index: u64) -> Trace {
    let tx_trace = raw.trace;
    let mut trace = Trace {
        block_number,
        transaction_hash: raw.transaction_hash,
        transaction_index: raw.transaction_position,
        from_address: None,
        to_address: None,
        value: None,
        input: None,
        output: None,
        trace_type: TraceType::Call,
        call_type: None,
        reward_type: None,
        gas: None,
        gas_used: None,
        subtraces: tx_trace.subtraces as u64,
        trace_address: tx_trace.trace_address.iter().map(|i| *i as u64).collect(),
        error: tx_trace.error,
        status: 1,
        trace_id: None,
        trace_index,
        block_timestamp: None,
        block_hash: None,
    };

    match tx_trace.action {
        Action::Call(call) => {
            trace.from_address = Some(call.from);
            trace.to_address = Some(call.to);
            trace.value = Some(call.value);
            trace.input = Some(call.input);
            trace.gas = Some(call.gas);
            trace.call_type = serde_name(&call.call_type);
            if let Some(TraceOutput::Call(output)) = tx_trace.result {
                trace.output = Some(output.output);
                trace.gas_used = Some(output.gas_used);
            }
        }
        Action::Create(create) => {
            trace.trace_type = TraceType::Create;
            trace.from_address = Some(create.from);
            trace.value = Some(create.value);
            trace.input = Some(create.init);
            trace.gas = Some(create.gas);
            if let Some(TraceOutput::Create(output)) = tx_trace.result {
                trace.to_address = Some(output.address);
                trace.output = Some(output.code);
                trace.gas_used = Some(output.gas_used);
            }
        }
        Action::Selfdestruct(selfdestruct) => {
            trace.trace_type = TraceType::Suicide;
            trace.from_address = Some(selfdestruct.address);
            trace.to_address = Some(selfdestruct.refund_address);
            trace.value = Some(selfdestruct.balance);
        }
        Action::Reward(reward) => {
            trace.trace_type = TraceType::Reward;
            trace.to_address = Some(reward.author);
            trace.value = Some(reward.value);
            trace.reward_type = serde_name(&reward.reward_type);
        }
    }

    trace
}

// Wire name of a lowercase-serialised enum such as the call or reward type
fn serde_name<T: Serialize>(value: &T) -> Option<String> {
    match serde_json::to_value(value).ok()? {
        Value::String(name) => Some(name),
        _ => None,
    }
}

fn gas(value: U256) -> Option<u64> {
    u64::try_from(value).ok()
}

fn flatten_frame(
    frame: CallFrame,
    block_number: u64,
    tx_hash: Option<B256>,
    tx_index: u64,
    trace_address: Vec<u64>,
    out: &mut Vec<Trace>,
) -> Result<()> {
    let trace_type = TraceType::parse(&frame.typ).ok_or_else(|| ExtractionError::InvalidPayload {
        entity: "trace",
        reason: format!("unknown call frame type '{}'", frame.typ),
    })?;
    let call_type = (trace_type == TraceType::Call).then(|| frame.typ.to_ascii_lowercase());

    out.push(Trace {
        block_number,
        transaction_hash: tx_hash,
        transaction_index: Some(tx_index),
        from_address: Some(frame.from),
        to_address: frame.to,
        value: frame.value,
        input: Some(frame.input),
        output: frame.output,
        trace_type,
        call_type,
        reward_type: None,
        gas: gas(frame.gas),
        gas_used: gas(frame.gas_used),
        subtraces: frame.calls.len() as u64,
        trace_address: trace_address.clone(),
        error: frame.error,
        status: 1,
        trace_id: None,
        trace_index: out.len() as u64,
        block_timestamp: None,
        block_hash: None,
    });

    for (child, call) in frame.calls.into_iter().enumerate() {
        let mut child_address = trace_address.clone();
        child_address.push(child as u64);
        flatten_frame(call, block_number, tx_hash, tx_index, child_address, out)?;
    }
    Ok(())
}
