use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("RPC request timed out: {0}")]
    Timeout(String),
    #[error("RPC connection failed: {0}")]
    Connection(String),
    #[error("RPC transport I/O error: {0}")]
    Io(String),
    #[error("RPC endpoint returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Malformed RPC response: {0}")]
    MalformedResponse(String),
    #[error("Unsupported provider URI: {0}")]
    UnsupportedProvider(String),
}

impl RpcError {
    /// Transient failures that shrink the batch size and replay the batch item by item.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::Timeout(_) | RpcError::Connection(_) | RpcError::Io(_) => true,
            RpcError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            RpcError::Rpc { .. }
            | RpcError::MalformedResponse(_)
            | RpcError::UnsupportedProvider(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Block {block_number} not found")]
    MissingBlock { block_number: u64 },
    #[error("Expected exactly one block for number {block_number}, got {count}")]
    DuplicateBlock { block_number: u64, count: usize },
    #[error("Receipt for transaction {tx_hash} not found")]
    MissingReceipt { tx_hash: String },
    #[error("Enriching {entity} produced {actual} rows for {expected} inputs")]
    JoinCardinality {
        entity: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid {entity} payload: {reason}")]
    InvalidPayload { entity: &'static str, reason: String },
}

/// True when any error in the chain is a retryable transport failure.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| cause.downcast_ref::<RpcError>().is_some_and(RpcError::is_retryable))
}
