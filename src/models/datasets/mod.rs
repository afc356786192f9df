pub mod blocks;
pub mod contracts;
pub mod logs;
pub mod receipts;
pub mod token_transfers;
pub mod tokens;
pub mod traces;
pub mod transactions;
