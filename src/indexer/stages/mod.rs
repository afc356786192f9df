pub mod blocks;
pub mod contracts;
pub mod receipts;
pub mod tokens;
pub mod traces;

pub use blocks::BlockStage;
pub use contracts::ContractStage;
pub use receipts::ReceiptStage;
pub use tokens::TokenStage;
pub use traces::TraceStage;
