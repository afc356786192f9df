pub mod contracts;
pub mod enrich;
pub mod identity;
pub mod token_transfers;
pub mod traces;
