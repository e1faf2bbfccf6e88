mod block;
mod transaction;

pub use block::{Block, BlockHeader};
pub use transaction::{Outpoint, Transaction, TransactionInput, TransactionOutput};
