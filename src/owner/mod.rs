mod data_block;
mod transaction_block;

pub use data_block::*;
pub use transaction_block::*;
