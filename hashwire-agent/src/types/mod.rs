//! Small value types shared across the crate.

mod hashrate;
mod miner_name;

pub use hashrate::HashRate;
pub use miner_name::{MINER_NAME_MAX_LEN, sanitize_miner_name};
