#![forbid(unsafe_code)]

mod keeper;
mod processor;
mod wal;

pub use keeper::{Keeper, SyncPolicy};
pub use processor::{Processor, is_write_command};
