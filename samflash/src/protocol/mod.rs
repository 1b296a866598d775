//! SAM-BA wire protocol.

pub mod command;
pub mod response;

// Re-export common types
pub use command::{Command, Reply, decode_version, decode_word};
pub use response::{ReadMode, RequestId, ResponseBuffer, ResponseQueue};
