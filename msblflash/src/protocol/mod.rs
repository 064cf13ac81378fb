//! Bootloader text protocol.

pub mod command;
pub mod line;

// Re-export common types
pub use command::{AUTH_LEN, CommInterface, Command, EblMode, NONCE_LEN};
pub use line::{CommandResponse, LineProtocol, ProtocolConfig, RAW_CHUNK_SIZE, decode_tokens};
