//! Shared primitives for the relay bridge.
//!
//! This crate holds the small pieces every other crate leans on: block
//! identifiers and double-SHA256 hashing, the block buffer that reserves
//! transport-header space, reconnect pacing, and log sanitisation for
//! untrusted strings.

pub mod backoff;
pub mod block;
pub mod hash;
pub mod net;
pub mod text;

pub use backoff::Backoff;
pub use block::{BlockBuf, TRANSPORT_HEADER_LEN};
pub use hash::{double_sha256, BlockHash, TxId};
