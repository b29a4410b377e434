//! Thin Bitcoin P2P client.
//!
//! Only the slice of the P2P protocol the bridge consumes lives here: the
//! message framing, the version/verack handshake, ping/pong keepalive,
//! inventory fetching, and block/transaction relay in both directions.
//! Everything else bitcoind says is deliberately ignored.

pub mod client;
pub mod error;
pub mod message;
pub mod version;

pub use client::{P2pClient, P2pEvent, P2pHandle};
pub use error::{P2pError, Result};
pub use message::{Command, P2pHeader, NETWORK_MAGIC};
