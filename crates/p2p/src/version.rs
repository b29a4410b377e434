//! Version message construction and decoding.

use std::net::{IpAddr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::P2pError;
use crate::message::{put_compact_size, read_compact_size};

/// Protocol version advertised to the node.
pub const PROTOCOL_VERSION: i32 = 70015;

/// User agent announced in the version message.
pub const USER_AGENT: &str = "/RelayNetworkClient:42/";

/// Offset of the user agent's CompactSize within a version payload.
const USER_AGENT_OFFSET: usize = 80;

/// Builds the `version` payload sent immediately after connecting.
///
/// The bridge advertises no services and a zero start height; it is a relay,
/// not a chain-serving node.
pub fn build_version_payload(peer: SocketAddr, nonce: u64) -> Vec<u8> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let mut payload = Vec::with_capacity(86 + USER_AGENT.len());
    payload.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    payload.extend_from_slice(&0u64.to_le_bytes()); // services
    payload.extend_from_slice(&timestamp.to_le_bytes());
    put_net_addr(&mut payload, Some(peer)); // addr_recv
    put_net_addr(&mut payload, None); // addr_from, unroutable by convention
    payload.extend_from_slice(&nonce.to_le_bytes());
    put_compact_size(&mut payload, USER_AGENT.len() as u64);
    payload.extend_from_slice(USER_AGENT.as_bytes());
    payload.extend_from_slice(&0i32.to_le_bytes()); // start_height
    payload.push(1); // relay: we want loose transactions
    payload
}

/// Writes a version-message network address: services, v6-mapped IP, port.
fn put_net_addr(buf: &mut Vec<u8>, addr: Option<SocketAddr>) {
    buf.extend_from_slice(&0u64.to_le_bytes());
    match addr {
        Some(addr) => {
            let v6 = match addr.ip() {
                IpAddr::V4(v4) => v4.to_ipv6_mapped(),
                IpAddr::V6(v6) => v6,
            };
            buf.extend_from_slice(&v6.octets());
            buf.extend_from_slice(&addr.port().to_be_bytes());
        }
        None => {
            buf.extend_from_slice(&[0u8; 16]);
            buf.extend_from_slice(&0u16.to_be_bytes());
        }
    }
}

/// The fields of a peer's version message the bridge cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerVersion {
    pub protocol_version: i32,
    pub user_agent: String,
}

/// Decodes the interesting fields of a received version payload.
pub fn parse_version_payload(payload: &[u8]) -> Result<PeerVersion, P2pError> {
    if payload.len() < USER_AGENT_OFFSET {
        return Err(P2pError::Message("version payload too short".to_string()));
    }
    let protocol_version = i32::from_le_bytes(payload[0..4].try_into().unwrap());

    let (ua_len, consumed) = read_compact_size(&payload[USER_AGENT_OFFSET..])?;
    let ua_start = USER_AGENT_OFFSET + consumed;
    let ua_end = ua_start
        .checked_add(ua_len as usize)
        .filter(|&end| end <= payload.len())
        .ok_or_else(|| P2pError::Message("version payload truncated".to_string()))?;
    let user_agent = String::from_utf8_lossy(&payload[ua_start..ua_end]).into_owned();

    Ok(PeerVersion {
        protocol_version,
        user_agent,
    })
}
