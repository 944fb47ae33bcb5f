//! Session affinity: deterministic mapping from a session identifier to a pool slot.
//!
//! The same hash drives both upstream selection and session-token selection, so a client
//! that sends a stable `X-Session-Id` keeps hitting the same provider with the same
//! credential. The mapping is only stable for a fixed pool size.

use http::HeaderMap;

/// Request header carrying the opaque session identifier.
pub const SESSION_HEADER: &str = "x-session-id";

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash.
#[must_use]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME))
}

/// Returns the session identifier if the header is present and non-empty.
#[must_use]
pub fn session_id(headers: &HeaderMap) -> Option<&[u8]> {
    headers.get(SESSION_HEADER).map(http::HeaderValue::as_bytes).filter(|v| !v.is_empty())
}

/// Picks a slot in `0..pool_size` for the request.
///
/// Without a session header the first slot is used. Returns `None` for an empty pool.
#[must_use]
pub fn affinity_index(headers: &HeaderMap, pool_size: usize) -> Option<usize> {
    if pool_size == 0 {
        return None;
    }
    let index = match session_id(headers) {
        Some(id) => fnv1a_32(id) as usize % pool_size,
        None => 0,
    };
    Some(index)
}
