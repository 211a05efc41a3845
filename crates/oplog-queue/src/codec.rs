//! Entry framing
//!
//! An entry-object's content is a raw concatenation of length-prefixed
//! entries: a little-endian `u32` payload length followed by the payload
//! bytes. Payloads are opaque to the queue.

use bytes::Bytes;
use oplog_common::{Error, Result};

/// Frame a payload for appending to an entry-object
pub fn encode_entry(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::InvalidArgument(format!("entry of {} bytes too large", payload.len())))?;
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Decode every entry in an entry-object's content, in append order.
///
/// Truncated content is a `Corrupt` error: either a partial length prefix
/// or a payload shorter than its prefix claims.
pub fn decode_entries(data: &Bytes) -> Result<Vec<Bytes>> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        if data.len() - offset < 4 {
            return Err(Error::corrupt(format!(
                "truncated length prefix at offset {offset}"
            )));
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&data[offset..offset + 4]);
        let len = u32::from_le_bytes(prefix) as usize;
        offset += 4;

        if data.len() - offset < len {
            return Err(Error::corrupt(format!(
                "entry at offset {offset} claims {len} bytes, {} remain",
                data.len() - offset
            )));
        }
        entries.push(data.slice(offset..offset + len));
        offset += len;
    }

    Ok(entries)
}
