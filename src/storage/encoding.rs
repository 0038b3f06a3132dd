//! Record encoding for the index store
//!
//! - Block records: bincode
//! - String ranges: `count:u32` followed by `len:u32, bytes` per string, all
//!   integers big-endian

use crate::block::BlockMeta;
use crate::storage::error::{StorageError, StorageResult};

/// Encode a block record
pub fn encode_block(block: &BlockMeta) -> StorageResult<Vec<u8>> {
    Ok(bincode::serialize(block)?)
}

/// Decode a block record; `key` names the record in the error
pub fn decode_block(key: &str, data: &[u8]) -> StorageResult<BlockMeta> {
    bincode::deserialize(data)
        .map_err(|e| StorageError::Corruption(format!("block {}: {}", key, e)))
}

/// Encode a range of strings
pub fn encode_strings(strings: &[String]) -> Vec<u8> {
    let size = 4 + strings.iter().map(|s| 4 + s.len()).sum::<usize>();
    let mut data = Vec::with_capacity(size);
    data.extend_from_slice(&(strings.len() as u32).to_be_bytes());
    for s in strings {
        data.extend_from_slice(&(s.len() as u32).to_be_bytes());
        data.extend_from_slice(s.as_bytes());
    }
    data
}

/// Decode a range of strings; `key` names the record in the error
pub fn decode_strings(key: &str, data: &[u8]) -> StorageResult<Vec<String>> {
    let malformed = |reason: &str| {
        StorageError::Corruption(format!("malformed string table {}: {}", key, reason))
    };

    let mut offset = 0;
    let n = read_u32(data, &mut offset).ok_or_else(|| malformed("missing count"))?;
    let mut strings = Vec::with_capacity(n.min(1024) as usize);
    for _ in 0..n {
        let len = read_u32(data, &mut offset).ok_or_else(|| malformed("missing length"))? as usize;
        let bytes = data
            .get(offset..offset + len)
            .ok_or_else(|| malformed("truncated string"))?;
        let s = std::str::from_utf8(bytes).map_err(|_| malformed("invalid utf-8"))?;
        strings.push(s.to_string());
        offset += len;
    }
    Ok(strings)
}

fn read_u32(data: &[u8], offset: &mut usize) -> Option<u32> {
    let bytes: [u8; 4] = data.get(*offset..*offset + 4)?.try_into().ok()?;
    *offset += 4;
    Some(u32::from_be_bytes(bytes))
}
