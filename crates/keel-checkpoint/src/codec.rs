//! Body encoding: raw or zstd-compressed.

use std::io::Read;

use ruzstd::decoding::StreamingDecoder;
use ruzstd::encoding::{CompressionLevel, compress_to_vec};

use crate::error::{CheckpointError, CheckpointResult};

/// Encode a payload for storage.
///
/// Returns the stored bytes and whether they are compressed. Empty
/// payloads are always stored raw.
pub fn encode(payload: &[u8], compress: bool) -> (Vec<u8>, bool) {
    if compress && !payload.is_empty() {
        (compress_to_vec(payload, CompressionLevel::Fastest), true)
    } else {
        (payload.to_vec(), false)
    }
}

/// Reverse [`encode`].
pub fn decode(stored: &[u8], compressed: bool) -> CheckpointResult<Vec<u8>> {
    if !compressed {
        return Ok(stored.to_vec());
    }
    let mut decoder = StreamingDecoder::new(stored)
        .map_err(|e| CheckpointError::Corrupt(format!("zstd frame: {e}")))?;
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CheckpointError::Corrupt(format!("zstd body: {e}")))?;
    Ok(out)
}
