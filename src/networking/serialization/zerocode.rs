//! Zero-coding for the post-header packet payload
//!
//! Runs of zero bytes are collapsed to `0x00` followed by a count byte.
//! Runs longer than 255 are split into multiple count pairs. Appended-ACK
//! trailers are never zero-coded and must be stripped before decoding.

use crate::networking::{NetworkError, NetworkResult};

/// Collapse zero runs in `data`
pub fn encode(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        if data[i] == 0 {
            let mut zero_count: usize = 0;
            let mut j = i;

            while j < data.len() && data[j] == 0 && zero_count < 255 {
                zero_count += 1;
                j += 1;
            }

            result.push(0x00);
            result.push(zero_count as u8);
            i = j;
        } else {
            result.push(data[i]);
            i += 1;
        }
    }

    result
}

/// Expand zero runs back to the original payload
pub fn decode(data: &[u8]) -> NetworkResult<Vec<u8>> {
    let mut result = Vec::with_capacity(data.len() * 2);
    let mut i = 0;

    while i < data.len() {
        if data[i] == 0x00 {
            if i + 1 >= data.len() {
                return Err(NetworkError::PacketDecode {
                    reason: "Truncated zerocode sequence".to_string(),
                });
            }

            let count = data[i + 1];
            if count == 0 {
                return Err(NetworkError::PacketDecode {
                    reason: "Zero-length zerocode run".to_string(),
                });
            }
            result.extend(std::iter::repeat(0x00).take(count as usize));

            i += 2;
        } else {
            result.push(data[i]);
            i += 1;
        }
    }

    Ok(result)
}
