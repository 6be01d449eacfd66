//! Bounds-checked reader for parsing wire packets

use crate::networking::{NetworkError, NetworkResult};

pub struct PacketBuffer<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> PacketBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    pub fn remaining_bytes(&self) -> &[u8] {
        &self.data[self.position..]
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn get_u8(&mut self) -> NetworkResult<u8> {
        self.check_remaining(1)?;
        let value = self.data[self.position];
        self.position += 1;
        Ok(value)
    }

    /// Big-endian, matching the wire order of sequence numbers and ACK ids
    pub fn get_u32(&mut self) -> NetworkResult<u32> {
        self.check_remaining(4)?;
        let bytes = [
            self.data[self.position],
            self.data[self.position + 1],
            self.data[self.position + 2],
            self.data[self.position + 3],
        ];
        self.position += 4;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn check_remaining(&self, n: usize) -> NetworkResult<()> {
        if self.remaining() < n {
            Err(NetworkError::PacketDecode {
                reason: format!("Not enough data: need {}, have {}", n, self.remaining()),
            })
        } else {
            Ok(())
        }
    }
}
