//! OP_NONCE payload: candidate nonces found by the cores.

use byteorder::{ByteOrder, LittleEndian};

use super::PayloadError;

/// Mask for the ntime offset within the `ntime` field.
pub const NTIME_MASK: u16 = 0x0FFF;

/// When set, the host should search forward from the reported nonce.
pub const NONCE_SEARCH: u16 = 0x1000;

/// One 8-byte candidate nonce record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateNonce {
    pub nonce: u32,
    pub sequence: u16,
    pub ntime: u16,
}

impl CandidateNonce {
    pub const SIZE: usize = 8;

    pub fn decode(data: &[u8]) -> Result<Self, PayloadError> {
        if data.len() < Self::SIZE {
            return Err(PayloadError::TooShort {
                what: "candidate nonce",
                expected: Self::SIZE,
                got: data.len(),
            });
        }
        Ok(Self {
            nonce: LittleEndian::read_u32(&data[0..4]),
            sequence: LittleEndian::read_u16(&data[4..6]),
            ntime: LittleEndian::read_u16(&data[6..8]),
        })
    }

    /// Offset from the original ntime, in seconds.
    pub fn ntime_offset(&self) -> u16 {
        self.ntime & NTIME_MASK
    }

    /// Whether the search-forward hint is set.
    pub fn search_forward(&self) -> bool {
        self.ntime & NONCE_SEARCH != 0
    }
}

/// Split an OP_NONCE payload into its records.
pub fn decode_list(data: &[u8]) -> Result<Vec<CandidateNonce>, PayloadError> {
    if data.len() % CandidateNonce::SIZE != 0 {
        return Err(PayloadError::BadMultiple {
            what: "candidate nonce list",
            unit: CandidateNonce::SIZE,
            got: data.len(),
        });
    }
    data.chunks_exact(CandidateNonce::SIZE)
        .map(CandidateNonce::decode)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_two_records() {
        let mut data = Vec::new();
        data.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        data.extend_from_slice(&7u16.to_le_bytes());
        data.extend_from_slice(&(0x1000u16 | 3).to_le_bytes());
        data.extend_from_slice(&0x0102_0304u32.to_le_bytes());
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(&5u16.to_le_bytes());

        let nonces = decode_list(&data).unwrap();
        assert_eq!(nonces.len(), 2);
        assert_eq!(nonces[0].nonce, 0xDEAD_BEEF);
        assert_eq!(nonces[0].sequence, 7);
        assert_eq!(nonces[0].ntime_offset(), 3);
        assert!(nonces[0].search_forward());
        assert_eq!(nonces[1].nonce, 0x0102_0304);
        assert!(!nonces[1].search_forward());
    }

    #[test]
    fn rejects_ragged_length() {
        assert!(matches!(
            decode_list(&[0; 12]),
            Err(PayloadError::BadMultiple { .. })
        ));
    }
}
