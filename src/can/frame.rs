//! The CAN frame type shared by every transport backend.

use crate::constants::{COB_ID_BASE_MASK, COB_ID_NODE_MASK};
use crate::error::CanOpenError;

/// Maximum payload of a classic CAN frame.
pub const MAX_FRAME_LEN: usize = 8;

/// Highest valid 11-bit identifier.
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Highest valid 29-bit identifier.
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// A single classic CAN frame: identifier, frame format and up to 8 data
/// bytes. Construction enforces the length and identifier invariants, so a
/// `CanFrame` in hand is always well-formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    len: u8,
    data: [u8; MAX_FRAME_LEN],
}

impl CanFrame {
    /// Builds a standard (11-bit identifier) frame.
    pub fn new(id: u32, payload: &[u8]) -> Result<Self, CanOpenError> {
        Self::build(id, false, payload)
    }

    /// Builds an extended (29-bit identifier) frame.
    pub fn new_extended(id: u32, payload: &[u8]) -> Result<Self, CanOpenError> {
        Self::build(id, true, payload)
    }

    fn build(id: u32, extended: bool, payload: &[u8]) -> Result<Self, CanOpenError> {
        let max_id = if extended {
            MAX_EXTENDED_ID
        } else {
            MAX_STANDARD_ID
        };
        if id > max_id {
            return Err(CanOpenError::InvalidIdentifier(id));
        }
        if payload.len() > MAX_FRAME_LEN {
            return Err(CanOpenError::FrameTooLong(payload.len()));
        }
        let mut data = [0u8; MAX_FRAME_LEN];
        data[..payload.len()].copy_from_slice(payload);
        Ok(CanFrame {
            id,
            extended,
            len: payload.len() as u8,
            data,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The payload bytes actually carried by the frame.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Low 7 identifier bits, the node address for node-scoped COB-IDs.
    pub fn node_id(&self) -> u8 {
        (self.id & COB_ID_NODE_MASK) as u8
    }

    /// Function-code base, the identifier with the node bits masked out.
    pub fn base_id(&self) -> u32 {
        self.id & COB_ID_BASE_MASK
    }
}

impl std::fmt::Display for CanFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ID: 0x{:03X} Len: {} Data: {}",
            self.id,
            self.len,
            hex::encode_upper(self.data())
        )
    }
}
