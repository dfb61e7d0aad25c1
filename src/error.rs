//! # CANopen Error Handling
//!
//! This module defines the CanOpenError enum, which represents the different
//! error types that can occur in the canopen-rs crate.

use thiserror::Error;

use crate::canopen::abort::describe_abort;

/// Represents the different error types that can occur in the CANopen crate.
#[derive(Debug, Error)]
pub enum CanOpenError {
    /// No transport backend is bound or the backend is not open.
    #[error("CAN transport unavailable")]
    TransportUnavailable,

    /// The backend rejected a transmit request.
    #[error("CAN send failure: {0}")]
    SendFailure(String),

    /// No matching response arrived within the timeout budget.
    #[error("SDO timeout: node {node}, object 0x{index:04X}:{sub_index:02X}")]
    Timeout {
        node: u8,
        index: u16,
        sub_index: u8,
    },

    /// The remote node aborted the SDO transfer.
    #[error("SDO abort: code 0x{code:08X} ({})", describe_abort(*code))]
    ProtocolAbort { code: u32 },

    /// The pre-flight reachability probe failed.
    #[error("node {0} is unreachable")]
    Unreachable(u8),

    /// The new node address did not announce itself within the timeout.
    /// The address change itself may still have taken effect.
    #[error("new node address {0} is not responding")]
    NewAddressSilent(u8),

    /// Storing parameters to non-volatile memory failed. The address change
    /// already happened in volatile memory; only durability is at risk.
    #[error("node {0}: storing parameters failed, change is not persistent")]
    PersistenceFailure(u8),

    /// A bit rate outside the supported set was requested.
    #[error("unsupported bit rate: {0} kbit/s")]
    UnsupportedBitrate(u32),

    /// A node address outside 1..=127 was supplied.
    #[error("invalid node address: {0} (valid: 1-127)")]
    InvalidNodeAddress(u8),

    /// A frame payload longer than 8 bytes was supplied.
    #[error("frame payload too long: {0} bytes (max 8)")]
    FrameTooLong(usize),

    /// A CAN identifier outside the addressable range was supplied.
    #[error("invalid CAN identifier: 0x{0:X}")]
    InvalidIdentifier(u32),

    /// An uncategorized backend failure.
    #[error("CAN transport error: {0}")]
    TransportError(String),

    /// Loading or saving the tool settings failed.
    #[error("settings error: {0}")]
    SettingsError(String),
}
