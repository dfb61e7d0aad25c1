//! CANopen Protocol Constants
//!
//! This module defines constants used in the CANopen protocol implementation,
//! based on the CiA 301 standard.

use std::time::Duration;

// ----------------------------------------------------------------------------
// COB-ID base identifiers (11-bit standard frames)
// ----------------------------------------------------------------------------

/// NMT broadcast identifier
pub const COB_ID_NMT: u32 = 0x000;

/// SYNC identifier
pub const COB_ID_SYNC: u32 = 0x080;

/// TIME stamp identifier
pub const COB_ID_TIME: u32 = 0x100;

/// Emergency base identifier (EMCY = base + node)
pub const COB_ID_EMCY_BASE: u32 = 0x080;

/// First transmit-PDO base identifier
pub const COB_ID_TPDO1: u32 = 0x180;

/// First receive-PDO base identifier
pub const COB_ID_RPDO1: u32 = 0x200;

/// Last transmit-PDO base identifier
pub const COB_ID_TPDO4: u32 = 0x480;

/// SDO transmit base (server-to-client responses, base + node)
pub const COB_ID_TSDO_BASE: u32 = 0x580;

/// SDO receive base (client-to-server requests, base + node)
pub const COB_ID_RSDO_BASE: u32 = 0x600;

/// Heartbeat base identifier (base + node)
pub const COB_ID_HB_BASE: u32 = 0x700;

/// Mask extracting the node address from a COB-ID
pub const COB_ID_NODE_MASK: u32 = 0x7F;

/// Mask extracting the function-code base from a COB-ID
pub const COB_ID_BASE_MASK: u32 = 0x780;

// ----------------------------------------------------------------------------
// SDO command specifiers (expedited transfers only)
// ----------------------------------------------------------------------------

/// SDO upload (read) request command byte
pub const SDO_READ_REQUEST: u8 = 0x40;

/// Base command byte for an expedited SDO download (write) request;
/// the unused-byte count is OR-ed in as `(4 - size) << 2`.
pub const SDO_WRITE_REQUEST_BASE: u8 = 0x23;

/// Mask over byte 0 identifying the SDO command specifier bits
pub const SDO_CS_MASK: u8 = 0xE0;

/// Command-specifier bits of an SDO abort response
pub const SDO_ABORT: u8 = 0x80;

// ----------------------------------------------------------------------------
// Well-known object dictionary entries
// ----------------------------------------------------------------------------

/// Device type (0x1000:00)
pub const OD_DEVICE_TYPE: u16 = 0x1000;

/// Error register (0x1001:00), used as the reachability probe
pub const OD_ERROR_REGISTER: u16 = 0x1001;

/// Store-parameters object (0x1010)
pub const OD_STORE_PARAMETERS: u16 = 0x1010;

/// Identity object (0x1018)
pub const OD_IDENTITY: u16 = 0x1018;

/// Vendor configuration object holding the write-enable gate (sub 1)
/// and the node address (sub 2)
pub const OD_VENDOR_CONFIG: u16 = 0x2000;

/// Write-enable magic for 0x2000:01, ASCII "nerw" little-endian
pub const SDO_UNLOCK_VALUE: u32 = 0x6E65_7277;

/// Store-parameters signature for 0x1010, ASCII "save" little-endian
pub const SDO_SAVE_VALUE: u32 = 0x6576_6173;

// ----------------------------------------------------------------------------
// Timing
// ----------------------------------------------------------------------------

/// Default SDO response timeout
pub const SDO_DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Extended timeout for the non-volatile store step of a node-address change
pub const SDO_STORE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Granularity of the cooperative busy-poll loops
pub const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Per-node budget during a discovery scan
pub const SCAN_NODE_TIMEOUT: Duration = Duration::from_millis(100);

/// Probe attempts per node during a discovery scan
pub const SCAN_MAX_ATTEMPTS: u8 = 3;

/// Per-round budget during bit-rate detection
pub const AUTOBAUD_ROUND_TIMEOUT: Duration = Duration::from_millis(500);

/// Probe rounds per bit-rate candidate
pub const AUTOBAUD_MAX_ATTEMPTS: u8 = 3;

/// Idle window after which a control source loses ownership
pub const SOURCE_TIMEOUT: Duration = Duration::from_millis(3000);

// ----------------------------------------------------------------------------
// Bit rates
// ----------------------------------------------------------------------------

/// Bit-rate candidates in kbit/s, ordered by how often each shows up in the
/// field so that detection settles quickly on the common ones.
pub const BITRATE_CANDIDATES: &[u32] = &[125, 250, 500, 1000, 100, 50, 20, 10, 800];

/// Fallback rate when detection exhausts every candidate
pub const DEFAULT_BITRATE_KBPS: u32 = 125;

/// All bus speeds the tool accepts, in kbit/s
pub const SUPPORTED_BITRATES: &[u32] = &[10, 20, 50, 100, 125, 250, 500, 800, 1000];

/// Returns true if `kbps` is one of the supported bus speeds.
pub fn is_valid_bitrate(kbps: u32) -> bool {
    SUPPORTED_BITRATES.contains(&kbps)
}

/// Node addresses probed first during bit-rate detection
pub const KNOWN_NODES: &[u8] = &[1, 2, 3, 4, 5, 10];

/// Rotating SDO probe indices used by the discovery scanner:
/// device type, error register, identity.
pub const SCAN_PROBE_OBJECTS: &[u16] = &[OD_DEVICE_TYPE, OD_ERROR_REGISTER, OD_IDENTITY];
