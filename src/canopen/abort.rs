//! SDO abort-code catalog.
//!
//! Fixed table of the reason codes a node can return instead of completing
//! an SDO transfer. Unknown codes decode to a generic description, never
//! an error.

use once_cell::sync::Lazy;
use std::collections::HashMap;

static ABORT_DESCRIPTIONS: Lazy<HashMap<u32, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (0x0503_0000, "toggle bit not alternated"),
        (0x0504_0000, "SDO protocol timed out"),
        (0x0504_0001, "invalid command specifier"),
        (0x0504_0002, "invalid block size"),
        (0x0504_0003, "invalid sequence number"),
        (0x0504_0004, "CRC error"),
        (0x0504_0005, "out of memory"),
        (0x0601_0000, "unsupported access to object"),
        (0x0601_0001, "attempt to read a write-only object"),
        (0x0601_0002, "attempt to write a read-only object"),
        (0x0602_0000, "object does not exist in the object dictionary"),
        (0x0604_0041, "object cannot be mapped to a PDO"),
        (0x0604_0042, "mapped objects would exceed the PDO length"),
        (0x0604_0043, "general parameter incompatibility"),
        (0x0604_0047, "general internal incompatibility"),
        (0x0606_0000, "hardware error during object access"),
        (0x0607_0010, "data type does not match"),
        (0x0607_0012, "data type length is too high"),
        (0x0607_0013, "data type length is too low"),
        (0x0609_0011, "sub-index does not exist"),
        (0x0609_0030, "value outside the permitted range"),
        (0x0609_0031, "value too high"),
        (0x0609_0032, "value too low"),
        (0x0609_0036, "maximum value is less than minimum value"),
        (0x0800_0000, "general error"),
        (0x0800_0020, "data cannot be transferred to the application"),
        (0x0800_0021, "data cannot be transferred due to local control"),
        (0x0800_0022, "data cannot be transferred in the current device state"),
    ])
});

/// Decodes an SDO abort code into a human-readable description.
pub fn describe_abort(code: u32) -> &'static str {
    ABORT_DESCRIPTIONS
        .get(&code)
        .copied()
        .unwrap_or("unknown abort code")
}
