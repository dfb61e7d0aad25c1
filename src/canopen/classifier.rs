//! Frame classification for the scanner, the live monitor and diagnostics.
//!
//! Derives the protocol role of a raw frame from its identifier, and renders
//! the one-line decoded description shown on the monitor.

use crate::can::frame::CanFrame;
use crate::canopen::abort::describe_abort;
use crate::constants::{
    COB_ID_BASE_MASK, COB_ID_EMCY_BASE, COB_ID_HB_BASE, COB_ID_NMT, COB_ID_NODE_MASK,
    COB_ID_RPDO1, COB_ID_RSDO_BASE, COB_ID_SYNC, COB_ID_TIME, COB_ID_TPDO1, COB_ID_TPDO4,
    COB_ID_TSDO_BASE, SDO_ABORT, SDO_CS_MASK,
};

/// Operational state a node announces in its heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmtState {
    BootUp,
    Stopped,
    Operational,
    PreOperational,
    Unknown(u8),
}

impl NmtState {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => NmtState::BootUp,
            0x04 => NmtState::Stopped,
            0x05 => NmtState::Operational,
            0x7F => NmtState::PreOperational,
            other => NmtState::Unknown(other),
        }
    }
}

impl std::fmt::Display for NmtState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NmtState::BootUp => write!(f, "boot-up"),
            NmtState::Stopped => write!(f, "stopped"),
            NmtState::Operational => write!(f, "operational"),
            NmtState::PreOperational => write!(f, "pre-operational"),
            NmtState::Unknown(byte) => write!(f, "unknown state 0x{byte:02X}"),
        }
    }
}

/// The protocol role of a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    NmtCommand,
    Sync,
    TimeStamp,
    Emergency { node: u8 },
    Tpdo { number: u8, node: u8 },
    Rpdo { number: u8, node: u8 },
    SdoResponse { node: u8 },
    SdoRequest { node: u8 },
    BootUp { node: u8 },
    Heartbeat { node: u8, state: NmtState },
    Unknown,
}

/// Classifies a frame by its identifier (and, for heartbeats, its payload).
pub fn classify(frame: &CanFrame) -> MessageKind {
    let id = frame.id();
    let node = frame.node_id();
    let base = frame.base_id();

    if id == COB_ID_NMT {
        return MessageKind::NmtCommand;
    }
    if id == COB_ID_SYNC {
        return MessageKind::Sync;
    }
    if id == COB_ID_TIME {
        return MessageKind::TimeStamp;
    }
    if base == COB_ID_EMCY_BASE && node != 0 {
        return MessageKind::Emergency { node };
    }
    if (COB_ID_TPDO1..=COB_ID_TPDO4).contains(&base) && base % 0x100 == 0x80 {
        let number = ((base - COB_ID_TPDO1) / 0x100 + 1) as u8;
        return MessageKind::Tpdo { number, node };
    }
    if (COB_ID_RPDO1..=0x500).contains(&base) && base % 0x100 == 0 {
        let number = ((base - COB_ID_RPDO1) / 0x100 + 1) as u8;
        return MessageKind::Rpdo { number, node };
    }
    if base == COB_ID_TSDO_BASE {
        return MessageKind::SdoResponse { node };
    }
    if base == COB_ID_RSDO_BASE {
        return MessageKind::SdoRequest { node };
    }
    if base == COB_ID_HB_BASE {
        return match frame.data().first() {
            Some(0x00) => MessageKind::BootUp { node },
            Some(&state) => MessageKind::Heartbeat {
                node,
                state: NmtState::from_byte(state),
            },
            None => MessageKind::Unknown,
        };
    }
    MessageKind::Unknown
}

/// Liveness rule used by the discovery scanner: any frame in the SDO
/// response, heartbeat or emergency ranges counts, and so does anything
/// matching the transmit-PDO identifier heuristic. The PDO check masks out
/// only part of the identifier on purpose; other traffic in those ranges is
/// deliberately accepted as proof of life.
pub fn proof_of_life(id: u32) -> Option<u8> {
    let node = (id & COB_ID_NODE_MASK) as u8;
    if node == 0 {
        return None;
    }
    let base = id & COB_ID_BASE_MASK;
    let alive = base == COB_ID_TSDO_BASE
        || base == COB_ID_HB_BASE
        || base == COB_ID_EMCY_BASE
        || ((COB_ID_TPDO1..=COB_ID_TPDO4).contains(&base) && base % 0x100 == 0x80);
    alive.then_some(node)
}

/// Renders the decoded one-line description of a frame for the monitor.
pub fn describe(frame: &CanFrame) -> String {
    match classify(frame) {
        MessageKind::NmtCommand => describe_nmt_command(frame),
        MessageKind::Sync => "[SYNC]".into(),
        MessageKind::TimeStamp => "[TIME]".into(),
        MessageKind::Emergency { node } => {
            let data = frame.data();
            if data.len() >= 2 {
                let code = u16::from_le_bytes([data[0], data[1]]);
                format!("[Emergency from node {node}] error 0x{code:04X}")
            } else {
                format!("[Emergency from node {node}]")
            }
        }
        MessageKind::Tpdo { number, node } => format!("[TPDO{number} from node {node}]"),
        MessageKind::Rpdo { number, node } => format!("[RPDO{number} to node {node}]"),
        MessageKind::SdoResponse { node } => {
            format!("[SDO response from node {node}]{}", describe_sdo_response(frame))
        }
        MessageKind::SdoRequest { node } => format!("[SDO request to node {node}]"),
        MessageKind::BootUp { node } => format!("[Boot-up from node {node}]"),
        MessageKind::Heartbeat { node, state } => {
            format!("[Heartbeat from node {node}] ({state})")
        }
        MessageKind::Unknown => format!("[Unknown message] id 0x{:03X}", frame.id()),
    }
}

fn describe_nmt_command(frame: &CanFrame) -> String {
    let data = frame.data();
    if data.len() < 2 {
        return "[NMT broadcast]".into();
    }
    let target = if data[1] == 0 {
        "all nodes".to_string()
    } else {
        format!("node {}", data[1])
    };
    let command = match data[0] {
        0x01 => "start",
        0x02 => "stop",
        0x80 => "enter pre-operational",
        0x81 => "reset node",
        0x82 => "reset communication",
        _ => return format!("[NMT broadcast] unknown command 0x{:02X} for {target}", data[0]),
    };
    format!("[NMT broadcast] {command} {target}")
}

fn describe_sdo_response(frame: &CanFrame) -> String {
    let data = frame.data();
    if data.len() < 4 {
        return String::new();
    }
    match data[0] >> 5 {
        0 => " (upload segment)".into(),
        1 => " (download segment)".into(),
        2 => {
            // Expedited upload carries the value inline.
            if data[0] & 0x02 != 0 && data.len() >= 8 {
                let unused = ((data[0] >> 2) & 0x03) as usize;
                let mut value = 0u32;
                for (i, &byte) in data[4..8 - unused].iter().enumerate() {
                    value |= u32::from(byte) << (i * 8);
                }
                format!(" (upload) value 0x{value:X}")
            } else {
                " (upload)".into()
            }
        }
        3 => " (download acknowledged)".into(),
        4 => {
            if data.len() >= 8 {
                let code = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
                format!(" (abort) code 0x{code:08X}: {}", describe_abort(code))
            } else {
                " (abort)".into()
            }
        }
        cs => format!(" (unknown command specifier {cs})"),
    }
}

/// Returns true if byte 0 of an SDO response marks an abort.
pub fn is_abort_response(command_byte: u8) -> bool {
    command_byte & SDO_CS_MASK == SDO_ABORT
}

/// Frame classes the live monitor can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FilterClass {
    #[default]
    Any,
    Pdo,
    Sdo,
    Emergency,
    Nmt,
    Heartbeat,
}

/// Live-monitor filter: identifier range, node address and frame class.
#[derive(Debug, Clone)]
pub struct MonitorFilter {
    pub id_min: u32,
    pub id_max: u32,
    pub node: Option<u8>,
    pub class: FilterClass,
}

impl Default for MonitorFilter {
    fn default() -> Self {
        MonitorFilter {
            id_min: 0,
            id_max: crate::can::frame::MAX_STANDARD_ID,
            node: None,
            class: FilterClass::Any,
        }
    }
}

impl MonitorFilter {
    pub fn passes(&self, frame: &CanFrame) -> bool {
        let id = frame.id();
        if id < self.id_min || id > self.id_max {
            return false;
        }
        if let Some(node) = self.node {
            if frame.node_id() != node {
                return false;
            }
        }
        let base = frame.base_id();
        match self.class {
            FilterClass::Any => true,
            FilterClass::Pdo => (COB_ID_TPDO1..=0x500).contains(&base),
            FilterClass::Sdo => base == COB_ID_TSDO_BASE || base == COB_ID_RSDO_BASE,
            FilterClass::Emergency => base == COB_ID_EMCY_BASE,
            FilterClass::Nmt => id == COB_ID_NMT,
            FilterClass::Heartbeat => base == COB_ID_HB_BASE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u32, data: &[u8]) -> CanFrame {
        CanFrame::new(id, data).unwrap()
    }

    #[test]
    fn classifies_the_fixed_identifiers() {
        assert_eq!(classify(&frame(0x000, &[0x01, 0x05])), MessageKind::NmtCommand);
        assert_eq!(classify(&frame(0x080, &[])), MessageKind::Sync);
        assert_eq!(classify(&frame(0x100, &[])), MessageKind::TimeStamp);
    }

    #[test]
    fn classifies_node_scoped_identifiers() {
        assert_eq!(
            classify(&frame(0x085, &[0x01, 0x10])),
            MessageKind::Emergency { node: 5 }
        );
        assert_eq!(
            classify(&frame(0x185, &[])),
            MessageKind::Tpdo { number: 1, node: 5 }
        );
        assert_eq!(
            classify(&frame(0x305, &[])),
            MessageKind::Rpdo { number: 2, node: 5 }
        );
        assert_eq!(
            classify(&frame(0x585, &[0x43, 0, 0x10, 0, 1, 0, 0, 0])),
            MessageKind::SdoResponse { node: 5 }
        );
        assert_eq!(
            classify(&frame(0x605, &[0x40, 0, 0x10, 0, 0, 0, 0, 0])),
            MessageKind::SdoRequest { node: 5 }
        );
    }

    #[test]
    fn heartbeat_decodes_the_nmt_state() {
        assert_eq!(
            classify(&frame(0x705, &[0x00])),
            MessageKind::BootUp { node: 5 }
        );
        assert_eq!(
            classify(&frame(0x705, &[0x05])),
            MessageKind::Heartbeat {
                node: 5,
                state: NmtState::Operational
            }
        );
        assert_eq!(
            classify(&frame(0x705, &[0x7F])),
            MessageKind::Heartbeat {
                node: 5,
                state: NmtState::PreOperational
            }
        );
    }

    #[test]
    fn proof_of_life_accepts_the_documented_ranges() {
        assert_eq!(proof_of_life(0x583), Some(3));
        assert_eq!(proof_of_life(0x703), Some(3));
        assert_eq!(proof_of_life(0x083), Some(3));
        assert_eq!(proof_of_life(0x183), Some(3)); // TPDO1
        assert_eq!(proof_of_life(0x483), Some(3)); // TPDO4
    }

    #[test]
    fn proof_of_life_rejects_requests_and_broadcasts() {
        assert_eq!(proof_of_life(0x603), None); // SDO request, not a response
        assert_eq!(proof_of_life(0x203), None); // RPDO
        assert_eq!(proof_of_life(0x000), None); // NMT broadcast
        assert_eq!(proof_of_life(0x080), None); // SYNC, node bits zero
        assert_eq!(proof_of_life(0x580), None); // node 0 is not addressable
    }

    #[test]
    fn abort_description_appears_in_sdo_decode() {
        let abort = frame(0x585, &[0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x02, 0x06]);
        let text = describe(&abort);
        assert!(text.contains("0x06020000"));
        assert!(text.contains("object does not exist"));
    }

    #[test]
    fn expedited_upload_value_is_decoded() {
        // 0x43 = expedited upload response, 4 data bytes
        let response = frame(0x585, &[0x43, 0x00, 0x10, 0x00, 0x91, 0x01, 0x02, 0x00]);
        assert_eq!(describe(&response), "[SDO response from node 5] (upload) value 0x20191");
    }

    #[test]
    fn monitor_filter_by_class_and_node() {
        let heartbeat = frame(0x705, &[0x05]);
        let sdo = frame(0x585, &[0x60, 0, 0, 0, 0, 0, 0, 0]);

        let mut filter = MonitorFilter {
            class: FilterClass::Heartbeat,
            ..Default::default()
        };
        assert!(filter.passes(&heartbeat));
        assert!(!filter.passes(&sdo));

        filter.class = FilterClass::Any;
        filter.node = Some(5);
        assert!(filter.passes(&heartbeat));
        filter.node = Some(6);
        assert!(!filter.passes(&heartbeat));

        filter.node = None;
        filter.id_max = 0x600;
        assert!(!filter.passes(&heartbeat));
    }
}
