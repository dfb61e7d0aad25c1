//! SDO client, NMT master and the node-address change transaction.
//!
//! Everything here is synchronous and single-threaded: a request is sent,
//! then the bus is drained in a deadline loop until the matching response
//! shows up or the budget runs out. All waiting goes through the injected
//! [`Clock`], so the same code runs under test against a manual clock.

use std::time::Duration;

use log::{debug, info, warn};

use crate::can::frame::CanFrame;
use crate::can::transport::CanTransport;
use crate::constants::{
    COB_ID_HB_BASE, COB_ID_NMT, COB_ID_NODE_MASK, COB_ID_RSDO_BASE, COB_ID_SYNC,
    COB_ID_TSDO_BASE, OD_ERROR_REGISTER, OD_STORE_PARAMETERS, OD_VENDOR_CONFIG, POLL_INTERVAL,
    SDO_DEFAULT_TIMEOUT, SDO_READ_REQUEST, SDO_SAVE_VALUE, SDO_STORE_TIMEOUT, SDO_UNLOCK_VALUE,
    SDO_WRITE_REQUEST_BASE,
};
use crate::canopen::classifier::is_abort_response;
use crate::error::CanOpenError;
use crate::util::clock::{Clock, SystemClock};

/// Settling delay after switching a node to pre-operational.
const PREOP_SETTLE: Duration = Duration::from_millis(200);

/// Settling delay between the configuration writes of an address change.
const WRITE_SETTLE: Duration = Duration::from_millis(500);

/// A validated node address, always within 1..=127.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeAddress(u8);

impl NodeAddress {
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeAddress {
    type Error = CanOpenError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        if raw == 0 || u32::from(raw) > COB_ID_NODE_MASK {
            return Err(CanOpenError::InvalidNodeAddress(raw));
        }
        Ok(NodeAddress(raw))
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload width of an expedited SDO write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdoSize {
    One,
    Two,
    Four,
}

impl SdoSize {
    pub fn byte_count(self) -> u8 {
        match self {
            SdoSize::One => 1,
            SdoSize::Two => 2,
            SdoSize::Four => 4,
        }
    }

    /// Command byte of an expedited download request carrying this width.
    pub fn command_byte(self) -> u8 {
        SDO_WRITE_REQUEST_BASE | ((4 - self.byte_count()) << 2)
    }
}

/// NMT module-control commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmtCommand {
    Start,
    Stop,
    EnterPreOperational,
    ResetNode,
    ResetCommunication,
}

impl NmtCommand {
    pub fn code(self) -> u8 {
        match self {
            NmtCommand::Start => 0x01,
            NmtCommand::Stop => 0x02,
            NmtCommand::EnterPreOperational => 0x80,
            NmtCommand::ResetNode => 0x81,
            NmtCommand::ResetCommunication => 0x82,
        }
    }
}

/// Addressee of an NMT command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NmtTarget {
    All,
    Node(NodeAddress),
}

impl NmtTarget {
    fn byte(self) -> u8 {
        match self {
            NmtTarget::All => 0,
            NmtTarget::Node(node) => node.get(),
        }
    }
}

/// Whether the non-volatile store step of an address change succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceStatus {
    /// Persistence was not requested.
    NotRequested,
    /// The node acknowledged the store command.
    Stored,
    /// The store command failed; the new address is active but volatile.
    Failed,
}

/// Result of a completed node-address change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeNodeIdOutcome {
    pub persistence: PersistenceStatus,
}

/// Builds an expedited SDO upload (read) request frame.
pub fn sdo_read_request(node: u8, index: u16, sub_index: u8) -> CanFrame {
    let idx = index.to_le_bytes();
    let payload = [SDO_READ_REQUEST, idx[0], idx[1], sub_index, 0, 0, 0, 0];
    CanFrame::new(COB_ID_RSDO_BASE + u32::from(node), &payload)
        .expect("request identifier is always standard")
}

/// Builds an expedited SDO download (write) request frame.
pub fn sdo_write_request(node: u8, index: u16, sub_index: u8, value: u32, size: SdoSize) -> CanFrame {
    let idx = index.to_le_bytes();
    let val = value.to_le_bytes();
    let payload = [
        size.command_byte(),
        idx[0],
        idx[1],
        sub_index,
        val[0],
        val[1],
        val[2],
        val[3],
    ];
    CanFrame::new(COB_ID_RSDO_BASE + u32::from(node), &payload)
        .expect("request identifier is always standard")
}

/// Builds an NMT module-control frame.
pub fn nmt_frame(command: NmtCommand, target: NmtTarget) -> CanFrame {
    CanFrame::new(COB_ID_NMT, &[command.code(), target.byte()])
        .expect("NMT identifier is always standard")
}

/// The protocol engine: owns the transport and the clock, and layers SDO,
/// NMT and the address-change transaction on top of raw frames.
pub struct CanOpenClient {
    bus: Box<dyn CanTransport>,
    clock: Box<dyn Clock>,
}

impl CanOpenClient {
    /// Creates a client over `bus` driven by wall-clock time.
    pub fn new(bus: Box<dyn CanTransport>) -> Self {
        Self::with_clock(bus, Box::new(SystemClock::new()))
    }

    /// Creates a client with an explicit time source.
    pub fn with_clock(bus: Box<dyn CanTransport>, clock: Box<dyn Clock>) -> Self {
        CanOpenClient { bus, clock }
    }

    /// Brings the transport up at the given bit rate.
    pub fn open(&mut self, bitrate_kbps: u32) -> Result<(), CanOpenError> {
        self.bus.open(bitrate_kbps)
    }

    pub fn close(&mut self) {
        self.bus.close();
    }

    /// Current monotonic time of the injected clock.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Cooperative sleep on the injected clock.
    pub fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration);
    }

    /// Transmits one raw frame.
    pub fn send_frame(&mut self, frame: &CanFrame) -> Result<(), CanOpenError> {
        self.bus.send(frame)
    }

    /// Takes the next received frame without blocking, if one is waiting.
    pub fn try_receive(&mut self) -> Option<CanFrame> {
        if self.bus.poll() {
            self.bus.receive().ok()
        } else {
            None
        }
    }

    /// Sends an NMT command. Fire and forget: NMT has no response.
    pub fn send_nmt(&mut self, command: NmtCommand, target: NmtTarget) -> Result<(), CanOpenError> {
        debug!("NMT {command:?} -> {target:?}");
        self.send_frame(&nmt_frame(command, target))
    }

    /// Sends a SYNC frame.
    pub fn send_sync(&mut self) -> Result<(), CanOpenError> {
        let frame = CanFrame::new(COB_ID_SYNC, &[]).expect("SYNC identifier is always standard");
        self.send_frame(&frame)
    }

    /// Reads an object dictionary entry with the default timeout.
    pub fn read_sdo(&mut self, node: NodeAddress, index: u16, sub_index: u8) -> Result<u32, CanOpenError> {
        self.read_sdo_with_timeout(node, index, sub_index, SDO_DEFAULT_TIMEOUT)
    }

    /// Reads an object dictionary entry, waiting at most `timeout`.
    pub fn read_sdo_with_timeout(
        &mut self,
        node: NodeAddress,
        index: u16,
        sub_index: u8,
        timeout: Duration,
    ) -> Result<u32, CanOpenError> {
        self.send_frame(&sdo_read_request(node.get(), index, sub_index))?;
        let response = self.await_sdo_response(node, index, sub_index, timeout)?;
        let data = response.data();
        Ok(u32::from_le_bytes([data[4], data[5], data[6], data[7]]))
    }

    /// Writes an object dictionary entry with the default timeout.
    pub fn write_sdo(
        &mut self,
        node: NodeAddress,
        index: u16,
        sub_index: u8,
        value: u32,
        size: SdoSize,
    ) -> Result<(), CanOpenError> {
        self.write_sdo_with_timeout(node, index, sub_index, value, size, SDO_DEFAULT_TIMEOUT)
    }

    /// Writes an object dictionary entry, waiting at most `timeout` for the
    /// acknowledgement.
    pub fn write_sdo_with_timeout(
        &mut self,
        node: NodeAddress,
        index: u16,
        sub_index: u8,
        value: u32,
        size: SdoSize,
        timeout: Duration,
    ) -> Result<(), CanOpenError> {
        self.send_frame(&sdo_write_request(node.get(), index, sub_index, value, size))?;
        self.await_sdo_response(node, index, sub_index, timeout)?;
        Ok(())
    }

    /// Drains the bus until an SDO response from `node` arrives or the
    /// timeout expires. Frames from other identifiers are discarded; an
    /// abort response becomes [`CanOpenError::ProtocolAbort`].
    fn await_sdo_response(
        &mut self,
        node: NodeAddress,
        index: u16,
        sub_index: u8,
        timeout: Duration,
    ) -> Result<CanFrame, CanOpenError> {
        let expected_id = COB_ID_TSDO_BASE + u32::from(node.get());
        let deadline = self.clock.now() + timeout;

        loop {
            while let Some(frame) = self.try_receive() {
                if frame.id() != expected_id {
                    continue;
                }
                if frame.len() < 8 {
                    debug!("ignoring short SDO response: {frame}");
                    continue;
                }
                let data = frame.data();
                if is_abort_response(data[0]) {
                    let code = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
                    return Err(CanOpenError::ProtocolAbort { code });
                }
                return Ok(frame);
            }
            if self.clock.now() >= deadline {
                return Err(CanOpenError::Timeout {
                    node: node.get(),
                    index,
                    sub_index,
                });
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }

    /// Checks whether a node answers its error register, retrying up to
    /// `attempts` times. A protocol abort still counts as alive: the node
    /// answered, it just dislikes the object.
    pub fn test_node(&mut self, node: NodeAddress, attempts: u8, timeout: Duration) -> bool {
        for attempt in 0..attempts.max(1) {
            match self.read_sdo_with_timeout(node, OD_ERROR_REGISTER, 0, timeout) {
                Ok(_) | Err(CanOpenError::ProtocolAbort { .. }) => return true,
                Err(e) => debug!("node {node} probe {attempt} failed: {e}"),
            }
        }
        false
    }

    /// Permanently moves a node from `current` to `new_address`.
    ///
    /// The transaction follows the device's configuration protocol: probe
    /// reachability, switch to pre-operational, unlock the vendor
    /// configuration object, write the new address, optionally store to
    /// non-volatile memory, reset the node, then wait for it to announce
    /// itself under the new address.
    ///
    /// A failed store step does not fail the transaction; it is reported in
    /// the outcome because the new address is then only held in volatile
    /// memory.
    pub fn change_node_id(
        &mut self,
        current: NodeAddress,
        new_address: NodeAddress,
        persist: bool,
        heartbeat_timeout: Duration,
    ) -> Result<ChangeNodeIdOutcome, CanOpenError> {
        info!(
            "changing node address {current} -> {new_address} (persist: {persist})"
        );

        self.read_sdo(current, OD_ERROR_REGISTER, 0)
            .map_err(|_| CanOpenError::Unreachable(current.get()))?;

        self.send_nmt(NmtCommand::EnterPreOperational, NmtTarget::Node(current))?;
        self.clock.sleep(PREOP_SETTLE);

        self.write_sdo(current, OD_VENDOR_CONFIG, 1, SDO_UNLOCK_VALUE, SdoSize::Four)?;
        self.clock.sleep(WRITE_SETTLE);

        self.write_sdo(
            current,
            OD_VENDOR_CONFIG,
            2,
            u32::from(new_address.get()),
            SdoSize::Four,
        )?;
        self.clock.sleep(WRITE_SETTLE);

        let persistence = if persist {
            match self.write_sdo_with_timeout(
                current,
                OD_STORE_PARAMETERS,
                2,
                SDO_SAVE_VALUE,
                SdoSize::Four,
                SDO_STORE_TIMEOUT,
            ) {
                Ok(()) => PersistenceStatus::Stored,
                Err(e) => {
                    warn!("node {current}: store parameters failed ({e}), address change stays volatile");
                    PersistenceStatus::Failed
                }
            }
        } else {
            PersistenceStatus::NotRequested
        };
        if persist {
            self.clock.sleep(WRITE_SETTLE);
        }

        self.send_nmt(NmtCommand::ResetNode, NmtTarget::Node(current))?;
        self.await_heartbeat(new_address, heartbeat_timeout)?;

        info!("node {new_address} announced itself under the new address");
        Ok(ChangeNodeIdOutcome { persistence })
    }

    /// Waits for any heartbeat or boot-up frame from `node`.
    fn await_heartbeat(&mut self, node: NodeAddress, timeout: Duration) -> Result<(), CanOpenError> {
        let deadline = self.clock.now() + timeout;
        loop {
            while let Some(frame) = self.try_receive() {
                if frame.base_id() == COB_ID_HB_BASE && frame.node_id() == node.get() {
                    return Ok(());
                }
            }
            if self.clock.now() >= deadline {
                return Err(CanOpenError::NewAddressSilent(node.get()));
            }
            self.clock.sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::mock::MockCanBus;
    use crate::util::clock::ManualClock;

    fn client_with_mock() -> (CanOpenClient, MockCanBus, ManualClock) {
        let bus = MockCanBus::new();
        let clock = ManualClock::new();
        let mut client =
            CanOpenClient::with_clock(Box::new(bus.clone()), Box::new(clock.clone()));
        client.open(125).unwrap();
        (client, bus, clock)
    }

    fn node(raw: u8) -> NodeAddress {
        NodeAddress::try_from(raw).unwrap()
    }

    #[test]
    fn node_address_bounds() {
        assert!(NodeAddress::try_from(0).is_err());
        assert!(NodeAddress::try_from(128).is_err());
        assert_eq!(NodeAddress::try_from(127).unwrap().get(), 127);
    }

    #[test]
    fn write_command_byte_encodes_the_payload_width() {
        assert_eq!(SdoSize::One.command_byte(), 0x2F);
        assert_eq!(SdoSize::Two.command_byte(), 0x2B);
        assert_eq!(SdoSize::Four.command_byte(), 0x23);
    }

    #[test]
    fn read_request_wire_format() {
        let frame = sdo_read_request(5, 0x1018, 2);
        assert_eq!(frame.id(), 0x605);
        assert_eq!(frame.data(), &[0x40, 0x18, 0x10, 0x02, 0, 0, 0, 0]);
    }

    #[test]
    fn write_request_wire_format() {
        let frame = sdo_write_request(3, 0x2000, 1, 0x6E65_7277, SdoSize::Four);
        assert_eq!(frame.id(), 0x603);
        assert_eq!(frame.data(), &[0x23, 0x00, 0x20, 0x01, 0x77, 0x72, 0x65, 0x6E]);
    }

    #[test]
    fn nmt_frame_wire_format() {
        let all = nmt_frame(NmtCommand::Start, NmtTarget::All);
        assert_eq!(all.id(), 0x000);
        assert_eq!(all.data(), &[0x01, 0x00]);

        let reset = nmt_frame(NmtCommand::ResetNode, NmtTarget::Node(node(7)));
        assert_eq!(reset.data(), &[0x81, 0x07]);
    }

    #[test]
    fn read_returns_the_responded_value() {
        let (mut client, bus, _clock) = client_with_mock();
        bus.respond_sdo(5, 0x0001_0203);
        let value = client.read_sdo(node(5), 0x1000, 0).unwrap();
        assert_eq!(value, 0x0001_0203);
    }

    #[test]
    fn abort_response_surfaces_the_code() {
        let (mut client, bus, _clock) = client_with_mock();
        bus.respond_sdo(5, 0);
        bus.abort_on_index(0x2000, 0x0601_0002);
        let err = client.write_sdo(node(5), 0x2000, 1, 1, SdoSize::Four).unwrap_err();
        assert!(matches!(err, CanOpenError::ProtocolAbort { code: 0x0601_0002 }));
    }

    #[test]
    fn silence_becomes_a_timeout() {
        let (mut client, _bus, clock) = client_with_mock();
        let err = client.read_sdo(node(9), 0x1000, 0).unwrap_err();
        assert!(matches!(
            err,
            CanOpenError::Timeout { node: 9, index: 0x1000, sub_index: 0 }
        ));
        assert!(clock.now() >= SDO_DEFAULT_TIMEOUT);
    }

    #[test]
    fn unrelated_frames_are_skipped_while_waiting() {
        let (mut client, bus, _clock) = client_with_mock();
        bus.respond_sdo(5, 42);
        bus.queue_frame(CanFrame::new(0x701, &[0x05]).unwrap());
        bus.queue_frame(CanFrame::new(0x586, &[0x43, 0, 0x10, 0, 9, 9, 9, 9]).unwrap());
        assert_eq!(client.read_sdo(node(5), 0x1000, 0).unwrap(), 42);
    }

    #[test]
    fn short_sdo_response_is_ignored() {
        let (mut client, bus, _clock) = client_with_mock();
        bus.queue_frame(CanFrame::new(0x585, &[0x43, 0x00]).unwrap());
        let err = client.read_sdo(node(5), 0x1000, 0).unwrap_err();
        assert!(matches!(err, CanOpenError::Timeout { .. }));
    }

    #[test]
    fn test_node_counts_an_abort_as_alive() {
        let (mut client, bus, _clock) = client_with_mock();
        bus.respond_sdo(4, 0);
        bus.abort_on_index(OD_ERROR_REGISTER, 0x0602_0000);
        assert!(client.test_node(node(4), 3, Duration::from_millis(100)));
    }

    #[test]
    fn test_node_fails_on_silence() {
        let (mut client, _bus, _clock) = client_with_mock();
        assert!(!client.test_node(node(4), 2, Duration::from_millis(50)));
    }

    #[test]
    fn change_node_id_runs_the_full_transaction() {
        let (mut client, bus, _clock) = client_with_mock();
        bus.respond_sdo(5, 0);
        bus.bootup_after_reset(9);

        let outcome = client
            .change_node_id(node(5), node(9), true, Duration::from_millis(500))
            .unwrap();
        assert_eq!(outcome.persistence, PersistenceStatus::Stored);

        let sent = bus.sent();
        let payloads: Vec<&[u8]> = sent.iter().map(|f| f.data()).collect();
        // pre-operational, unlock, address, store, reset
        assert!(payloads.contains(&&[0x80, 0x05][..]));
        assert!(payloads.contains(&&[0x23, 0x00, 0x20, 0x01, 0x77, 0x72, 0x65, 0x6E][..]));
        assert!(payloads.contains(&&[0x23, 0x00, 0x20, 0x02, 0x09, 0x00, 0x00, 0x00][..]));
        assert!(payloads.contains(&&[0x23, 0x10, 0x10, 0x02, 0x73, 0x61, 0x76, 0x65][..]));
        assert!(payloads.contains(&&[0x81, 0x05][..]));
    }

    #[test]
    fn change_node_id_unreachable_node_fails_fast() {
        let (mut client, _bus, _clock) = client_with_mock();
        let err = client
            .change_node_id(node(5), node(9), false, Duration::from_millis(100))
            .unwrap_err();
        assert!(matches!(err, CanOpenError::Unreachable(5)));
    }

    #[test]
    fn change_node_id_survives_a_failed_store() {
        let (mut client, bus, _clock) = client_with_mock();
        bus.respond_sdo(5, 0);
        bus.abort_on_index(OD_STORE_PARAMETERS, 0x0800_0020);
        bus.bootup_after_reset(9);

        let outcome = client
            .change_node_id(node(5), node(9), true, Duration::from_millis(500))
            .unwrap();
        assert_eq!(outcome.persistence, PersistenceStatus::Failed);
    }

    #[test]
    fn change_node_id_reports_a_silent_new_address() {
        let (mut client, bus, _clock) = client_with_mock();
        bus.respond_sdo(5, 0);
        let err = client
            .change_node_id(node(5), node(9), false, Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, CanOpenError::NewAddressSilent(9)));
    }
}
