//! Scripted in-memory CAN bus for testing.
//!
//! Lets the protocol engine, scanner and bit-rate detector run against a
//! simulated bus without hardware. Cloning yields another handle onto the
//! same bus, so a test can keep one clone for scripting and inspection
//! while the code under test owns the other.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::can::frame::CanFrame;
use crate::can::transport::CanTransport;
use crate::constants::{
    is_valid_bitrate, COB_ID_HB_BASE, COB_ID_RSDO_BASE, COB_ID_TSDO_BASE, SDO_READ_REQUEST,
};
use crate::error::CanOpenError;

#[derive(Default)]
struct MockInner {
    open_bitrate: Option<u32>,
    tx: Vec<CanFrame>,
    rx: VecDeque<CanFrame>,
    /// Nodes that answer SDO requests, with the value returned on reads.
    sdo_responders: Vec<(u8, u32)>,
    /// Object index the responders abort on, with the abort code.
    abort_on_index: Option<(u16, u32)>,
    /// Bit rates at which open() fails.
    dead_bitrates: Vec<u32>,
    /// Bit rate at which any transmission provokes unrelated bus chatter.
    chatter_bitrate: Option<u32>,
    /// Node address that emits a boot-up frame once an NMT ResetNode is seen.
    bootup_after_reset: Option<u8>,
    fail_next_send: bool,
}

/// Simulated CAN bus with scriptable remote-node behavior.
#[derive(Clone, Default)]
pub struct MockCanBus {
    inner: Arc<Mutex<MockInner>>,
}

impl MockCanBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a frame as if a remote node had transmitted it.
    pub fn queue_frame(&self, frame: CanFrame) {
        self.inner.lock().unwrap().rx.push_back(frame);
    }

    /// Makes `node` answer SDO requests: reads return `read_value`,
    /// writes are acknowledged.
    pub fn respond_sdo(&self, node: u8, read_value: u32) {
        self.inner.lock().unwrap().sdo_responders.push((node, read_value));
    }

    /// Makes every responder abort requests for `index` with `code`.
    pub fn abort_on_index(&self, index: u16, code: u32) {
        self.inner.lock().unwrap().abort_on_index = Some((index, code));
    }

    /// Makes `open` fail at the given bit rate.
    pub fn fail_open_at(&self, bitrate_kbps: u32) {
        self.inner.lock().unwrap().dead_bitrates.push(bitrate_kbps);
    }

    /// Simulates a live bus at `bitrate_kbps`: any transmission while open
    /// at that rate provokes a heartbeat from node 1.
    pub fn chatter_at(&self, bitrate_kbps: u32) {
        self.inner.lock().unwrap().chatter_bitrate = Some(bitrate_kbps);
    }

    /// Makes `node` emit a boot-up frame after the next NMT ResetNode.
    pub fn bootup_after_reset(&self, node: u8) {
        self.inner.lock().unwrap().bootup_after_reset = Some(node);
    }

    /// Fails the next send() call.
    pub fn fail_next_send(&self) {
        self.inner.lock().unwrap().fail_next_send = true;
    }

    /// All frames the code under test transmitted.
    pub fn sent(&self) -> Vec<CanFrame> {
        self.inner.lock().unwrap().tx.clone()
    }

    /// The bit rate the bus is currently open at, if any.
    pub fn open_bitrate(&self) -> Option<u32> {
        self.inner.lock().unwrap().open_bitrate
    }

    pub fn clear_sent(&self) {
        self.inner.lock().unwrap().tx.clear();
    }
}

impl MockInner {
    /// Reacts to a transmitted frame the way the scripted remote nodes would.
    fn react(&mut self, frame: &CanFrame) {
        if let Some(kbps) = self.chatter_bitrate {
            if self.open_bitrate == Some(kbps) {
                let heartbeat = CanFrame::new(COB_ID_HB_BASE + 1, &[0x05]).unwrap();
                self.rx.push_back(heartbeat);
            }
        }

        // NMT ResetNode wakes the scripted node up under its new address.
        if frame.id() == 0x000 && frame.data().first() == Some(&0x81) {
            if let Some(node) = self.bootup_after_reset.take() {
                let bootup = CanFrame::new(COB_ID_HB_BASE + u32::from(node), &[0x00]).unwrap();
                self.rx.push_back(bootup);
            }
        }

        // Expedited SDO request to a scripted responder.
        let base = frame.base_id();
        if base == COB_ID_RSDO_BASE && frame.len() == 8 {
            let node = frame.node_id();
            let Some(&(_, read_value)) = self
                .sdo_responders
                .iter()
                .find(|(n, _)| *n == node)
            else {
                return;
            };
            let req = frame.data();
            let index = u16::from_le_bytes([req[1], req[2]]);
            let response_id = COB_ID_TSDO_BASE + u32::from(node);

            if let Some((abort_index, code)) = self.abort_on_index {
                if index == abort_index {
                    let code = code.to_le_bytes();
                    let abort = [0x80, req[1], req[2], req[3], code[0], code[1], code[2], code[3]];
                    self.rx.push_back(CanFrame::new(response_id, &abort).unwrap());
                    return;
                }
            }

            let payload = if req[0] == SDO_READ_REQUEST {
                let value = read_value.to_le_bytes();
                [0x43, req[1], req[2], req[3], value[0], value[1], value[2], value[3]]
            } else {
                [0x60, req[1], req[2], req[3], 0, 0, 0, 0]
            };
            self.rx.push_back(CanFrame::new(response_id, &payload).unwrap());
        }
    }
}

impl CanTransport for MockCanBus {
    fn open(&mut self, bitrate_kbps: u32) -> Result<(), CanOpenError> {
        if !is_valid_bitrate(bitrate_kbps) {
            return Err(CanOpenError::UnsupportedBitrate(bitrate_kbps));
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.dead_bitrates.contains(&bitrate_kbps) {
            return Err(CanOpenError::TransportError(format!(
                "simulated open failure at {bitrate_kbps} kbit/s"
            )));
        }
        inner.open_bitrate = Some(bitrate_kbps);
        inner.rx.clear();
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), CanOpenError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.open_bitrate.is_none() {
            return Err(CanOpenError::TransportUnavailable);
        }
        if inner.fail_next_send {
            inner.fail_next_send = false;
            return Err(CanOpenError::SendFailure("simulated send failure".into()));
        }
        inner.tx.push(*frame);
        inner.react(frame);
        Ok(())
    }

    fn poll(&mut self) -> bool {
        !self.inner.lock().unwrap().rx.is_empty()
    }

    fn receive(&mut self) -> Result<CanFrame, CanOpenError> {
        self.inner
            .lock()
            .unwrap()
            .rx
            .pop_front()
            .ok_or(CanOpenError::TransportUnavailable)
    }

    fn close(&mut self) {
        self.inner.lock().unwrap().open_bitrate = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queued_frames_come_back_in_order(){
        let bus = MockCanBus::new();
        let mut transport = bus.clone();
        transport.open(125).unwrap();
        bus.queue_frame(CanFrame::new(0x701, &[0x05]).unwrap());
        bus.queue_frame(CanFrame::new(0x702, &[0x7F]).unwrap());
        assert!(transport.poll());
        assert_eq!(transport.receive().unwrap().id(), 0x701);
        assert_eq!(transport.receive().unwrap().id(), 0x702);
        assert!(!transport.poll());
    }

    #[test]
    fn sdo_responder_answers_reads_and_writes() {
        let bus = MockCanBus::new();
        let mut transport = bus.clone();
        transport.open(125).unwrap();
        bus.respond_sdo(5, 0xDEAD_BEEF);

        let read = CanFrame::new(0x605, &[0x40, 0x00, 0x10, 0x00, 0, 0, 0, 0]).unwrap();
        transport.send(&read).unwrap();
        let response = transport.receive().unwrap();
        assert_eq!(response.id(), 0x585);
        assert_eq!(&response.data()[4..], &0xDEAD_BEEFu32.to_le_bytes());

        let write = CanFrame::new(0x605, &[0x2B, 0x00, 0x20, 0x01, 0x34, 0x12, 0, 0]).unwrap();
        transport.send(&write).unwrap();
        let ack = transport.receive().unwrap();
        assert_eq!(ack.data()[0], 0x60);
    }

    #[test]
    fn send_fails_when_closed() {
        let bus = MockCanBus::new();
        let mut transport = bus.clone();
        let frame = CanFrame::new(0x000, &[0x01, 0x00]).unwrap();
        assert!(matches!(
            transport.send(&frame),
            Err(CanOpenError::TransportUnavailable)
        ));
    }
}
