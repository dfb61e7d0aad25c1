//! Placeholder backend for configurations without transceiver hardware.

use crate::can::frame::CanFrame;
use crate::can::transport::CanTransport;
use crate::constants::is_valid_bitrate;
use crate::error::CanOpenError;

/// A backend that validates the requested bit rate but carries no traffic.
/// Useful as a configuration placeholder before real hardware is selected.
#[derive(Debug, Default)]
pub struct StubTransport {
    open: bool,
}

impl CanTransport for StubTransport {
    fn open(&mut self, bitrate_kbps: u32) -> Result<(), CanOpenError> {
        if !is_valid_bitrate(bitrate_kbps) {
            return Err(CanOpenError::UnsupportedBitrate(bitrate_kbps));
        }
        self.open = true;
        Ok(())
    }

    fn send(&mut self, _frame: &CanFrame) -> Result<(), CanOpenError> {
        if !self.open {
            return Err(CanOpenError::TransportUnavailable);
        }
        Err(CanOpenError::SendFailure(
            "stub transceiver has no bus".into(),
        ))
    }

    fn poll(&mut self) -> bool {
        false
    }

    fn receive(&mut self) -> Result<CanFrame, CanOpenError> {
        Err(CanOpenError::TransportUnavailable)
    }

    fn close(&mut self) {
        self.open = false;
    }
}
