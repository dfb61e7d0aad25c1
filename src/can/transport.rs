//! The transport abstraction every transceiver backend implements.
//!
//! The protocol engine only ever talks to a [`CanTransport`], so swapping
//! the transceiver chip never changes protocol behavior.

use serde::{Deserialize, Serialize};

use crate::can::frame::CanFrame;
use crate::error::CanOpenError;

/// Capability set of one physical CAN transceiver.
///
/// Contract: `send` and `receive` never block past a backend-defined
/// hardware timeout; `open` with an unsupported bit rate fails with
/// [`CanOpenError::UnsupportedBitrate`] rather than silently picking a
/// default; `receive` is only valid after `poll` reported a waiting frame.
pub trait CanTransport {
    /// Brings the transceiver up at the given bit rate (kbit/s).
    fn open(&mut self, bitrate_kbps: u32) -> Result<(), CanOpenError>;

    /// Queues one frame for transmission.
    fn send(&mut self, frame: &CanFrame) -> Result<(), CanOpenError>;

    /// Non-blocking check whether a received frame is waiting.
    fn poll(&mut self) -> bool;

    /// Takes the next received frame. Valid only when `poll` returned true.
    fn receive(&mut self) -> Result<CanFrame, CanOpenError>;

    /// Shuts the transceiver down.
    fn close(&mut self);
}

/// The transceiver hardware selectable at configuration time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default,
)]
#[serde(rename_all = "kebab-case")]
pub enum TransceiverType {
    /// Linux SocketCAN network interface (native bus controller).
    #[default]
    SocketCan,
    /// MCP2515 stand-alone controller on the SPI bus.
    Mcp2515,
    /// Placeholder backend that accepts no traffic.
    Stub,
}

/// Creates the transport backend for the configured transceiver.
///
/// `interface` names the SocketCAN network device (for example `can0`) and
/// is ignored by the other backends.
pub fn create_transport(
    kind: TransceiverType,
    interface: &str,
) -> Result<Box<dyn CanTransport>, CanOpenError> {
    match kind {
        #[cfg(feature = "socketcan")]
        TransceiverType::SocketCan => Ok(Box::new(
            crate::can::socketcan::SocketCanTransport::new(interface),
        )),
        #[cfg(not(feature = "socketcan"))]
        TransceiverType::SocketCan => {
            let _ = interface;
            Err(CanOpenError::TransportUnavailable)
        }
        #[cfg(feature = "raspberry-pi")]
        TransceiverType::Mcp2515 => Ok(Box::new(crate::can::mcp2515::Mcp2515Transport::new()?)),
        #[cfg(not(feature = "raspberry-pi"))]
        TransceiverType::Mcp2515 => Err(CanOpenError::TransportUnavailable),
        TransceiverType::Stub => Ok(Box::new(crate::can::stub::StubTransport::default())),
    }
}
