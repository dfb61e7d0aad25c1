//! CAN bus layer: the frame type, the transport abstraction and the
//! transceiver backends.

pub mod frame;
pub mod mock;
#[cfg(feature = "raspberry-pi")]
pub mod mcp2515;
#[cfg(feature = "socketcan")]
pub mod socketcan;
pub mod stub;
pub mod transport;

pub use frame::CanFrame;
pub use mock::MockCanBus;
pub use transport::{create_transport, CanTransport, TransceiverType};
