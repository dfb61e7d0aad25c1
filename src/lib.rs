//! # canopen-rs
//!
//! Diagnostic and configuration tool for CANopen fieldbus devices:
//! device discovery over a node-address range, expedited SDO parameter
//! access, NMT control, permanent node-address reassignment and automatic
//! bus bit-rate detection, over a swappable CAN transceiver backend.
//!
//! The protocol engine is synchronous and single-threaded. Every wait is a
//! deadline plus a cooperative poll loop on an injected clock, so the whole
//! stack runs deterministically against the scripted
//! [`MockCanBus`](can::mock::MockCanBus) and a manual clock.
//!
//! ## Quick start
//!
//! ```no_run
//! use canopen_rs::canopen::client::{CanOpenClient, NodeAddress};
//! use canopen_rs::can::transport::{create_transport, TransceiverType};
//!
//! # fn main() -> Result<(), canopen_rs::error::CanOpenError> {
//! let transport = create_transport(TransceiverType::SocketCan, "can0")?;
//! let mut client = CanOpenClient::new(transport);
//! client.open(125)?;
//!
//! let node = NodeAddress::try_from(5)?;
//! let device_type = client.read_sdo(node, 0x1000, 0)?;
//! println!("device type: 0x{device_type:08X}");
//! # Ok(())
//! # }
//! ```

pub mod can;
pub mod canopen;
pub mod constants;
pub mod error;
pub mod logging;
pub mod settings;
pub mod tool;
pub mod util;

pub use can::frame::CanFrame;
pub use can::transport::{create_transport, CanTransport, TransceiverType};
pub use canopen::client::{CanOpenClient, NodeAddress};
pub use error::CanOpenError;
pub use settings::Settings;
pub use tool::DiagnosticTool;
