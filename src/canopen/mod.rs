//! CANopen protocol layer: SDO client, NMT, frame classification, device
//! discovery, bit-rate detection and control-source arbitration.

pub mod abort;
pub mod arbiter;
pub mod autobaud;
pub mod classifier;
pub mod client;
pub mod scanner;

pub use abort::describe_abort;
pub use arbiter::{Arbiter, ControlSource};
pub use autobaud::{BitrateDetector, DetectStatus};
pub use classifier::{classify, describe, proof_of_life, MessageKind, MonitorFilter, NmtState};
pub use client::{
    CanOpenClient, ChangeNodeIdOutcome, NmtCommand, NmtTarget, NodeAddress, PersistenceStatus,
    SdoSize,
};
pub use scanner::{NodeScanner, ScanEvent, ScanStatus};
