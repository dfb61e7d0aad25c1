//! Linux SocketCAN backend (native bus controller).
//!
//! Uses the `socketcan` crate for frame I/O and its netlink support for
//! reconfiguring the interface bit rate. Reconfiguration needs CAP_NET_ADMIN;
//! without it the backend keeps the interface's current rate and logs a
//! warning, which still lets the tool run on a pre-configured interface.

use log::{debug, warn};
use socketcan::nl::CanInterface;
use socketcan::{CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId};

use crate::can::frame::CanFrame;
use crate::can::transport::CanTransport;
use crate::constants::is_valid_bitrate;
use crate::error::CanOpenError;

pub struct SocketCanTransport {
    interface: String,
    socket: Option<CanSocket>,
    /// Frame read ahead by poll(), handed out by the next receive().
    pending: Option<CanFrame>,
}

impl SocketCanTransport {
    pub fn new(interface: &str) -> Self {
        SocketCanTransport {
            interface: interface.to_string(),
            socket: None,
            pending: None,
        }
    }

    fn set_bitrate(&self, bitrate_kbps: u32) -> Result<(), CanOpenError> {
        let iface = CanInterface::open(&self.interface)
            .map_err(|e| CanOpenError::TransportError(e.to_string()))?;
        iface
            .bring_down()
            .map_err(|e| CanOpenError::TransportError(e.to_string()))?;
        iface
            .set_bitrate(bitrate_kbps * 1000, None)
            .map_err(|e| CanOpenError::TransportError(e.to_string()))?;
        iface
            .bring_up()
            .map_err(|e| CanOpenError::TransportError(e.to_string()))
    }

    /// Non-blocking read of one frame from the socket, if any is queued.
    fn try_read(&mut self) -> Option<CanFrame> {
        let socket = self.socket.as_ref()?;
        match socket.read_frame() {
            Ok(raw) => match convert(&raw) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    debug!("dropping unusable frame: {e}");
                    None
                }
            },
            Err(_) => None, // WouldBlock or transient read error
        }
    }
}

fn convert(raw: &socketcan::CanFrame) -> Result<CanFrame, CanOpenError> {
    if raw.is_extended() {
        CanFrame::new_extended(raw.raw_id(), raw.data())
    } else {
        CanFrame::new(raw.raw_id(), raw.data())
    }
}

impl CanTransport for SocketCanTransport {
    fn open(&mut self, bitrate_kbps: u32) -> Result<(), CanOpenError> {
        if !is_valid_bitrate(bitrate_kbps) {
            return Err(CanOpenError::UnsupportedBitrate(bitrate_kbps));
        }
        self.close();

        if let Err(e) = self.set_bitrate(bitrate_kbps) {
            // Typically a permission problem; the interface keeps whatever
            // rate it was configured with.
            warn!(
                "could not set {} to {} kbit/s ({e}), keeping current rate",
                self.interface, bitrate_kbps
            );
        }

        let socket = CanSocket::open(&self.interface)
            .map_err(|e| CanOpenError::TransportError(e.to_string()))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| CanOpenError::TransportError(e.to_string()))?;
        debug!("{} open at {} kbit/s", self.interface, bitrate_kbps);
        self.socket = Some(socket);
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), CanOpenError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or(CanOpenError::TransportUnavailable)?;

        let raw = if frame.is_extended() {
            let id = ExtendedId::new(frame.id())
                .ok_or(CanOpenError::InvalidIdentifier(frame.id()))?;
            socketcan::CanFrame::new(id, frame.data())
        } else {
            let id = StandardId::new(frame.id() as u16)
                .ok_or(CanOpenError::InvalidIdentifier(frame.id()))?;
            socketcan::CanFrame::new(id, frame.data())
        }
        .ok_or_else(|| CanOpenError::SendFailure("frame rejected by socket layer".into()))?;

        socket
            .write_frame(&raw)
            .map_err(|e| CanOpenError::SendFailure(e.to_string()))
    }

    fn poll(&mut self) -> bool {
        if self.pending.is_none() {
            self.pending = self.try_read();
        }
        self.pending.is_some()
    }

    fn receive(&mut self) -> Result<CanFrame, CanOpenError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }
        self.try_read().ok_or(CanOpenError::TransportUnavailable)
    }

    fn close(&mut self) {
        self.socket = None;
        self.pending = None;
    }
}
