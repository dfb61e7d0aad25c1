//! MCP2515 stand-alone CAN controller on the Raspberry Pi SPI bus.
//!
//! Minimal command set only: reset, register access, request-to-send and
//! the two receive buffers. Timing assumes the common 8 MHz crystal.

use rppal::spi::{Bus, Mode, SlaveSelect, Spi};

use crate::can::frame::CanFrame;
use crate::can::transport::CanTransport;
use crate::error::CanOpenError;

// SPI instruction set
const CMD_RESET: u8 = 0xC0;
const CMD_READ: u8 = 0x03;
const CMD_WRITE: u8 = 0x02;
const CMD_RTS_TXB0: u8 = 0x81;
const CMD_READ_STATUS: u8 = 0xA0;
const CMD_BIT_MODIFY: u8 = 0x05;

// Registers
const REG_CANCTRL: u8 = 0x0F;
const REG_CANINTF: u8 = 0x2C;
const REG_CNF3: u8 = 0x28;
const REG_TXB0SIDH: u8 = 0x31;
const REG_RXB0SIDH: u8 = 0x61;
const REG_RXB1SIDH: u8 = 0x71;

const MODE_NORMAL: u8 = 0x00;
const MODE_CONFIG: u8 = 0x80;
const CANINTF_RX0IF: u8 = 0x01;
const CANINTF_RX1IF: u8 = 0x02;

/// CNF1/CNF2/CNF3 values for an 8 MHz oscillator. 800 kbit/s is not
/// reachable with this crystal.
fn cnf_for(bitrate_kbps: u32) -> Option<[u8; 3]> {
    match bitrate_kbps {
        10 => Some([0x31, 0xB5, 0x01]),
        20 => Some([0x18, 0xB5, 0x01]),
        50 => Some([0x09, 0xB5, 0x01]),
        100 => Some([0x04, 0xB5, 0x01]),
        125 => Some([0x03, 0xB5, 0x01]),
        250 => Some([0x01, 0xB5, 0x01]),
        500 => Some([0x00, 0xB5, 0x01]),
        1000 => Some([0x00, 0x91, 0x01]),
        _ => None,
    }
}

pub struct Mcp2515Transport {
    spi: Spi,
    open: bool,
}

impl Mcp2515Transport {
    pub fn new() -> Result<Self, CanOpenError> {
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, 10_000_000, Mode::Mode0)
            .map_err(|e| CanOpenError::TransportError(e.to_string()))?;
        Ok(Mcp2515Transport { spi, open: false })
    }

    fn transfer(&mut self, tx: &[u8], rx_len: usize) -> Result<Vec<u8>, CanOpenError> {
        let mut write = tx.to_vec();
        write.resize(tx.len() + rx_len, 0);
        let mut read = vec![0u8; write.len()];
        self.spi
            .transfer(&mut read, &write)
            .map_err(|e| CanOpenError::TransportError(e.to_string()))?;
        Ok(read[tx.len()..].to_vec())
    }

    fn write_registers(&mut self, addr: u8, values: &[u8]) -> Result<(), CanOpenError> {
        let mut buf = vec![CMD_WRITE, addr];
        buf.extend_from_slice(values);
        self.transfer(&buf, 0).map(|_| ())
    }

    fn read_registers(&mut self, addr: u8, len: usize) -> Result<Vec<u8>, CanOpenError> {
        self.transfer(&[CMD_READ, addr], len)
    }

    fn read_status(&mut self) -> Result<u8, CanOpenError> {
        Ok(self.transfer(&[CMD_READ_STATUS], 1)?[0])
    }

    fn clear_interrupt(&mut self, mask: u8) -> Result<(), CanOpenError> {
        self.transfer(&[CMD_BIT_MODIFY, REG_CANINTF, mask, 0x00], 0)
            .map(|_| ())
    }

    fn read_rx_buffer(&mut self, sidh_addr: u8) -> Result<CanFrame, CanOpenError> {
        // SIDH, SIDL, EID8, EID0, DLC, D0..D7
        let raw = self.read_registers(sidh_addr, 13)?;
        let id = (u32::from(raw[0]) << 3) | (u32::from(raw[1]) >> 5);
        let len = (raw[4] & 0x0F).min(8) as usize;
        CanFrame::new(id, &raw[5..5 + len])
    }
}

impl CanTransport for Mcp2515Transport {
    fn open(&mut self, bitrate_kbps: u32) -> Result<(), CanOpenError> {
        let cnf = cnf_for(bitrate_kbps).ok_or(CanOpenError::UnsupportedBitrate(bitrate_kbps))?;

        self.transfer(&[CMD_RESET], 0)?;
        std::thread::sleep(std::time::Duration::from_millis(10));

        self.write_registers(REG_CANCTRL, &[MODE_CONFIG])?;
        // CNF3/CNF2/CNF1 are consecutive starting at 0x28
        self.write_registers(REG_CNF3, &[cnf[2], cnf[1], cnf[0]])?;
        self.write_registers(REG_CANCTRL, &[MODE_NORMAL])?;
        self.open = true;
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), CanOpenError> {
        if !self.open {
            return Err(CanOpenError::TransportUnavailable);
        }
        if frame.is_extended() {
            return Err(CanOpenError::SendFailure(
                "extended identifiers not supported by this backend".into(),
            ));
        }
        let id = frame.id();
        let mut buf = [0u8; 13];
        buf[0] = (id >> 3) as u8;
        buf[1] = ((id & 0x07) << 5) as u8;
        buf[4] = frame.len() as u8;
        buf[5..5 + frame.len()].copy_from_slice(frame.data());
        self.write_registers(REG_TXB0SIDH, &buf)?;
        self.transfer(&[CMD_RTS_TXB0], 0)?;
        Ok(())
    }

    fn poll(&mut self) -> bool {
        if !self.open {
            return false;
        }
        self.read_status()
            .map(|s| s & (CANINTF_RX0IF | CANINTF_RX1IF) != 0)
            .unwrap_or(false)
    }

    fn receive(&mut self) -> Result<CanFrame, CanOpenError> {
        let status = self.read_status()?;
        if status & CANINTF_RX0IF != 0 {
            let frame = self.read_rx_buffer(REG_RXB0SIDH)?;
            self.clear_interrupt(CANINTF_RX0IF)?;
            Ok(frame)
        } else if status & CANINTF_RX1IF != 0 {
            let frame = self.read_rx_buffer(REG_RXB1SIDH)?;
            self.clear_interrupt(CANINTF_RX1IF)?;
            Ok(frame)
        } else {
            Err(CanOpenError::TransportUnavailable)
        }
    }

    fn close(&mut self) {
        let _ = self.transfer(&[CMD_RESET], 0);
        self.open = false;
    }
}
