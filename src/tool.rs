//! The diagnostic tool context: one bus client, the control-source
//! arbiter and the persisted settings, with the long-running sequences
//! (scan, bit-rate detection, monitoring) wired through arbitration.

use std::time::Duration;

use log::info;

use crate::can::frame::CanFrame;
use crate::can::transport::create_transport;
use crate::canopen::arbiter::{Arbiter, ControlSource};
use crate::canopen::autobaud::{BitrateDetector, DetectStatus};
use crate::canopen::classifier::{describe, MonitorFilter};
use crate::canopen::client::{
    CanOpenClient, ChangeNodeIdOutcome, NmtCommand, NmtTarget, NodeAddress, SdoSize,
};
use crate::canopen::scanner::{NodeScanner, ScanStatus};
use crate::constants::{POLL_INTERVAL, SDO_DEFAULT_TIMEOUT};
use crate::error::CanOpenError;
use crate::settings::Settings;

/// Heartbeat wait after a node reset during an address change.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(5000);

pub struct DiagnosticTool {
    client: CanOpenClient,
    arbiter: Arbiter,
    settings: Settings,
}

impl DiagnosticTool {
    /// Builds the tool from settings, creating the configured transport.
    pub fn new(settings: Settings) -> Result<Self, CanOpenError> {
        let transport = create_transport(settings.transceiver, &settings.interface)?;
        Ok(Self::with_client(settings, CanOpenClient::new(transport)))
    }

    /// Builds the tool around an existing client (used with a scripted bus).
    pub fn with_client(settings: Settings, client: CanOpenClient) -> Self {
        DiagnosticTool {
            client,
            arbiter: Arbiter::new(),
            settings,
        }
    }

    /// Opens the bus at the configured bit rate.
    pub fn connect(&mut self) -> Result<(), CanOpenError> {
        self.client.open(self.settings.bitrate_kbps)
    }

    pub fn disconnect(&mut self) {
        self.client.close();
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }

    /// Claims the bus for a one-shot command-line invocation.
    pub fn claim_command_line(&mut self) {
        let now = self.client.now();
        self.arbiter.command_line(now);
    }

    fn require_control(&mut self, source: ControlSource) -> Result<(), CanOpenError> {
        let now = self.client.now();
        self.arbiter.tick(now);
        if !self.arbiter.may_drive(source) {
            return Err(CanOpenError::TransportError(format!(
                "bus is driven by {:?}",
                self.arbiter.active()
            )));
        }
        self.arbiter.touch(now);
        Ok(())
    }

    /// Reads one object dictionary entry.
    pub fn read_parameter(
        &mut self,
        node: NodeAddress,
        index: u16,
        sub_index: u8,
    ) -> Result<u32, CanOpenError> {
        self.require_control(ControlSource::Command)?;
        self.client.read_sdo(node, index, sub_index)
    }

    /// Writes one object dictionary entry.
    pub fn write_parameter(
        &mut self,
        node: NodeAddress,
        index: u16,
        sub_index: u8,
        value: u32,
        size: SdoSize,
    ) -> Result<(), CanOpenError> {
        self.require_control(ControlSource::Command)?;
        self.client.write_sdo(node, index, sub_index, value, size)
    }

    /// Sends an NMT command.
    pub fn send_nmt(&mut self, command: NmtCommand, target: NmtTarget) -> Result<(), CanOpenError> {
        self.require_control(ControlSource::Command)?;
        self.client.send_nmt(command, target)
    }

    /// Probes whether a node answers.
    pub fn test_node(&mut self, node: NodeAddress) -> Result<bool, CanOpenError> {
        self.require_control(ControlSource::Command)?;
        Ok(self.client.test_node(node, 3, SDO_DEFAULT_TIMEOUT))
    }

    /// Permanently moves a node to a new address.
    pub fn change_node_address(
        &mut self,
        current: NodeAddress,
        new_address: NodeAddress,
        persist: bool,
    ) -> Result<ChangeNodeIdOutcome, CanOpenError> {
        self.require_control(ControlSource::Command)?;
        self.client
            .change_node_id(current, new_address, persist, HEARTBEAT_TIMEOUT)
    }

    /// Scans a node-address range to completion. The arbiter holds the
    /// automated source for the duration and reverts afterwards, even on
    /// error.
    pub fn scan(&mut self, start: NodeAddress, end: NodeAddress) -> Result<Vec<u8>, CanOpenError> {
        self.arbiter.begin_automated(self.client.now());
        let result = self.run_scan(start, end);
        self.arbiter.end_automated(self.client.now());
        result
    }

    fn run_scan(&mut self, start: NodeAddress, end: NodeAddress) -> Result<Vec<u8>, CanOpenError> {
        let mut scanner = NodeScanner::new(start, end);
        scanner.start(&mut self.client)?;
        loop {
            match scanner.tick(&mut self.client)? {
                ScanStatus::Scanning { .. } => self.client.sleep(POLL_INTERVAL),
                ScanStatus::Finished { found } | ScanStatus::Cancelled { found } => {
                    return Ok(found)
                }
            }
        }
    }

    /// Detects the bus bit rate, updating the in-memory settings with the
    /// outcome. Returns the rate the bus ended up open at.
    pub fn detect_bitrate(&mut self) -> Result<u32, CanOpenError> {
        self.arbiter.begin_automated(self.client.now());
        let result = self.run_detection();
        self.arbiter.end_automated(self.client.now());
        let rate = result?;
        self.settings.bitrate_kbps = rate;
        Ok(rate)
    }

    fn run_detection(&mut self) -> Result<u32, CanOpenError> {
        let mut detector = BitrateDetector::new();
        detector.start(&mut self.client)?;
        loop {
            match detector.tick(&mut self.client)? {
                DetectStatus::Probing { .. } => self.client.sleep(POLL_INTERVAL),
                DetectStatus::Found { bitrate_kbps } => {
                    info!("bus bit rate: {bitrate_kbps} kbit/s");
                    return Ok(bitrate_kbps);
                }
                DetectStatus::Exhausted { fallback_kbps } => {
                    info!("bit rate unknown, using fallback {fallback_kbps} kbit/s");
                    return Ok(fallback_kbps);
                }
            }
        }
    }

    /// Takes the next frame that passes the filter, if one is waiting,
    /// together with its decoded description.
    pub fn monitor_once(&mut self, filter: &MonitorFilter) -> Option<(CanFrame, String)> {
        while let Some(frame) = self.client.try_receive() {
            if filter.passes(&frame) {
                let text = describe(&frame);
                return Some((frame, text));
            }
        }
        None
    }

    /// Cooperative sleep between monitor polls.
    pub fn idle(&mut self) {
        self.client.sleep(POLL_INTERVAL);
    }
}
