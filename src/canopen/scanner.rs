//! Incremental device discovery over a node-address range.
//!
//! The scanner is a tick-driven state machine: the caller pumps [`NodeScanner::tick`]
//! from its event loop, which keeps the loop free to process user input
//! between probes. Each node gets up to three probe attempts, rotating
//! through a few mandatory object dictionary entries, and any frame that
//! passes the liveness rule counts as a discovery, no matter which node the
//! current probe was aimed at.

use std::collections::VecDeque;

use log::{debug, info};

use crate::canopen::classifier::proof_of_life;
use crate::canopen::client::{sdo_read_request, CanOpenClient, NmtCommand, NmtTarget, NodeAddress};
use crate::constants::{SCAN_MAX_ATTEMPTS, SCAN_NODE_TIMEOUT, SCAN_PROBE_OBJECTS};
use crate::error::CanOpenError;
use std::time::Duration;

/// Progress notification emitted while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEvent {
    /// A probe was sent to `node`.
    Probing { node: u8, attempt: u8 },
    /// A node proved it is alive.
    Found { node: u8 },
}

/// State of the scan after a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// Still working through the range.
    Scanning { current: u8 },
    /// The whole range was covered.
    Finished { found: Vec<u8> },
    /// The scan was cancelled before covering the range.
    Cancelled { found: Vec<u8> },
}

enum Phase {
    Idle,
    Running,
    Done(ScanStatus),
}

/// Tick-driven scanner over an inclusive node-address range.
pub struct NodeScanner {
    start: u8,
    end: u8,
    current: u8,
    attempt: u8,
    deadline: Duration,
    found: Vec<u8>,
    events: VecDeque<ScanEvent>,
    phase: Phase,
}

impl NodeScanner {
    /// Creates a scanner over `start..=end`. A reversed range is reordered.
    pub fn new(start: NodeAddress, end: NodeAddress) -> Self {
        let (lo, hi) = if start.get() <= end.get() {
            (start.get(), end.get())
        } else {
            (end.get(), start.get())
        };
        NodeScanner {
            start: lo,
            end: hi,
            current: lo,
            attempt: 0,
            deadline: Duration::ZERO,
            found: Vec::new(),
            events: VecDeque::new(),
            phase: Phase::Idle,
        }
    }

    /// Sends the first probe. Must be called once before ticking.
    pub fn start(&mut self, client: &mut CanOpenClient) -> Result<(), CanOpenError> {
        info!("scanning nodes {}..={}", self.start, self.end);
        self.phase = Phase::Running;
        self.probe(client)
    }

    /// Stops the scan, keeping what was found so far.
    pub fn cancel(&mut self) {
        let mut found = self.found.clone();
        found.sort_unstable();
        self.phase = Phase::Done(ScanStatus::Cancelled { found });
    }

    /// Drains pending progress events.
    pub fn take_events(&mut self) -> Vec<ScanEvent> {
        self.events.drain(..).collect()
    }

    /// Processes received frames and advances the scan. Call repeatedly,
    /// interleaved with a short sleep, until a terminal status comes back.
    pub fn tick(&mut self, client: &mut CanOpenClient) -> Result<ScanStatus, CanOpenError> {
        match &self.phase {
            Phase::Idle => return Ok(ScanStatus::Scanning { current: self.current }),
            Phase::Done(status) => return Ok(status.clone()),
            Phase::Running => {}
        }

        let mut current_answered = false;
        while let Some(frame) = client.try_receive() {
            if let Some(node) = proof_of_life(frame.id()) {
                if !self.found.contains(&node) {
                    info!("node {node} is alive ({frame})");
                    self.found.push(node);
                    self.events.push_back(ScanEvent::Found { node });
                }
                if node == self.current {
                    current_answered = true;
                }
            }
        }

        if current_answered {
            self.advance(client)?;
        } else if client.now() >= self.deadline {
            self.attempt += 1;
            if self.attempt >= SCAN_MAX_ATTEMPTS {
                debug!("node {} silent after {} attempts", self.current, self.attempt);
                self.advance(client)?;
            } else {
                self.probe(client)?;
            }
        }

        Ok(match &self.phase {
            Phase::Done(status) => status.clone(),
            _ => ScanStatus::Scanning { current: self.current },
        })
    }

    fn advance(&mut self, client: &mut CanOpenClient) -> Result<(), CanOpenError> {
        if self.current >= self.end {
            let mut found = self.found.clone();
            found.sort_unstable();
            info!("scan finished, {} node(s) found", found.len());
            self.phase = Phase::Done(ScanStatus::Finished { found });
            return Ok(());
        }
        self.current += 1;
        self.attempt = 0;
        self.probe(client)
    }

    /// One probe: on the first attempt also nudge the node with an NMT
    /// start, then request one of the mandatory objects, rotating the
    /// object per attempt so a node that aborts one entry can still answer
    /// another.
    fn probe(&mut self, client: &mut CanOpenClient) -> Result<(), CanOpenError> {
        let node = NodeAddress::try_from(self.current)
            .map_err(|_| CanOpenError::InvalidNodeAddress(self.current))?;
        if self.attempt == 0 {
            client.send_nmt(NmtCommand::Start, NmtTarget::Node(node))?;
        }
        let index = SCAN_PROBE_OBJECTS[usize::from(self.attempt) % SCAN_PROBE_OBJECTS.len()];
        client.send_frame(&sdo_read_request(self.current, index, 0))?;
        self.deadline = client.now() + SCAN_NODE_TIMEOUT;
        self.events.push_back(ScanEvent::Probing {
            node: self.current,
            attempt: self.attempt,
        });
        Ok(())
    }
}
