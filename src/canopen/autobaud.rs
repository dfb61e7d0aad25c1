//! Automatic bit-rate detection.
//!
//! Walks the candidate rates in field-frequency order and listens for any
//! traffic at each one. Three escalating rounds per candidate: first a
//! broadcast that should make every node answer or at least ACK, then
//! directed SDO probes at commonly used addresses, then a purely passive
//! round. Any received frame settles the question, because a frame can only
//! be read at all when the receiver's rate matches the bus.
//!
//! Send errors while probing are expected at wrong rates (the controller
//! goes error-passive) and never abort the detection.

use std::time::Duration;

use log::{debug, info, warn};

use crate::canopen::client::{sdo_read_request, CanOpenClient, NmtCommand, NmtTarget};
use crate::constants::{
    AUTOBAUD_MAX_ATTEMPTS, AUTOBAUD_ROUND_TIMEOUT, BITRATE_CANDIDATES, DEFAULT_BITRATE_KBPS,
    KNOWN_NODES, OD_ERROR_REGISTER,
};
use crate::error::CanOpenError;

/// Gap between the directed SDO probes of the second round.
const PROBE_GAP: Duration = Duration::from_millis(50);

/// State of the detection after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectStatus {
    /// Still listening at a candidate rate.
    Probing { bitrate_kbps: u32, attempt: u8 },
    /// Traffic was received; the bus is left open at this rate.
    Found { bitrate_kbps: u32 },
    /// No candidate produced traffic; the bus is left open at the fallback.
    Exhausted { fallback_kbps: u32 },
}

enum Phase {
    Idle,
    Running,
    Done(DetectStatus),
}

/// Tick-driven bit-rate detector.
pub struct BitrateDetector {
    candidates: Vec<u32>,
    index: usize,
    attempt: u8,
    deadline: Duration,
    phase: Phase,
}

impl BitrateDetector {
    pub fn new() -> Self {
        Self::with_candidates(BITRATE_CANDIDATES.to_vec())
    }

    /// Detector over an explicit candidate list, tried in order.
    pub fn with_candidates(candidates: Vec<u32>) -> Self {
        BitrateDetector {
            candidates,
            index: 0,
            attempt: 0,
            deadline: Duration::ZERO,
            phase: Phase::Idle,
        }
    }

    /// Opens the bus at the first usable candidate and sends the first
    /// probe. Must be called once before ticking.
    pub fn start(&mut self, client: &mut CanOpenClient) -> Result<(), CanOpenError> {
        info!("detecting bit rate, candidates: {:?}", self.candidates);
        self.phase = Phase::Running;
        if self.open_candidate(client) {
            self.begin_round(client);
        } else {
            self.give_up(client);
        }
        Ok(())
    }

    /// Processes received frames and advances the detection. Call
    /// repeatedly, interleaved with a short sleep, until a terminal status
    /// comes back.
    pub fn tick(&mut self, client: &mut CanOpenClient) -> Result<DetectStatus, CanOpenError> {
        match &self.phase {
            Phase::Idle => {
                return Ok(DetectStatus::Probing {
                    bitrate_kbps: self.current_rate(),
                    attempt: 0,
                })
            }
            Phase::Done(status) => return Ok(*status),
            Phase::Running => {}
        }

        if let Some(frame) = client.try_receive() {
            let rate = self.current_rate();
            info!("traffic at {rate} kbit/s ({frame})");
            self.phase = Phase::Done(DetectStatus::Found { bitrate_kbps: rate });
            return Ok(DetectStatus::Found { bitrate_kbps: rate });
        }

        if client.now() >= self.deadline {
            self.attempt += 1;
            if self.attempt >= AUTOBAUD_MAX_ATTEMPTS {
                self.next_candidate(client);
            } else {
                self.begin_round(client);
            }
        }

        Ok(match &self.phase {
            Phase::Done(status) => *status,
            _ => DetectStatus::Probing {
                bitrate_kbps: self.current_rate(),
                attempt: self.attempt,
            },
        })
    }

    fn current_rate(&self) -> u32 {
        self.candidates
            .get(self.index)
            .copied()
            .unwrap_or(DEFAULT_BITRATE_KBPS)
    }

    /// Moves to the next candidate that opens, or gives up.
    fn next_candidate(&mut self, client: &mut CanOpenClient) {
        debug!("no traffic at {} kbit/s", self.current_rate());
        self.index += 1;
        self.attempt = 0;
        if self.open_candidate(client) {
            self.begin_round(client);
        } else {
            self.give_up(client);
        }
    }

    /// Reopens the bus at `candidates[index]`, skipping rates the backend
    /// rejects. Returns false when the list is used up.
    fn open_candidate(&mut self, client: &mut CanOpenClient) -> bool {
        while self.index < self.candidates.len() {
            let rate = self.candidates[self.index];
            match client.open(rate) {
                Ok(()) => {
                    debug!("listening at {rate} kbit/s");
                    return true;
                }
                Err(e) => {
                    warn!("cannot open bus at {rate} kbit/s ({e}), skipping");
                    self.index += 1;
                }
            }
        }
        false
    }

    fn give_up(&mut self, client: &mut CanOpenClient) {
        warn!(
            "no traffic at any candidate rate, falling back to {} kbit/s",
            DEFAULT_BITRATE_KBPS
        );
        if let Err(e) = client.open(DEFAULT_BITRATE_KBPS) {
            warn!("fallback open failed: {e}");
        }
        self.phase = Phase::Done(DetectStatus::Exhausted {
            fallback_kbps: DEFAULT_BITRATE_KBPS,
        });
    }

    /// Sends the probe for the current round and arms the round deadline.
    fn begin_round(&mut self, client: &mut CanOpenClient) {
        match self.attempt {
            0 => {
                // A started node begins producing PDOs and heartbeats.
                if let Err(e) = client.send_nmt(NmtCommand::Start, NmtTarget::All) {
                    debug!("broadcast probe failed: {e}");
                }
            }
            1 => {
                for &node in KNOWN_NODES {
                    if let Err(e) = client.send_frame(&sdo_read_request(node, OD_ERROR_REGISTER, 0)) {
                        debug!("probe to node {node} failed: {e}");
                    }
                    client.sleep(PROBE_GAP);
                }
            }
            _ => {} // passive round
        }
        self.deadline = client.now() + AUTOBAUD_ROUND_TIMEOUT;
    }
}

impl Default for BitrateDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::mock::MockCanBus;
    use crate::constants::POLL_INTERVAL;
    use crate::util::clock::ManualClock;

    fn harness() -> (CanOpenClient, MockCanBus) {
        let bus = MockCanBus::new();
        let client =
            CanOpenClient::with_clock(Box::new(bus.clone()), Box::new(ManualClock::new()));
        (client, bus)
    }

    fn run_to_completion(
        detector: &mut BitrateDetector,
        client: &mut CanOpenClient,
    ) -> DetectStatus {
        detector.start(client).unwrap();
        for _ in 0..100_000 {
            match detector.tick(client).unwrap() {
                DetectStatus::Probing { .. } => client.sleep(POLL_INTERVAL),
                terminal => return terminal,
            }
        }
        panic!("detection did not terminate");
    }

    #[test]
    fn finds_the_live_rate_after_dead_candidates() {
        let (mut client, bus) = harness();
        bus.chatter_at(500);

        let mut detector = BitrateDetector::with_candidates(vec![125, 250, 500]);
        let status = run_to_completion(&mut detector, &mut client);
        assert_eq!(status, DetectStatus::Found { bitrate_kbps: 500 });
        assert_eq!(bus.open_bitrate(), Some(500));
    }

    #[test]
    fn silent_bus_falls_back_to_the_default() {
        let (mut client, bus) = harness();
        let mut detector = BitrateDetector::with_candidates(vec![250, 500]);
        let status = run_to_completion(&mut detector, &mut client);
        assert_eq!(
            status,
            DetectStatus::Exhausted {
                fallback_kbps: DEFAULT_BITRATE_KBPS
            }
        );
        assert_eq!(bus.open_bitrate(), Some(DEFAULT_BITRATE_KBPS));
    }

    #[test]
    fn unopenable_candidates_are_skipped() {
        let (mut client, bus) = harness();
        bus.fail_open_at(125);
        bus.chatter_at(250);

        let mut detector = BitrateDetector::with_candidates(vec![125, 250]);
        let status = run_to_completion(&mut detector, &mut client);
        assert_eq!(status, DetectStatus::Found { bitrate_kbps: 250 });
    }

    #[test]
    fn probe_rounds_escalate_from_broadcast_to_directed() {
        let (mut client, bus) = harness();
        let mut detector = BitrateDetector::with_candidates(vec![125]);
        run_to_completion(&mut detector, &mut client);

        let sent = bus.sent();
        // Round 0: NMT start-all. Round 1: one read per known node.
        assert_eq!(sent[0].id(), 0x000);
        assert_eq!(sent[0].data(), &[0x01, 0x00]);
        let probed: Vec<u8> = sent[1..]
            .iter()
            .map(|f| (f.id() & 0x7F) as u8)
            .collect();
        assert_eq!(probed, KNOWN_NODES.to_vec());
    }

    #[test]
    fn default_candidate_order_starts_with_the_common_rates() {
        let detector = BitrateDetector::new();
        assert_eq!(&detector.candidates[..4], &[125, 250, 500, 1000]);
    }
}
