//! Control-source arbitration.
//!
//! The tool can be driven interactively, from the command line, or by an
//! automated sequence such as a scan. Only one source may drive the bus at
//! a time; ownership decays after an idle window so an abandoned session
//! never wedges the tool.

use std::time::Duration;

use log::debug;

use crate::constants::SOURCE_TIMEOUT;

/// Who currently drives the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlSource {
    /// Nobody; the bus is free to claim.
    #[default]
    None,
    /// A human at the interactive console.
    Interactive,
    /// A one-shot command-line invocation.
    Command,
    /// A long-running automated sequence (scan, detection).
    Automated,
}

/// Arbitrates bus ownership between control sources.
///
/// Time is passed in by the caller so the arbiter stays clock-agnostic.
pub struct Arbiter {
    active: ControlSource,
    /// Holder to restore when an automated sequence ends.
    previous: ControlSource,
    last_activity: Duration,
    window: Duration,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::with_window(SOURCE_TIMEOUT)
    }

    pub fn with_window(window: Duration) -> Self {
        Arbiter {
            active: ControlSource::None,
            previous: ControlSource::None,
            last_activity: Duration::ZERO,
            window,
        }
    }

    pub fn active(&self) -> ControlSource {
        self.active
    }

    /// Releases ownership when the holder has been idle past the window.
    pub fn tick(&mut self, now: Duration) {
        if self.active != ControlSource::None && now >= self.last_activity + self.window {
            debug!("{:?} idle, releasing control", self.active);
            self.active = ControlSource::None;
            self.previous = ControlSource::None;
        }
    }

    /// Interactive input claims the bus if it is free or already
    /// interactive. Returns whether the claim succeeded.
    pub fn interactive_input(&mut self, now: Duration) -> bool {
        self.tick(now);
        match self.active {
            ControlSource::None | ControlSource::Interactive => {
                self.active = ControlSource::Interactive;
                self.last_activity = now;
                true
            }
            _ => false,
        }
    }

    /// A command-line invocation always takes over.
    pub fn command_line(&mut self, now: Duration) {
        self.active = ControlSource::Command;
        self.previous = ControlSource::None;
        self.last_activity = now;
    }

    /// An automated sequence takes over, remembering the current holder.
    pub fn begin_automated(&mut self, now: Duration) {
        if self.active != ControlSource::Automated {
            self.previous = self.active;
        }
        self.active = ControlSource::Automated;
        self.last_activity = now;
    }

    /// Ends the automated sequence, restoring the previous holder. The
    /// arbiter never stays in the automated state after this.
    pub fn end_automated(&mut self, now: Duration) {
        if self.active == ControlSource::Automated {
            self.active = self.previous;
            self.last_activity = now;
        }
        self.previous = ControlSource::None;
    }

    /// Marks activity of the current holder, refreshing its window.
    pub fn touch(&mut self, now: Duration) {
        self.last_activity = now;
    }

    /// Whether `source` may drive the bus right now.
    pub fn may_drive(&self, source: ControlSource) -> bool {
        self.active == source || self.active == ControlSource::None
    }
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}
