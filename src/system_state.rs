use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

// Connection lifecycle stage, used only to pick the indicator blink pattern
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionPhase {
    Provisioning = 0,     // Waiting for credentials on the pairing link
    ConnectingWifi = 1,   // Wireless link is being (re)established
    ConnectingBroker = 2, // Broker session is being (re)established
    Idle = 3,             // Connected, nothing in flight
    Active = 4,           // Publishing telemetry
    Off = 5,              // Indicator dark
}

impl ConnectionPhase {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => ConnectionPhase::Provisioning,
            1 => ConnectionPhase::ConnectingWifi,
            2 => ConnectionPhase::ConnectingBroker,
            3 => ConnectionPhase::Idle,
            4 => ConnectionPhase::Active,
            _ => ConnectionPhase::Off,
        }
    }
}

/// Shared connection phase.
///
/// Single writer (orchestrator side), single reader (status indicator). Stores
/// are plain atomic writes, so the writer never waits on the reader.
#[derive(Clone, Debug)]
pub struct PhaseCell {
    raw: Arc<AtomicU8>,
}

impl PhaseCell {
    pub fn new(initial: ConnectionPhase) -> Self {
        Self {
            raw: Arc::new(AtomicU8::new(initial as u8)),
        }
    }

    pub fn set(&self, phase: ConnectionPhase) {
        self.raw.store(phase as u8, Ordering::Release);
    }

    pub fn get(&self) -> ConnectionPhase {
        ConnectionPhase::from_raw(self.raw.load(Ordering::Acquire))
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new(ConnectionPhase::Provisioning)
    }
}

// Commands emitted by the status indicator for the storage/restart owner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetCommand {
    FactoryReset, // Hold gesture completed: wipe credentials and restart
}

// Using CriticalSectionRawMutex so the signal can cross the two execution contexts
pub type ResetSignal = Signal<CriticalSectionRawMutex, ResetCommand>;
