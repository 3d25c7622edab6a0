// Status Indicator Module
// Drives the status LED from the connection phase and watches the reset button

// Import logging macros for debug output
use log::{debug, info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::Result;

// Import Embassy time type for the blink and poll waits
use embassy_time::Duration;

use crate::config::{
    NodeConfig, BLINK_ACTIVE_MS, BLINK_BROKER_MS, BLINK_PAIRING_MS, BLINK_WIFI_MS,
    STEADY_REFRESH_MS,
};
use crate::system_state::{ConnectionPhase, PhaseCell, ResetCommand, ResetSignal};
use crate::time::Delay;

pub trait StatusLed {
    fn set(&mut self, on: bool) -> Result<()>;
}

/// Momentary push button, already normalized so `true` means held down.
pub trait ResetButton {
    fn is_pressed(&mut self) -> bool;
}

/// Toggle half-period for a phase. `None` means a steady pattern.
pub fn blink_period(phase: ConnectionPhase) -> Option<Duration> {
    let ms = match phase {
        ConnectionPhase::Active => BLINK_ACTIVE_MS,
        ConnectionPhase::ConnectingBroker => BLINK_BROKER_MS,
        ConnectionPhase::ConnectingWifi => BLINK_WIFI_MS,
        ConnectionPhase::Provisioning => BLINK_PAIRING_MS,
        ConnectionPhase::Idle | ConnectionPhase::Off => return None,
    };
    Some(Duration::from_millis(ms))
}

/// What one indicator iteration decided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorStep {
    pub led_on: bool,
    pub wait: Duration,
    pub command: Option<ResetCommand>,
}

pub struct StatusIndicator<L, B, D> {
    led: L,
    button: B,
    delay: D,
    phase: PhaseCell,
    button_poll: Duration,
    hold_threshold: u32,
    hold_counter: u32,
    led_on: bool,
    reset_requested: bool, // Latched once the reset command has gone out
}

impl<L, B, D> StatusIndicator<L, B, D>
where
    L: StatusLed,
    B: ResetButton,
    D: Delay,
{
    pub fn new(config: &NodeConfig, led: L, button: B, delay: D, phase: PhaseCell) -> Self {
        Self {
            led,
            button,
            delay,
            phase,
            button_poll: config.button_poll,
            hold_threshold: config.reset_hold_ticks(),
            hold_counter: 0,
            led_on: false,
            reset_requested: false,
        }
    }

    /// Pure state transition for one iteration.
    ///
    /// While held the LED toggles every button poll and the hold counter grows.
    /// Once the counter exceeds the threshold the LED goes solid and a single
    /// factory reset command is produced. Releasing the button clears the counter.
    pub fn step(&mut self, pressed: bool, phase: ConnectionPhase) -> IndicatorStep {
        if self.reset_requested {
            self.led_on = true;
            return IndicatorStep {
                led_on: true,
                wait: self.button_poll,
                command: None,
            };
        }

        if pressed {
            self.hold_counter += 1;
            self.led_on = !self.led_on;

            let mut command = None;
            if self.hold_counter > self.hold_threshold {
                self.led_on = true;
                self.reset_requested = true;
                command = Some(ResetCommand::FactoryReset);
            }

            return IndicatorStep {
                led_on: self.led_on,
                wait: self.button_poll,
                command,
            };
        }

        self.hold_counter = 0;
        let wait = match blink_period(phase) {
            Some(period) => {
                self.led_on = !self.led_on;
                period
            }
            None => {
                self.led_on = phase == ConnectionPhase::Idle;
                Duration::from_millis(STEADY_REFRESH_MS)
            }
        };

        IndicatorStep {
            led_on: self.led_on,
            wait,
            command: None,
        }
    }

    /// Sample the button, render the LED, forward any reset command and wait.
    pub async fn tick(&mut self, signal: &ResetSignal) -> IndicatorStep {
        let pressed = self.button.is_pressed();
        let step = self.step(pressed, self.phase.get());

        if let Err(e) = self.led.set(step.led_on) {
            debug!("Failed to drive status LED: {:?}", e);
        }

        if let Some(command) = step.command {
            warn!("🔘 Reset button held for {} polls - requesting factory reset", self.hold_counter);
            signal.signal(command);
        }

        self.delay.delay(step.wait).await;
        step
    }

    /// Never returns.
    pub async fn run(&mut self, signal: &ResetSignal) {
        info!("💡 Status indicator running");
        loop {
            self.tick(signal).await;
        }
    }

    pub fn hold_counter(&self) -> u32 {
        self.hold_counter
    }
}
