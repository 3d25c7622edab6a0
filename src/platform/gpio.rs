// Import ESP-IDF GPIO functionality for the status LED and reset button
use esp_idf_svc::hal::gpio::{Gpio0, Gpio2, Input, Output, PinDriver, Pull};

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

use log::info;

use crate::status_indicator::{ResetButton, StatusLed};

pub struct GpioStatusLed {
    pin: PinDriver<'static, Gpio2, Output>,
}

impl GpioStatusLed {
    pub fn new(gpio2: Gpio2) -> Result<Self> {
        let mut pin = PinDriver::output(gpio2)
            .map_err(|e| anyhow!("Failed to configure status LED GPIO: {}", e))?;
        pin.set_low()
            .map_err(|e| anyhow!("Failed to clear status LED: {}", e))?;
        info!("💡 Status LED on GPIO{}", pin.pin());
        Ok(Self { pin })
    }
}

impl StatusLed for GpioStatusLed {
    fn set(&mut self, on: bool) -> Result<()> {
        self.pin
            .set_level(on.into())
            .map_err(|e| anyhow!("Failed to drive status LED: {}", e))
    }
}

/// Boot button with internal pull-up; a press reads LOW.
pub struct GpioResetButton {
    pin: PinDriver<'static, Gpio0, Input>,
}

impl GpioResetButton {
    pub fn new(gpio0: Gpio0) -> Result<Self> {
        let mut pin = PinDriver::input(gpio0)
            .map_err(|e| anyhow!("Failed to configure reset button GPIO: {}", e))?;
        pin.set_pull(Pull::Up)
            .map_err(|e| anyhow!("Failed to set pull-up on reset button GPIO: {}", e))?;
        info!("🔘 Reset button on GPIO{}", pin.pin());
        Ok(Self { pin })
    }
}

impl ResetButton for GpioResetButton {
    fn is_pressed(&mut self) -> bool {
        self.pin.is_low()
    }
}
