// Import Embassy time utilities backed by the ESP-IDF time driver
use embassy_time::{Duration, Instant, Timer};

use log::info;

use crate::reset_handler::Restart;
use crate::time::{Clock, Delay};

/// Milliseconds since boot from the Embassy time driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyDelay;

impl Delay for EmbassyDelay {
    async fn delay(&mut self, duration: Duration) {
        Timer::after(duration).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EspRestart;

impl Restart for EspRestart {
    fn restart(&self) {
        info!("🔄 Rebooting system");
        unsafe {
            esp_idf_svc::sys::esp_restart();
        }
    }
}
