// Import ESP-IDF event loop for handling system events
use esp_idf_svc::eventloop::EspSystemEventLoop;

// Import the radio peripheral shared with the pairing link
use esp_idf_svc::hal::modem::Modem;

// Import NVS partition for WiFi driver storage needs
use esp_idf_svc::nvs::EspDefaultNvsPartition;

// Import WiFi-related types from ESP-IDF
// - EspWifi is used directly (not BlockingWifi) so association never blocks the executor
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi};

// Import logging macros
use log::{info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

use crate::connectivity::WifiLink;

pub struct EspWifiLink {
    wifi: EspWifi<'static>,
    started: bool,
}

impl EspWifiLink {
    pub fn new(modem: Modem, sys_loop: EspSystemEventLoop, nvs: EspDefaultNvsPartition) -> Result<Self> {
        info!("🔧 Initializing WiFi station");
        let wifi = EspWifi::new(modem, sys_loop, Some(nvs))
            .map_err(|e| anyhow!("Failed to create WiFi driver: {:?}", e))?;
        Ok(Self {
            wifi,
            started: false,
        })
    }

    fn determine_auth_method(password: &str) -> AuthMethod {
        if password.is_empty() {
            AuthMethod::None
        } else if password.len() >= 8 {
            AuthMethod::WPA2Personal
        } else {
            warn!("Password length suggests WEP, but using WPA2");
            AuthMethod::WPA2Personal
        }
    }
}

impl WifiLink for EspWifiLink {
    fn is_connected(&mut self) -> Result<bool> {
        if !self.started {
            return Ok(false);
        }
        let associated = self.wifi.is_connected()?;
        Ok(associated && self.wifi.is_up()?)
    }

    fn begin(&mut self, ssid: &str, password: &str) -> Result<()> {
        let configuration = Configuration::Client(ClientConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| anyhow!("SSID '{}' is too long", ssid))?,
            password: password
                .try_into()
                .map_err(|_| anyhow!("WiFi password is too long"))?,
            channel: None,
            auth_method: Self::determine_auth_method(password),
            ..Default::default()
        });
        self.wifi.set_configuration(&configuration)?;

        if !self.started {
            self.wifi.start()?;
            self.started = true;
            info!("📶 WiFi started");
        }

        self.wifi.connect()?;
        Ok(())
    }
}
