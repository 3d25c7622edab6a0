// Import ESP-IDF's NVS (Non-Volatile Storage) functionality
// Data stored in NVS survives device reboots and power cycles
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

// Import logging macros for debug output
use log::{debug, info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

use crate::config::STORAGE_NAMESPACE;
use crate::credential_store::{
    CredentialStore, Credentials, PASSWORD_KEY, SERVER_KEY, SERVER_PORT_KEY, SSID_KEY,
};

// Large enough for any SSID (32), WPA passphrase (64) or broker hostname (253)
const VALUE_BUFFER_SIZE: usize = 256;

/// Credentials in the `credentials` NVS namespace, one key per field.
///
/// The port key is written last and removed first, so a record interrupted by
/// power loss never reads back as complete.
pub struct NvsCredentialStore {
    nvs: EspNvs<NvsDefault>,
}

impl NvsCredentialStore {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        info!("🔧 Opening NVS namespace '{}'", STORAGE_NAMESPACE);
        let nvs = EspNvs::new(partition, STORAGE_NAMESPACE, true)
            .map_err(|e| anyhow!("Failed to open NVS namespace: {:?}", e))?;
        Ok(Self { nvs })
    }

    fn read_string(&self, key: &str) -> Result<Option<String>> {
        let mut buffer = [0u8; VALUE_BUFFER_SIZE];
        let value = self
            .nvs
            .get_str(key, &mut buffer)
            .map_err(|e| anyhow!("Failed to read '{}' from NVS: {:?}", key, e))?;
        Ok(value.map(str::to_string))
    }

    fn write_string(&mut self, key: &str, value: &str) -> Result<()> {
        self.nvs
            .set_str(key, value)
            .map_err(|e| anyhow!("Failed to write '{}' to NVS: {:?}", key, e))
    }

    fn remove_key(&mut self, key: &str) -> Result<()> {
        let existed = self
            .nvs
            .remove(key)
            .map_err(|e| anyhow!("Failed to remove '{}' from NVS: {:?}", key, e))?;
        debug!("🗑️ NVS key '{}' removed (existed: {})", key, existed);
        Ok(())
    }
}

impl CredentialStore for NvsCredentialStore {
    fn get(&mut self) -> Result<Option<Credentials>> {
        let port = self
            .nvs
            .get_i32(SERVER_PORT_KEY)
            .map_err(|e| anyhow!("Failed to read '{}' from NVS: {:?}", SERVER_PORT_KEY, e))?;
        let Some(port) = port else {
            return Ok(None);
        };

        let broker_port = match u16::try_from(port) {
            Ok(port) => port,
            Err(_) => {
                warn!("⚠️ Stored broker port {} out of range - treating as absent", port);
                return Ok(None);
            }
        };

        let (Some(ssid), Some(password), Some(broker_host)) = (
            self.read_string(SSID_KEY)?,
            self.read_string(PASSWORD_KEY)?,
            self.read_string(SERVER_KEY)?,
        ) else {
            warn!("⚠️ Partial credential record in NVS - treating as absent");
            return Ok(None);
        };

        let credentials = Credentials {
            ssid,
            password,
            broker_host,
            broker_port,
        };
        Ok(Some(credentials).filter(Credentials::is_complete))
    }

    fn put(&mut self, credentials: &Credentials) -> Result<()> {
        if !credentials.is_complete() {
            return Err(anyhow!("Refusing to persist incomplete credentials"));
        }

        self.remove_key(SERVER_PORT_KEY)?;
        self.write_string(SSID_KEY, &credentials.ssid)?;
        self.write_string(PASSWORD_KEY, &credentials.password)?;
        self.write_string(SERVER_KEY, &credentials.broker_host)?;
        self.nvs
            .set_i32(SERVER_PORT_KEY, i32::from(credentials.broker_port))
            .map_err(|e| anyhow!("Failed to write '{}' to NVS: {:?}", SERVER_PORT_KEY, e))?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        for key in [SERVER_PORT_KEY, SSID_KEY, PASSWORD_KEY, SERVER_KEY] {
            self.remove_key(key)?;
        }
        Ok(())
    }
}
