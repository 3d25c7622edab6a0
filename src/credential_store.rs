// Import logging macros for debug output
use log::{error, info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

// Import Serde traits so credentials can travel as JSON
use serde::{Deserialize, Serialize};

use std::sync::{Arc, Mutex};

// Storage keys inside the credentials namespace
pub const SSID_KEY: &str = "ssid";
pub const PASSWORD_KEY: &str = "password";
pub const SERVER_KEY: &str = "server";
pub const SERVER_PORT_KEY: &str = "serverPort"; // Written last, acts as the commit marker

/// Network and broker credentials acquired over the pairing link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub ssid: String,        // Wireless network name
    pub password: String,    // Wireless passphrase
    pub broker_host: String, // Broker address
    pub broker_port: u16,    // Broker TCP port
}

impl Credentials {
    /// All four fields present: strings non-empty, port non-zero.
    pub fn is_complete(&self) -> bool {
        !self.ssid.is_empty()
            && !self.password.is_empty()
            && !self.broker_host.is_empty()
            && self.broker_port != 0
    }

    /// Log-safe rendering; never includes the password.
    pub fn summary(&self) -> String {
        format!(
            "SSID: '{}', Password: [{}chars], Broker: {}:{}",
            self.ssid,
            self.password.len(),
            self.broker_host,
            self.broker_port
        )
    }
}

/// Persistent key-value store for one credentials record.
///
/// Implementations must never expose a partially written record: `get` returns
/// `None` unless a complete record is present.
pub trait CredentialStore {
    fn get(&mut self) -> Result<Option<Credentials>>;
    fn put(&mut self, credentials: &Credentials) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

/// In-memory store with the same record semantics as flash storage.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    record: Option<Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(credentials: Credentials) -> Self {
        Self {
            record: Some(credentials),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&mut self) -> Result<Option<Credentials>> {
        Ok(self.record.clone().filter(Credentials::is_complete))
    }

    fn put(&mut self, credentials: &Credentials) -> Result<()> {
        if !credentials.is_complete() {
            return Err(anyhow!("Refusing to persist incomplete credentials"));
        }
        self.record = Some(credentials.clone());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.record = None;
        Ok(())
    }
}

/// Store handle shared by the orchestrator and the reset handler.
///
/// Every call holds the lock for its whole duration, so the two contexts never
/// interleave inside a get/put/clear.
pub struct SharedCredentialStore<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedCredentialStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: CredentialStore> SharedCredentialStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    fn with_store<R>(&self, f: impl FnOnce(&mut S) -> Result<R>) -> Result<R> {
        let mut store = self.inner.lock().map_err(|_| {
            error!("❌ Credential store lock poisoned");
            anyhow!("Credential store lock poisoned")
        })?;
        f(&mut store)
    }
}

impl<S: CredentialStore> CredentialStore for SharedCredentialStore<S> {
    fn get(&mut self) -> Result<Option<Credentials>> {
        self.with_store(|store| {
            let record = store.get()?;
            match &record {
                Some(credentials) => info!("📦 Loaded credentials - {}", credentials.summary()),
                None => info!("📦 No complete credentials in storage"),
            }
            Ok(record)
        })
    }

    fn put(&mut self, credentials: &Credentials) -> Result<()> {
        self.with_store(|store| {
            store.put(credentials)?;
            info!("💾 Credentials saved - {}", credentials.summary());
            Ok(())
        })
    }

    fn clear(&mut self) -> Result<()> {
        self.with_store(|store| {
            store.clear()?;
            warn!("🧹 Credential storage cleared");
            Ok(())
        })
    }
}
