// Host-side fakes for the hardware and network seams

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use embassy_time::Duration;
use serde_json::Value;

use crate::connectivity::{BrokerSession, InboundHandler, InboundMessage, WifiLink};
use crate::credential_store::{CredentialStore, Credentials};
use crate::provisioning::PairingLink;
use crate::reset_handler::Restart;
use crate::status_indicator::{ResetButton, StatusLed};
use crate::telemetry::{SensorSampler, TelemetrySample};
use crate::time::{Clock, Delay};

pub fn home_credentials() -> Credentials {
    Credentials {
        ssid: "home".to_string(),
        password: "secret".to_string(),
        broker_host: "10.0.0.5".to_string(),
        broker_port: 1883,
    }
}

/// Simulated monotonic clock; only moves when advanced.
#[derive(Clone, Default)]
pub struct FakeClock {
    now_ms: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Records every wait and advances the shared clock instead of sleeping.
#[derive(Clone)]
pub struct FakeDelay {
    clock: FakeClock,
    waits: Arc<Mutex<Vec<u64>>>,
}

impl FakeDelay {
    pub fn new(clock: FakeClock) -> Self {
        Self {
            clock,
            waits: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn waits(&self) -> Vec<u64> {
        self.waits.lock().unwrap().clone()
    }
}

impl Delay for FakeDelay {
    async fn delay(&mut self, duration: Duration) {
        self.waits.lock().unwrap().push(duration.as_millis());
        self.clock.advance(duration.as_millis());
    }
}

/// Pairing link replaying a fixed list of inbound messages.
pub struct ScriptedPairingLink {
    inbound: VecDeque<String>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl ScriptedPairingLink {
    pub fn new(messages: &[&str]) -> Self {
        Self {
            inbound: messages.iter().map(|m| m.to_string()).collect(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sent(&self) -> Arc<Mutex<Vec<String>>> {
        self.sent.clone()
    }
}

impl PairingLink for ScriptedPairingLink {
    async fn receive(&mut self) -> String {
        self.inbound
            .pop_front()
            .expect("pairing script exhausted before credentials were accepted")
    }

    async fn send(&mut self, message: &str) -> Result<()> {
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Wireless link that associates after a number of status polls.
pub struct FakeWifi {
    connected: bool,
    polls_until_up: u32,
    polls: u32,
    pub begins: Vec<(String, String)>,
}

impl FakeWifi {
    pub fn up() -> Self {
        Self {
            connected: true,
            polls_until_up: 0,
            polls: 0,
            begins: Vec::new(),
        }
    }

    pub fn down(polls_until_up: u32) -> Self {
        Self {
            connected: false,
            polls_until_up,
            polls: 0,
            begins: Vec::new(),
        }
    }
}

impl WifiLink for FakeWifi {
    fn is_connected(&mut self) -> Result<bool> {
        if !self.connected && !self.begins.is_empty() {
            if self.polls >= self.polls_until_up {
                self.connected = true;
            } else {
                self.polls += 1;
            }
        }
        Ok(self.connected)
    }

    fn begin(&mut self, ssid: &str, password: &str) -> Result<()> {
        self.begins.push((ssid.to_string(), password.to_string()));
        Ok(())
    }
}

/// Broker session that refuses a number of connects before accepting.
#[derive(Default)]
pub struct FakeBroker {
    pub connected: bool,
    pub refusals_left: u32,
    pub connect_attempts: u32,
    pub connected_to: Option<(String, String, u16)>,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, String)>,
    pub reject_publish: bool,
    pub reject_subscribe: bool,
    inbound: VecDeque<InboundMessage>,
}

impl FakeBroker {
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    pub fn refusing(refusals: u32) -> Self {
        Self {
            refusals_left: refusals,
            ..Self::default()
        }
    }

    pub fn deliver(&mut self, topic: &str, payload: &[u8]) {
        self.inbound.push_back(InboundMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });
    }
}

impl BrokerSession for FakeBroker {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self, client_id: &str, host: &str, port: u16) -> Result<()> {
        self.connect_attempts += 1;
        if self.refusals_left > 0 {
            self.refusals_left -= 1;
            return Err(anyhow!("connection refused"));
        }
        self.connected = true;
        self.connected_to = Some((client_id.to_string(), host.to_string(), port));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<()> {
        if self.reject_subscribe {
            return Err(anyhow!("subscribe rejected"));
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        if !self.connected || self.reject_publish {
            return Err(anyhow!("publish rejected"));
        }
        self.published.push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    fn poll_inbound(&mut self) -> Option<InboundMessage> {
        self.inbound.pop_front()
    }
}

#[derive(Default)]
pub struct RecordingInbound {
    pub received: Vec<(String, Value)>,
}

impl InboundHandler for RecordingInbound {
    fn handle(&mut self, topic: &str, message: Value) {
        self.received.push((topic.to_string(), message));
    }
}

#[derive(Clone, Default)]
pub struct FakeLed {
    levels: Arc<Mutex<Vec<bool>>>,
}

impl FakeLed {
    pub fn levels(&self) -> Vec<bool> {
        self.levels.lock().unwrap().clone()
    }
}

impl StatusLed for FakeLed {
    fn set(&mut self, on: bool) -> Result<()> {
        self.levels.lock().unwrap().push(on);
        Ok(())
    }
}

/// Button replaying a press script, released once the script runs out.
pub struct ScriptedButton {
    presses: VecDeque<bool>,
}

impl ScriptedButton {
    pub fn new(presses: &[bool]) -> Self {
        Self {
            presses: presses.iter().copied().collect(),
        }
    }
}

impl ResetButton for ScriptedButton {
    fn is_pressed(&mut self) -> bool {
        self.presses.pop_front().unwrap_or(false)
    }
}

#[derive(Clone, Default)]
pub struct RestartRecorder {
    count: Arc<AtomicUsize>,
}

impl RestartRecorder {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Restart for RestartRecorder {
    fn restart(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FixedSampler {
    sample: TelemetrySample,
}

impl FixedSampler {
    pub fn new(ec: f32, ph: f32) -> Self {
        Self {
            sample: TelemetrySample { ec, ph },
        }
    }
}

impl SensorSampler for FixedSampler {
    fn sample(&mut self) -> TelemetrySample {
        self.sample
    }
}

/// Store whose every operation fails.
pub struct FailingStore;

impl CredentialStore for FailingStore {
    fn get(&mut self) -> Result<Option<Credentials>> {
        Err(anyhow!("flash read failed"))
    }

    fn put(&mut self, _credentials: &Credentials) -> Result<()> {
        Err(anyhow!("flash write failed"))
    }

    fn clear(&mut self) -> Result<()> {
        Err(anyhow!("flash erase failed"))
    }
}
