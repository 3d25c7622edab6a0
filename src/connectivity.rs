// Connectivity Module
// Keeps the wireless link and the broker session up, retrying without bound

// Import logging macros for debug output
use log::{debug, info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::Result;

// Import Embassy time type for the poll and backoff waits
use embassy_time::Duration;

// Import Embassy channel for the bounded inbound queue
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use serde_json::Value;

use crate::config::NodeConfig;
use crate::credential_store::Credentials;
use crate::error::{Failure, Policy};
use crate::system_state::{ConnectionPhase, PhaseCell};
use crate::time::Delay;

/// Station-mode wireless link.
pub trait WifiLink {
    /// True once associated and holding an address.
    fn is_connected(&mut self) -> Result<bool>;

    /// Start associating; does not wait for the result.
    fn begin(&mut self, ssid: &str, password: &str) -> Result<()>;
}

/// Publish/subscribe session with the broker.
#[allow(async_fn_in_trait)]
pub trait BrokerSession {
    fn is_connected(&self) -> bool;

    async fn connect(&mut self, client_id: &str, host: &str, port: u16) -> Result<()>;

    fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Fire-and-forget publish, at most once, not retained.
    fn publish(&mut self, topic: &str, payload: &str) -> Result<()>;

    /// Next message delivered on a subscribed topic, if any.
    fn poll_inbound(&mut self) -> Option<InboundMessage>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Bounded hand-off from the broker client's callback context to the main loop.
///
/// When the main loop falls behind, new messages are dropped instead of queued.
pub struct InboundQueue<const N: usize> {
    channel: Channel<CriticalSectionRawMutex, InboundMessage, N>,
}

impl<const N: usize> InboundQueue<N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Queue a message without blocking. Returns false if it was dropped.
    pub fn offer(&self, message: InboundMessage) -> bool {
        match self.channel.try_send(message) {
            Ok(()) => true,
            Err(_) => {
                warn!("⚠️ Inbound queue full ({} messages) - dropping message", N);
                false
            }
        }
    }

    pub fn take(&self) -> Option<InboundMessage> {
        self.channel.try_receive().ok()
    }
}

impl<const N: usize> Default for InboundQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives inbound messages that parsed as JSON.
pub trait InboundHandler {
    fn handle(&mut self, topic: &str, message: Value);
}

/// Default handler: the node only reports what it receives.
#[derive(Debug, Default)]
pub struct LogInbound;

impl InboundHandler for LogInbound {
    fn handle(&mut self, topic: &str, message: Value) {
        info!("📥 Message on {}: {}", topic, message);
    }
}

/// Result of an ensure call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    AlreadyUp,
    Established { retries: u32 }, // Number of waits before the link came up
}

pub struct ConnectivityManager<W, B, D, H = LogInbound> {
    wifi: W,
    broker: B,
    delay: D,
    handler: H,
    phase: PhaseCell,
    client_id: String,
    inbound_topic: String,
    wifi_poll: Duration,
    broker_backoff: Duration,
}

impl<W, B, D, H> ConnectivityManager<W, B, D, H>
where
    W: WifiLink,
    B: BrokerSession,
    D: Delay,
    H: InboundHandler,
{
    pub fn new(config: &NodeConfig, wifi: W, broker: B, delay: D, handler: H, phase: PhaseCell) -> Self {
        Self {
            wifi,
            broker,
            delay,
            handler,
            phase,
            client_id: config.client_id.clone(),
            inbound_topic: config.inbound_topic.clone(),
            wifi_poll: config.wifi_poll,
            broker_backoff: config.broker_backoff,
        }
    }

    /// Bring the wireless link up. No-op when already connected, otherwise
    /// polls until connected with no upper bound.
    pub async fn ensure_wifi(&mut self, credentials: &Credentials) -> LinkState {
        if self.wifi_up() {
            return LinkState::AlreadyUp;
        }

        self.phase.set(ConnectionPhase::ConnectingWifi);
        info!("📶 Connecting to WiFi SSID: '{}'", credentials.ssid);

        let mut retries = 0;
        while let Err(e) = self.wifi.begin(&credentials.ssid, &credentials.password) {
            if Failure::WifiStart(format!("{:#}", e)).report() == Policy::Drop {
                break;
            }
            retries += 1;
            self.delay.delay(self.wifi_poll).await;
        }

        while !self.wifi_up() {
            debug!("⏳ Waiting for WiFi association...");
            retries += 1;
            self.delay.delay(self.wifi_poll).await;
        }

        info!("✅ WiFi connected after {} polls", retries);
        LinkState::Established { retries }
    }

    fn wifi_up(&mut self) -> bool {
        match self.wifi.is_connected() {
            Ok(up) => up,
            Err(e) => {
                debug!("{} ({:#})", Failure::WifiDisconnected, e);
                false
            }
        }
    }

    /// Bring the broker session up and subscribe to the inbound topic. No-op
    /// when already connected, otherwise retries with a fixed backoff.
    pub async fn ensure_broker(&mut self, credentials: &Credentials) -> LinkState {
        if self.broker.is_connected() {
            return LinkState::AlreadyUp;
        }

        let mut retries = 0;
        loop {
            self.phase.set(ConnectionPhase::ConnectingBroker);
            info!(
                "📡 Connecting to broker {}:{} as '{}'",
                credentials.broker_host, credentials.broker_port, self.client_id
            );

            match self
                .broker
                .connect(&self.client_id, &credentials.broker_host, credentials.broker_port)
                .await
            {
                Ok(()) => {
                    info!("✅ Broker connected");
                    if let Err(e) = self.broker.subscribe(&self.inbound_topic) {
                        let failure = Failure::BrokerSubscribe(format!("{:#}", e));
                        if failure.report() == Policy::Retry {
                            retries += 1;
                            self.delay.delay(self.broker_backoff).await;
                            continue;
                        }
                    } else {
                        info!("📥 Subscribed to {}", self.inbound_topic);
                    }
                    return LinkState::Established { retries };
                }
                Err(e) => {
                    Failure::BrokerConnect(format!("{:#}", e)).report();
                    retries += 1;
                    self.delay.delay(self.broker_backoff).await;
                }
            }
        }
    }

    /// Drain delivered messages through the inbound handler. Returns how many
    /// messages were taken off the session.
    pub fn pump_inbound(&mut self) -> usize {
        let mut drained = 0;
        while let Some(message) = self.broker.poll_inbound() {
            drained += 1;
            self.dispatch(message);
        }
        drained
    }

    fn dispatch(&mut self, message: InboundMessage) {
        if message.topic != self.inbound_topic {
            debug!("Ignoring message on unexpected topic {}", message.topic);
            return;
        }

        match serde_json::from_slice::<Value>(&message.payload) {
            Ok(json) => self.handler.handle(&message.topic, json),
            Err(e) => {
                Failure::MalformedInbound {
                    topic: message.topic,
                    reason: e.to_string(),
                }
                .report();
            }
        }
    }

    pub fn session_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    pub fn session(&self) -> &B {
        &self.broker
    }

    pub fn wifi(&self) -> &W {
        &self.wifi
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}
