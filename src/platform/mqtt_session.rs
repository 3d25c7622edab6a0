// MQTT Session Module
// Plain-TCP ESP-IDF MQTT client behind the broker session seam

// Import ESP-IDF MQTT client functionality
use esp_idf_svc::mqtt::client::{EspMqttClient, EspMqttEvent, MqttClientConfiguration, QoS};

// Import event payload types delivered to the client callback
use embedded_svc::mqtt::client::{Details, EventPayload};

// Import Embassy time utilities for the connect timeout
use embassy_time::{Duration, Instant, Timer};

// Import logging macros for debug output with consistent emoji prefixes
use log::{debug, error, info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::connectivity::{BrokerSession, InboundMessage, InboundQueue};

const CONNECT_TIMEOUT_MS: u64 = 5_000; // Wait for CONNACK before calling the attempt failed
const CONNECT_POLL_MS: u64 = 100;
const INBOUND_QUEUE_SIZE: usize = 8; // Messages beyond this between main loop passes are dropped

// Filled by the MQTT task callback, drained by the main loop
static INBOUND_QUEUE: InboundQueue<INBOUND_QUEUE_SIZE> = InboundQueue::new();

pub struct EspBrokerSession {
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
}

impl EspBrokerSession {
    pub fn new() -> Self {
        Self {
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn client(&mut self) -> Result<&mut EspMqttClient<'static>> {
        self.client
            .as_mut()
            .ok_or_else(|| anyhow!("MQTT client not connected"))
    }
}

impl Default for EspBrokerSession {
    fn default() -> Self {
        Self::new()
    }
}

// Runs on the ESP-IDF MQTT task
fn handle_event(event: EspMqttEvent<'_>, connected: &AtomicBool) {
    match event.payload() {
        EventPayload::Connected(_) => {
            info!("✅ MQTT connected");
            connected.store(true, Ordering::SeqCst);
        }
        EventPayload::Disconnected => {
            warn!("📡 MQTT disconnected");
            connected.store(false, Ordering::SeqCst);
        }
        EventPayload::Received {
            topic,
            data,
            details,
            ..
        } => {
            let Some(topic) = topic else {
                debug!("Dropping MQTT fragment without topic");
                return;
            };
            if !matches!(details, Details::Complete) {
                warn!("⚠️ Dropping fragmented MQTT message on {}", topic);
                return;
            }
            let message = InboundMessage {
                topic: topic.to_string(),
                payload: data.to_vec(),
            };
            INBOUND_QUEUE.offer(message);
        }
        EventPayload::Error(e) => error!("❌ MQTT error: {:?}", e),
        other => debug!("MQTT event: {:?}", other),
    }
}

impl BrokerSession for EspBrokerSession {
    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&mut self, client_id: &str, host: &str, port: u16) -> Result<()> {
        // Drop any previous client so its own reconnect loop stops
        self.client = None;
        self.connected.store(false, Ordering::SeqCst);

        let broker_url = format!("mqtt://{}:{}", host, port);
        let mqtt_config = MqttClientConfiguration {
            client_id: Some(client_id),
            ..Default::default()
        };

        let connected = self.connected.clone();
        let client = EspMqttClient::new_cb(&broker_url, &mqtt_config, move |event| {
            handle_event(event, &connected)
        })
        .map_err(|e| anyhow!("Failed to create MQTT client for {}: {:?}", broker_url, e))?;
        self.client = Some(client);

        let deadline = Instant::now() + Duration::from_millis(CONNECT_TIMEOUT_MS);
        while !self.connected.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                self.client = None;
                return Err(anyhow!(
                    "No CONNACK from {} within {}ms",
                    broker_url,
                    CONNECT_TIMEOUT_MS
                ));
            }
            Timer::after(Duration::from_millis(CONNECT_POLL_MS)).await;
        }

        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.client()?
            .subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| anyhow!("Subscribe to {} failed: {:?}", topic, e))?;
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        self.client()?
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes())
            .map_err(|e| anyhow!("Publish to {} failed: {:?}", topic, e))?;
        Ok(())
    }

    fn poll_inbound(&mut self) -> Option<InboundMessage> {
        INBOUND_QUEUE.take()
    }
}
