// Provisioning Module
// Credential acquisition from storage or from the pairing link request/acknowledge protocol

// Import logging macros for debug output
use log::{debug, error, info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::Result;

// Import Serde for the acknowledgment payload and JSON inspection
use serde::Serialize;
use serde_json::Value;

use crate::credential_store::{CredentialStore, Credentials};
use crate::error::Failure;
use crate::system_state::{ConnectionPhase, PhaseCell};

/// Short-range request/response channel used only while pairing.
#[allow(async_fn_in_trait)]
pub trait PairingLink {
    /// Wait for one complete inbound message. Never times out.
    async fn receive(&mut self) -> String;

    /// Transmit one outbound message.
    async fn send(&mut self, message: &str) -> Result<()>;
}

// Acknowledgment sent back for every syntactically valid pairing message
#[derive(Debug, Serialize)]
struct PairingAck {
    ok: bool,
}

/// How one inbound pairing message is handled.
#[derive(Debug, Clone, PartialEq)]
pub enum PairingDecision {
    Discard(Failure),    // Not JSON: no acknowledgment
    Reject(Failure),     // JSON with missing fields: {"ok": false}
    Accept(Credentials), // Complete: persist, then {"ok": true}
}

/// Where the credentials came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    Stored(Credentials), // Already in storage, pairing link never opened
    Paired(Credentials), // Freshly paired and persisted; caller restarts
}

/// Inspect a raw pairing message.
///
/// Non-string values count as missing and `serverPort` must be an integer in
/// 1..=65535. Anything that parses as JSON gets an acknowledgment.
pub fn interpret_pairing_message(raw: &str) -> PairingDecision {
    let trimmed = raw.trim_matches(|c: char| c.is_whitespace() || c == '\0');

    let json: Value = match serde_json::from_str(trimmed) {
        Ok(json) => json,
        Err(e) => return PairingDecision::Discard(Failure::MalformedPairingMessage(e.to_string())),
    };

    let text = |key: &str| {
        json.get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let broker_port = json
        .get("serverPort")
        .and_then(Value::as_i64)
        .and_then(|port| u16::try_from(port).ok())
        .unwrap_or(0);

    let credentials = Credentials {
        ssid: text("ssid"),
        password: text("password"),
        broker_host: text("server"),
        broker_port,
    };

    if credentials.is_complete() {
        PairingDecision::Accept(credentials)
    } else {
        PairingDecision::Reject(Failure::IncompletePairingMessage)
    }
}

fn ack_message(ok: bool) -> String {
    serde_json::to_string(&PairingAck { ok }).unwrap_or_else(|_| format!("{{\"ok\":{}}}", ok))
}

/// Rebuilds pairing messages from transport fragments.
///
/// A message ends at a newline, or as soon as the buffered bytes parse as
/// JSON. A buffer that outgrows `limit` without completing is flushed as is,
/// so the receiver discards it instead of waiting forever.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: Vec<u8>,
    limit: usize,
}

impl MessageAssembler {
    pub const fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
        }
    }

    /// Append one fragment and return every message it completes.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(fragment);

        let mut complete = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let text = String::from_utf8_lossy(&line);
            if !text.trim().is_empty() {
                complete.push(text.into_owned());
            }
        }

        let finished = !self.buffer.is_empty()
            && serde_json::from_slice::<Value>(&self.buffer).is_ok();
        if finished || self.buffer.len() > self.limit {
            complete.push(String::from_utf8_lossy(&self.buffer).into_owned());
            self.buffer.clear();
        }

        complete
    }

    /// Drop any partial message, e.g. when the peer disconnects.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Acquires credentials once per boot.
pub struct ProvisioningManager<S> {
    store: S,
    phase: PhaseCell,
}

impl<S: CredentialStore> ProvisioningManager<S> {
    pub fn new(store: S, phase: PhaseCell) -> Self {
        Self { store, phase }
    }

    /// Return stored credentials, or pair over a link opened through `open_link`.
    ///
    /// The link is only opened when storage has no complete record. The pairing
    /// wait has no timeout.
    pub async fn acquire_credentials<L, F>(&mut self, open_link: F) -> Result<Acquisition>
    where
        L: PairingLink,
        F: FnOnce() -> Result<L>,
    {
        match self.store.get() {
            Ok(Some(credentials)) => {
                info!("✅ Using stored credentials - {}", credentials.summary());
                return Ok(Acquisition::Stored(credentials));
            }
            Ok(None) => info!("📭 No complete credentials stored - starting pairing"),
            Err(e) => error!("❌ Failed to read credential storage, pairing instead: {:?}", e),
        }

        self.phase.set(ConnectionPhase::Provisioning);
        let mut link = open_link()?;
        info!("📱 Pairing link open - waiting for credentials");

        loop {
            let message = link.receive().await;
            debug!("📨 Pairing message received: {} bytes", message.len());

            if let Some(credentials) = self.handle_message(&mut link, &message).await {
                info!("🎉 Pairing complete - {}", credentials.summary());
                return Ok(Acquisition::Paired(credentials));
            }
        }
    }

    // One request/acknowledge exchange; returns credentials once they are persisted
    async fn handle_message<L: PairingLink>(
        &mut self,
        link: &mut L,
        message: &str,
    ) -> Option<Credentials> {
        match interpret_pairing_message(message) {
            PairingDecision::Discard(failure) => {
                failure.report();
                None
            }
            PairingDecision::Reject(failure) => {
                failure.report();
                self.acknowledge(link, false).await;
                None
            }
            PairingDecision::Accept(credentials) => match self.store.put(&credentials) {
                Ok(()) => {
                    self.acknowledge(link, true).await;
                    Some(credentials)
                }
                Err(e) => {
                    error!("❌ Failed to persist paired credentials: {:?}", e);
                    self.acknowledge(link, false).await;
                    None
                }
            },
        }
    }

    async fn acknowledge<L: PairingLink>(&mut self, link: &mut L, ok: bool) {
        let ack = ack_message(ok);
        if let Err(e) = link.send(&ack).await {
            warn!("⚠️ Failed to send pairing acknowledgment {}: {:?}", ack, e);
        }
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential_store::MemoryCredentialStore;
    use crate::testing::{home_credentials, ScriptedPairingLink};
    use embassy_futures::block_on;

    const VALID: &str =
        r#"{"ssid":"home","password":"secret","server":"10.0.0.5","serverPort":1883}"#;
    const ZERO_PORT: &str =
        r#"{"ssid":"home","password":"secret","server":"10.0.0.5","serverPort":0}"#;

    fn manager(store: MemoryCredentialStore) -> ProvisioningManager<MemoryCredentialStore> {
        ProvisioningManager::new(store, PhaseCell::new(ConnectionPhase::Off))
    }

    #[test]
    fn interpret_accepts_complete_message() {
        assert_eq!(
            interpret_pairing_message(VALID),
            PairingDecision::Accept(home_credentials())
        );
    }

    #[test]
    fn interpret_tolerates_line_endings() {
        let framed = format!("{}\r\n", VALID);
        assert!(matches!(
            interpret_pairing_message(&framed),
            PairingDecision::Accept(_)
        ));
    }

    #[test]
    fn interpret_rejects_incomplete_fields() {
        let cases = [
            ZERO_PORT,
            r#"{"ssid":"home","password":"secret","server":"10.0.0.5"}"#,
            r#"{"ssid":"","password":"secret","server":"10.0.0.5","serverPort":1883}"#,
            r#"{"ssid":"home","password":"secret","server":"10.0.0.5","serverPort":"1883"}"#,
            r#"{"ssid":"home","password":"secret","server":"10.0.0.5","serverPort":70000}"#,
            r#"{"ssid":7,"password":"secret","server":"10.0.0.5","serverPort":1883}"#,
            "[]",
            "42",
        ];
        for case in cases {
            assert_eq!(
                interpret_pairing_message(case),
                PairingDecision::Reject(Failure::IncompletePairingMessage),
                "case: {}",
                case
            );
        }
    }

    #[test]
    fn interpret_discards_non_json() {
        for case in ["", "hello", "{\"ssid\":", "{ssid: home}"] {
            assert!(
                matches!(interpret_pairing_message(case), PairingDecision::Discard(_)),
                "case: {:?}",
                case
            );
        }
    }

    #[test]
    fn stored_credentials_skip_the_pairing_link() {
        let mut manager = manager(MemoryCredentialStore::with_record(home_credentials()));
        let mut opened = false;

        let result = block_on(manager.acquire_credentials(|| {
            opened = true;
            Ok(ScriptedPairingLink::new(&[]))
        }))
        .unwrap();

        assert_eq!(result, Acquisition::Stored(home_credentials()));
        assert!(!opened);
        assert_eq!(manager.phase.get(), ConnectionPhase::Off);
    }

    #[test]
    fn assembler_joins_mtu_sized_fragments() {
        let mut assembler = MessageAssembler::new(2048);

        let chunks: Vec<&[u8]> = VALID.as_bytes().chunks(20).collect();
        let (last, head) = chunks.split_last().unwrap();
        for chunk in head {
            assert!(assembler.push(chunk).is_empty());
        }

        assert_eq!(assembler.push(last), vec![VALID.to_string()]);
        assert!(assembler.push(b"").is_empty());
    }

    #[test]
    fn assembler_splits_on_newlines() {
        let mut assembler = MessageAssembler::new(2048);

        assert!(assembler.push(b"not json").is_empty());
        let messages = assembler.push(format!("\n{}\n", ZERO_PORT).as_bytes());

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], "not json\n");
        assert_eq!(
            interpret_pairing_message(&messages[1]),
            PairingDecision::Reject(Failure::IncompletePairingMessage)
        );
    }

    #[test]
    fn assembler_flushes_oversized_garbage() {
        let mut assembler = MessageAssembler::new(16);

        assert!(assembler.push(b"{\"ssid\":\"ho").is_empty());
        let flushed = assembler.push(b"me\",\"password\"");

        assert_eq!(flushed.len(), 1);
        assert!(matches!(
            interpret_pairing_message(&flushed[0]),
            PairingDecision::Discard(_)
        ));
        assert_eq!(assembler.push(VALID.as_bytes()), vec![VALID.to_string()]);
    }

    #[test]
    fn assembler_reset_drops_partial_message() {
        let mut assembler = MessageAssembler::new(2048);
        assert!(assembler.push(&VALID.as_bytes()[..30]).is_empty());

        assembler.reset();

        assert_eq!(assembler.push(VALID.as_bytes()), vec![VALID.to_string()]);
    }

    #[test]
    fn non_json_message_persists_nothing() {
        let mut link = ScriptedPairingLink::new(&[]);
        let sent = link.sent();
        let mut manager = manager(MemoryCredentialStore::new());

        for garbage in ["not json", "{\"ssid\":", ""] {
            assert_eq!(block_on(manager.handle_message(&mut link, garbage)), None);
        }

        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(manager.into_store().get().unwrap(), None);
    }

    #[test]
    fn garbage_gets_no_ack_and_incomplete_gets_negative_ack() {
        let link = ScriptedPairingLink::new(&["not json", ZERO_PORT, "{\"ssid\":", VALID]);
        let sent = link.sent();
        let mut manager = manager(MemoryCredentialStore::new());

        let result = block_on(manager.acquire_credentials(|| Ok(link))).unwrap();

        assert_eq!(result, Acquisition::Paired(home_credentials()));
        assert_eq!(
            *sent.lock().unwrap(),
            vec![r#"{"ok":false}"#.to_string(), r#"{"ok":true}"#.to_string()]
        );
        assert_eq!(manager.phase.get(), ConnectionPhase::Provisioning);
    }

    #[test]
    fn rejected_message_is_not_persisted() {
        let mut link = ScriptedPairingLink::new(&[ZERO_PORT, VALID]);
        let mut manager = manager(MemoryCredentialStore::new());

        // Only the first exchange runs; the valid message stays queued
        let persisted = block_on(async {
            let message = link.receive().await;
            manager.handle_message(&mut link, &message).await
        });

        assert_eq!(persisted, None);
        assert_eq!(manager.into_store().get().unwrap(), None);
    }

    #[test]
    fn accepted_message_is_persisted_exactly_as_given() {
        let link = ScriptedPairingLink::new(&[VALID]);
        let mut manager = manager(MemoryCredentialStore::new());

        block_on(manager.acquire_credentials(|| Ok(link))).unwrap();

        assert_eq!(
            manager.into_store().get().unwrap(),
            Some(home_credentials())
        );
    }

    #[test]
    fn link_open_failure_is_reported() {
        let mut manager = manager(MemoryCredentialStore::new());
        let result = block_on(
            manager.acquire_credentials(|| -> Result<ScriptedPairingLink> {
                Err(anyhow::anyhow!("radio busy"))
            }),
        );
        assert!(result.is_err());
    }
}
