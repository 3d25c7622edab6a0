// Failure outcomes for the connectivity core
// Every failure is either retried without bound or logged and dropped; the policy is part of the value

// Import logging macros for failure reports
use log::warn;

/// What the caller does with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Retry, // Keep trying forever
    Drop,  // Log and move on
}

#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    // Pairing link
    PairingLinkOpen(String),         // Transport could not start: recovered by restarting
    MalformedPairingMessage(String), // Not JSON at all: no acknowledgment
    IncompletePairingMessage,        // JSON but missing fields: negative acknowledgment

    // Wireless link / broker session
    WifiDisconnected,
    WifiStart(String),
    BrokerConnect(String),
    BrokerSubscribe(String),

    // Broker traffic
    MalformedInbound { topic: String, reason: String },
    PublishFailed(String),
    Serialization(String),
}

impl Failure {
    pub fn policy(&self) -> Policy {
        match self {
            Failure::PairingLinkOpen(_)
            | Failure::WifiDisconnected
            | Failure::WifiStart(_)
            | Failure::BrokerConnect(_) => Policy::Retry,
            Failure::BrokerSubscribe(_)
            | Failure::MalformedPairingMessage(_)
            | Failure::IncompletePairingMessage
            | Failure::MalformedInbound { .. }
            | Failure::PublishFailed(_)
            | Failure::Serialization(_) => Policy::Drop,
        }
    }

    /// Log the failure with what happens next and return its policy.
    pub fn report(&self) -> Policy {
        let policy = self.policy();
        match policy {
            Policy::Retry => warn!("⚠️ {} - retrying", self),
            Policy::Drop => warn!("⚠️ {} - dropped", self),
        }
        policy
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::PairingLinkOpen(reason) => write!(f, "Pairing link failed to open: {}", reason),
            Failure::MalformedPairingMessage(reason) => {
                write!(f, "Pairing message is not valid JSON: {}", reason)
            }
            Failure::IncompletePairingMessage => {
                write!(f, "Pairing message is missing ssid/password/server/serverPort")
            }
            Failure::WifiDisconnected => write!(f, "Wireless link is down"),
            Failure::WifiStart(reason) => write!(f, "Wireless connect failed: {}", reason),
            Failure::BrokerConnect(reason) => write!(f, "Broker connect failed: {}", reason),
            Failure::BrokerSubscribe(reason) => write!(f, "Broker subscribe failed: {}", reason),
            Failure::MalformedInbound { topic, reason } => {
                write!(f, "Inbound message on {} is not valid JSON: {}", topic, reason)
            }
            Failure::PublishFailed(reason) => write!(f, "Publish failed: {}", reason),
            Failure::Serialization(reason) => write!(f, "Serialization failed: {}", reason),
        }
    }
}

impl std::error::Error for Failure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_are_retried() {
        assert_eq!(Failure::WifiDisconnected.policy(), Policy::Retry);
        assert_eq!(
            Failure::PairingLinkOpen("no controller".to_string()).policy(),
            Policy::Retry
        );
        assert_eq!(
            Failure::BrokerConnect("rc=-2".to_string()).policy(),
            Policy::Retry
        );
    }

    #[test]
    fn message_failures_are_dropped() {
        assert_eq!(
            Failure::MalformedPairingMessage("eof".to_string()).policy(),
            Policy::Drop
        );
        assert_eq!(Failure::IncompletePairingMessage.policy(), Policy::Drop);
        assert_eq!(
            Failure::PublishFailed("queue full".to_string()).policy(),
            Policy::Drop
        );
    }

    #[test]
    fn report_returns_the_policy() {
        assert_eq!(
            Failure::BrokerConnect("refused".to_string()).report(),
            Policy::Retry
        );
        assert_eq!(
            Failure::BrokerSubscribe("rc=-1".to_string()).report(),
            Policy::Drop
        );
    }
}
