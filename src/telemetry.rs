// Telemetry Module
// Rate-limited sampling and publishing of sensor readings

// Import logging macros for debug output
use log::info;

// Import Embassy time type for the post-publish throttle
use embassy_time::Duration;

// Import rand for placeholder readings until real probes are wired
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use serde::Serialize;

use crate::config::NodeConfig;
use crate::connectivity::BrokerSession;
use crate::error::Failure;
use crate::system_state::{ConnectionPhase, PhaseCell};
use crate::time::Delay;

/// One reading, serialized as `{"ec": <number>, "ph": <number>}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetrySample {
    pub ec: f32, // Electrical conductivity
    pub ph: f32, // Acidity
}

/// Source of sensor readings.
pub trait SensorSampler {
    fn sample(&mut self) -> TelemetrySample;
}

/// Random whole-number readings: ec in 0..10, ph in 0..14.
pub struct PlaceholderSampler<R = StdRng> {
    rng: R,
}

impl PlaceholderSampler<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }
}

impl Default for PlaceholderSampler<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Rng> PlaceholderSampler<R> {
    pub fn with_rng(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng> SensorSampler for PlaceholderSampler<R> {
    fn sample(&mut self) -> TelemetrySample {
        TelemetrySample {
            ec: self.rng.gen_range(0..10) as f32,
            ph: self.rng.gen_range(0..14) as f32,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    NotDue,
    Published(TelemetrySample),
    Failed(Failure), // Attempted; the interval still restarts
}

pub struct TelemetryPublisher<S, D> {
    sampler: S,
    delay: D,
    phase: PhaseCell,
    topic: String,
    interval_ms: u64,
    throttle: Duration,
    last_publish_ms: u64, // Boot counts as the previous publish
}

impl<S: SensorSampler, D: Delay> TelemetryPublisher<S, D> {
    pub fn new(config: &NodeConfig, sampler: S, delay: D, phase: PhaseCell) -> Self {
        Self {
            sampler,
            delay,
            phase,
            topic: config.outbound_topic.clone(),
            interval_ms: config.publish_interval.as_millis(),
            throttle: config.publish_throttle,
            last_publish_ms: 0,
        }
    }

    /// Publish one sample once at least the interval has passed since the last
    /// attempt. Publishing is fire-and-forget: failures are logged, never retried.
    pub async fn tick<B: BrokerSession>(&mut self, now_ms: u64, session: &mut B) -> TickOutcome {
        if now_ms.saturating_sub(self.last_publish_ms) < self.interval_ms {
            return TickOutcome::NotDue;
        }

        self.last_publish_ms = now_ms;
        self.phase.set(ConnectionPhase::Active);

        let sample = self.sampler.sample();
        let outcome = match serde_json::to_string(&sample) {
            Ok(payload) => match session.publish(&self.topic, &payload) {
                Ok(()) => {
                    info!("📤 Published to {}: {}", self.topic, payload);
                    TickOutcome::Published(sample)
                }
                Err(e) => {
                    let failure = Failure::PublishFailed(format!("{:#}", e));
                    failure.report();
                    TickOutcome::Failed(failure)
                }
            },
            Err(e) => {
                let failure = Failure::Serialization(e.to_string());
                failure.report();
                TickOutcome::Failed(failure)
            }
        };

        self.delay.delay(self.throttle).await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBroker, FakeClock, FakeDelay, FixedSampler};
    use embassy_futures::block_on;
    use serde_json::Value;

    fn publisher() -> (TelemetryPublisher<FixedSampler, FakeDelay>, FakeDelay, PhaseCell) {
        let delay = FakeDelay::new(FakeClock::new());
        let phase = PhaseCell::new(ConnectionPhase::Idle);
        let publisher = TelemetryPublisher::new(
            &NodeConfig::default(),
            FixedSampler::new(3.0, 7.0),
            delay.clone(),
            phase.clone(),
        );
        (publisher, delay, phase)
    }

    #[test]
    fn publishes_at_most_once_per_interval() {
        let (mut publisher, delay, _) = publisher();
        let mut broker = FakeBroker::connected();

        let outcomes: Vec<TickOutcome> = [0, 9_999, 10_000, 10_001, 15_000, 19_999, 20_000, 20_001]
            .into_iter()
            .map(|now| block_on(publisher.tick(now, &mut broker)))
            .collect();

        let published: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| matches!(outcome, TickOutcome::Published(_)))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(published, vec![2, 6]);
        assert_eq!(broker.published.len(), 2);
        assert_eq!(delay.waits(), vec![200, 200]);
    }

    #[test]
    fn publishes_when_exactly_one_interval_has_elapsed() {
        let (mut publisher, _, _) = publisher();
        let mut broker = FakeBroker::connected();

        let outcome = block_on(publisher.tick(10_000, &mut broker));

        assert!(matches!(outcome, TickOutcome::Published(_)));
        assert_eq!(broker.published.len(), 1);
    }

    #[test]
    fn payload_carries_ec_and_ph() {
        let (mut publisher, _, phase) = publisher();
        let mut broker = FakeBroker::connected();

        let outcome = block_on(publisher.tick(10_001, &mut broker));

        assert_eq!(outcome, TickOutcome::Published(TelemetrySample { ec: 3.0, ph: 7.0 }));
        assert_eq!(phase.get(), ConnectionPhase::Active);

        let (topic, payload) = &broker.published[0];
        assert_eq!(topic, "aeroEsp/out");
        let json: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(json["ec"].as_f64(), Some(3.0));
        assert_eq!(json["ph"].as_f64(), Some(7.0));
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[test]
    fn failed_publish_is_not_retried() {
        let (mut publisher, delay, _) = publisher();
        let mut broker = FakeBroker::connected();
        broker.reject_publish = true;

        let outcome = block_on(publisher.tick(10_001, &mut broker));
        assert!(matches!(outcome, TickOutcome::Failed(Failure::PublishFailed(_))));
        assert_eq!(delay.waits(), vec![200]);

        broker.reject_publish = false;
        assert_eq!(block_on(publisher.tick(10_002, &mut broker)), TickOutcome::NotDue);
        assert!(broker.published.is_empty());
    }

    #[test]
    fn placeholder_readings_stay_in_range() {
        let mut sampler = PlaceholderSampler::with_rng(StdRng::seed_from_u64(7));
        for _ in 0..200 {
            let sample = sampler.sample();
            assert!((0.0..10.0).contains(&sample.ec));
            assert!((0.0..14.0).contains(&sample.ph));
            assert_eq!(sample.ec.fract(), 0.0);
        }
    }
}
