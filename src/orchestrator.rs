// Orchestrator Module
// Boot-time credential acquisition and the steady-state connectivity/telemetry loop

// Import logging macros for debug output
use log::info;

// Import anyhow for error handling following existing patterns
use anyhow::Result;

// Import Embassy time type for the loop pause
use embassy_time::Duration;

use crate::config::NodeConfig;
use crate::connectivity::{
    BrokerSession, ConnectivityManager, InboundHandler, LinkState, WifiLink,
};
use crate::credential_store::{CredentialStore, Credentials};
use crate::error::Failure;
use crate::provisioning::{Acquisition, PairingLink, ProvisioningManager};
use crate::reset_handler::Restart;
use crate::system_state::{ConnectionPhase, PhaseCell};
use crate::telemetry::{SensorSampler, TelemetryPublisher, TickOutcome};
use crate::time::{Clock, Delay};

#[derive(Debug, Clone, PartialEq)]
pub enum Startup {
    Ready(Credentials), // Continue into the main loop
    Restarting,         // Fresh credentials persisted, restart requested
}

/// Acquire credentials for this boot. Freshly paired credentials are applied
/// by restarting, so the main loop only ever runs with stored ones. A pairing
/// link that fails to open is retried by restarting as well.
pub async fn startup<S, L, F, R>(
    provisioning: &mut ProvisioningManager<S>,
    open_link: F,
    restart: &R,
) -> Startup
where
    S: CredentialStore,
    L: PairingLink,
    F: FnOnce() -> Result<L>,
    R: Restart,
{
    match provisioning.acquire_credentials(open_link).await {
        Ok(Acquisition::Stored(credentials)) => Startup::Ready(credentials),
        Ok(Acquisition::Paired(_)) => {
            info!("🔄 Credentials saved - restarting to apply them");
            restart.restart();
            Startup::Restarting
        }
        Err(e) => {
            Failure::PairingLinkOpen(format!("{:#}", e)).report();
            restart.restart();
            Startup::Restarting
        }
    }
}

/// What one main loop iteration did.
#[derive(Debug, Clone, PartialEq)]
pub struct Iteration {
    pub wifi: LinkState,
    pub inbound: usize,
    pub broker: LinkState,
    pub telemetry: TickOutcome,
}

pub struct Orchestrator<W, B, D, H, S, C> {
    credentials: Credentials,
    connectivity: ConnectivityManager<W, B, D, H>,
    publisher: TelemetryPublisher<S, D>,
    clock: C,
    delay: D,
    phase: PhaseCell,
    loop_pause: Duration,
}

impl<W, B, D, H, S, C> Orchestrator<W, B, D, H, S, C>
where
    W: WifiLink,
    B: BrokerSession,
    D: Delay + Clone,
    H: InboundHandler,
    S: SensorSampler,
    C: Clock,
{
    pub fn new(
        config: &NodeConfig,
        credentials: Credentials,
        connectivity: ConnectivityManager<W, B, D, H>,
        sampler: S,
        clock: C,
        delay: D,
        phase: PhaseCell,
    ) -> Self {
        let publisher = TelemetryPublisher::new(config, sampler, delay.clone(), phase.clone());
        Self {
            credentials,
            connectivity,
            publisher,
            clock,
            delay,
            phase,
            loop_pause: config.loop_pause,
        }
    }

    /// Ensure the wireless link, service inbound traffic, ensure the broker
    /// session, publish if due, then settle on Idle.
    pub async fn iterate(&mut self) -> Iteration {
        let wifi = self.connectivity.ensure_wifi(&self.credentials).await;
        let inbound = self.connectivity.pump_inbound();
        let broker = self.connectivity.ensure_broker(&self.credentials).await;

        let now_ms = self.clock.now_ms();
        let telemetry = self
            .publisher
            .tick(now_ms, self.connectivity.session_mut())
            .await;

        self.phase.set(ConnectionPhase::Idle);

        Iteration {
            wifi,
            inbound,
            broker,
            telemetry,
        }
    }

    /// Never returns.
    pub async fn run(&mut self) {
        info!("🚀 Main loop running - {}", self.credentials.summary());
        loop {
            self.iterate().await;
            self.delay.delay(self.loop_pause).await;
        }
    }

    pub fn connectivity(&self) -> &ConnectivityManager<W, B, D, H> {
        &self.connectivity
    }

    pub fn connectivity_mut(&mut self) -> &mut ConnectivityManager<W, B, D, H> {
        &mut self.connectivity
    }
}
