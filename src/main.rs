#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    firmware::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("aero-node only runs on ESP-IDF targets; the host build exists for `cargo test`");
}

#[cfg(target_os = "espidf")]
mod firmware {
    // Import Embassy executor for the status thread
    use embassy_executor::Executor;
    use embassy_sync::signal::Signal;

    // Import ESP-IDF system services
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::cpu::Core;
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::hal::task::block_on;
    use esp_idf_svc::hal::task::thread::ThreadSpawnConfiguration;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    // Import logging macros
    use log::{error, info};

    // Import anyhow for error handling following existing patterns
    use anyhow::{anyhow, Result};

    use aero_node::config::NodeConfig;
    use aero_node::connectivity::{ConnectivityManager, LogInbound};
    use aero_node::credential_store::SharedCredentialStore;
    use aero_node::orchestrator::{startup, Orchestrator, Startup};
    use aero_node::platform::ble_pairing::BlePairingLink;
    use aero_node::platform::gpio::{GpioResetButton, GpioStatusLed};
    use aero_node::platform::mqtt_session::EspBrokerSession;
    use aero_node::platform::nvs_storage::NvsCredentialStore;
    use aero_node::platform::system::{EmbassyClock, EmbassyDelay, EspRestart};
    use aero_node::platform::wifi_link::EspWifiLink;
    use aero_node::provisioning::ProvisioningManager;
    use aero_node::reset_handler::ResetHandler;
    use aero_node::status_indicator::StatusIndicator;
    use aero_node::system_state::{PhaseCell, ResetSignal};
    use aero_node::telemetry::PlaceholderSampler;

    const STATUS_THREAD_STACK_SIZE: usize = 8192;
    const STATUS_THREAD_PRIORITY: u8 = 5;

    // Indicator -> reset handler, both on the status thread
    static RESET_SIGNAL: ResetSignal = Signal::new();

    type Store = SharedCredentialStore<NvsCredentialStore>;
    type Indicator = StatusIndicator<GpioStatusLed, GpioResetButton, EmbassyDelay>;

    #[embassy_executor::task]
    async fn indicator_task(mut indicator: Indicator) {
        indicator.run(&RESET_SIGNAL).await
    }

    #[embassy_executor::task]
    async fn reset_task(mut handler: ResetHandler<Store, EspRestart>) {
        handler.run(&RESET_SIGNAL).await
    }

    pub fn run() -> Result<()> {
        // It is necessary to call this function once. Otherwise some patches to the runtime
        // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
        esp_idf_svc::sys::link_patches();

        // Bind the log crate to the ESP Logging facilities
        esp_idf_svc::log::EspLogger::initialize_default();

        info!("🚀 Aero node starting");

        let config = NodeConfig::from_build_env();
        config.validate()?;

        let peripherals = Peripherals::take()?;
        let sys_loop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        let phase = PhaseCell::default();
        let store: Store = SharedCredentialStore::new(NvsCredentialStore::new(nvs.clone())?);

        let indicator = StatusIndicator::new(
            &config,
            GpioStatusLed::new(peripherals.pins.gpio2)?,
            GpioResetButton::new(peripherals.pins.gpio0)?,
            EmbassyDelay,
            phase.clone(),
        );
        let reset_handler = ResetHandler::new(store.clone(), EspRestart);
        spawn_status_thread(indicator, reset_handler)?;

        // The radio serves either the pairing link or WiFi during one boot, never both
        let mut modem = Some(peripherals.modem);

        let mut provisioning = ProvisioningManager::new(store, phase.clone());
        let open_pairing_link = || {
            let modem = modem
                .take()
                .ok_or_else(|| anyhow!("Radio already claimed"))?;
            BlePairingLink::open(modem, nvs.clone())
        };
        let credentials = match block_on(startup(&mut provisioning, open_pairing_link, &EspRestart)) {
            Startup::Ready(credentials) => credentials,
            Startup::Restarting => return Ok(()),
        };

        let modem = modem
            .take()
            .ok_or_else(|| anyhow!("Radio already claimed by the pairing link"))?;
        let wifi = EspWifiLink::new(modem, sys_loop, nvs)?;

        let connectivity = ConnectivityManager::new(
            &config,
            wifi,
            EspBrokerSession::new(),
            EmbassyDelay,
            LogInbound,
            phase.clone(),
        );
        let mut orchestrator = Orchestrator::new(
            &config,
            credentials,
            connectivity,
            PlaceholderSampler::new(),
            EmbassyClock,
            EmbassyDelay,
            phase,
        );

        block_on(orchestrator.run());
        Ok(())
    }

    // Status LED and reset handling run on their own executor pinned to core 0,
    // so blocking connects on the main thread never stall the button
    fn spawn_status_thread(
        indicator: Indicator,
        reset_handler: ResetHandler<Store, EspRestart>,
    ) -> Result<()> {
        ThreadSpawnConfiguration {
            name: Some(&b"status\0"[..]),
            stack_size: STATUS_THREAD_STACK_SIZE,
            priority: STATUS_THREAD_PRIORITY,
            pin_to_core: Some(Core::Core0),
            ..Default::default()
        }
        .set()?;

        std::thread::Builder::new()
            .stack_size(STATUS_THREAD_STACK_SIZE)
            .spawn(move || {
                let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
                executor.run(|spawner| {
                    if spawner.spawn(indicator_task(indicator)).is_err() {
                        error!("❌ Failed to spawn status indicator task");
                    }
                    if spawner.spawn(reset_task(reset_handler)).is_err() {
                        error!("❌ Failed to spawn reset handler task");
                    }
                })
            })?;

        // Threads spawned later get the default configuration again
        ThreadSpawnConfiguration::default().set()?;
        Ok(())
    }
}
