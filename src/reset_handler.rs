// Reset Handler Module
// Sole consumer of factory reset commands: wipes stored credentials and restarts

// Import logging macros for debug output
use log::{error, info, warn};

use crate::credential_store::CredentialStore;
use crate::system_state::{ResetCommand, ResetSignal};

/// Device restart. On hardware this never returns.
pub trait Restart {
    fn restart(&self);
}

pub struct ResetHandler<S, R> {
    store: S,
    restart: R,
}

impl<S: CredentialStore, R: Restart> ResetHandler<S, R> {
    pub fn new(store: S, restart: R) -> Self {
        Self { store, restart }
    }

    pub fn execute(&mut self, command: ResetCommand) {
        match command {
            ResetCommand::FactoryReset => {
                warn!("🧹 Factory reset - clearing stored credentials");

                // A failed wipe still restarts; the next boot sees whatever survived
                if let Err(e) = self.store.clear() {
                    error!("❌ Failed to clear credential storage: {:?}", e);
                }

                info!("🔄 Restarting device");
                self.restart.restart();
            }
        }
    }

    /// Wait for the next command and execute it.
    pub async fn handle_next(&mut self, signal: &ResetSignal) {
        let command = signal.wait().await;
        self.execute(command);
    }

    /// Serve commands until the restart takes effect.
    pub async fn run(&mut self, signal: &ResetSignal) {
        loop {
            self.handle_next(signal).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential_store::{MemoryCredentialStore, SharedCredentialStore};
    use crate::testing::{home_credentials, FailingStore, RestartRecorder};
    use embassy_futures::block_on;

    #[test]
    fn factory_reset_clears_store_then_restarts() {
        let mut store = SharedCredentialStore::new(MemoryCredentialStore::with_record(home_credentials()));
        let restart = RestartRecorder::default();
        let mut handler = ResetHandler::new(store.clone(), restart.clone());

        let signal = ResetSignal::new();
        signal.signal(ResetCommand::FactoryReset);
        block_on(handler.handle_next(&signal));

        assert_eq!(store.get().unwrap(), None);
        assert_eq!(restart.count(), 1);
    }

    #[test]
    fn restart_happens_even_when_clear_fails() {
        let restart = RestartRecorder::default();
        let mut handler = ResetHandler::new(FailingStore, restart.clone());

        handler.execute(ResetCommand::FactoryReset);

        assert_eq!(restart.count(), 1);
    }
}
