//! Connectivity and telemetry core for the Aero sensor node.
//!
//! Everything outside [`platform`] is hardware-agnostic and runs on the host;
//! the ESP32 drivers plug in through the traits in each module.

pub mod config;
pub mod connectivity;
pub mod credential_store;
pub mod error;
pub mod orchestrator;
pub mod provisioning;
pub mod reset_handler;
pub mod status_indicator;
pub mod system_state;
pub mod telemetry;
pub mod time;

#[cfg(target_os = "espidf")]
pub mod platform;

#[cfg(test)]
mod testing;
