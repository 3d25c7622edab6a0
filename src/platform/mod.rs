// ESP32 implementations of the hardware and network seams

pub mod ble_pairing;
pub mod gpio;
pub mod mqtt_session;
pub mod nvs_storage;
pub mod system;
pub mod wifi_link;
