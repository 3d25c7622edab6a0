// BLE pairing link using real ESP-IDF GATT APIs
// UART-style service: the phone writes JSON requests to RX, acknowledgments go back as TX notifications

// Import Embassy's critical section mutex for thread-safe access
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

// Import logging macros
use log::{debug, error, info, warn};

// Import anyhow for error handling following existing patterns
use anyhow::{anyhow, Result};

// Import ESP-IDF BLE functionality
use esp_idf_svc::bt::{Ble, BtDriver};
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys as esp_idf_sys;

// Standard library imports
use std::collections::HashMap;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::config::PAIRING_DEVICE_NAME;
use crate::provisioning::{MessageAssembler, PairingLink};

#[derive(Debug, Clone, PartialEq)]
pub enum BleError {
    EspError(esp_idf_sys::esp_err_t, String),
    InvalidUuid(String),
    InvalidState(String),
}

impl std::fmt::Display for BleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BleError::EspError(code, msg) => write!(f, "ESP-IDF error {}: {}", code, msg),
            BleError::InvalidUuid(uuid) => write!(f, "Invalid UUID: {}", uuid),
            BleError::InvalidState(msg) => write!(f, "Invalid BLE state: {}", msg),
        }
    }
}

impl std::error::Error for BleError {}

// Result type for BLE operations
pub type BleResult<T> = Result<T, BleError>;

// Nordic UART service layout, understood by generic serial terminal apps
pub const PAIRING_SERVICE_UUID: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";
pub const RX_CHAR_UUID: &str = "6e400002-b5a3-f393-e0a9-e50e24dcca9e"; // Phone -> node
pub const TX_CHAR_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e"; // Node -> phone
const CLIENT_CONFIG_DESCRIPTOR_UUID: u16 = 0x2902;

const SERVICE_HANDLE_COUNT: u16 = 8;
const MAX_PREPARE_WRITE_BUFFER_SIZE: usize = 2048; // Long writes beyond this are dropped
const INBOX_DEPTH: usize = 4;

// Global state written by the Bluedroid callbacks
static GATT_INTERFACE: AtomicU8 = AtomicU8::new(0);
static SERVICE_HANDLE: AtomicU16 = AtomicU16::new(0);
static RX_HANDLE: AtomicU16 = AtomicU16::new(0);
static TX_HANDLE: AtomicU16 = AtomicU16::new(0);
static CONNECTION_ID: AtomicU16 = AtomicU16::new(0);
static CLIENT_CONNECTED: AtomicBool = AtomicBool::new(false);

// Complete inbound messages, reassembled from writes to RX
static PAIRING_INBOX: Channel<CriticalSectionRawMutex, String, INBOX_DEPTH> = Channel::new();

// Writes without response arrive in MTU-sized fragments; only one client is served at a time
static WRITE_ASSEMBLER: Mutex<MessageAssembler> =
    Mutex::new(MessageAssembler::new(MAX_PREPARE_WRITE_BUFFER_SIZE));

// BLE Long Write (Prepare Write) buffers per connection
static PREPARE_WRITE_BUFFERS: OnceLock<Mutex<HashMap<u16, PrepareWriteBuffer>>> = OnceLock::new();

#[derive(Debug)]
struct PrepareWriteBuffer {
    data: Vec<u8>,
    last_offset: u16,
    char_handle: u16,
}

impl PrepareWriteBuffer {
    fn new(char_handle: u16) -> Self {
        Self {
            data: Vec::new(),
            last_offset: 0,
            char_handle,
        }
    }

    fn append_chunk(&mut self, offset: u16, chunk: &[u8]) -> BleResult<()> {
        if offset != self.last_offset {
            return Err(BleError::InvalidState(format!(
                "Non-sequential prepare write: expected offset {}, got {}",
                self.last_offset, offset
            )));
        }

        if self.data.len() + chunk.len() > MAX_PREPARE_WRITE_BUFFER_SIZE {
            return Err(BleError::InvalidState(format!(
                "Prepare write buffer would exceed max size {} bytes",
                MAX_PREPARE_WRITE_BUFFER_SIZE
            )));
        }

        self.data.extend_from_slice(chunk);
        self.last_offset += chunk.len() as u16;
        Ok(())
    }
}

fn with_prepare_write_buffers<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut HashMap<u16, PrepareWriteBuffer>) -> R,
{
    let buffers = PREPARE_WRITE_BUFFERS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut buffers = buffers.lock().ok()?;
    Some(f(&mut buffers))
}

/// Pairing link over BLE. Owns the Bluetooth driver; dropping it tears the stack down.
pub struct BlePairingLink {
    _bt_driver: BtDriver<'static, Ble>,
}

impl BlePairingLink {
    /// Bring up Bluedroid and register the GATT application. Service creation,
    /// characteristics and advertising follow from the registration callbacks.
    pub fn open(modem: Modem, nvs: EspDefaultNvsPartition) -> Result<Self> {
        info!("🔧 Initializing BLE pairing link");

        let bt_driver = BtDriver::<Ble>::new(modem, Some(nvs))
            .map_err(|e| anyhow!("Failed to initialize Bluetooth driver: {:?}", e))?;

        call_esp_api_with_context(
            || unsafe { esp_idf_sys::esp_ble_gatts_register_callback(Some(gatts_event_handler)) },
            "GATT server callback registration",
        )?;
        call_esp_api_with_context(
            || unsafe { esp_idf_sys::esp_ble_gap_register_callback(Some(gap_event_handler)) },
            "GAP callback registration",
        )?;

        let device_name = CString::new(PAIRING_DEVICE_NAME)
            .map_err(|_| anyhow!("Invalid BLE device name"))?;
        call_esp_api_with_context(
            || unsafe { esp_idf_sys::esp_ble_gap_set_device_name(device_name.as_ptr()) },
            "Device name setting",
        )?;

        call_esp_api_with_context(
            || unsafe { esp_idf_sys::esp_ble_gatts_app_register(0) },
            "GATT application registration",
        )?;

        info!("✅ BLE stack up - advertising as '{}' once the service starts", PAIRING_DEVICE_NAME);
        Ok(Self {
            _bt_driver: bt_driver,
        })
    }
}

impl PairingLink for BlePairingLink {
    async fn receive(&mut self) -> String {
        PAIRING_INBOX.receive().await
    }

    async fn send(&mut self, message: &str) -> Result<()> {
        if !CLIENT_CONNECTED.load(Ordering::SeqCst) {
            return Err(anyhow!("No pairing client connected"));
        }

        let tx_handle = TX_HANDLE.load(Ordering::SeqCst);
        if tx_handle == 0 {
            return Err(anyhow!("TX characteristic not registered"));
        }

        let data = message.as_bytes();
        call_esp_api_with_context(
            || unsafe {
                esp_idf_sys::esp_ble_gatts_send_indicate(
                    GATT_INTERFACE.load(Ordering::SeqCst),
                    CONNECTION_ID.load(Ordering::SeqCst),
                    tx_handle,
                    data.len() as u16,
                    data.as_ptr() as *mut u8,
                    false, // need_confirm = false for notification
                )
            },
            "Pairing acknowledgment notification",
        )?;

        info!("📤 Sent to pairing client: {}", message);
        Ok(())
    }
}

// Real GATT event handler with panic safety
extern "C" fn gatts_event_handler(
    event: esp_idf_sys::esp_gatts_cb_event_t,
    gatt_interface: esp_idf_sys::esp_gatt_if_t,
    event_param: *mut esp_idf_sys::esp_ble_gatts_cb_param_t,
) {
    // Never unwind into Bluedroid
    let result =
        std::panic::catch_unwind(|| gatts_event_handler_impl(event, gatt_interface, event_param));

    if let Err(panic_info) = result {
        error!("🚨 PANIC in GATT event handler: {:?}", panic_info);
    }
}

fn gatts_event_handler_impl(
    event: esp_idf_sys::esp_gatts_cb_event_t,
    gatt_interface: esp_idf_sys::esp_gatt_if_t,
    event_param: *mut esp_idf_sys::esp_ble_gatts_cb_param_t,
) {
    if event_param.is_null() {
        return;
    }

    match event {
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            info!("📋 GATT server registered with interface: {}", gatt_interface);
            GATT_INTERFACE.store(gatt_interface, Ordering::SeqCst);
            if let Err(e) = create_pairing_service(gatt_interface) {
                error!("❌ Failed to create pairing service: {}", e);
            }
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let create_event = unsafe { &(*event_param).create };
            info!("📋 GATT service created with handle: {}", create_event.service_handle);
            SERVICE_HANDLE.store(create_event.service_handle, Ordering::SeqCst);
            if let Err(e) = add_pairing_characteristics(create_event.service_handle) {
                error!("❌ Failed to add pairing characteristics: {}", e);
            }
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let add_char_event = unsafe { &(*event_param).add_char };
            handle_characteristic_added(add_char_event);
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
            // The TX notification descriptor is the last attribute; the service can start
            let service_handle = SERVICE_HANDLE.load(Ordering::SeqCst);
            if let Err(e) = call_esp_api_with_context(
                || unsafe { esp_idf_sys::esp_ble_gatts_start_service(service_handle) },
                "GATT service start",
            ) {
                error!("❌ Failed to start pairing service: {}", e);
            }
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_START_EVT => {
            info!("🚀 Pairing service started");
            if let Err(e) = configure_advertising() {
                error!("❌ Failed to configure advertising: {}", e);
            }
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let connect_event = unsafe { &(*event_param).connect };
            info!("📱 Pairing client connected (conn_id: {})", connect_event.conn_id);

            with_prepare_write_buffers(|buffers| buffers.remove(&connect_event.conn_id));
            reset_write_assembler();
            CONNECTION_ID.store(connect_event.conn_id, Ordering::SeqCst);
            CLIENT_CONNECTED.store(true, Ordering::SeqCst);
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let disconnect_event = unsafe { &(*event_param).disconnect };
            info!(
                "📱 Pairing client disconnected (reason: {}) - advertising again",
                disconnect_event.reason
            );

            with_prepare_write_buffers(|buffers| buffers.remove(&disconnect_event.conn_id));
            reset_write_assembler();
            CLIENT_CONNECTED.store(false, Ordering::SeqCst);

            if let Err(e) = start_advertising() {
                error!("❌ Failed to restart advertising after disconnect: {}", e);
            }
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let write_event = unsafe { &(*event_param).write };
            if write_event.is_prep {
                handle_prepare_write(gatt_interface, write_event);
            } else {
                handle_write(gatt_interface, write_event);
            }
        }
        esp_idf_sys::esp_gatts_cb_event_t_ESP_GATTS_EXEC_WRITE_EVT => {
            let exec_write_event = unsafe { &(*event_param).exec_write };
            handle_execute_write(gatt_interface, exec_write_event);
        }
        _ => {
            debug!("GATT event: {}", event);
        }
    }
}

// Real GAP event handler with panic safety
extern "C" fn gap_event_handler(
    event: esp_idf_sys::esp_gap_ble_cb_event_t,
    event_param: *mut esp_idf_sys::esp_ble_gap_cb_param_t,
) {
    let result = std::panic::catch_unwind(|| gap_event_handler_impl(event, event_param));

    if let Err(panic_info) = result {
        error!("🚨 PANIC in GAP event handler: {:?}", panic_info);
    }
}

fn gap_event_handler_impl(
    event: esp_idf_sys::esp_gap_ble_cb_event_t,
    _event_param: *mut esp_idf_sys::esp_ble_gap_cb_param_t,
) {
    match event {
        esp_idf_sys::esp_gap_ble_cb_event_t_ESP_GAP_BLE_SCAN_RSP_DATA_SET_COMPLETE_EVT => {
            // Scan response is configured after the advertising data, so both are in place
            if let Err(e) = start_advertising() {
                error!("❌ Failed to start advertising: {}", e);
            }
        }
        esp_idf_sys::esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            info!("📡 Advertising as '{}'", PAIRING_DEVICE_NAME);
        }
        esp_idf_sys::esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
            info!("📡 Advertising stopped");
        }
        _ => {
            debug!("GAP event: {}", event);
        }
    }
}

fn uuid128(uuid: &str) -> BleResult<esp_idf_sys::esp_bt_uuid_t> {
    Ok(esp_idf_sys::esp_bt_uuid_t {
        len: esp_idf_sys::ESP_UUID_LEN_128 as u16,
        uuid: esp_idf_sys::esp_bt_uuid_t__bindgen_ty_1 {
            uuid128: parse_uuid(uuid)?,
        },
    })
}

fn create_pairing_service(gatt_interface: esp_idf_sys::esp_gatt_if_t) -> BleResult<()> {
    let service_id = esp_idf_sys::esp_gatt_srvc_id_t {
        is_primary: true,
        id: esp_idf_sys::esp_gatt_id_t {
            uuid: uuid128(PAIRING_SERVICE_UUID)?,
            inst_id: 0,
        },
    };

    call_esp_api_with_context(
        || unsafe {
            esp_idf_sys::esp_ble_gatts_create_service(
                gatt_interface,
                &service_id as *const _ as *mut _,
                SERVICE_HANDLE_COUNT,
            )
        },
        "GATT service creation",
    )
}

fn add_pairing_characteristics(service_handle: u16) -> BleResult<()> {
    let rx_uuid = uuid128(RX_CHAR_UUID)?;
    call_esp_api_with_context(
        || unsafe {
            esp_idf_sys::esp_ble_gatts_add_char(
                service_handle,
                &rx_uuid as *const _ as *mut _,
                esp_idf_sys::ESP_GATT_PERM_WRITE as u16,
                (esp_idf_sys::ESP_GATT_CHAR_PROP_BIT_WRITE
                    | esp_idf_sys::ESP_GATT_CHAR_PROP_BIT_WRITE_NR) as u8,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        },
        "RX characteristic creation",
    )?;

    let tx_uuid = uuid128(TX_CHAR_UUID)?;
    call_esp_api_with_context(
        || unsafe {
            esp_idf_sys::esp_ble_gatts_add_char(
                service_handle,
                &tx_uuid as *const _ as *mut _,
                esp_idf_sys::ESP_GATT_PERM_READ as u16,
                esp_idf_sys::ESP_GATT_CHAR_PROP_BIT_NOTIFY as u8,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        },
        "TX characteristic creation",
    )
}

fn handle_characteristic_added(
    event: &esp_idf_sys::esp_ble_gatts_cb_param_t_gatts_add_char_evt_param,
) {
    let added = unsafe { event.char_uuid.uuid.uuid128 };
    let (Ok(rx), Ok(tx)) = (parse_uuid(RX_CHAR_UUID), parse_uuid(TX_CHAR_UUID)) else {
        return;
    };

    if added == rx {
        info!("📝 RX characteristic handle: {}", event.attr_handle);
        RX_HANDLE.store(event.attr_handle, Ordering::SeqCst);
    } else if added == tx {
        info!("📝 TX characteristic handle: {}", event.attr_handle);
        TX_HANDLE.store(event.attr_handle, Ordering::SeqCst);

        // Client configuration descriptor so the phone can enable notifications
        let mut descriptor_uuid = esp_idf_sys::esp_bt_uuid_t {
            len: esp_idf_sys::ESP_UUID_LEN_16 as u16,
            uuid: esp_idf_sys::esp_bt_uuid_t__bindgen_ty_1 {
                uuid16: CLIENT_CONFIG_DESCRIPTOR_UUID,
            },
        };
        if let Err(e) = call_esp_api_with_context(
            || unsafe {
                esp_idf_sys::esp_ble_gatts_add_char_descr(
                    event.service_handle,
                    &mut descriptor_uuid,
                    (esp_idf_sys::ESP_GATT_PERM_READ | esp_idf_sys::ESP_GATT_PERM_WRITE) as u16,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            },
            "TX notification descriptor creation",
        ) {
            error!("❌ {}", e);
        }
    } else {
        warn!("⚠️ Unexpected characteristic added: handle {}", event.attr_handle);
    }
}

fn configure_advertising() -> BleResult<()> {
    let mut adv_data = esp_idf_sys::esp_ble_adv_data_t {
        set_scan_rsp: false,
        include_name: true, // Include device name (essential for discovery)
        include_txpower: false,
        min_interval: 0x0006,
        max_interval: 0x0010,
        appearance: 0x00,
        manufacturer_len: 0,
        p_manufacturer_data: std::ptr::null_mut(),
        service_data_len: 0,
        p_service_data: std::ptr::null_mut(),
        service_uuid_len: 0,
        p_service_uuid: std::ptr::null_mut(),
        flag: (esp_idf_sys::ESP_BLE_ADV_FLAG_GEN_DISC | esp_idf_sys::ESP_BLE_ADV_FLAG_BREDR_NOT_SPT)
            as u8,
    };
    call_esp_api_with_context(
        || unsafe { esp_idf_sys::esp_ble_gap_config_adv_data(&mut adv_data) },
        "Advertising data configuration",
    )?;

    // 128-bit service UUID does not fit next to the name, so it goes in the scan response
    let mut service_uuid = parse_uuid(PAIRING_SERVICE_UUID)?;
    let mut scan_rsp_data = esp_idf_sys::esp_ble_adv_data_t {
        set_scan_rsp: true,
        include_name: false,
        include_txpower: false,
        min_interval: 0,
        max_interval: 0,
        appearance: 0x00,
        manufacturer_len: 0,
        p_manufacturer_data: std::ptr::null_mut(),
        service_data_len: 0,
        p_service_data: std::ptr::null_mut(),
        service_uuid_len: service_uuid.len() as u16,
        p_service_uuid: service_uuid.as_mut_ptr(),
        flag: 0,
    };
    call_esp_api_with_context(
        || unsafe { esp_idf_sys::esp_ble_gap_config_adv_data(&mut scan_rsp_data) },
        "Scan response data configuration",
    )
}

fn start_advertising() -> BleResult<()> {
    let mut adv_params = esp_idf_sys::esp_ble_adv_params_t {
        adv_int_min: 0x20, // 32 * 0.625ms = 20ms min interval
        adv_int_max: 0x40, // 64 * 0.625ms = 40ms max interval
        adv_type: esp_idf_sys::esp_ble_adv_type_t_ADV_TYPE_IND,
        own_addr_type: esp_idf_sys::esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        peer_addr: [0; 6],
        peer_addr_type: esp_idf_sys::esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
        channel_map: esp_idf_sys::esp_ble_adv_channel_t_ADV_CHNL_ALL,
        adv_filter_policy: esp_idf_sys::esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
    };

    call_esp_api_with_context(
        || unsafe { esp_idf_sys::esp_ble_gap_start_advertising(&mut adv_params) },
        "Advertising start",
    )
}

fn send_ok_response(
    gatt_interface: esp_idf_sys::esp_gatt_if_t,
    conn_id: u16,
    trans_id: u32,
    response: *mut esp_idf_sys::esp_gatt_rsp_t,
) {
    if let Err(e) = call_esp_api_with_context(
        || unsafe {
            esp_idf_sys::esp_ble_gatts_send_response(
                gatt_interface,
                conn_id,
                trans_id,
                esp_idf_sys::esp_gatt_status_t_ESP_GATT_OK,
                response,
            )
        },
        "Write response",
    ) {
        warn!("⚠️ {}", e);
    }
}

fn reset_write_assembler() {
    match WRITE_ASSEMBLER.lock() {
        Ok(mut assembler) => assembler.reset(),
        Err(_) => error!("❌ Write assembler lock poisoned"),
    }
}

// Feed one write into the assembler and hand completed requests to the pairing manager
fn deliver(data: &[u8]) {
    debug!("📨 Pairing write: {} bytes", data.len());
    let messages = match WRITE_ASSEMBLER.lock() {
        Ok(mut assembler) => assembler.push(data),
        Err(_) => {
            error!("❌ Write assembler lock poisoned - dropping write");
            return;
        }
    };

    for message in messages {
        if PAIRING_INBOX.try_send(message).is_err() {
            warn!("⚠️ Pairing inbox full - dropping message");
        }
    }
}

fn handle_write(
    gatt_interface: esp_idf_sys::esp_gatt_if_t,
    param: &esp_idf_sys::esp_ble_gatts_cb_param_t_gatts_write_evt_param,
) {
    if param.handle == RX_HANDLE.load(Ordering::SeqCst) && !param.value.is_null() && param.len > 0 {
        let data = unsafe { std::slice::from_raw_parts(param.value, param.len as usize) };
        deliver(data);
    }

    if param.need_rsp {
        send_ok_response(gatt_interface, param.conn_id, param.trans_id, std::ptr::null_mut());
    }
}

// Handle BLE Long Write - Prepare Write Event
fn handle_prepare_write(
    gatt_interface: esp_idf_sys::esp_gatt_if_t,
    param: &esp_idf_sys::esp_ble_gatts_cb_param_t_gatts_write_evt_param,
) {
    if param.value.is_null() || param.len == 0 || param.len > 512 {
        warn!("❌ PREP WRITE: rejecting chunk of {} bytes", param.len);
        return;
    }

    let chunk = unsafe { std::slice::from_raw_parts(param.value, param.len as usize) };

    let appended = with_prepare_write_buffers(|buffers| {
        let buffer = buffers
            .entry(param.conn_id)
            .or_insert_with(|| PrepareWriteBuffer::new(param.handle));

        if buffer.char_handle != param.handle {
            buffers.remove(&param.conn_id);
            return Err(BleError::InvalidState(
                "Prepare write handle mismatch".to_string(),
            ));
        }

        let result = buffer.append_chunk(param.offset, chunk);
        if result.is_err() {
            buffers.remove(&param.conn_id);
        }
        result
    });

    match appended {
        Some(Ok(())) => {
            // Echo the chunk back; the client will not continue without it
            let mut response = esp_idf_sys::esp_gatt_rsp_t {
                attr_value: esp_idf_sys::esp_gatt_value_t {
                    handle: param.handle,
                    offset: param.offset,
                    len: param.len,
                    value: [0u8; 512],
                    auth_req: 0,
                },
            };
            unsafe {
                std::ptr::copy_nonoverlapping(
                    param.value,
                    response.attr_value.value.as_mut_ptr(),
                    param.len as usize,
                );
            }
            send_ok_response(gatt_interface, param.conn_id, param.trans_id, &mut response);
        }
        Some(Err(e)) => warn!("❌ PREP WRITE: {}", e),
        None => warn!("❌ PREP WRITE: failed to access prepare write buffers"),
    }
}

// Handle BLE Long Write - Execute Write Event
fn handle_execute_write(
    gatt_interface: esp_idf_sys::esp_gatt_if_t,
    param: &esp_idf_sys::esp_ble_gatts_cb_param_t_gatts_exec_write_evt_param,
) {
    let buffer = with_prepare_write_buffers(|buffers| buffers.remove(&param.conn_id)).flatten();

    if param.exec_write_flag as u32 == esp_idf_sys::ESP_GATT_PREP_WRITE_EXEC {
        match buffer {
            Some(buffer) if buffer.char_handle == RX_HANDLE.load(Ordering::SeqCst) => {
                info!("✅ EXEC WRITE: {} bytes reassembled", buffer.data.len());
                deliver(&buffer.data);
            }
            Some(buffer) => debug!("Ignoring long write to handle {}", buffer.char_handle),
            None => warn!("❌ EXEC WRITE: no buffered data for conn_id {}", param.conn_id),
        }
    } else {
        info!("🧹 EXEC WRITE: prepare write cancelled");
    }

    send_ok_response(gatt_interface, param.conn_id, param.trans_id, std::ptr::null_mut());
}

// ESP API wrapper with error context
fn call_esp_api_with_context<F>(f: F, context: &str) -> BleResult<()>
where
    F: FnOnce() -> esp_idf_sys::esp_err_t,
{
    let result = f();
    if result == esp_idf_sys::ESP_OK {
        Ok(())
    } else {
        let error_msg = match result {
            esp_idf_sys::ESP_ERR_INVALID_STATE => {
                format!("{}: Invalid state - BLE stack not ready", context)
            }
            esp_idf_sys::ESP_ERR_INVALID_ARG => format!("{}: Invalid argument", context),
            esp_idf_sys::ESP_ERR_NO_MEM => format!("{}: Out of memory", context),
            esp_idf_sys::ESP_ERR_NOT_FOUND => format!("{}: Resource not found", context),
            esp_idf_sys::ESP_ERR_TIMEOUT => format!("{}: Operation timeout", context),
            _ => format!("{}: Unknown error", context),
        };
        Err(BleError::EspError(result, error_msg))
    }
}

// Parse UUID string to ESP-IDF format (little-endian byte order)
fn parse_uuid(uuid_str: &str) -> BleResult<[u8; 16]> {
    let uuid_clean = uuid_str.replace('-', "");
    if uuid_clean.len() != 32 {
        return Err(BleError::InvalidUuid(uuid_str.to_string()));
    }

    let mut uuid_bytes = [0u8; 16];
    for (i, chunk) in uuid_clean.as_bytes().chunks(2).enumerate() {
        let hex_str =
            std::str::from_utf8(chunk).map_err(|_| BleError::InvalidUuid(uuid_str.to_string()))?;
        uuid_bytes[15 - i] = u8::from_str_radix(hex_str, 16)
            .map_err(|_| BleError::InvalidUuid(uuid_str.to_string()))?;
    }

    Ok(uuid_bytes)
}
