//! BLE link adapter.
//!
//! Implements [`LinkPort`], the hexagonal boundary for the wireless
//! transfer protocol, as a Nordic UART service.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via raw `esp_idf_svc::sys` calls.
//! - **all other targets**: simulation with explicit connect/disconnect hooks.
//!
//! ## GATT Service Layout
//!
//! | Characteristic | UUID                                     | Perms        |
//! |----------------|------------------------------------------|--------------|
//! | RX (commands)  | `6e400002-b5a3-f393-e0a9-e50e24dcca9e`   | Write        |
//! | TX (data)      | `6e400003-b5a3-f393-e0a9-e50e24dcca9e`   | Notify       |
//!
//! Command bytes written to RX are queued and drained by the link task
//! through [`LinkPort::take_command`]. Replies go out as TX notifications
//! no larger than the negotiated payload (ATT MTU − 3).

use log::{info, warn};

use crate::app::ports::{LinkError, LinkPort};
use crate::transfer::wireless::payload_for_mtu;

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

pub const SERVICE_UUID: u128 = 0x6e400001_b5a3_f393_e0a9_e50e24dcca9e;
pub const CHAR_RX: u128 = 0x6e400002_b5a3_f393_e0a9_e50e24dcca9e;
pub const CHAR_TX: u128 = 0x6e400003_b5a3_f393_e0a9_e50e24dcca9e;

/// ATT MTU before any exchange.
pub const DEFAULT_MTU: usize = 23;
/// Largest MTU we accept in an exchange.
pub const LOCAL_MTU: u16 = 247;
/// Pending command bytes; further writes are dropped until drained.
const COMMAND_QUEUE: usize = 8;
const MAX_NAME_LEN: usize = crate::config::NAME_LEN;

// ───────────────────────────────────────────────────────────────
// BLE state
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleState {
    Idle,
    Advertising,
    Connected,
    Failed,
}

// ── ESP-IDF BLE static state ──────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. These statics bridge the callback context to the adapter.

#[cfg(target_os = "espidf")]
mod bridge {
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_sync::channel::Channel;
    use esp_idf_svc::sys::*;

    use super::{CHAR_RX, CHAR_TX, COMMAND_QUEUE, DEFAULT_MTU, SERVICE_UUID};

    pub static GATTS_IF: AtomicU32 = AtomicU32::new(0);
    pub static CONN_ID: AtomicU32 = AtomicU32::new(0);
    pub static CONNECTED: AtomicBool = AtomicBool::new(false);
    pub static ADVERTISING: AtomicBool = AtomicBool::new(false);
    /// Both characteristics registered.
    pub static READY: AtomicBool = AtomicBool::new(false);
    pub static MTU: AtomicU32 = AtomicU32::new(DEFAULT_MTU as u32);
    pub static SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
    pub static RX_HANDLE: AtomicU32 = AtomicU32::new(0);
    pub static TX_HANDLE: AtomicU32 = AtomicU32::new(0);
    static CHAR_STEP: AtomicU32 = AtomicU32::new(0);

    /// GATTS write callback → link task.
    pub static COMMANDS: Channel<CriticalSectionRawMutex, u8, COMMAND_QUEUE> = Channel::new();

    fn uuid128_to_esp(uuid: u128) -> esp_bt_uuid_t {
        let mut t: esp_bt_uuid_t = unsafe { core::mem::zeroed() };
        t.len = 16;
        t.uuid.uuid128 = uuid.to_le_bytes();
        t
    }

    unsafe fn add_gatt_char(svc_handle: u16, uuid: u128, perm: u32, prop: u32) {
        let mut char_uuid = uuid128_to_esp(uuid);
        unsafe {
            esp_ble_gatts_add_char(
                svc_handle,
                &mut char_uuid,
                perm as esp_gatt_perm_t,
                prop as esp_gatt_char_prop_t,
                core::ptr::null_mut(),
                core::ptr::null_mut(),
            );
        }
    }

    pub fn adv_params() -> esp_ble_adv_params_t {
        esp_ble_adv_params_t {
            adv_int_min: 0x20,
            adv_int_max: 0x40,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            ..unsafe { core::mem::zeroed() }
        }
    }

    pub unsafe extern "C" fn gap_event_handler(
        event: esp_gap_ble_cb_event_t,
        param: *mut esp_ble_gap_cb_param_t,
    ) {
        match event {
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
                let ok = unsafe { (*param).adv_start_cmpl.status } == esp_bt_status_t_ESP_BT_STATUS_SUCCESS;
                ADVERTISING.store(ok, Ordering::Relaxed);
                if ok {
                    log::info!("BLE GAP: advertising started");
                } else {
                    log::warn!("BLE GAP: advertising start failed");
                }
            }
            esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_STOP_COMPLETE_EVT => {
                ADVERTISING.store(false, Ordering::Relaxed);
                log::info!("BLE GAP: advertising stopped");
            }
            _ => {}
        }
    }

    pub unsafe extern "C" fn gatts_event_handler(
        event: esp_gatts_cb_event_t,
        gatts_if: esp_gatt_if_t,
        param: *mut esp_ble_gatts_cb_param_t,
    ) {
        match event {
            esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
                GATTS_IF.store(gatts_if as u32, Ordering::Relaxed);
                log::info!("BLE GATTS: app registered (if={})", gatts_if);
                let mut svc_id = esp_gatt_srvc_id_t {
                    id: esp_gatt_id_t {
                        uuid: uuid128_to_esp(SERVICE_UUID),
                        inst_id: 0,
                    },
                    is_primary: true,
                };
                unsafe { esp_ble_gatts_create_service(gatts_if, &mut svc_id, 8) };
            }
            esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
                let svc_handle = unsafe { (*param).create.service_handle };
                SVC_HANDLE.store(svc_handle as u32, Ordering::Relaxed);
                log::info!("BLE GATTS: service created (handle={})", svc_handle);
                unsafe { esp_ble_gatts_start_service(svc_handle) };
                CHAR_STEP.store(1, Ordering::Relaxed);
                unsafe {
                    add_gatt_char(
                        svc_handle,
                        CHAR_RX,
                        ESP_GATT_PERM_WRITE,
                        ESP_GATT_CHAR_PROP_BIT_WRITE | ESP_GATT_CHAR_PROP_BIT_WRITE_NR,
                    )
                };
            }
            esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
                let handle = unsafe { (*param).add_char.attr_handle };
                let svc_handle = SVC_HANDLE.load(Ordering::Relaxed) as u16;
                match CHAR_STEP.load(Ordering::Relaxed) {
                    1 => {
                        RX_HANDLE.store(handle as u32, Ordering::Relaxed);
                        CHAR_STEP.store(2, Ordering::Relaxed);
                        unsafe {
                            add_gatt_char(
                                svc_handle,
                                CHAR_TX,
                                ESP_GATT_PERM_READ,
                                ESP_GATT_CHAR_PROP_BIT_NOTIFY,
                            )
                        };
                    }
                    2 => {
                        TX_HANDLE.store(handle as u32, Ordering::Relaxed);
                        CHAR_STEP.store(3, Ordering::Relaxed);
                        READY.store(true, Ordering::Release);
                        log::info!("BLE GATTS: RX/TX registered");
                    }
                    _ => {}
                }
            }
            esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
                let conn_id = unsafe { (*param).connect.conn_id };
                CONN_ID.store(conn_id as u32, Ordering::Relaxed);
                CONNECTED.store(true, Ordering::Release);
                ADVERTISING.store(false, Ordering::Relaxed);
                log::info!("BLE GATTS: client connected (conn_id={})", conn_id);
            }
            esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
                CONNECTED.store(false, Ordering::Release);
                MTU.store(DEFAULT_MTU as u32, Ordering::Relaxed);
                COMMANDS.clear();
                log::info!("BLE GATTS: client disconnected");
            }
            esp_gatts_cb_event_t_ESP_GATTS_MTU_EVT => {
                let mtu = unsafe { (*param).mtu.mtu };
                MTU.store(mtu as u32, Ordering::Relaxed);
                log::info!("BLE GATTS: MTU {}", mtu);
            }
            esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
                let p = unsafe { &(*param).write };
                if p.handle as u32 != RX_HANDLE.load(Ordering::Relaxed) {
                    return;
                }
                let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) };
                for &b in data {
                    if COMMANDS.try_send(b).is_err() {
                        log::warn!("BLE GATTS: command queue full, dropped {:#04x}", b);
                    }
                }
            }
            _ => {}
        }
    }
}

// ───────────────────────────────────────────────────────────────
// BLE adapter
// ───────────────────────────────────────────────────────────────

pub struct BleAdapter {
    state: BleState,
    device_name: heapless::String<MAX_NAME_LEN>,
    #[cfg(not(target_os = "espidf"))]
    sim: Sim,
}

/// Host-side stand-in for the radio.
#[cfg(not(target_os = "espidf"))]
#[derive(Default)]
struct Sim {
    connected: bool,
    advertising: bool,
    mtu: usize,
    commands: heapless::Deque<u8, COMMAND_QUEUE>,
    notifications: Vec<Vec<u8>>,
    adverts: u32,
    fail_notify: bool,
    fail_nth_notify: Option<usize>,
}

impl Default for BleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl BleAdapter {
    pub fn new() -> Self {
        Self {
            state: BleState::Idle,
            device_name: heapless::String::new(),
            #[cfg(not(target_os = "espidf"))]
            sim: Sim {
                mtu: DEFAULT_MTU,
                ..Sim::default()
            },
        }
    }

    pub fn state(&self) -> BleState {
        self.state
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Bring up the controller and register the service. Registration
    /// completes asynchronously; poll [`LinkPort::is_ready`].
    pub fn start(&mut self) -> Result<(), LinkError> {
        match self.platform_start() {
            Ok(()) => {
                info!("BLE: stack started");
                Ok(())
            }
            Err(e) => {
                self.state = BleState::Failed;
                Err(e)
            }
        }
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self) -> Result<(), LinkError> {
        use esp_idf_svc::sys::*;
        let check = |ret: i32, what: &str| {
            if ret != ESP_OK as i32 {
                log::error!("BLE: {} failed ({})", what, ret);
                Err(LinkError::Stack(ret))
            } else {
                Ok(())
            }
        };
        unsafe {
            // BLE-only; release classic BT memory.
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            check(esp_bt_controller_init(&mut bt_cfg), "bt_controller_init")?;
            check(
                esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE),
                "bt_controller_enable",
            )?;
            check(esp_bluedroid_init(), "bluedroid_init")?;
            check(esp_bluedroid_enable(), "bluedroid_enable")?;

            check(
                esp_ble_gap_register_callback(Some(bridge::gap_event_handler)),
                "gap_register_callback",
            )?;
            check(
                esp_ble_gatts_register_callback(Some(bridge::gatts_event_handler)),
                "gatts_register_callback",
            )?;
            check(esp_ble_gatts_app_register(0), "gatts_app_register")?;
            check(esp_ble_gatt_set_local_mtu(LOCAL_MTU), "set_local_mtu")?;
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self) -> Result<(), LinkError> {
        info!("BLE(sim): service {:032x} registered", SERVICE_UUID);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_set_name(&mut self) -> Result<(), LinkError> {
        use esp_idf_svc::sys::*;
        let mut cname = [0u8; MAX_NAME_LEN + 1];
        cname[..self.device_name.len()].copy_from_slice(self.device_name.as_bytes());
        let ret = unsafe { esp_ble_gap_set_device_name(cname.as_ptr().cast()) };
        if ret != ESP_OK as i32 {
            return Err(LinkError::Stack(ret));
        }
        let mut adv_data: esp_ble_adv_data_t = unsafe { core::mem::zeroed() };
        adv_data.set_scan_rsp = false;
        adv_data.include_name = true;
        adv_data.flag = (ESP_BLE_ADV_FLAG_GEN_DISC | ESP_BLE_ADV_FLAG_BREDR_NOT_SPT) as u8;
        let ret = unsafe { esp_ble_gap_config_adv_data(&mut adv_data) };
        if ret != ESP_OK as i32 {
            return Err(LinkError::Stack(ret));
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_set_name(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    // ── Simulation hooks ──────────────────────────────────────

    /// A central connects and negotiates `mtu`.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_connect(&mut self, mtu: usize) {
        self.sim.connected = true;
        self.sim.advertising = false;
        self.sim.mtu = mtu;
        self.state = BleState::Connected;
        info!("BLE(sim): central connected (MTU {})", mtu);
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn sim_disconnect(&mut self) {
        self.sim.connected = false;
        self.sim.mtu = DEFAULT_MTU;
        self.sim.commands.clear();
        self.state = BleState::Idle;
        info!("BLE(sim): central disconnected");
    }

    /// The central writes one command byte to RX.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_push_command(&mut self, byte: u8) {
        if self.sim.commands.push_back(byte).is_err() {
            warn!("BLE(sim): command queue full, dropped {:#04x}", byte);
        }
    }

    /// Drain the notifications sent so far.
    #[cfg(not(target_os = "espidf"))]
    pub fn take_notifications(&mut self) -> Vec<Vec<u8>> {
        core::mem::take(&mut self.sim.notifications)
    }

    /// Advertising starts requested so far.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_adverts(&self) -> u32 {
        self.sim.adverts
    }

    /// Make every subsequent notify fail as if the stack rejected it.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_fail_notify(&mut self, fail: bool) {
        self.sim.fail_notify = fail;
    }

    /// Reject only the `n`th notify from now (1-based), once.
    #[cfg(not(target_os = "espidf"))]
    pub fn sim_fail_nth_notify(&mut self, n: usize) {
        self.sim.fail_nth_notify = Some(n);
    }
}

// ───────────────────────────────────────────────────────────────
// LinkPort implementation
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
impl LinkPort for BleAdapter {
    fn is_ready(&self) -> bool {
        bridge::READY.load(core::sync::atomic::Ordering::Acquire)
    }

    fn is_connected(&self) -> bool {
        bridge::CONNECTED.load(core::sync::atomic::Ordering::Acquire)
    }

    fn max_payload(&self) -> usize {
        payload_for_mtu(bridge::MTU.load(core::sync::atomic::Ordering::Relaxed) as usize)
    }

    fn take_command(&mut self) -> Option<u8> {
        bridge::COMMANDS.try_receive().ok()
    }

    fn notify(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        use core::sync::atomic::Ordering;
        use esp_idf_svc::sys::*;
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        if payload.len() > self.max_payload() {
            return Err(LinkError::PayloadTooLarge);
        }
        let ret = unsafe {
            esp_ble_gatts_send_indicate(
                bridge::GATTS_IF.load(Ordering::Relaxed) as esp_gatt_if_t,
                bridge::CONN_ID.load(Ordering::Relaxed) as u16,
                bridge::TX_HANDLE.load(Ordering::Relaxed) as u16,
                payload.len() as u16,
                payload.as_ptr() as *mut u8,
                false,
            )
        };
        if ret != ESP_OK as i32 {
            return Err(LinkError::Stack(ret));
        }
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), LinkError> {
        let mut params = bridge::adv_params();
        let ret = unsafe { esp_idf_svc::sys::esp_ble_gap_start_advertising(&mut params) };
        if ret != esp_idf_svc::sys::ESP_OK as i32 {
            warn!("BLE: start advertising failed ({})", ret);
            return Err(LinkError::Stack(ret));
        }
        self.state = BleState::Advertising;
        info!("BLE: advertising as '{}'", self.device_name);
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        bridge::ADVERTISING.load(core::sync::atomic::Ordering::Relaxed)
    }

    fn set_device_name(&mut self, name: &str) -> Result<(), LinkError> {
        self.device_name.clear();
        self.device_name
            .push_str(name)
            .map_err(|_| LinkError::PayloadTooLarge)?;
        self.platform_set_name()
    }
}

#[cfg(not(target_os = "espidf"))]
impl LinkPort for BleAdapter {
    fn is_ready(&self) -> bool {
        self.state != BleState::Failed
    }

    fn is_connected(&self) -> bool {
        self.sim.connected
    }

    fn max_payload(&self) -> usize {
        payload_for_mtu(self.sim.mtu)
    }

    fn take_command(&mut self) -> Option<u8> {
        self.sim.commands.pop_front()
    }

    fn notify(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if !self.sim.connected {
            return Err(LinkError::NotConnected);
        }
        if payload.len() > self.max_payload() {
            return Err(LinkError::PayloadTooLarge);
        }
        if self.sim.fail_notify {
            return Err(LinkError::Stack(-1));
        }
        if let Some(n) = self.sim.fail_nth_notify {
            if n <= 1 {
                self.sim.fail_nth_notify = None;
                return Err(LinkError::Stack(-1));
            }
            self.sim.fail_nth_notify = Some(n - 1);
        }
        self.sim.notifications.push(payload.to_vec());
        Ok(())
    }

    fn start_advertising(&mut self) -> Result<(), LinkError> {
        self.sim.advertising = true;
        self.sim.adverts += 1;
        self.state = BleState::Advertising;
        info!("BLE(sim): advertising '{}'", self.device_name);
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.sim.advertising
    }

    fn set_device_name(&mut self, name: &str) -> Result<(), LinkError> {
        self.device_name.clear();
        self.device_name
            .push_str(name)
            .map_err(|_| LinkError::PayloadTooLarge)?;
        self.platform_set_name()
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
