//! Flash adapter — implements [`FlashPort`].
//!
//! On ESP32 each store file id maps to its own NVS namespace (`f0fff`,
//! `f0001`, ...) and each record key to a blob key (`k0010`). NVS commits
//! are atomic per blob and compact internally, so reclamation is a no-op
//! there.
//!
//! The simulation backend is a real log: updates and deletes leave dead
//! records behind that consume space until [`FlashOp::Reclaim`] compacts
//! them. Tests size it small to exercise the no-space path.

use log::{debug, info};

use crate::app::ports::{FlashError, FlashPort};
use crate::storage::{FileId, FlashOp, RecordDesc, RecordKey};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::warn;

/// Default simulated partition: 128 KiB.
#[cfg(not(target_os = "espidf"))]
const SIM_CAPACITY_WORDS: u32 = 32 * 1024;

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone)]
struct SimRecord {
    file: FileId,
    key: RecordKey,
    record_id: u32,
    data: Vec<u8>,
    live: bool,
}

#[cfg(not(target_os = "espidf"))]
impl SimRecord {
    fn words(&self) -> u32 {
        self.data.len().div_ceil(crate::storage::WORD_BYTES) as u32
            + crate::storage::RECORD_HEADER_WORDS
    }
}

pub struct FlashAdapter {
    initialized: bool,
    #[cfg(not(target_os = "espidf"))]
    log: Vec<SimRecord>,
    #[cfg(not(target_os = "espidf"))]
    capacity_words: u32,
    #[cfg(not(target_os = "espidf"))]
    next_record_id: u32,
}

impl FlashAdapter {
    pub fn new() -> Self {
        Self {
            initialized: false,
            #[cfg(not(target_os = "espidf"))]
            log: Vec::new(),
            #[cfg(not(target_os = "espidf"))]
            capacity_words: SIM_CAPACITY_WORDS,
            #[cfg(not(target_os = "espidf"))]
            next_record_id: 1,
        }
    }

    /// Simulation backend with a custom partition size.
    #[cfg(not(target_os = "espidf"))]
    pub fn with_capacity_words(capacity_words: u32) -> Self {
        Self {
            capacity_words,
            ..Self::new()
        }
    }

    /// Words held by records that were updated or deleted but not reclaimed.
    #[cfg(not(target_os = "espidf"))]
    pub fn dead_words(&self) -> u32 {
        self.log.iter().filter(|r| !r.live).map(SimRecord::words).sum()
    }

    #[cfg(not(target_os = "espidf"))]
    fn used_words(&self) -> u32 {
        self.log.iter().map(SimRecord::words).sum()
    }

    #[cfg(not(target_os = "espidf"))]
    fn live(&self, file: FileId, key: RecordKey) -> Option<&SimRecord> {
        self.log
            .iter()
            .rev()
            .find(|r| r.live && r.file == file && r.key == key)
    }

    #[cfg(not(target_os = "espidf"))]
    fn append(&mut self, file: FileId, key: RecordKey, data: &[u8]) -> Result<(), FlashError> {
        let words = data.len().div_ceil(crate::storage::WORD_BYTES) as u32
            + crate::storage::RECORD_HEADER_WORDS;
        if self.used_words() + words > self.capacity_words {
            return Err(FlashError::NoSpace);
        }
        self.log.push(SimRecord {
            file,
            key,
            record_id: self.next_record_id,
            data: data.to_vec(),
            live: true,
        });
        self.next_record_id += 1;
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn kill(&mut self, desc: &RecordDesc) -> Result<(), FlashError> {
        let record = self
            .log
            .iter_mut()
            .find(|r| r.live && r.record_id == desc.record_id())
            .ok_or(FlashError::NotFound)?;
        record.live = false;
        Ok(())
    }

    fn check_init(&self) -> Result<(), FlashError> {
        if self.initialized {
            Ok(())
        } else {
            Err(FlashError::NotInitialized)
        }
    }
}

impl Default for FlashAdapter {
    fn default() -> Self {
        Self::new()
    }
}

// ── NVS helpers (ESP32) ───────────────────────────────────────

#[cfg(target_os = "espidf")]
fn namespace_name(file: FileId) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let name = format!("f{:04x}", file);
    buf[..name.len()].copy_from_slice(name.as_bytes());
    buf
}

#[cfg(target_os = "espidf")]
fn key_name(key: RecordKey) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let name = format!("k{:04x}", key);
    buf[..name.len()].copy_from_slice(name.as_bytes());
    buf
}

#[cfg(target_os = "espidf")]
fn map_nvs(ret: esp_err_t) -> FlashError {
    match ret {
        ESP_ERR_NVS_NOT_FOUND => FlashError::NotFound,
        ESP_ERR_NVS_NOT_ENOUGH_SPACE | ESP_ERR_NVS_NO_FREE_PAGES => FlashError::NoSpace,
        other => FlashError::Io(other),
    }
}

/// Open the namespace for `file`, run `f` with the handle, then close.
#[cfg(target_os = "espidf")]
fn with_nvs_handle<F, T>(file: FileId, write: bool, f: F) -> Result<T, FlashError>
where
    F: FnOnce(nvs_handle_t) -> Result<T, esp_err_t>,
{
    let ns = namespace_name(file);
    let mode = if write {
        nvs_open_mode_t_NVS_READWRITE
    } else {
        nvs_open_mode_t_NVS_READONLY
    };
    let mut handle: nvs_handle_t = 0;
    // SAFETY: `ns` is NUL-terminated and outlives the call.
    let ret = unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) };
    if ret != ESP_OK {
        return Err(map_nvs(ret));
    }
    let result = f(handle);
    // SAFETY: handle came from a successful nvs_open.
    unsafe { nvs_close(handle) };
    result.map_err(map_nvs)
}

#[cfg(target_os = "espidf")]
fn blob_len(file: FileId, key: RecordKey) -> Result<usize, FlashError> {
    with_nvs_handle(file, false, |handle| {
        let k = key_name(key);
        let mut size: usize = 0;
        // SAFETY: null output buffer asks NVS for the size only.
        let ret = unsafe {
            nvs_get_blob(handle, k.as_ptr() as *const _, core::ptr::null_mut(), &mut size)
        };
        if ret != ESP_OK {
            return Err(ret);
        }
        Ok(size)
    })
}

// ── FlashPort ─────────────────────────────────────────────────

impl FlashPort for FlashAdapter {
    fn init(&mut self) -> Result<(), FlashError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any NVS access.
            let mut ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("FlashAdapter: erasing and re-initialising NVS partition");
                // SAFETY: as above.
                let erased = unsafe { nvs_flash_erase() };
                if erased != ESP_OK {
                    return Err(FlashError::Io(erased));
                }
                // SAFETY: as above.
                ret = unsafe { nvs_flash_init() };
            }
            if ret != ESP_OK {
                return Err(FlashError::Io(ret));
            }
            info!("FlashAdapter: NVS mounted");
        }

        #[cfg(not(target_os = "espidf"))]
        info!(
            "FlashAdapter: simulation backend, {} words",
            self.capacity_words
        );

        self.initialized = true;
        Ok(())
    }

    fn find(&self, file: FileId, key: RecordKey) -> Result<Option<RecordDesc>, FlashError> {
        self.check_init()?;

        #[cfg(not(target_os = "espidf"))]
        {
            Ok(self
                .live(file, key)
                .map(|r| RecordDesc::new(file, key, r.record_id)))
        }

        #[cfg(target_os = "espidf")]
        {
            match blob_len(file, key) {
                Ok(_) => Ok(Some(RecordDesc::new(file, key, 0))),
                Err(FlashError::NotFound) => Ok(None),
                Err(e) => Err(e),
            }
        }
    }

    fn record_len(&self, desc: &RecordDesc) -> Result<usize, FlashError> {
        self.check_init()?;

        #[cfg(not(target_os = "espidf"))]
        {
            self.log
                .iter()
                .find(|r| r.live && r.record_id == desc.record_id())
                .map(|r| r.data.len())
                .ok_or(FlashError::NotFound)
        }

        #[cfg(target_os = "espidf")]
        {
            blob_len(desc.file(), desc.key())
        }
    }

    fn read(&self, desc: &RecordDesc, buf: &mut [u8]) -> Result<usize, FlashError> {
        self.check_init()?;

        #[cfg(not(target_os = "espidf"))]
        {
            let record = self
                .log
                .iter()
                .find(|r| r.live && r.record_id == desc.record_id())
                .ok_or(FlashError::NotFound)?;
            let len = record.data.len().min(buf.len());
            buf[..len].copy_from_slice(&record.data[..len]);
            Ok(len)
        }

        #[cfg(target_os = "espidf")]
        {
            with_nvs_handle(desc.file(), false, |handle| {
                let k = key_name(desc.key());
                let mut size = buf.len();
                // SAFETY: `buf` is valid for `size` bytes.
                let ret = unsafe {
                    nvs_get_blob(
                        handle,
                        k.as_ptr() as *const _,
                        buf.as_mut_ptr() as *mut _,
                        &mut size,
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(size)
            })
        }
    }

    fn free_words(&self) -> u32 {
        #[cfg(not(target_os = "espidf"))]
        {
            self.capacity_words.saturating_sub(self.used_words())
        }

        #[cfg(target_os = "espidf")]
        {
            let mut stats: nvs_stats_t = Default::default();
            // SAFETY: null partition name selects the default NVS partition.
            let ret = unsafe { nvs_get_stats(core::ptr::null(), &mut stats) };
            if ret != ESP_OK {
                return 0;
            }
            // One NVS entry is 32 bytes.
            (stats.free_entries * 8) as u32
        }
    }

    fn execute(&mut self, op: &FlashOp) -> Result<(), FlashError> {
        self.check_init()?;
        debug!("FlashAdapter: {:?}", op.kind());

        #[cfg(not(target_os = "espidf"))]
        {
            match op {
                FlashOp::Write { file, key, data } => self.append(*file, *key, data),
                FlashOp::Update { desc, data } => {
                    // New copy first so a full partition leaves the old one live.
                    self.append(desc.file(), desc.key(), data)?;
                    self.kill(desc)
                }
                FlashOp::DeleteRecord { desc } => self.kill(desc),
                FlashOp::DeleteFile { file } => {
                    for r in self.log.iter_mut().filter(|r| r.file == *file) {
                        r.live = false;
                    }
                    Ok(())
                }
                FlashOp::Reclaim => {
                    let before = self.used_words();
                    self.log.retain(|r| r.live);
                    info!(
                        "FlashAdapter: reclaimed {} words",
                        before - self.used_words()
                    );
                    Ok(())
                }
            }
        }

        #[cfg(target_os = "espidf")]
        {
            match op {
                FlashOp::Write { file, key, data } => set_blob(*file, *key, data),
                FlashOp::Update { desc, data } => set_blob(desc.file(), desc.key(), data),
                FlashOp::DeleteRecord { desc } => with_nvs_handle(desc.file(), true, |handle| {
                    let k = key_name(desc.key());
                    // SAFETY: `k` is NUL-terminated.
                    let ret = unsafe { nvs_erase_key(handle, k.as_ptr() as *const _) };
                    if ret != ESP_OK {
                        return Err(ret);
                    }
                    // SAFETY: valid open handle.
                    let ret = unsafe { nvs_commit(handle) };
                    if ret != ESP_OK { Err(ret) } else { Ok(()) }
                }),
                FlashOp::DeleteFile { file } => with_nvs_handle(*file, true, |handle| {
                    // SAFETY: valid open handle.
                    let ret = unsafe { nvs_erase_all(handle) };
                    if ret != ESP_OK {
                        return Err(ret);
                    }
                    // SAFETY: valid open handle.
                    let ret = unsafe { nvs_commit(handle) };
                    if ret != ESP_OK { Err(ret) } else { Ok(()) }
                }),
                FlashOp::Reclaim => {
                    debug!("FlashAdapter: NVS compacts on its own");
                    Ok(())
                }
            }
        }
    }
}

#[cfg(target_os = "espidf")]
fn set_blob(file: FileId, key: RecordKey, data: &[u8]) -> Result<(), FlashError> {
    with_nvs_handle(file, true, |handle| {
        let k = key_name(key);
        // SAFETY: `data` is valid for `data.len()` bytes.
        let ret = unsafe {
            nvs_set_blob(
                handle,
                k.as_ptr() as *const _,
                data.as_ptr() as *const _,
                data.len(),
            )
        };
        if ret != ESP_OK {
            return Err(ret);
        }
        // SAFETY: valid open handle.
        let ret = unsafe { nvs_commit(handle) };
        if ret != ESP_OK { Err(ret) } else { Ok(()) }
    })
}
