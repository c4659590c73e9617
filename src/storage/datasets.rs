//! Dataset and config records on top of the raw store.

use log::{info, warn};

use super::{FileId, FlashOp, RecordKey, RecordStore, QUEUE_DEPTH};
use crate::app::ports::FlashPort;
use crate::config::{Config, MAX_STORED_SWEEPS};
use crate::error::StoreError;
use crate::sweep::{MAX_POINTS, METADATA_LEN, Metadata, SweepDataset};

pub const CONFIG_FILE: FileId = 0x0FFF;
pub const CONFIG_KEY: RecordKey = 0x0001;

pub const FREQ_KEY: RecordKey = 0x0010;
pub const REAL_KEY: RecordKey = 0x0011;
pub const IMAG_KEY: RecordKey = 0x0012;
pub const META_KEY: RecordKey = 0x0013;

/// File id holding dataset `id`. Ids past the storage limit report no space.
pub fn sweep_file(id: u32) -> Result<FileId, StoreError> {
    if id == 0 {
        return Err(StoreError::Corrupt("dataset id 0"));
    }
    if id > MAX_STORED_SWEEPS {
        return Err(StoreError::NoSpace);
    }
    Ok(id as FileId)
}

impl<F: FlashPort> RecordStore<F> {
    // ── Datasets ──────────────────────────────────────────────

    /// Write the four records of dataset `id` and wait for them to land.
    /// On no-space the partial file is removed again.
    pub async fn persist_dataset(&mut self, id: u32, dataset: &SweepDataset) -> Result<(), StoreError> {
        if !dataset.is_consistent() {
            return Err(StoreError::Corrupt("arrays disagree with metadata"));
        }
        let file = sweep_file(id)?;
        self.wait_idle().await?;
        self.take_no_space();

        // Leftovers from an interrupted delete-all would shadow the new records.
        if self.find(file, FREQ_KEY)?.is_some() || self.find(file, META_KEY)?.is_some() {
            warn!("Store: clearing stale records for dataset {}", id);
            self.delete_file(file)?;
            self.wait_idle().await?;
        }

        let freq: Vec<u8> = dataset.freq.iter().flat_map(|f| f.to_le_bytes()).collect();
        let real: Vec<u8> = dataset.real.iter().flat_map(|r| r.to_le_bytes()).collect();
        let imag: Vec<u8> = dataset.imag.iter().flat_map(|i| i.to_le_bytes()).collect();
        let meta = dataset.meta.to_bytes();

        let records: [(RecordKey, &[u8]); 4] = [
            (FREQ_KEY, &freq),
            (REAL_KEY, &real),
            (IMAG_KEY, &imag),
            (META_KEY, &meta),
        ];
        let mut outcome = Ok(());
        for (key, bytes) in records {
            let op = FlashOp::Write {
                file,
                key,
                data: super::pad_to_words(bytes),
            };
            if let Err(e) = self.submit(op).await {
                outcome = Err(e);
                break;
            }
        }
        self.wait_idle().await?;
        if outcome.is_ok() && self.take_no_space() {
            outcome = Err(StoreError::NoSpace);
        }

        if let Err(e) = outcome {
            warn!("Store: dataset {} not saved: {}", id, e);
            if !e.is_fatal() {
                self.delete_file(file)?;
                self.wait_idle().await?;
            }
            return Err(e);
        }
        info!("Store: dataset {} saved ({} points)", id, dataset.len());
        Ok(())
    }

    /// Read dataset `id` back. `Ok(None)` when it does not exist.
    pub async fn load_dataset(&mut self, id: u32) -> Result<Option<SweepDataset>, StoreError> {
        let file = sweep_file(id)?;
        self.wait_idle().await?;

        let Some(meta_desc) = self.find(file, META_KEY)? else {
            return Ok(None);
        };
        let meta = Metadata::from_bytes(&self.read_exact(&meta_desc, METADATA_LEN)?)
            .ok_or(StoreError::Corrupt("metadata"))?;
        if meta.num_points > MAX_POINTS {
            warn!("Store: dataset {} claims {} points", id, meta.num_points);
            return Err(StoreError::Corrupt("point count"));
        }
        let n = meta.num_points as usize;
        let freq_len = n.checked_mul(4).ok_or(StoreError::Corrupt("point count"))?;
        let sample_len = n.checked_mul(2).ok_or(StoreError::Corrupt("point count"))?;

        let freq = self.read_array(file, FREQ_KEY, freq_len)?;
        let real = self.read_array(file, REAL_KEY, sample_len)?;
        let imag = self.read_array(file, IMAG_KEY, sample_len)?;

        let dataset = SweepDataset {
            freq: freq
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            real: real
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect(),
            imag: imag
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect(),
            meta,
        };
        Ok(Some(dataset))
    }

    fn read_array(&self, file: FileId, key: RecordKey, len: usize) -> Result<Vec<u8>, StoreError> {
        let desc = self
            .find(file, key)?
            .ok_or(StoreError::Corrupt("dataset record missing"))?;
        self.read_exact(&desc, len)
    }

    // ── Config ────────────────────────────────────────────────

    /// `Ok(None)` on first run.
    pub async fn load_config(&mut self) -> Result<Option<Config>, StoreError> {
        self.wait_idle().await?;
        let Some(desc) = self.find(CONFIG_FILE, CONFIG_KEY)? else {
            return Ok(None);
        };
        let len = self.backend().record_len(&desc).map_err(StoreError::Fatal)?;
        let bytes = self.read_exact(&desc, len)?;
        Config::from_bytes(&bytes)
            .map(Some)
            .map_err(|_| StoreError::Corrupt("config record"))
    }

    /// Create or update the config record and wait for it to land.
    pub async fn store_config(&mut self, config: &Config) -> Result<(), StoreError> {
        let bytes = config
            .to_bytes()
            .map_err(|_| StoreError::Corrupt("config encoding"))?;
        self.wait_idle().await?;
        self.take_no_space();
        match self.find(CONFIG_FILE, CONFIG_KEY)? {
            Some(desc) => self.update(&desc, &bytes)?,
            None => self.write(CONFIG_FILE, CONFIG_KEY, &bytes)?,
        }
        self.wait_idle().await?;
        if self.take_no_space() {
            return Err(StoreError::NoSpace);
        }
        Ok(())
    }

    // ── Bulk operations ───────────────────────────────────────

    /// Queue a reclamation pass and wait for it.
    pub async fn reclaim_now(&mut self) -> Result<(), StoreError> {
        self.wait_idle().await?;
        self.reclaim()?;
        self.wait_idle().await
    }

    /// Delete every dataset, highest id first, in batches no larger than
    /// the queue depth. Config is persisted after each batch so an
    /// interrupted run leaves ids `1..=num_sweeps` intact. Returns the
    /// number of files deleted.
    pub async fn delete_all(&mut self, config: &mut Config) -> Result<u32, StoreError> {
        self.wait_idle().await?;
        let mut deleted = 0u32;
        while config.num_sweeps > 0 {
            let mut batch = 0;
            while batch < QUEUE_DEPTH && config.num_sweeps > 0 {
                let file = sweep_file(config.num_sweeps)?;
                self.delete_file(file)?;
                config.num_sweeps -= 1;
                config.num_deleted += 1;
                deleted += 1;
                batch += 1;
            }
            self.wait_idle().await?;
            config.num_sent = config.num_sent.min(config.num_sweeps);
            self.store_config(config).await?;
        }
        config.num_sent = 0;
        self.store_config(config).await?;
        self.reclaim_now().await?;
        info!(
            "Store: deleted {} datasets ({} since last reclaim)",
            deleted, config.num_deleted
        );
        Ok(deleted)
    }
}
