//! Node — the Task Coordinator core.
//!
//! Owns the sweep engine, the record store and the live [`Config`]. Every
//! multi-step sequence that touches the store or the front end runs as
//! one `&mut self` method, so whoever holds the node (through the shared
//! mutex in [`super::tasks`]) has exclusive use of both for the whole
//! sequence.
//!
//! ```text
//!   acquire_and_persist:
//!     wait store idle ─▶ sweep ─▶ persist id N+1 ─▶ num_sweeps = N+1 ─▶ save config
//! ```

use embedded_hal::i2c::I2c;
use log::{error, info, warn};

use super::events::AppEvent;
use super::ports::{EventSink, FlashPort};
use crate::config::{Config, RECLAIM_THRESHOLD, device_id_from_entropy, validate_config};
use crate::error::{NodeError, Result, StoreError};
use crate::storage::RecordStore;
use crate::sweep::{SweepDataset, SweepEngine, SweepParameters};

pub struct Node<I, F> {
    engine: SweepEngine<I>,
    store: RecordStore<F>,
    config: Config,
    /// Bumped by every delete-all; transfers staged earlier are stale.
    epoch: u32,
    /// Latched on no-space; cleared by a successful delete-all.
    storage_full: bool,
}

impl<I: I2c, F: FlashPort> Node<I, F> {
    pub fn new(engine: SweepEngine<I>, store: RecordStore<F>) -> Self {
        Self {
            engine,
            store,
            config: Config::default(),
            epoch: 0,
            storage_full: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn storage_full(&self) -> bool {
        self.storage_full
    }

    pub fn store(&self) -> &RecordStore<F> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RecordStore<F> {
        &mut self.store
    }

    pub fn engine_mut(&mut self) -> &mut SweepEngine<I> {
        &mut self.engine
    }

    // ── Startup ───────────────────────────────────────────────

    /// Bring up the store and front end, then load or create the config.
    /// `entropy` seeds the device id on first boot. Any error here is fatal.
    pub async fn start<S: EventSink>(&mut self, entropy: [u8; 3], sink: &mut S) -> Result<()> {
        self.store.init().map_err(|e| {
            error!("Node: store init failed: {}", e);
            NodeError::Init("record store")
        })?;
        self.engine.reset().map_err(|e| {
            error!("Node: front-end reset failed: {}", e);
            NodeError::Init("front end")
        })?;

        let mut config = match self.store.load_config().await {
            Ok(Some(config)) => config,
            Ok(None) => {
                info!("Node: no config record, first run");
                Config::default()
            }
            Err(StoreError::Corrupt(what)) => {
                warn!("Node: {} unreadable, starting from defaults", what);
                Config::default()
            }
            Err(e) => return Err(e.into()),
        };

        config.sweep = SweepParameters::default();
        if !config.is_provisioned() {
            config.device_id = device_id_from_entropy(entropy);
            sink.emit(&AppEvent::Provisioned(config.device_id));
        }
        config.num_sent = config.num_sent.min(config.num_sweeps);
        if let Err(e) = validate_config(&config) {
            warn!("Node: restored config rejected ({}), counters reset", e);
            config = Config {
                device_id: config.device_id,
                ..Config::default()
            };
        }

        match self.store.store_config(&config).await {
            Err(StoreError::NoSpace) => {
                warn!("Node: no space for config, reclaiming first");
                self.store.reclaim_now().await?;
                self.store.store_config(&config).await?;
            }
            other => other?,
        }

        if config.num_deleted > RECLAIM_THRESHOLD {
            info!("Node: {} deletions pending reclaim", config.num_deleted);
            self.store.reclaim_now().await?;
            sink.emit(&AppEvent::Reclaimed {
                num_deleted: config.num_deleted,
            });
            config.num_deleted = 0;
            self.store.store_config(&config).await?;
        }

        self.config = config;
        sink.emit(&AppEvent::Started {
            device_id: config.device_id,
            num_sweeps: config.num_sweeps,
            num_sent: config.num_sent,
        });
        Ok(())
    }

    // ── Acquisition ───────────────────────────────────────────

    /// Run one sweep with the active parameters, stamped with `now_secs`.
    pub async fn acquire(&mut self, now_secs: u32) -> Result<SweepDataset> {
        self.store.wait_idle().await?;
        let params = self.config.sweep;
        let mut dataset = self.engine.run(&params).await?;
        dataset.meta.time = now_secs;
        Ok(dataset)
    }

    /// Sweep, persist as dataset `num_sweeps + 1`, then commit the counter.
    /// Returns the new id.
    pub async fn acquire_and_persist<S: EventSink>(&mut self, now_secs: u32, sink: &mut S) -> Result<u32> {
        if self.storage_full {
            sink.emit(&AppEvent::StorageFull);
            return Err(StoreError::NoSpace.into());
        }
        let dataset = match self.acquire(now_secs).await {
            Ok(dataset) => dataset,
            Err(NodeError::Sweep(e)) => {
                sink.emit(&AppEvent::SweepFailed(e));
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };

        let id = self.config.num_sweeps + 1;
        if let Err(e) = self.store.persist_dataset(id, &dataset).await {
            if e == StoreError::NoSpace {
                self.storage_full = true;
                sink.emit(&AppEvent::StorageFull);
            }
            return Err(e.into());
        }

        // Counters only move once the record holding them has landed.
        let mut next = self.config;
        next.num_sweeps = id;
        if let Err(e) = self.store.store_config(&next).await {
            if e == StoreError::NoSpace {
                self.storage_full = true;
                sink.emit(&AppEvent::StorageFull);
            }
            return Err(e.into());
        }
        self.config = next;
        sink.emit(&AppEvent::SweepSaved {
            id,
            num_points: dataset.meta.num_points,
        });
        Ok(id)
    }

    /// One periodic cycle. `Ok(None)` when skipped because storage is full.
    pub async fn acquisition_cycle<S: EventSink>(&mut self, now_secs: u32, sink: &mut S) -> Result<Option<u32>> {
        if self.storage_full {
            return Ok(None);
        }
        self.acquire_and_persist(now_secs, sink).await.map(Some)
    }

    // ── Transfer support ──────────────────────────────────────

    /// `Ok(None)` for ids outside `1..=num_sweeps` or missing records.
    pub async fn load_dataset(&mut self, id: u32) -> Result<Option<SweepDataset>> {
        if id == 0 || id > self.config.num_sweeps {
            return Ok(None);
        }
        Ok(self.store.load_dataset(id).await?)
    }

    /// Oldest dataset not yet sent over the wireless link.
    pub fn next_unsent(&self) -> Option<u32> {
        self.config.has_unsent().then(|| self.config.num_sent + 1)
    }

    /// Record that dataset `id` went out. Refused (`Ok(false)`) unless it
    /// is exactly the next unsent id and no delete-all ran since staging.
    pub async fn mark_sent(&mut self, id: u32, epoch: u32) -> Result<bool> {
        if epoch != self.epoch || self.next_unsent() != Some(id) {
            warn!(
                "Node: stale transfer of {} (epoch {} vs {}, next {:?})",
                id,
                epoch,
                self.epoch,
                self.next_unsent()
            );
            return Ok(false);
        }
        let mut next = self.config;
        next.num_sent = id;
        self.store.store_config(&next).await?;
        self.config = next;
        Ok(true)
    }

    /// Delete every dataset and reclaim. Counters reflect partial progress
    /// even when an error interrupts the run.
    pub async fn delete_all<S: EventSink>(&mut self, sink: &mut S) -> Result<u32> {
        self.epoch = self.epoch.wrapping_add(1);
        let mut config = self.config;
        let result = self.store.delete_all(&mut config).await;
        self.config = config;
        let deleted = result?;
        self.storage_full = false;
        sink.emit(&AppEvent::DeletedAll { deleted });
        Ok(deleted)
    }
}
