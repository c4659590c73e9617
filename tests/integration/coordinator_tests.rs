//! Integration tests for startup, acquisition and fatal handling in the
//! Task Coordinator.

use futures_lite::future::block_on;

use impedance_node::app::events::AppEvent;
use impedance_node::app::tasks::{self, Shared};
use impedance_node::config::{Config, TimingConfig};
use impedance_node::error::{NodeError, StoreError, SweepError};
use impedance_node::storage::{CONFIG_FILE, CONFIG_KEY, OpKind};
use impedance_node::sweep::ad5933::Command;

use crate::mock_hw::{
    MockAd5933, MockClock, MockFlash, RecordingIndicator, RecordingSink, node_with,
    node_with_datasets, started_node, store,
};

/// Flash already holding `config`.
fn flash_with_config(config: &Config) -> MockFlash {
    let mut s = store(MockFlash::new());
    s.init().unwrap();
    block_on(s.store_config(config)).unwrap();
    s.backend().clone()
}

// ── Startup ───────────────────────────────────────────────────

#[test]
fn first_boot_provisions_device_id_and_persists_config() {
    let mut node = node_with(MockFlash::new());
    let mut sink = RecordingSink::new();
    block_on(node.start([0, 255, 128], &mut sink)).unwrap();

    assert_eq!(&node.config().device_id, b"AZM");
    assert_eq!(node.config().advertised_name().unwrap().as_str(), "EMI_AZM");
    assert!(sink.contains(&AppEvent::Provisioned(*b"AZM")));
    assert!(sink.contains(&AppEvent::Started {
        device_id: *b"AZM",
        num_sweeps: 0,
        num_sent: 0,
    }));
    assert_eq!(node.store().backend().live_records(CONFIG_FILE), 1);
}

#[test]
fn restart_restores_counters_and_identity() {
    let mut node = node_with_datasets(2);
    block_on(node.mark_sent(1, node.epoch())).unwrap();
    let flash = node.store().backend().clone();

    let mut rebooted = node_with(flash);
    let mut sink = RecordingSink::new();
    block_on(rebooted.start([9, 9, 9], &mut sink)).unwrap();

    assert_eq!(&rebooted.config().device_id, b"AZM");
    assert_eq!(rebooted.config().num_sweeps, 2);
    assert_eq!(rebooted.config().num_sent, 1);
    assert_eq!(rebooted.next_unsent(), Some(2));
    assert!(!sink.events().iter().any(|e| matches!(e, AppEvent::Provisioned(_))));
}

#[test]
fn unreadable_config_starts_from_defaults() {
    let mut flash = MockFlash::new();
    flash.inject(CONFIG_FILE, CONFIG_KEY, &[0xFF; 12]);
    let mut node = node_with(flash);
    let mut sink = RecordingSink::new();
    block_on(node.start([0, 0, 0], &mut sink)).unwrap();

    assert_eq!(node.config().num_sweeps, 0);
    assert_eq!(&node.config().device_id, b"AAA");
    // The rewritten record decodes again.
    let reloaded = block_on(node.store_mut().load_config()).unwrap().unwrap();
    assert_eq!(reloaded, *node.config());
}

#[test]
fn out_of_range_counters_reset_but_keep_identity() {
    let flash = flash_with_config(&Config {
        device_id: *b"QRS",
        num_sweeps: 900,
        num_sent: 3,
        ..Config::default()
    });
    let mut node = node_with(flash);
    let mut sink = RecordingSink::new();
    block_on(node.start([0, 0, 0], &mut sink)).unwrap();

    assert_eq!(&node.config().device_id, b"QRS");
    assert_eq!(node.config().num_sweeps, 0);
    assert_eq!(node.config().num_sent, 0);
}

#[test]
fn many_deletions_trigger_startup_reclaim() {
    let flash = flash_with_config(&Config {
        device_id: *b"QRS",
        num_deleted: 11,
        ..Config::default()
    });
    let reclaims_before = flash.count(OpKind::Reclaim);
    let mut node = node_with(flash);
    let mut sink = RecordingSink::new();
    block_on(node.start([0, 0, 0], &mut sink)).unwrap();

    assert!(sink.contains(&AppEvent::Reclaimed { num_deleted: 11 }));
    assert_eq!(node.config().num_deleted, 0);
    assert_eq!(node.store().backend().count(OpKind::Reclaim), reclaims_before + 1);
}

#[test]
fn few_deletions_skip_startup_reclaim() {
    let flash = flash_with_config(&Config {
        device_id: *b"QRS",
        num_deleted: 10,
        ..Config::default()
    });
    let mut node = node_with(flash);
    let mut sink = RecordingSink::new();
    block_on(node.start([0, 0, 0], &mut sink)).unwrap();

    assert_eq!(node.config().num_deleted, 10);
    assert_eq!(node.store().backend().count(OpKind::Reclaim), 0);
}

// ── Acquisition ───────────────────────────────────────────────

#[test]
fn default_sweep_stores_491_points() {
    let mut node = started_node();
    let mut sink = RecordingSink::new();
    assert_eq!(block_on(node.acquire_and_persist(600, &mut sink)), Ok(1));

    let ds = block_on(node.load_dataset(1)).unwrap().unwrap();
    assert_eq!(ds.len(), 491);
    assert_eq!(ds.meta.num_points, 491);
    assert_eq!(ds.meta.time, 600);
    assert_eq!(ds.meta.temperature, 24);
    for (i, f) in ds.freq.iter().enumerate() {
        assert_eq!(*f, 1_000 + 100 * i as u32);
    }
    assert_eq!((ds.real[0], ds.imag[0]), MockAd5933::sample(1, 0));
    assert_eq!((ds.real[490], ds.imag[490]), MockAd5933::sample(1, 490));
    assert!(sink.contains(&AppEvent::SweepSaved {
        id: 1,
        num_points: 491
    }));
}

#[test]
fn front_end_sees_full_command_sequence() {
    let mut node = started_node();
    node.engine_mut().bus_mut().commands.clear();
    block_on(node.acquire_and_persist(1, &mut RecordingSink::new())).unwrap();

    let fe = node.engine_mut().bus_mut();
    let head: Vec<u8> = fe.commands.iter().take(5).copied().collect();
    assert_eq!(
        head,
        vec![
            Command::MeasureTemp as u8,
            Command::Standby as u8,
            Command::Standby as u8,
            Command::InitStartFreq as u8,
            Command::StartSweep as u8,
        ]
    );
    assert_eq!(fe.count(Command::IncrementFreq), 490);
    assert_eq!(fe.commands.last().copied(), Some(Command::PowerDown as u8));
}

#[test]
fn slow_front_end_still_completes() {
    let mut node = started_node();
    node.engine_mut().bus_mut().busy_polls = 3;
    assert_eq!(block_on(node.acquire_and_persist(1, &mut RecordingSink::new())), Ok(1));
    assert_eq!(block_on(node.load_dataset(1)).unwrap().unwrap().len(), 491);
}

#[test]
fn poll_timeout_skips_cycle_and_powers_down() {
    let mut node = started_node();
    let mut sink = RecordingSink::new();
    node.engine_mut().bus_mut().never_ready = true;

    let result = block_on(node.acquire_and_persist(1, &mut sink));
    assert_eq!(result, Err(NodeError::Sweep(SweepError::PollTimeout)));
    assert!(!result.unwrap_err().is_fatal());
    assert!(sink.contains(&AppEvent::SweepFailed(SweepError::PollTimeout)));
    assert_eq!(node.config().num_sweeps, 0);
    assert_eq!(
        node.engine_mut().bus_mut().commands.last().copied(),
        Some(Command::PowerDown as u8)
    );

    // The next cycle is unaffected.
    node.engine_mut().bus_mut().never_ready = false;
    assert_eq!(block_on(node.acquire_and_persist(2, &mut sink)), Ok(1));
}

#[test]
fn storage_full_latches_until_delete_all() {
    // Room for the config record plus one dataset, not two.
    let mut node = node_with(MockFlash::with_capacity(2_000));
    let mut sink = RecordingSink::new();
    block_on(node.start([1, 2, 3], &mut sink)).unwrap();
    assert_eq!(block_on(node.acquire_and_persist(1, &mut sink)), Ok(1));

    let result = block_on(node.acquire_and_persist(2, &mut sink));
    assert_eq!(result, Err(NodeError::Store(StoreError::NoSpace)));
    assert!(node.storage_full());
    assert!(sink.contains(&AppEvent::StorageFull));
    assert_eq!(node.config().num_sweeps, 1);
    assert_eq!(node.store().backend().live_records(2), 0);

    // Periodic cycles skip quietly while full.
    assert_eq!(block_on(node.acquisition_cycle(3, &mut sink)), Ok(None));

    block_on(node.delete_all(&mut sink)).unwrap();
    assert!(!node.storage_full());
    assert_eq!(block_on(node.acquisition_cycle(4, &mut sink)), Ok(Some(1)));
}

#[test]
fn failed_counter_commit_keeps_memory_in_step_with_flash() {
    let mut node = started_node();
    let updates = node.store().backend().count(OpKind::Update);
    node.store_mut().backend_mut().fail_on = Some((OpKind::Update, updates + 1));
    let mut sink = RecordingSink::new();

    assert!(block_on(node.acquire_and_persist(1, &mut sink)).is_err());
    assert_eq!(node.config().num_sweeps, 0);
    assert_eq!(node.next_unsent(), None);
    assert!(!sink.events().iter().any(|e| matches!(e, AppEvent::SweepSaved { .. })));
}

#[test]
fn failed_sent_commit_leaves_num_sent_unchanged() {
    let mut node = node_with_datasets(2);
    let updates = node.store().backend().count(OpKind::Update);
    node.store_mut().backend_mut().fail_on = Some((OpKind::Update, updates + 1));

    assert!(block_on(node.mark_sent(1, node.epoch())).is_err());
    assert_eq!(node.config().num_sent, 0);
    assert_eq!(node.next_unsent(), Some(1));
}

// ── Tasks ─────────────────────────────────────────────────────

#[test]
fn run_acquisition_lights_busy_for_the_cycle() {
    let shared = Shared::new(started_node(), TimingConfig::default());
    let indicator = RecordingIndicator::default();
    let mut sink = RecordingSink::new();

    let id = block_on(tasks::run_acquisition(&shared, &indicator, 42, &mut sink)).unwrap();
    assert_eq!(id, Some(1));
    assert_eq!(*indicator.busy.borrow(), vec![true, false]);
    let ds = block_on(async { shared.node.lock().await.load_dataset(1).await })
        .unwrap()
        .unwrap();
    assert_eq!(ds.meta.time, 42);
}

#[test]
fn flash_failure_halts_acquisition_task() {
    let mut node = started_node();
    node.store_mut().backend_mut().fail_on = Some((OpKind::Write, 2));
    let shared = Shared::new(node, TimingConfig::default());
    let clock = MockClock::new();
    clock.set(90_000);
    let indicator = RecordingIndicator::default();
    let sink = RecordingSink::new();

    // Returns once the task has raised the fatal error.
    block_on(tasks::acquisition_task(&shared, &clock, &indicator, sink.clone()));

    assert!(shared.is_halted());
    let fatal = block_on(shared.wait_fatal());
    assert!(fatal.is_fatal());
    assert!(matches!(fatal, NodeError::Store(StoreError::Fatal(_))));
    let fatals = sink
        .events()
        .iter()
        .filter(|e| matches!(e, AppEvent::Fatal(_)))
        .count();
    assert_eq!(fatals, 1);
    assert!(!indicator.busy.borrow().last().copied().unwrap_or(true));
}

#[test]
fn fatal_is_raised_once() {
    let shared = Shared::new(started_node(), TimingConfig::default());
    let mut sink = RecordingSink::new();
    shared.raise_fatal(NodeError::Init("front end"), &mut sink);
    shared.raise_fatal(NodeError::Store(StoreError::Stalled), &mut sink);

    assert_eq!(sink.events(), vec![AppEvent::Fatal(NodeError::Init("front end"))]);
    assert_eq!(block_on(shared.wait_fatal()), NodeError::Init("front end"));
}

#[test]
fn halted_heartbeat_returns_without_beating() {
    let shared = Shared::new(started_node(), TimingConfig::default());
    shared.raise_fatal(NodeError::Init("front end"), &mut RecordingSink::new());
    let indicator = RecordingIndicator::default();
    let mut beats = 0;
    block_on(tasks::heartbeat_task(&shared, &indicator, || beats += 1));
    assert_eq!(beats, 0);
    assert!(indicator.heartbeat.borrow().is_empty());
}
