//! Integration tests for the record store: queue accounting under
//! latency, bulk deletion and crash-consistency of the counters.

use futures_lite::future::block_on;

use impedance_node::app::events::AppEvent;
use impedance_node::config::Config;
use impedance_node::error::{NodeError, StoreError};
use impedance_node::storage::{FREQ_KEY, FlashOp, META_KEY, OpKind, QUEUE_DEPTH, RecordStore};
use impedance_node::sweep::{Point, SweepDataset};

use crate::mock_hw::{MockFlash, RecordingSink, node_with_datasets, store};

fn dataset(n: u32, time: u32) -> SweepDataset {
    let mut ds = SweepDataset::with_capacity(n as usize);
    for i in 0..n {
        ds.push(Point {
            freq: 1_000 + 100 * i,
            real: i as i16,
            imag: 7 - i as i16,
        });
    }
    ds.meta.time = time;
    ds.meta.temperature = 21;
    ds
}

fn ready_store(flash: MockFlash) -> RecordStore<MockFlash> {
    let mut s = store(flash);
    s.init().unwrap();
    s
}

#[test]
fn pending_counter_drains_under_latency() {
    let mut flash = MockFlash::new();
    flash.busy_checks = 3;
    let mut s = ready_store(flash);

    let ds = dataset(491, 30);
    block_on(s.persist_dataset(1, &ds)).unwrap();
    assert_eq!(s.pending(), 0);
    assert!(s.peak_pending() >= 1);
    assert!(s.peak_pending() <= QUEUE_DEPTH);
    assert_eq!(block_on(s.load_dataset(1)).unwrap(), Some(ds));
}

#[test]
fn submit_beyond_queue_depth_waits_instead_of_failing() {
    let mut flash = MockFlash::new();
    flash.busy_checks = 2;
    let mut s = ready_store(flash);
    for file in 1..=(QUEUE_DEPTH as u16 * 3) {
        block_on(s.submit(FlashOp::DeleteFile { file })).unwrap();
        assert!(s.pending() <= QUEUE_DEPTH);
    }
    block_on(s.wait_idle()).unwrap();
    assert_eq!(s.backend().count(OpKind::DeleteFile), QUEUE_DEPTH * 3);
}

#[test]
fn stalled_backend_is_reported() {
    let mut flash = MockFlash::new();
    flash.busy_checks = 5_000;
    let mut s = store(flash).with_polling(0, 20);
    s.init().unwrap();
    s.delete_file(1).unwrap();
    s.delete_file(2).unwrap();
    assert_eq!(block_on(s.wait_idle()), Err(StoreError::Stalled));
    assert_eq!(s.fatal(), Some(StoreError::Stalled));
}

#[test]
fn stale_records_are_cleared_before_write() {
    let mut flash = MockFlash::new();
    flash.inject(1, FREQ_KEY, &[0xAA; 16]);
    flash.inject(1, META_KEY, &[0xBB; 12]);
    let mut s = store(flash);
    s.init().unwrap();

    let ds = dataset(5, 9);
    block_on(s.persist_dataset(1, &ds)).unwrap();
    assert_eq!(s.backend().count(OpKind::DeleteFile), 1);
    assert_eq!(s.backend().live_records(1), 4);
    assert_eq!(block_on(s.load_dataset(1)).unwrap(), Some(ds));
}

#[test]
fn ids_past_the_limit_report_no_space() {
    let mut s = ready_store(MockFlash::new());
    assert_eq!(
        block_on(s.persist_dataset(201, &dataset(3, 0))),
        Err(StoreError::NoSpace)
    );
    assert_eq!(block_on(s.load_dataset(0)), Err(StoreError::Corrupt("dataset id 0")));
}

#[test]
fn inconsistent_dataset_is_refused() {
    let mut s = ready_store(MockFlash::new());
    let mut ds = dataset(4, 0);
    ds.real.pop();
    assert!(matches!(
        block_on(s.persist_dataset(1, &ds)),
        Err(StoreError::Corrupt(_))
    ));
    assert!(s.backend().ops.is_empty());
}

#[test]
fn delete_all_of_five_deletes_five_files_and_reclaims() {
    let mut node = node_with_datasets(5);
    let deletes_before = node.store().backend().count(OpKind::DeleteFile);
    let reclaims_before = node.store().backend().count(OpKind::Reclaim);
    let deleted_before = node.config().num_deleted;
    let mut sink = RecordingSink::new();

    assert_eq!(block_on(node.delete_all(&mut sink)), Ok(5));

    let flash = node.store().backend();
    assert_eq!(flash.count(OpKind::DeleteFile), deletes_before + 5);
    assert_eq!(flash.count(OpKind::Reclaim), reclaims_before + 1);
    assert_eq!(node.config().num_sweeps, 0);
    assert_eq!(node.config().num_sent, 0);
    assert_eq!(node.config().num_deleted, deleted_before + 5);
    assert!(node.store().is_idle());
    for id in 1..=5u16 {
        assert_eq!(flash.live_records(id), 0);
    }
    assert!(sink.contains(&AppEvent::DeletedAll { deleted: 5 }));
}

#[test]
fn delete_all_removes_highest_ids_first() {
    let mut node = node_with_datasets(3);
    node.store_mut().backend_mut().ops.clear();
    block_on(node.delete_all(&mut RecordingSink::new())).unwrap();

    let flash = node.store().backend();
    assert_eq!(flash.deleted_files, vec![3, 2, 1]);
    // One batch of file deletions, then config, then reclaim.
    assert_eq!(&flash.ops[..3], &[OpKind::DeleteFile; 3]);
    assert_eq!(flash.ops.last(), Some(&OpKind::Reclaim));
}

#[test]
fn interrupted_delete_all_persists_completed_batches() {
    let mut node = node_with_datasets(6);
    let deletes_before = node.store().backend().count(OpKind::DeleteFile);
    // Ids 6..=3 go in the first batch; id 2 opens the second and fails.
    node.store_mut().backend_mut().fail_on = Some((OpKind::DeleteFile, deletes_before + 5));

    let result = block_on(node.delete_all(&mut RecordingSink::new()));
    assert!(matches!(result, Err(NodeError::Store(StoreError::Fatal(_)))));

    // What a reboot would find.
    let mut flash = node.store().backend().clone();
    flash.fail_on = None;
    let mut s = ready_store(flash);
    let persisted: Config = block_on(s.load_config()).unwrap().unwrap();
    assert_eq!(persisted.num_sweeps, 2);
    assert_eq!(persisted.num_deleted, 4);
    assert!(persisted.num_sent <= persisted.num_sweeps);
    for id in 3..=6 {
        assert!(block_on(s.load_dataset(id)).unwrap().is_none());
    }
}

#[test]
fn sent_never_exceeds_stored_across_deletes() {
    let mut node = node_with_datasets(3);
    let epoch = node.epoch();
    block_on(node.mark_sent(1, epoch)).unwrap();
    block_on(node.mark_sent(2, epoch)).unwrap();
    block_on(node.delete_all(&mut RecordingSink::new())).unwrap();
    assert!(node.config().num_sent <= node.config().num_sweeps);

    let mut sink = RecordingSink::new();
    block_on(node.acquire_and_persist(5, &mut sink)).unwrap();
    assert_eq!(node.next_unsent(), Some(1));
    // A transfer staged before the delete cannot mark anything sent.
    assert_eq!(block_on(node.mark_sent(1, epoch)), Ok(false));
    assert_eq!(node.config().num_sent, 0);
}
