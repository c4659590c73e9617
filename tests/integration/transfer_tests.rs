//! Integration tests for the serial command protocol and the wireless
//! chunked transfer, driven through the simulated adapters.

use futures_lite::future::block_on;

use impedance_node::adapters::ble::BleAdapter;
use impedance_node::adapters::serial::SerialAdapter;
use impedance_node::app::events::AppEvent;
use impedance_node::app::ports::LinkPort;
use impedance_node::app::tasks::{self, LinkSession, Shared};
use impedance_node::config::TimingConfig;
use impedance_node::storage::OpKind;
use impedance_node::transfer::SerialSession;
use impedance_node::transfer::serial::{
    STATUS_DELETED, STATUS_SAVED, SUMMARY_LEN, TERMINATOR, encode_config_summary,
};
use impedance_node::transfer::wireless::METADATA_REPLY_LEN;

use crate::mock_hw::{
    MockAd5933, MockClock, MockFlash, RecordingSink, TestNode, node_with_datasets, started_node,
};

// ── Serial ────────────────────────────────────────────────────

struct SerialRig {
    shared: Shared<MockAd5933, MockFlash>,
    session: SerialSession,
    port: SerialAdapter,
    clock: MockClock,
    sink: RecordingSink,
}

impl SerialRig {
    fn new(node: TestNode) -> Self {
        Self {
            shared: Shared::new(node, TimingConfig::default()),
            session: SerialSession::new(),
            port: SerialAdapter::new().unwrap(),
            clock: MockClock::new(),
            sink: RecordingSink::new(),
        }
    }

    /// Send one command byte and return everything written back.
    fn command(&mut self, byte: u8) -> Vec<u8> {
        self.port.push_rx(&[byte]);
        let consumed = block_on(tasks::serial_step(
            &self.shared,
            &mut self.session,
            &mut self.port,
            &self.clock,
            &mut self.sink,
        ))
        .unwrap();
        assert!(consumed);
        self.port.take_tx()
    }

    fn num_sweeps(&self) -> u32 {
        block_on(self.shared.node.lock()).config().num_sweeps
    }
}

/// Split a stream into 8-byte points, checking the terminator.
fn points(stream: &[u8]) -> Vec<(u32, i16, i16)> {
    assert_eq!(stream.len() % 8, 0);
    assert_eq!(&stream[stream.len() - 8..], &TERMINATOR);
    stream[..stream.len() - 8]
        .chunks_exact(8)
        .map(|p| {
            (
                u32::from_le_bytes([p[0], p[1], p[2], p[3]]),
                i16::from_le_bytes([p[4], p[5]]),
                i16::from_le_bytes([p[6], p[7]]),
            )
        })
        .collect()
}

#[test]
fn serial_idle_port_consumes_nothing() {
    let mut rig = SerialRig::new(started_node());
    let consumed = block_on(tasks::serial_step(
        &rig.shared,
        &mut rig.session,
        &mut rig.port,
        &rig.clock,
        &mut rig.sink,
    ))
    .unwrap();
    assert!(!consumed);
}

#[test]
fn serial_summary_reports_counters_and_id() {
    let mut rig = SerialRig::new(node_with_datasets(2));
    let reply = rig.command(1);
    assert_eq!(reply.len(), SUMMARY_LEN);
    let expected = encode_config_summary(block_on(rig.shared.node.lock()).config());
    assert_eq!(reply, expected);
    assert_eq!(&reply[0..4], &2u32.to_le_bytes());
    assert_eq!(&reply[12..15], b"AZM");
}

#[test]
fn serial_acquire_and_save_replies_status() {
    let mut rig = SerialRig::new(started_node());
    rig.clock.set(125_000);
    assert_eq!(rig.command(2), vec![STATUS_SAVED]);
    assert_eq!(rig.num_sweeps(), 1);
    let ds = block_on(async { rig.shared.node.lock().await.load_dataset(1).await })
        .unwrap()
        .unwrap();
    assert_eq!(ds.meta.time, 125);
}

#[test]
fn serial_stream_does_not_persist() {
    let mut rig = SerialRig::new(started_node());
    let reply = rig.command(3);
    let pts = points(&reply);
    assert_eq!(pts.len(), 491);
    assert_eq!(pts[0].0, 1_000);
    assert_eq!(pts[490].0, 50_000);
    assert_eq!(rig.num_sweeps(), 0);
}

#[test]
fn serial_download_walks_newest_to_oldest() {
    let mut rig = SerialRig::new(node_with_datasets(2));
    rig.command(1);

    let second = points(&rig.command(4));
    let first = points(&rig.command(4));
    let wrapped = points(&rig.command(4));

    assert_eq!((second[0].1, second[0].2), MockAd5933::sample(2, 0));
    assert_eq!((first[0].1, first[0].2), MockAd5933::sample(1, 0));
    assert_eq!(wrapped, second);
}

#[test]
fn serial_download_with_nothing_stored_sends_terminator() {
    let mut rig = SerialRig::new(started_node());
    assert_eq!(rig.command(4), TERMINATOR.to_vec());
}

#[test]
fn serial_delete_all_replies_and_clears() {
    let mut rig = SerialRig::new(node_with_datasets(3));
    assert_eq!(rig.command(5), vec![STATUS_DELETED]);
    assert_eq!(rig.num_sweeps(), 0);
    assert!(rig.sink.contains(&AppEvent::DeletedAll { deleted: 3 }));
    assert_eq!(rig.command(4), TERMINATOR.to_vec());
}

#[test]
fn serial_unknown_byte_is_ignored() {
    let mut rig = SerialRig::new(started_node());
    assert!(rig.command(9).is_empty());
    assert!(rig.command(b'1').is_empty());
}

// ── Wireless ──────────────────────────────────────────────────

struct LinkRig {
    shared: Shared<MockAd5933, MockFlash>,
    session: LinkSession,
    ble: BleAdapter,
    clock: MockClock,
    sink: RecordingSink,
}

impl LinkRig {
    fn new(node: TestNode) -> Self {
        let timing = TimingConfig::default();
        let mut ble = BleAdapter::new();
        ble.start().unwrap();
        Self {
            session: LinkSession::new(&timing),
            shared: Shared::new(node, timing),
            ble,
            clock: MockClock::new(),
            sink: RecordingSink::new(),
        }
    }

    fn poll(&mut self) -> u64 {
        block_on(
            self.session
                .poll(&self.shared, &mut self.ble, &self.clock, &mut self.sink),
        )
        .unwrap()
    }

    /// Write one command byte, poll once, return the notifications.
    fn command(&mut self, byte: u8) -> Vec<Vec<u8>> {
        self.ble.sim_push_command(byte);
        self.poll();
        self.ble.take_notifications()
    }

    fn num_sent(&self) -> u32 {
        block_on(self.shared.node.lock()).config().num_sent
    }
}

/// Decode chunks into frequencies, checking the count byte and bound.
fn chunk_freqs(chunks: &[Vec<u8>], max_payload: usize) -> Vec<u32> {
    let mut out = Vec::new();
    for c in chunks {
        assert!(c.len() <= max_payload);
        assert_eq!(c.len(), 1 + 8 * c[0] as usize);
        for p in c[1..].chunks_exact(8) {
            out.push(u32::from_le_bytes([p[0], p[1], p[2], p[3]]));
        }
    }
    out
}

#[test]
fn advertises_only_when_unsent_data_exists() {
    let mut rig = LinkRig::new(started_node());
    rig.poll();
    assert_eq!(rig.ble.sim_adverts(), 0);

    block_on(async {
        let mut node = rig.shared.node.lock().await;
        node.acquire_and_persist(1, &mut RecordingSink::new()).await
    })
    .unwrap();
    assert_eq!(rig.poll(), TimingConfig::default().link_poll_ms);
    assert_eq!(rig.ble.sim_adverts(), 1);
    assert!(rig.ble.is_advertising());

    // Already advertising: no restart.
    rig.poll();
    assert_eq!(rig.ble.sim_adverts(), 1);
}

#[test]
fn connection_stages_oldest_unsent_dataset() {
    let mut rig = LinkRig::new(node_with_datasets(2));
    rig.ble.sim_connect(92);
    assert_eq!(rig.poll(), TimingConfig::default().command_poll_ms);
    assert_eq!(rig.session.transfer().staged_id(), Some(1));

    let reply = rig.command(b'0');
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].len(), METADATA_REPLY_LEN);
    assert_eq!(reply[0][0], 0);
    assert_eq!(&reply[0][1..5], &491u32.to_le_bytes());
    assert_eq!(&reply[0][5..9], &60u32.to_le_bytes());
    assert_eq!(&reply[0][9..11], &24i16.to_le_bytes());
}

#[test]
fn full_dataset_streams_in_bounded_chunks() {
    let mut rig = LinkRig::new(node_with_datasets(2));
    rig.ble.sim_connect(92);
    rig.poll();
    let max = rig.ble.max_payload();
    assert_eq!(max, 89);

    let mut chunks = Vec::new();
    for _ in 0..100 {
        if rig.sink.contains(&AppEvent::TransferComplete { id: 1 }) {
            break;
        }
        chunks.extend(rig.command(b'1'));
    }

    assert!(rig.sink.contains(&AppEvent::TransferComplete { id: 1 }));
    // 491 points at 10 per chunk.
    assert_eq!(chunks.len(), 50);
    let freqs = chunk_freqs(&chunks, max);
    let expected: Vec<u32> = (0..491).map(|i| 1_000 + 100 * i).collect();
    assert_eq!(freqs, expected);
    assert_eq!(rig.num_sent(), 1);
    // The next unsent dataset is staged straight away.
    assert_eq!(rig.session.transfer().staged_id(), Some(2));
}

#[test]
fn rejected_notify_mid_burst_loses_no_points() {
    let mut rig = LinkRig::new(node_with_datasets(1));
    rig.ble.sim_connect(92);
    rig.poll();
    let max = rig.ble.max_payload();

    rig.ble.sim_fail_nth_notify(2);
    let mut chunks = rig.command(b'1');
    assert_eq!(chunks.len(), 1);
    assert_eq!(rig.session.transfer().cursor(), 10);
    assert_eq!(rig.session.transfer().staged_id(), Some(1));

    for _ in 0..100 {
        if rig.sink.contains(&AppEvent::TransferComplete { id: 1 }) {
            break;
        }
        chunks.extend(rig.command(b'1'));
    }

    assert!(rig.sink.contains(&AppEvent::TransferComplete { id: 1 }));
    let expected: Vec<u32> = (0..491).map(|i| 1_000 + 100 * i).collect();
    assert_eq!(chunk_freqs(&chunks, max), expected);
    assert_eq!(rig.num_sent(), 1);
}

#[test]
fn nothing_staged_replies_empty() {
    let mut rig = LinkRig::new(started_node());
    rig.ble.sim_connect(92);
    rig.poll();
    assert_eq!(rig.command(b'0'), vec![vec![0u8; METADATA_REPLY_LEN]]);
    assert_eq!(rig.command(b'1'), vec![vec![0u8]]);
    assert!(rig.command(b'7').is_empty());
}

#[test]
fn disconnect_mid_transfer_restarts_from_first_point() {
    let mut rig = LinkRig::new(node_with_datasets(1));
    rig.ble.sim_connect(92);
    rig.poll();
    let first = rig.command(b'1');
    assert_eq!(first.len(), 3);
    assert_eq!(rig.session.transfer().cursor(), 30);

    rig.ble.sim_disconnect();
    rig.poll();
    assert!(rig.sink.contains(&AppEvent::TransferAborted { id: 1, cursor: 30 }));
    assert_eq!(rig.session.transfer().staged_id(), None);
    assert_eq!(rig.num_sent(), 0);
    // Unsent data remains, so advertising resumes.
    assert_eq!(rig.ble.sim_adverts(), 1);

    rig.ble.sim_connect(92);
    rig.poll();
    let again = rig.command(b'1');
    assert_eq!(again, first);
}

#[test]
fn wireless_delete_all_drops_staging() {
    let mut rig = LinkRig::new(node_with_datasets(2));
    rig.ble.sim_connect(92);
    rig.poll();
    rig.command(b'1');

    assert_eq!(rig.command(b'2'), vec![vec![STATUS_DELETED]]);
    assert_eq!(rig.session.transfer().staged_id(), None);
    assert!(rig.sink.contains(&AppEvent::DeletedAll { deleted: 2 }));
    assert_eq!(rig.command(b'1'), vec![vec![0u8]]);
}

#[test]
fn delete_elsewhere_invalidates_staged_transfer() {
    let mut rig = LinkRig::new(node_with_datasets(1));
    rig.ble.sim_connect(92);
    rig.poll();
    rig.command(b'1');

    // Serial side wipes the store and records a fresh dataset 1.
    block_on(async {
        let mut node = rig.shared.node.lock().await;
        let mut sink = RecordingSink::new();
        node.delete_all(&mut sink).await.unwrap();
        node.acquire_and_persist(500, &mut sink).await.unwrap();
    });

    rig.poll();
    assert_eq!(rig.session.transfer().staged_id(), Some(1));
    assert_eq!(rig.session.transfer().cursor(), 0);
    let meta = rig.command(b'0');
    assert_eq!(&meta[0][5..9], &500u32.to_le_bytes());

    let mut guard = 0;
    while !rig.sink.contains(&AppEvent::TransferComplete { id: 1 }) && guard < 100 {
        rig.command(b'1');
        guard += 1;
    }
    assert_eq!(rig.num_sent(), 1);
}

#[test]
fn missing_dataset_is_skipped() {
    let mut rig = LinkRig::new(node_with_datasets(2));
    block_on(async {
        let mut node = rig.shared.node.lock().await;
        node.store_mut().delete_file(1).unwrap();
        node.store_mut().wait_idle().await.unwrap();
    });

    rig.ble.sim_connect(92);
    rig.poll();
    assert_eq!(rig.num_sent(), 1);
    rig.poll();
    assert_eq!(rig.session.transfer().staged_id(), Some(2));
}

#[test]
fn small_mtu_is_rejected_without_progress() {
    let mut rig = LinkRig::new(node_with_datasets(1));
    rig.ble.sim_connect(18);
    rig.poll();
    assert!(rig.command(b'1').is_empty());
    assert_eq!(rig.session.transfer().cursor(), 0);
}

#[test]
fn default_mtu_carries_two_points_per_chunk() {
    let mut rig = LinkRig::new(node_with_datasets(1));
    rig.ble.sim_connect(23);
    rig.poll();
    let chunks = rig.command(b'1');
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c[0] == 2 && c.len() == 17));
    assert_eq!(rig.session.transfer().cursor(), 6);
}

#[test]
fn wireless_delete_issues_one_file_delete_per_dataset() {
    let node = node_with_datasets(1);
    let deletes_before = node.store().backend().count(OpKind::DeleteFile);
    let mut rig = LinkRig::new(node);
    rig.ble.sim_connect(92);
    rig.poll();
    rig.command(b'2');
    let node = block_on(rig.shared.node.lock());
    assert_eq!(
        node.store().backend().count(OpKind::DeleteFile),
        deletes_before + 1
    );
    assert!(node.store().is_idle());
}
