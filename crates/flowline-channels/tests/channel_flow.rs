//! Cross-endpoint channel tests: reader/writer pairs coordinating over the
//! in-process transports.

use std::sync::Arc;

use flowline_channels::{ChannelReader, ChannelWriter};
use flowline_types::config::ChannelTuning;
use flowline_types::endpoint::{EndpointDescriptor, EndpointRole};
use flowline_transport::{MemoryLogTransport, MemoryQueueTransport, Transport};

fn reader(
    channel: &str,
    instance: &str,
    group_index: u32,
    group_size: u32,
    transport: Arc<dyn Transport>,
) -> ChannelReader {
    ChannelReader::new(
        channel,
        "mem://local",
        EndpointDescriptor::replica(instance, EndpointRole::Reader, group_index, group_size),
        ChannelTuning::default(),
        transport,
    )
}

fn writer(channel: &str, instance: &str, transport: Arc<dyn Transport>) -> ChannelWriter {
    ChannelWriter::new(
        channel,
        "mem://local",
        EndpointDescriptor::solo(instance, EndpointRole::Writer),
        ChannelTuning::default(),
        1_000,
        transport,
    )
}

/// Two writers into one single-partition reader: all records arrive, order
/// within each writer's stream is preserved, cross-writer order is free.
#[test]
fn two_writers_aggregate_into_one_reader() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryLogTransport::new());
    let mut rd = reader("ch", "in@sink", 0, 1, transport.clone());
    rd.create_resource().unwrap();
    assert!(rd.open_attempt().unwrap());
    rd.load_resume_offset().unwrap();
    rd.start().unwrap();

    let mut w1 = writer("ch", "out@src1", transport.clone());
    let mut w2 = writer("ch", "out@src2", transport.clone());
    assert!(w1.open_attempt().unwrap());
    assert!(w2.open_attempt().unwrap());

    w1.write_records(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
    w2.write_records(&[b"c".to_vec()]).unwrap();

    assert!(rd.has_records().unwrap());
    let payloads: Vec<Vec<u8>> =
        rd.read_records().unwrap().into_iter().map(|r| r.payload).collect();
    assert_eq!(payloads.len(), 3, "no loss, no duplication");

    let pos_a = payloads.iter().position(|p| p == b"a").unwrap();
    let pos_b = payloads.iter().position(|p| p == b"b").unwrap();
    assert!(pos_a < pos_b, "per-writer order must hold");
    assert!(payloads.iter().any(|p| p == b"c"));

    assert!(!rd.has_records().unwrap());
    assert_eq!(rd.read_records().unwrap().len(), 0);
}

/// n writers × m records arrive exactly once.
#[test]
fn n_by_m_records_arrive_exactly_once() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryLogTransport::new());
    let mut rd = reader("ch", "in@sink", 0, 1, transport.clone());
    rd.create_resource().unwrap();
    rd.open_attempt().unwrap();
    rd.load_resume_offset().unwrap();

    let n = 4;
    let m = 25;
    for wi in 0..n {
        let mut w = writer("ch", &format!("out@src{wi}"), transport.clone());
        w.open_attempt().unwrap();
        let batch: Vec<Vec<u8>> = (0..m).map(|ri| format!("{wi}:{ri}").into_bytes()).collect();
        w.write_records(&batch).unwrap();
    }

    let mut seen = std::collections::HashSet::new();
    while rd.has_records().unwrap() {
        for record in rd.read_records().unwrap() {
            assert!(seen.insert(record.payload), "duplicate record");
        }
    }
    assert_eq!(seen.len(), n * m);
}

/// Replicated reader group: replica i consumes exactly partition i, the
/// writer spreads the load evenly, and no coordination happens anywhere.
#[test]
fn replica_group_shards_by_static_assignment() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryLogTransport::new());
    let size = 3u32;

    let mut principal = reader("ch", "in@sink", 0, size, transport.clone());
    principal.create_resource().unwrap();
    assert_eq!(transport.partition_count("ch").unwrap(), size);

    let mut replicas: Vec<ChannelReader> = (0..size)
        .map(|i| {
            let id = if i == 0 { "in@sink".to_string() } else { format!("in@sink-{i}") };
            reader("ch", &id, i, size, transport.clone())
        })
        .collect();
    // Index 0 re-uses the principal that created the resources.
    replicas[0] = principal;
    for replica in &mut replicas {
        assert!(replica.open_attempt().unwrap());
        replica.load_resume_offset().unwrap();
    }

    let mut w = writer("ch", "out@src", transport.clone());
    w.open_attempt().unwrap();
    let batch: Vec<Vec<u8>> = (0..9u8).map(|i| vec![i]).collect();
    w.write_records(&batch).unwrap();

    for replica in &mut replicas {
        let records = replica.read_records().unwrap();
        assert_eq!(records.len(), 3, "even spread across replicas");
    }
}

/// Queue transports share one head: replicas split the load instead of
/// sharding it.
#[test]
fn queue_replicas_share_the_load() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryQueueTransport::new());
    let mut r0 = reader("jobs", "in@worker", 0, 2, transport.clone());
    let mut r1 = reader("jobs", "in@worker-1", 1, 2, transport.clone());
    r0.create_resource().unwrap();
    assert_eq!(transport.partition_count("jobs").unwrap(), 1);
    r0.open_attempt().unwrap();
    r1.open_attempt().unwrap();

    let mut w = writer("jobs", "out@feeder", transport.clone());
    w.open_attempt().unwrap();
    let batch: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i]).collect();
    w.write_records(&batch).unwrap();

    let first = r0.read_records().unwrap();
    let second = r1.read_records().unwrap();
    assert_eq!(first.len() + second.len(), 10);
    assert!(!r0.has_records().unwrap());
    assert!(!r1.has_records().unwrap());
}

/// The reader notices a writer whose heartbeats stopped.
#[test]
fn stale_writer_heartbeat_is_surfaced() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryLogTransport::new());
    let tuning = ChannelTuning { liveness_timeout_ms: 40, ..ChannelTuning::default() };
    let mut rd = ChannelReader::new(
        "ch",
        "mem://local",
        EndpointDescriptor::solo("in@sink", EndpointRole::Reader),
        tuning,
        transport.clone(),
    );
    rd.create_resource().unwrap();
    rd.open_attempt().unwrap();

    let mut w = writer("ch", "out@src", transport);
    w.open_attempt().unwrap();
    rd.tick().unwrap();
    assert_eq!(rd.board().ready_count(EndpointRole::Writer), 1);

    std::thread::sleep(std::time::Duration::from_millis(50));
    rd.tick().unwrap();
    assert!(rd.board().any_unhealthy(EndpointRole::Writer));
    assert_eq!(rd.board().finished_count(EndpointRole::Writer), 1);
}

/// A replicated principal refuses to close until its replicas finished.
#[test]
fn principal_waits_for_replicas_before_close() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryLogTransport::new());
    let mut principal = reader("ch", "in@sink", 0, 2, transport.clone());
    let mut replica = reader("ch", "in@sink-1", 1, 2, transport.clone());
    principal.create_resource().unwrap();
    principal.open_attempt().unwrap();
    replica.open_attempt().unwrap();

    principal.tick().unwrap();
    assert!(!principal.can_close(), "replica still active");

    replica.close().unwrap();
    principal.tick().unwrap();
    assert!(principal.can_close());
}

/// Positions survive endpoint restarts: a crashed reader resumes where it
/// committed, without recreating anything.
#[test]
fn crash_restart_resumes_from_committed_offset() {
    let transport: Arc<dyn Transport> = Arc::new(MemoryLogTransport::new());
    let mut rd = reader("ch", "in@sink", 0, 1, transport.clone());
    rd.create_resource().unwrap();
    rd.open_attempt().unwrap();
    rd.load_resume_offset().unwrap();

    let mut w = writer("ch", "out@src", transport.clone());
    w.open_attempt().unwrap();
    let batch: Vec<Vec<u8>> = (0..5u8).map(|i| vec![i]).collect();
    w.write_records(&batch).unwrap();

    assert_eq!(rd.read_records().unwrap().len(), 5);
    rd.commit_current_offset().unwrap();
    drop(rd);

    // "Restart": a new endpoint instance attaches to the same resources.
    let mut restarted = reader("ch", "in@sink", 0, 1, transport.clone());
    restarted.create_resource().unwrap();
    restarted.open_attempt().unwrap();
    assert_eq!(restarted.load_resume_offset().unwrap(), 5);

    w.write_records(&[vec![9]]).unwrap();
    let records = restarted.read_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload, vec![9]);
}
