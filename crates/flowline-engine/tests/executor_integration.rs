//! End-to-end executor tests: a writer operator and a reader operator
//! coordinating over the in-process log transport, including crash
//! recovery through the cleanup-only mode.

use std::sync::{Arc, Mutex};

use flowline_engine::params::ParamMap;
use flowline_engine::{
    ConnectionSpec, ExecutionMode, InputPort, Operator, OperatorAssembly, OperatorExecutor,
    OutputPort, PortAccess, RunOutcome,
};
use flowline_types::config::ChannelTuning;
use flowline_types::endpoint::{EndpointDescriptor, EndpointRole};
use flowline_types::exit::ExitCode;
use flowline_transport::{MemoryLogTransport, Transport};

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn params(json: serde_json::Value) -> ParamMap {
    json.as_object().unwrap().clone()
}

/// Emits its batches one per pass, then completes.
struct SourceOperator {
    batches: Vec<Vec<Vec<u8>>>,
    next: usize,
}

impl Operator for SourceOperator {
    fn on_running(&mut self, ports: &mut PortAccess<'_>) -> anyhow::Result<RunOutcome> {
        if self.next < self.batches.len() {
            let batch = self.batches[self.next].clone();
            ports.output("out").expect("output port").send(&batch)?;
            self.next += 1;
            Ok(RunOutcome::Pending)
        } else {
            Ok(RunOutcome::Completed)
        }
    }
}

/// Drains its input every pass; the engine decides completion.
struct SinkOperator {
    collected: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Operator for SinkOperator {
    fn on_running(&mut self, ports: &mut PortAccess<'_>) -> anyhow::Result<RunOutcome> {
        let input = ports.input("in").expect("input port");
        let records = input.retrieve()?;
        let mut collected = self.collected.lock().unwrap();
        collected.extend(records.into_iter().map(|r| r.payload));
        Ok(RunOutcome::Auto)
    }
}

fn source_assembly(
    transport: Arc<dyn Transport>,
    batches: Vec<Vec<Vec<u8>>>,
) -> OperatorAssembly {
    let mut assembly =
        OperatorAssembly::new("src", Box::new(SourceOperator { batches, next: 0 }));
    let port = OutputPort::from_params(
        "out@src",
        EndpointDescriptor::solo("out@src", EndpointRole::Writer),
        &[ConnectionSpec::new("in@sink", 1)],
        transport,
        params(serde_json::json!({
            "channelLocation": "mem://local",
            "portOpenTimeoutMs": 10_000,
        })),
    )
    .unwrap();
    assembly.attach("out", Box::new(port)).unwrap();
    assembly
}

fn sink_assembly(
    transport: Arc<dyn Transport>,
    collected: Arc<Mutex<Vec<Vec<u8>>>>,
) -> OperatorAssembly {
    let mut assembly = OperatorAssembly::new("sink", Box::new(SinkOperator { collected }));
    let port = InputPort::from_params(
        "in@sink",
        EndpointDescriptor::solo("in@sink", EndpointRole::Reader),
        "in@sink",
        &[ConnectionSpec::new("out@src", 1)],
        transport,
        params(serde_json::json!({
            "channelLocation": "mem://local",
            "portOpenTimeoutMs": 10_000,
        })),
    )
    .unwrap();
    assembly.attach("in", Box::new(port)).unwrap();
    assembly
}

#[test]
fn records_flow_from_source_to_sink() {
    init_logging();
    let transport: Arc<dyn Transport> = Arc::new(MemoryLogTransport::new());
    let collected = Arc::new(Mutex::new(Vec::new()));

    let batches = vec![
        vec![b"a".to_vec(), b"b".to_vec()],
        vec![b"c".to_vec(), b"d".to_vec(), b"e".to_vec()],
    ];
    let mut source =
        OperatorExecutor::new(source_assembly(transport.clone(), batches));
    let mut sink =
        OperatorExecutor::new(sink_assembly(transport.clone(), collected.clone()));

    let source_thread = std::thread::spawn(move || source.execute(ExecutionMode::Normal));
    let sink_thread = std::thread::spawn(move || sink.execute(ExecutionMode::Normal));

    assert_eq!(source_thread.join().unwrap().unwrap(), ExitCode::Success);
    assert_eq!(sink_thread.join().unwrap().unwrap(), ExitCode::Success);

    let collected = collected.lock().unwrap();
    assert_eq!(collected.len(), 5, "every record arrives exactly once");
    // Single-writer stream: emission order is preserved end to end.
    let expected: Vec<Vec<u8>> =
        [b"a", b"b", b"c", b"d", b"e"].iter().map(|p| p.to_vec()).collect();
    assert_eq!(*collected, expected);

    // Normal mode cleaned the channel resources up afterwards.
    assert!(!transport.resource_exists("in@sink").unwrap());
    assert!(!transport.resource_exists("in@sink.out.state").unwrap());
}

#[test]
fn cleanup_only_mode_reclaims_resources_of_a_crashed_run() {
    init_logging();
    let transport: Arc<dyn Transport> = Arc::new(MemoryLogTransport::new());
    let collected = Arc::new(Mutex::new(Vec::new()));

    // First run leaves resources in place, like a run that was configured
    // for centralized cleanup (or died before its deletion phase).
    let batches = vec![vec![b"x".to_vec()]];
    let mut source =
        OperatorExecutor::new(source_assembly(transport.clone(), batches));
    let mut sink =
        OperatorExecutor::new(sink_assembly(transport.clone(), collected.clone()));
    let source_thread =
        std::thread::spawn(move || source.execute(ExecutionMode::WithoutResourceDeletion));
    let sink_thread =
        std::thread::spawn(move || sink.execute(ExecutionMode::WithoutResourceDeletion));
    assert_eq!(source_thread.join().unwrap().unwrap(), ExitCode::Success);
    assert_eq!(sink_thread.join().unwrap().unwrap(), ExitCode::Success);
    assert!(transport.resource_exists("in@sink").unwrap());
    assert_eq!(collected.lock().unwrap().len(), 1);

    // Relaunch the principal in cleanup-only mode: resources disappear
    // without the operator running again.
    let sentinel = Arc::new(Mutex::new(Vec::new()));
    let mut cleanup =
        OperatorExecutor::new(sink_assembly(transport.clone(), sentinel.clone()));
    assert_eq!(
        cleanup.execute(ExecutionMode::ResourceCleanupOnly).unwrap(),
        ExitCode::Success
    );
    assert!(!transport.resource_exists("in@sink").unwrap());
    assert!(!transport.resource_exists("in@sink.in.state").unwrap());
    assert!(
        sentinel.lock().unwrap().is_empty(),
        "cleanup-only must not re-run business logic"
    );
}

#[test]
fn open_timeout_fails_the_run_and_preserves_resources() {
    init_logging();
    let transport: Arc<dyn Transport> = Arc::new(MemoryLogTransport::new());
    let collected = Arc::new(Mutex::new(Vec::new()));

    let mut assembly = OperatorAssembly::new(
        "sink",
        Box::new(SinkOperator { collected: collected.clone() }),
    );
    let port = InputPort::from_params(
        "in@sink",
        EndpointDescriptor::solo("in@sink", EndpointRole::Reader),
        "in@sink",
        &[ConnectionSpec::new("out@src", 1)],
        transport.clone(),
        params(serde_json::json!({
            "channelLocation": "mem://local",
            "portOpenTimeoutMs": 500,
        })),
    )
    .unwrap();
    assembly.attach("in", Box::new(port)).unwrap();

    let started = std::time::Instant::now();
    let mut executor = OperatorExecutor::new(assembly);
    let exit = executor.execute(ExecutionMode::Normal).unwrap();
    assert_eq!(exit, ExitCode::OperationInitError);
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
    assert!(collected.lock().unwrap().is_empty());

    // The failed run kept its resources so a restarted principal can
    // resume (deletion is suppressed on error).
    assert!(transport.resource_exists("in@sink").unwrap());
}

/// With sequential mode the port reports no records until every connected
/// writer finished, then releases everything at once.
#[test]
fn sequential_mode_gates_record_availability() {
    use flowline_channels::ChannelWriter;
    use flowline_engine::Plugin;

    init_logging();
    let transport: Arc<dyn Transport> = Arc::new(MemoryLogTransport::new());
    let mut port = InputPort::from_params(
        "in@sink",
        EndpointDescriptor::solo("in@sink", EndpointRole::Reader),
        "in@sink",
        &[ConnectionSpec::new("out@src", 1)],
        transport.clone(),
        params(serde_json::json!({
            "channelLocation": "mem://local",
            "sequentialModeEnabled": true,
        })),
    )
    .unwrap();
    port.on_resource_creation().unwrap();

    let mut writer = ChannelWriter::new(
        "in@sink",
        "mem://local",
        EndpointDescriptor::solo("out@src", EndpointRole::Writer),
        ChannelTuning::default(),
        1_000,
        transport,
    );
    assert!(writer.open_attempt().unwrap());

    // Port open stays pending while the writer is active.
    assert!(!port.on_port_open().unwrap().is_done());
    writer.write_records(&[b"a".to_vec(), b"b".to_vec()]).unwrap();
    assert!(!port.has_records().unwrap(), "sequential mode hides records early");
    assert!(port.retrieve().unwrap().is_empty());

    writer.close().unwrap();
    assert!(port.on_port_open().unwrap().is_done());
    assert!(port.has_records().unwrap());
    let records = port.retrieve().unwrap();
    assert_eq!(records.len(), 2);
}
