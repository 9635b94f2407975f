//! State machine path tests: phase ordering, error routing, execution
//! modes, and interrupt handling, observed through recording plugins.

use std::any::Any;
use std::sync::{Arc, Mutex};

use anyhow::bail;
use flowline_engine::{
    Capability, ExecutionMode, Operator, OperatorAssembly, OperatorExecutor, Plugin, PortAccess,
    Progress, RunOutcome,
};
use flowline_types::exit::ExitCode;

type Journal = Arc<Mutex<Vec<String>>>;

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal) -> Vec<String> {
    journal.lock().unwrap().clone()
}

fn position(entries: &[String], needle: &str) -> usize {
    entries
        .iter()
        .position(|e| e == needle)
        .unwrap_or_else(|| panic!("'{needle}' not recorded in {entries:?}"))
}

/// Records every lifecycle callback; optionally fails one of them.
struct Probe {
    name: String,
    caps: Vec<Capability>,
    deps: Vec<String>,
    journal: Journal,
    fail_on: Option<&'static str>,
}

impl Probe {
    fn service(name: &str, journal: &Journal) -> Self {
        Self::new(name, vec![Capability::Service], journal)
    }

    fn resource(name: &str, journal: &Journal) -> Self {
        Self::new(name, vec![Capability::Resource], journal)
    }

    fn new(name: &str, caps: Vec<Capability>, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            caps,
            deps: Vec::new(),
            journal: journal.clone(),
            fail_on: None,
        }
    }

    fn depending_on(mut self, deps: &[&str]) -> Self {
        self.deps = deps.iter().map(|s| (*s).to_string()).collect();
        self
    }

    fn failing_on(mut self, hook: &'static str) -> Self {
        self.fail_on = Some(hook);
        self
    }

    fn record(&self, hook: &str) -> anyhow::Result<Progress> {
        self.journal.lock().unwrap().push(format!("{hook}:{}", self.name));
        if self.fail_on == Some(hook) {
            bail!("{} deliberately failed {hook}", self.name);
        }
        Ok(Progress::Done)
    }
}

impl Plugin for Probe {
    fn capabilities(&self) -> &[Capability] {
        &self.caps
    }

    fn dependencies(&self) -> Vec<String> {
        self.deps.clone()
    }

    fn on_service_start(&mut self) -> anyhow::Result<Progress> {
        self.record("service_start")
    }

    fn on_service_shutdown(&mut self) -> anyhow::Result<Progress> {
        self.record("service_shutdown")
    }

    fn on_resource_creation(&mut self) -> anyhow::Result<Progress> {
        self.record("resource_creation")
    }

    fn on_resource_deletion(&mut self) -> anyhow::Result<Progress> {
        self.record("resource_deletion")
    }

    fn on_error(&mut self) {
        self.journal.lock().unwrap().push(format!("error:{}", self.name));
    }

    fn on_interrupt(&mut self) {
        self.journal.lock().unwrap().push(format!("interrupt:{}", self.name));
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Operator that records its hooks and runs a fixed number of passes.
struct ProbeOperator {
    journal: Journal,
    passes_left: u32,
    run_forever: bool,
}

impl ProbeOperator {
    fn new(journal: &Journal, passes: u32) -> Self {
        Self { journal: journal.clone(), passes_left: passes, run_forever: false }
    }

    fn endless(journal: &Journal) -> Self {
        Self { journal: journal.clone(), passes_left: 0, run_forever: true }
    }
}

impl Operator for ProbeOperator {
    fn on_init(&mut self, _ports: &mut PortAccess<'_>) -> anyhow::Result<Progress> {
        self.journal.lock().unwrap().push("init".to_string());
        Ok(Progress::Done)
    }

    fn on_running(&mut self, _ports: &mut PortAccess<'_>) -> anyhow::Result<RunOutcome> {
        self.journal.lock().unwrap().push("running".to_string());
        if self.run_forever {
            return Ok(RunOutcome::Pending);
        }
        if self.passes_left > 1 {
            self.passes_left -= 1;
            Ok(RunOutcome::Pending)
        } else {
            Ok(RunOutcome::Completed)
        }
    }

    fn on_shutdown(&mut self, _ports: &mut PortAccess<'_>) -> anyhow::Result<Progress> {
        self.journal.lock().unwrap().push("shutdown".to_string());
        Ok(Progress::Done)
    }

    fn on_interrupt(&mut self) {
        self.journal.lock().unwrap().push("interrupt:operator".to_string());
    }
}

#[test]
fn clean_run_walks_the_full_path_in_order() {
    let j = journal();
    let mut assembly = OperatorAssembly::new("op", Box::new(ProbeOperator::new(&j, 2)));
    assembly.attach("svc", Box::new(Probe::service("svc", &j))).unwrap();
    assembly.attach("res", Box::new(Probe::resource("res", &j))).unwrap();

    let mut executor = OperatorExecutor::new(assembly);
    let exit = executor.execute(ExecutionMode::Normal).unwrap();
    assert_eq!(exit, ExitCode::Success);

    let log = entries(&j);
    let order = [
        "service_start:svc",
        "resource_creation:res",
        "init",
        "running",
        "shutdown",
        "resource_deletion:res",
        "service_shutdown:svc",
    ];
    let mut last = 0;
    for step in order {
        let pos = position(&log, step);
        assert!(pos >= last, "{step} out of order in {log:?}");
        last = pos;
    }
    assert_eq!(log.iter().filter(|e| *e == "running").count(), 2);
}

#[test]
fn resource_creation_error_still_deletes_and_stops_services() {
    let j = journal();
    let mut assembly = OperatorAssembly::new("op", Box::new(ProbeOperator::new(&j, 1)));
    assembly.attach("svc", Box::new(Probe::service("svc", &j))).unwrap();
    assembly
        .attach("res", Box::new(Probe::resource("res", &j).failing_on("resource_creation")))
        .unwrap();

    let mut executor = OperatorExecutor::new(assembly);
    let exit = executor.execute(ExecutionMode::Normal).unwrap();
    assert_eq!(exit, ExitCode::ResourceCreationError);

    let log = entries(&j);
    // The failed phase fires the error hooks, then the machine routes
    // through ResourceDeletion and ServiceShutdown, never skipping either.
    assert!(log.contains(&"error:res".to_string()));
    assert!(log.contains(&"resource_deletion:res".to_string()));
    assert!(log.contains(&"service_shutdown:svc".to_string()));
    // Business logic never ran.
    assert!(!log.contains(&"init".to_string()));
    assert!(!log.contains(&"running".to_string()));
}

#[test]
fn shutdown_during_running_terminates_at_killed() {
    let j = journal();
    let mut assembly = OperatorAssembly::new("op", Box::new(ProbeOperator::endless(&j)));
    assembly.attach("svc", Box::new(Probe::service("svc", &j))).unwrap();
    assembly.attach("res", Box::new(Probe::resource("res", &j))).unwrap();

    let mut executor = OperatorExecutor::new(assembly);
    let handle = executor.interrupt_handle();
    let worker = std::thread::spawn(move || executor.execute(ExecutionMode::Normal));

    std::thread::sleep(std::time::Duration::from_millis(200));
    handle.interrupt();
    let exit = worker.join().unwrap().unwrap();
    assert_eq!(exit, ExitCode::Interrupted);

    let log = entries(&j);
    assert!(log.contains(&"running".to_string()));
    assert!(log.contains(&"interrupt:operator".to_string()));
    assert!(log.contains(&"interrupt:svc".to_string()));
    // The shutdown path still ran to completion.
    assert!(log.contains(&"shutdown".to_string()));
    assert!(log.contains(&"resource_deletion:res".to_string()));
    assert!(log.contains(&"service_shutdown:svc".to_string()));
}

#[test]
fn cleanup_only_mode_skips_business_logic() {
    let j = journal();
    let mut assembly = OperatorAssembly::new("op", Box::new(ProbeOperator::new(&j, 1)));
    assembly.attach("svc", Box::new(Probe::service("svc", &j))).unwrap();
    assembly.attach("res", Box::new(Probe::resource("res", &j))).unwrap();

    let mut executor = OperatorExecutor::new(assembly);
    let exit = executor.execute(ExecutionMode::ResourceCleanupOnly).unwrap();
    assert_eq!(exit, ExitCode::Success);

    let log = entries(&j);
    assert!(log.contains(&"resource_deletion:res".to_string()));
    assert!(log.contains(&"service_shutdown:svc".to_string()));
    assert!(!log.contains(&"resource_creation:res".to_string()));
    assert!(!log.contains(&"init".to_string()));
    assert!(!log.contains(&"running".to_string()));
}

#[test]
fn without_resource_deletion_mode_keeps_resources() {
    let j = journal();
    let mut assembly = OperatorAssembly::new("op", Box::new(ProbeOperator::new(&j, 1)));
    assembly.attach("res", Box::new(Probe::resource("res", &j))).unwrap();

    let mut executor = OperatorExecutor::new(assembly);
    let exit = executor.execute(ExecutionMode::WithoutResourceDeletion).unwrap();
    assert_eq!(exit, ExitCode::Success);

    let log = entries(&j);
    assert!(log.contains(&"resource_creation:res".to_string()));
    assert!(log.contains(&"running".to_string()));
    assert!(!log.contains(&"resource_deletion:res".to_string()));
}

#[test]
fn dependency_order_holds_forward_and_reversed() {
    let j = journal();
    let mut assembly = OperatorAssembly::new("op", Box::new(ProbeOperator::new(&j, 1)));
    // Attach the dependent first: registration order must not matter.
    assembly
        .attach("a", Box::new(Probe::service("a", &j).depending_on(&["b"])))
        .unwrap();
    assembly.attach("b", Box::new(Probe::service("b", &j))).unwrap();

    let mut executor = OperatorExecutor::new(assembly);
    executor.execute(ExecutionMode::Normal).unwrap();

    let log = entries(&j);
    assert!(position(&log, "service_start:b") < position(&log, "service_start:a"));
    assert!(position(&log, "service_shutdown:a") < position(&log, "service_shutdown:b"));
}

#[test]
fn failed_service_shutdown_does_not_abort_the_rest() {
    let j = journal();
    let mut assembly = OperatorAssembly::new("op", Box::new(ProbeOperator::new(&j, 1)));
    assembly
        .attach("bad", Box::new(Probe::service("bad", &j).failing_on("service_shutdown")))
        .unwrap();
    assembly.attach("good", Box::new(Probe::service("good", &j))).unwrap();

    let mut executor = OperatorExecutor::new(assembly);
    let exit = executor.execute(ExecutionMode::Normal).unwrap();
    assert_eq!(exit, ExitCode::ServiceShutdownError);

    let log = entries(&j);
    // Every service still got its shutdown attempt.
    assert!(log.contains(&"service_shutdown:bad".to_string()));
    assert!(log.contains(&"service_shutdown:good".to_string()));
}

#[test]
fn running_error_keeps_the_first_failing_phase_code() {
    struct FailingOperator;

    impl Operator for FailingOperator {
        fn on_running(&mut self, _ports: &mut PortAccess<'_>) -> anyhow::Result<RunOutcome> {
            bail!("boom");
        }
    }

    let j = journal();
    let mut assembly = OperatorAssembly::new("op", Box::new(FailingOperator));
    assembly
        .attach("svc", Box::new(Probe::service("svc", &j).failing_on("service_shutdown")))
        .unwrap();

    let mut executor = OperatorExecutor::new(assembly);
    let exit = executor.execute(ExecutionMode::Normal).unwrap();
    // The later service shutdown failure must not mask the running error.
    assert_eq!(exit, ExitCode::OperationRunningError);
}

#[test]
fn missing_parameters_fail_before_any_phase() {
    struct Needy;

    impl Plugin for Needy {
        fn capabilities(&self) -> &[Capability] {
            &[Capability::Service]
        }

        fn missing_parameters(&self) -> Vec<String> {
            vec!["channelLocation".to_string()]
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    let j = journal();
    let mut assembly = OperatorAssembly::new("op", Box::new(ProbeOperator::new(&j, 1)));
    assembly.attach("needy", Box::new(Needy)).unwrap();

    let mut executor = OperatorExecutor::new(assembly);
    let err = executor.execute(ExecutionMode::Normal).unwrap_err();
    assert_eq!(err.code, "MISSING_PARAMETERS");
    assert!(entries(&j).is_empty(), "no phase may run on configuration errors");
}
