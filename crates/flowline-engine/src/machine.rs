//! Operator execution state machine.
//!
//! The executor drives one operator assembly through phased execution on a
//! single cooperative control loop. Each state invokes a specific subset of
//! plugin lifecycle callbacks in the context's dependency order; callback
//! errors become the `Error` signal, never raw propagation, and the
//! transition table guarantees that every resource that reached the
//! creation phase gets a deletion attempt and every started service a
//! shutdown attempt.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flowline_channels::backoff::poll_backoff;
use flowline_channels::ContextLogger;
use flowline_types::error::CoreResult;
use flowline_types::exit::ExitCode;

use crate::context::{ExecutionContext, OperatorAssembly};
use crate::plugin::{Capability, Plugin, Progress, RunOutcome};
use crate::ports::PortAccess;
use crate::signal::Signal;

/// States of the operator lifecycle machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    Entry,
    ServiceStart,
    ResourceCreation,
    OperationInit,
    OperationRunning,
    OperationShutdown,
    ResourceDeletion,
    ServiceShutdown,
    Killed,
}

impl fmt::Display for OperatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The transition table. `None` means the signal is not handled in this
/// state and the machine stays put.
#[must_use]
pub fn transition(from: OperatorState, signal: Signal) -> Option<OperatorState> {
    use OperatorState as S;
    match (from, signal) {
        (S::Entry, Signal::ServiceStart) => Some(S::ServiceStart),
        (S::Entry, Signal::Shutdown) => Some(S::Killed),

        (S::ServiceStart, Signal::ResourcesCreation) => Some(S::ResourceCreation),
        (S::ServiceStart, Signal::ResourcesDeletion) => Some(S::ResourceDeletion),
        (S::ServiceStart, Signal::Error | Signal::Shutdown) => Some(S::ServiceShutdown),

        (S::ResourceCreation, Signal::OperationInit) => Some(S::OperationInit),
        (S::ResourceCreation, Signal::Error | Signal::Shutdown) => Some(S::ResourceDeletion),
        (S::ResourceCreation, Signal::ServicesStop) => Some(S::ServiceShutdown),

        (S::OperationInit, Signal::OperationStart) => Some(S::OperationRunning),
        (S::OperationInit, Signal::Error | Signal::Shutdown) => Some(S::OperationShutdown),

        (S::OperationRunning, Signal::OperationStop | Signal::Error | Signal::Shutdown) => {
            Some(S::OperationShutdown)
        }

        (S::OperationShutdown, Signal::ResourcesDeletion | Signal::Error) => {
            Some(S::ResourceDeletion)
        }
        (S::OperationShutdown, Signal::ServicesStop) => Some(S::ServiceShutdown),

        (S::ResourceDeletion, Signal::ServicesStop | Signal::Error) => Some(S::ServiceShutdown),

        (S::ServiceShutdown, Signal::Kill | Signal::Error) => Some(S::Killed),

        _ => None,
    }
}

/// How much of the lifecycle a run traverses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Full path: create resources, run, delete resources.
    #[default]
    Normal,
    /// Full path, but leave resources in place for a later centralized
    /// cleanup.
    WithoutResourceDeletion,
    /// Create resources only; no init/running.
    ResourceCreationOnly,
    /// Jump straight from service start to resource deletion: reclaim the
    /// resources of a crashed run without re-executing business logic.
    ResourceCleanupOnly,
}

/// Externally settable cancellation flag; the machine translates it into
/// the `Shutdown` signal at whatever state it currently occupies.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle callback selector for one phase pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    ServiceStart,
    ServiceShutdown,
    ResourceCreation,
    ResourceDeletion,
    PortOpen,
    PortClose,
}

impl Hook {
    fn applies_to(self, caps: &[Capability]) -> bool {
        match self {
            Self::ServiceStart | Self::ServiceShutdown => caps.contains(&Capability::Service),
            Self::ResourceCreation | Self::ResourceDeletion => {
                caps.contains(&Capability::Resource)
            }
            Self::PortOpen | Self::PortClose => {
                caps.contains(&Capability::InputPort) || caps.contains(&Capability::OutputPort)
            }
        }
    }

    fn invoke(self, plugin: &mut dyn Plugin) -> anyhow::Result<Progress> {
        match self {
            Self::ServiceStart => plugin.on_service_start(),
            Self::ServiceShutdown => plugin.on_service_shutdown(),
            Self::ResourceCreation => plugin.on_resource_creation(),
            Self::ResourceDeletion => plugin.on_resource_deletion(),
            Self::PortOpen => plugin.on_port_open(),
            Self::PortClose => plugin.on_port_close(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::ServiceStart => "service_start",
            Self::ServiceShutdown => "service_shutdown",
            Self::ResourceCreation => "resource_creation",
            Self::ResourceDeletion => "resource_deletion",
            Self::PortOpen => "port_open",
            Self::PortClose => "port_close",
        }
    }
}

struct PassOutcome {
    failed: bool,
    all_done: bool,
}

/// Drives one operator assembly to `Killed`.
pub struct OperatorExecutor {
    assembly: OperatorAssembly,
    interrupt: InterruptHandle,
    interrupt_handled: bool,
    state: OperatorState,
    /// Completed steps of the current state, keyed `hook:plugin`. Cleared
    /// on every transition so re-entered states start fresh.
    done: BTreeSet<String>,
    phase_failed: bool,
    pending_attempts: u32,
    log: ContextLogger,
}

impl OperatorExecutor {
    #[must_use]
    pub fn new(assembly: OperatorAssembly) -> Self {
        let log = ContextLogger::new(assembly.name().to_string(), "DEBUG");
        Self {
            assembly,
            interrupt: InterruptHandle::new(),
            interrupt_handled: false,
            state: OperatorState::Entry,
            done: BTreeSet::new(),
            phase_failed: false,
            pending_attempts: 0,
            log,
        }
    }

    /// Handle for external cancellation (signal handlers, supervisors).
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    #[must_use]
    pub fn state(&self) -> OperatorState {
        self.state
    }

    /// Run the machine to `Killed` and report the exit code.
    ///
    /// Re-running is permitted: each call starts from a fresh context.
    ///
    /// # Errors
    ///
    /// Returns a configuration [`CoreError`](flowline_types::error::CoreError)
    /// when validation fails before the first state transition (missing
    /// required parameters, dependency cycle). Once the machine starts, all
    /// failures are absorbed into the exit code.
    pub fn execute(&mut self, mode: ExecutionMode) -> CoreResult<ExitCode> {
        let mut ctx = ExecutionContext::build(&self.assembly, mode)?;
        self.state = OperatorState::Entry;
        self.done.clear();
        self.phase_failed = false;
        self.interrupt_handled = false;
        self.pending_attempts = 0;
        self.log.debug(format!("starting state machine, mode {mode:?}"));

        while self.state != OperatorState::Killed {
            let mut signal = self.run_state(&mut ctx);

            if !self.interrupt_handled && self.interrupt.is_interrupted() {
                self.log.debug("processing interrupt signal");
                self.fire_interrupt_hooks();
                ctx.record_exit(ExitCode::Interrupted);
                self.interrupt_handled = true;
                signal = Signal::Shutdown;
            }

            match signal {
                Signal::NoOp => {
                    self.pending_attempts += 1;
                    std::thread::sleep(poll_backoff(self.pending_attempts));
                }
                signal => {
                    if let Some(next) = transition(self.state, signal) {
                        self.log.info(format!("({})--[{signal}]-->({next})", self.state));
                        self.state = next;
                        self.done.clear();
                        self.phase_failed = false;
                        self.pending_attempts = 0;
                    } else {
                        self.log.warn(format!(
                            "unhandled signal in {}: {signal}",
                            self.state
                        ));
                    }
                }
            }
        }

        self.log.debug(format!("state machine finished, exit code {:?}", ctx.exit_code()));
        Ok(ctx.exit_code())
    }

    fn run_state(&mut self, ctx: &mut ExecutionContext) -> Signal {
        match self.state {
            OperatorState::Entry => Signal::ServiceStart,
            OperatorState::Killed => Signal::NoOp,
            OperatorState::ServiceStart => self.run_service_start(ctx),
            OperatorState::ResourceCreation => self.run_resource_creation(ctx),
            OperatorState::OperationInit => self.run_operation_init(ctx),
            OperatorState::OperationRunning => self.run_operation_running(ctx),
            OperatorState::OperationShutdown => self.run_operation_shutdown(ctx),
            OperatorState::ResourceDeletion => self.run_resource_deletion(ctx),
            OperatorState::ServiceShutdown => self.run_service_shutdown(ctx),
        }
    }

    // ------------------------------------------------------------------
    // Phase implementations
    // ------------------------------------------------------------------

    fn run_service_start(&mut self, ctx: &mut ExecutionContext) -> Signal {
        let order = ctx.forward_order();
        let outcome = self.run_plugin_pass(&order, Hook::ServiceStart, true);
        if outcome.failed {
            self.fire_error_hooks(&[Capability::Service], false);
            ctx.record_exit(ExitCode::ServiceStartError);
            return Signal::Error;
        }
        if !outcome.all_done {
            return Signal::NoOp;
        }
        match ctx.mode() {
            ExecutionMode::ResourceCleanupOnly => Signal::ResourcesDeletion,
            _ => Signal::ResourcesCreation,
        }
    }

    fn run_resource_creation(&mut self, ctx: &mut ExecutionContext) -> Signal {
        let order = ctx.forward_order();
        let outcome = self.run_plugin_pass(&order, Hook::ResourceCreation, true);
        if outcome.failed {
            self.fire_error_hooks(&[Capability::Resource], false);
            ctx.record_exit(ExitCode::ResourceCreationError);
            return Signal::Error;
        }
        if !outcome.all_done {
            return Signal::NoOp;
        }
        match ctx.mode() {
            ExecutionMode::ResourceCreationOnly => Signal::ServicesStop,
            _ => Signal::OperationInit,
        }
    }

    fn run_operation_init(&mut self, ctx: &mut ExecutionContext) -> Signal {
        // Ports open first so the operator's init already has access to them.
        let order = ctx.forward_order();
        let outcome = self.run_plugin_pass(&order, Hook::PortOpen, true);
        if outcome.failed {
            self.fire_error_hooks(&[Capability::InputPort, Capability::OutputPort], true);
            ctx.record_exit(ExitCode::OperationInitError);
            return Signal::Error;
        }
        if !outcome.all_done {
            return Signal::NoOp;
        }

        if !self.done.contains("operator:init") {
            let OperatorAssembly { operator, plugins, .. } = &mut self.assembly;
            match operator.on_init(&mut PortAccess::new(plugins)) {
                Ok(Progress::Done) => {
                    self.done.insert("operator:init".to_string());
                }
                Ok(Progress::Pending) => return Signal::NoOp,
                Err(err) => {
                    self.log.error(format!("operator init failed: {err:#}"));
                    self.fire_error_hooks(
                        &[Capability::InputPort, Capability::OutputPort],
                        true,
                    );
                    ctx.record_exit(ExitCode::OperationInitError);
                    return Signal::Error;
                }
            }
        }
        Signal::OperationStart
    }

    fn run_operation_running(&mut self, ctx: &mut ExecutionContext) -> Signal {
        let fail = |this: &mut Self, ctx: &mut ExecutionContext, err: String| {
            this.log.error(format!("operation running failed: {err}"));
            this.fire_error_hooks(&[Capability::InputPort, Capability::OutputPort], true);
            ctx.record_exit(ExitCode::OperationRunningError);
            Signal::Error
        };

        // Keep heartbeats and control drains flowing even when the
        // operator itself does no I/O this pass.
        let mut tick_err = None;
        for plugin in self.assembly.plugins.values_mut() {
            if Hook::PortOpen.applies_to(plugin.capabilities()) {
                if let Err(err) = plugin.on_tick() {
                    tick_err = Some(format!("{err:#}"));
                    break;
                }
            }
        }
        if let Some(err) = tick_err {
            return fail(self, ctx, err);
        }

        let OperatorAssembly { operator, plugins, .. } = &mut self.assembly;
        let outcome = match operator.on_running(&mut PortAccess::new(plugins)) {
            Ok(outcome) => outcome,
            Err(err) => return fail(self, ctx, format!("{err:#}")),
        };

        // Commit read offsets even when the operator forgot to: after a
        // crash the channel resumes from here.
        let mut access = PortAccess::new(&mut self.assembly.plugins);
        let mut commit_err = None;
        for input in access.inputs() {
            if let Err(err) = input.commit_current_offset() {
                commit_err = Some(err.to_string());
                break;
            }
        }
        if let Some(err) = commit_err {
            return fail(self, ctx, err);
        }

        match outcome {
            RunOutcome::Completed => Signal::OperationStop,
            RunOutcome::Pending => Signal::NoOp,
            RunOutcome::Auto => {
                let mut access = PortAccess::new(&mut self.assembly.plugins);
                let mut any_retrievable = false;
                let mut check_err = None;
                for input in access.inputs() {
                    match input.can_retrieve() {
                        Ok(true) => {
                            any_retrievable = true;
                            break;
                        }
                        Ok(false) => {}
                        Err(err) => {
                            check_err = Some(err.to_string());
                            break;
                        }
                    }
                }
                if let Some(err) = check_err {
                    return fail(self, ctx, err);
                }
                if any_retrievable {
                    Signal::NoOp
                } else {
                    Signal::OperationStop
                }
            }
        }
    }

    fn run_operation_shutdown(&mut self, ctx: &mut ExecutionContext) -> Signal {
        // The operator shuts down first, while its ports are still usable.
        if !self.done.contains("operator:shutdown") {
            let OperatorAssembly { operator, plugins, .. } = &mut self.assembly;
            match operator.on_shutdown(&mut PortAccess::new(plugins)) {
                Ok(Progress::Done) => {
                    self.done.insert("operator:shutdown".to_string());
                }
                Ok(Progress::Pending) => return Signal::NoOp,
                Err(err) => {
                    // Port closing still proceeds below.
                    self.log.error(format!("operator shutdown failed: {err:#}"));
                    self.phase_failed = true;
                    self.done.insert("operator:shutdown".to_string());
                }
            }
        }

        let order = ctx.reverse_order();
        let outcome = self.run_plugin_pass(&order, Hook::PortClose, false);
        if !outcome.all_done {
            return Signal::NoOp;
        }
        if outcome.failed || self.phase_failed {
            self.fire_error_hooks(&[Capability::InputPort, Capability::OutputPort], true);
            ctx.record_exit(ExitCode::OperationShutdownError);
            return Signal::Error;
        }
        match ctx.mode() {
            ExecutionMode::WithoutResourceDeletion => Signal::ServicesStop,
            _ => Signal::ResourcesDeletion,
        }
    }

    fn run_resource_deletion(&mut self, ctx: &mut ExecutionContext) -> Signal {
        let order = ctx.reverse_order();
        let outcome = self.run_plugin_pass(&order, Hook::ResourceDeletion, false);
        if !outcome.all_done {
            return Signal::NoOp;
        }
        if outcome.failed || self.phase_failed {
            self.fire_error_hooks(&[Capability::Resource], false);
            ctx.record_exit(ExitCode::ResourceDeletionError);
            return Signal::Error;
        }
        Signal::ServicesStop
    }

    fn run_service_shutdown(&mut self, ctx: &mut ExecutionContext) -> Signal {
        let order = ctx.reverse_order();
        let outcome = self.run_plugin_pass(&order, Hook::ServiceShutdown, false);
        if !outcome.all_done {
            return Signal::NoOp;
        }
        if outcome.failed || self.phase_failed {
            self.fire_error_hooks(&[Capability::Service], false);
            ctx.record_exit(ExitCode::ServiceShutdownError);
            return Signal::Error;
        }
        Signal::Kill
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// One pass over `order`, invoking `hook` on every eligible plugin that
    /// has not completed yet. With `break_on_error` the pass stops at the
    /// first failure (creation-side phases); otherwise every remaining
    /// plugin still gets its attempt (shutdown-side phases).
    fn run_plugin_pass(&mut self, order: &[String], hook: Hook, break_on_error: bool) -> PassOutcome {
        let mut all_done = true;
        let mut failed = false;

        for name in order {
            let key = format!("{}:{name}", hook.name());
            if self.done.contains(&key) {
                continue;
            }
            let Some(plugin) = self.assembly.plugins.get_mut(name) else {
                continue;
            };
            if !hook.applies_to(plugin.capabilities()) {
                self.done.insert(key);
                continue;
            }
            match hook.invoke(plugin.as_mut()) {
                Ok(Progress::Done) => {
                    self.done.insert(key);
                }
                Ok(Progress::Pending) => {
                    all_done = false;
                }
                Err(err) => {
                    self.log.error(format!("{} failed in '{name}': {err:#}", hook.name()));
                    failed = true;
                    // Remember the failure across passes; other plugins may
                    // still be pending when this pass ends.
                    self.phase_failed = true;
                    // A failed step is not retried.
                    self.done.insert(key);
                    if break_on_error {
                        break;
                    }
                }
            }
        }

        PassOutcome { failed, all_done }
    }

    fn fire_error_hooks(&mut self, caps: &[Capability], include_operator: bool) {
        for plugin in self.assembly.plugins.values_mut() {
            if plugin.capabilities().iter().any(|c| caps.contains(c)) {
                plugin.on_error();
            }
        }
        if include_operator {
            self.assembly.operator.on_error();
        }
    }

    fn fire_interrupt_hooks(&mut self) {
        for plugin in self.assembly.plugins.values_mut() {
            plugin.on_interrupt();
        }
        self.assembly.operator.on_interrupt();
    }
}
