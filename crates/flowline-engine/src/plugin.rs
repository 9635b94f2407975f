//! Plugin capability model and the operator trait.
//!
//! Plugins are attached to an operator by an explicit registration call
//! (no reflection or scanning); each one declares the capabilities it takes
//! part in and, optionally, dependencies on other plugins by their attach
//! names. Lifecycle hooks return [`Progress`] so long-running steps can be
//! re-entered cooperatively instead of blocking the control loop.

use std::any::Any;

use anyhow::Result;

use crate::ports::PortAccess;

/// Lifecycle families a plugin can take part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Started before and stopped after everything else.
    Service,
    /// Creates and deletes transport resources.
    Resource,
    /// Consumer side of a channel.
    InputPort,
    /// Producer side of a channel.
    OutputPort,
}

/// Completion state of one cooperative lifecycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The step finished; the callback will not be invoked again in this
    /// phase.
    Done,
    /// Still in progress; the phase re-invokes the callback on its next
    /// pass.
    Pending,
}

impl Progress {
    #[must_use]
    pub fn is_done(self) -> bool {
        self == Self::Done
    }
}

/// A unit attached to an operator, invoked by the execution state machine
/// in dependency order. All hooks default to immediate completion; a plugin
/// implements the ones matching its declared capabilities.
///
/// Hook errors are never propagated raw: the state machine converts them
/// into the `Error` signal and routes execution down the cleanup path.
pub trait Plugin: Send {
    /// Capabilities this plugin takes part in.
    fn capabilities(&self) -> &[Capability];

    /// Attach names of plugins that must run before this one in every
    /// forward phase (and after it in reverse phases).
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Names of required parameters that have no value. A non-empty answer
    /// is a fatal configuration error before execution starts.
    fn missing_parameters(&self) -> Vec<String> {
        Vec::new()
    }

    fn on_service_start(&mut self) -> Result<Progress> {
        Ok(Progress::Done)
    }

    fn on_service_shutdown(&mut self) -> Result<Progress> {
        Ok(Progress::Done)
    }

    fn on_resource_creation(&mut self) -> Result<Progress> {
        Ok(Progress::Done)
    }

    fn on_resource_deletion(&mut self) -> Result<Progress> {
        Ok(Progress::Done)
    }

    fn on_port_open(&mut self) -> Result<Progress> {
        Ok(Progress::Done)
    }

    fn on_port_close(&mut self) -> Result<Progress> {
        Ok(Progress::Done)
    }

    /// Periodic maintenance while the operator is running (heartbeats,
    /// control-plane drains). Invoked once per running-phase pass.
    fn on_tick(&mut self) -> Result<()> {
        Ok(())
    }

    /// A failure was recorded in the current phase. Used by ports to
    /// announce `Errored` to their peers and to suppress resource deletion.
    fn on_error(&mut self) {}

    /// An external interrupt was received.
    fn on_interrupt(&mut self) {}

    /// Typed access for the engine (port lookup by downcast).
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Outcome of one `on_running` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The operator finished its work.
    Completed,
    /// More work remains; run again on the next pass.
    Pending,
    /// Let the engine decide: finish once no input port can retrieve
    /// records anymore. Unsound for cyclic connection graphs: there the
    /// operator must decide completion itself and return `Completed`.
    Auto,
}

/// The business logic of an operator.
pub trait Operator: Send {
    /// Called once ports are open, before the first `on_running` pass.
    fn on_init(&mut self, _ports: &mut PortAccess<'_>) -> Result<Progress> {
        Ok(Progress::Done)
    }

    /// One cooperative processing pass.
    fn on_running(&mut self, ports: &mut PortAccess<'_>) -> Result<RunOutcome>;

    /// Called after the running phase, while ports are still open.
    fn on_shutdown(&mut self, _ports: &mut PortAccess<'_>) -> Result<Progress> {
        Ok(Progress::Done)
    }

    /// A failure was recorded during init/running/shutdown.
    fn on_error(&mut self) {}

    /// An external interrupt was received.
    fn on_interrupt(&mut self) {}
}
