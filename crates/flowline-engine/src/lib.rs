//! Operator execution engine.
//!
//! An operator is assembled from business logic (the [`Operator`] trait) and
//! attached plugins (ports, services, resource handlers). The
//! [`OperatorExecutor`] drives the whole assembly through a phased state
//! machine: services start, resources are created, ports open, the operator
//! runs, and every shutdown route guarantees that created resources see a
//! deletion attempt and started services a shutdown attempt.

pub mod context;
pub mod machine;
pub mod params;
pub mod plugin;
pub mod ports;
pub mod signal;

pub use context::{ExecutionContext, OperatorAssembly};
pub use machine::{ExecutionMode, InterruptHandle, OperatorExecutor, OperatorState};
pub use plugin::{Capability, Operator, Plugin, Progress, RunOutcome};
pub use ports::{ConnectionSpec, InputPort, OutputPort, PortAccess};
pub use signal::Signal;
