//! Operator assembly and execution context.
//!
//! An [`OperatorAssembly`] is the explicit composition of one operator with
//! its plugins via `attach(name, plugin)`; nothing is discovered by scanning.
//! [`ExecutionContext::build`] validates the assembly (required parameters,
//! dependency cycles) before the first state transition and computes the
//! one topological order reused by every phase.

use std::collections::{BTreeMap, BTreeSet};

use flowline_types::config::OperatorConfig;
use flowline_types::error::{CoreError, CoreResult};
use flowline_types::exit::ExitCode;

use crate::machine::ExecutionMode;
use crate::plugin::{Operator, Plugin};

/// One operator plus its attached plugins.
pub struct OperatorAssembly {
    pub(crate) name: String,
    pub(crate) operator: Box<dyn Operator>,
    pub(crate) plugins: BTreeMap<String, Box<dyn Plugin>>,
    pub(crate) config: OperatorConfig,
}

impl OperatorAssembly {
    #[must_use]
    pub fn new(name: impl Into<String>, operator: Box<dyn Operator>) -> Self {
        Self {
            name: name.into(),
            operator,
            plugins: BTreeMap::new(),
            config: OperatorConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: OperatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Explicitly register a plugin under `name`.
    ///
    /// # Errors
    ///
    /// Returns a configuration [`CoreError`] when the name is taken.
    pub fn attach(&mut self, name: impl Into<String>, plugin: Box<dyn Plugin>) -> CoreResult<()> {
        let name = name.into();
        if self.plugins.contains_key(&name) {
            return Err(CoreError::configuration(
                "DUPLICATE_PLUGIN",
                format!("a plugin named '{name}' is already attached"),
            ));
        }
        self.plugins.insert(name, plugin);
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    #[must_use]
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.keys().map(String::as_str).collect()
    }
}

/// Validated execution state shared by all phases of one run.
#[derive(Debug)]
pub struct ExecutionContext {
    mode: ExecutionMode,
    /// Dependency levels: level 0 holds plugins without dependencies,
    /// level n+1 plugins depending on level ≤ n. Names sorted within a
    /// level for deterministic invocation.
    levels: Vec<Vec<String>>,
    exit_code: ExitCode,
}

impl ExecutionContext {
    /// Validate the assembly and compute the phase invocation order.
    ///
    /// # Errors
    ///
    /// Returns a configuration [`CoreError`] when a required parameter is
    /// missing, a dependency references an unknown plugin, or the declared
    /// dependency graph contains a cycle.
    pub fn build(assembly: &OperatorAssembly, mode: ExecutionMode) -> CoreResult<Self> {
        let mut missing = Vec::new();
        for (name, plugin) in &assembly.plugins {
            for param in plugin.missing_parameters() {
                missing.push(format!("{name}.{param}"));
            }
        }
        if !missing.is_empty() {
            return Err(CoreError::configuration(
                "MISSING_PARAMETERS",
                format!("[{}] missing required parameters: {}", assembly.name, missing.join(", ")),
            ));
        }

        let levels = resolve_dependency_levels(&assembly.plugins, &assembly.name)?;
        Ok(Self { mode, levels, exit_code: ExitCode::Success })
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    #[must_use]
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    /// Plugin names in dependency order (used by create/init/start phases).
    #[must_use]
    pub fn forward_order(&self) -> Vec<String> {
        self.levels.iter().flatten().cloned().collect()
    }

    /// Plugin names in reverse dependency order (used by delete/shutdown
    /// phases).
    #[must_use]
    pub fn reverse_order(&self) -> Vec<String> {
        let mut order = self.forward_order();
        order.reverse();
        order
    }

    /// Record a phase failure. Only the first non-zero code is kept.
    pub fn record_exit(&mut self, code: ExitCode) {
        if self.exit_code == ExitCode::Success {
            self.exit_code = code;
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        self.exit_code
    }
}

/// Kahn's algorithm over the declared plugin dependency edges, producing
/// levels instead of a flat order so related plugins stay grouped.
fn resolve_dependency_levels(
    plugins: &BTreeMap<String, Box<dyn Plugin>>,
    operator_name: &str,
) -> CoreResult<Vec<Vec<String>>> {
    let mut deps: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
    for (name, plugin) in plugins {
        let declared = plugin.dependencies();
        for dep in &declared {
            if !plugins.contains_key(dep) {
                return Err(CoreError::configuration(
                    "UNKNOWN_DEPENDENCY",
                    format!("[{operator_name}] plugin '{name}' depends on unknown plugin '{dep}'"),
                ));
            }
        }
        deps.insert(name.as_str(), declared.into_iter().collect());
    }

    let mut levels = Vec::new();
    let mut resolved: BTreeSet<String> = BTreeSet::new();
    while resolved.len() < plugins.len() {
        // BTreeMap iteration keeps each level name-sorted.
        let level: Vec<String> = deps
            .iter()
            .filter(|(name, d)| {
                !resolved.contains(**name) && d.iter().all(|dep| resolved.contains(dep))
            })
            .map(|(name, _)| (*name).to_string())
            .collect();
        if level.is_empty() {
            let stuck: Vec<&str> = deps
                .keys()
                .copied()
                .filter(|name| !resolved.contains(*name))
                .collect();
            return Err(CoreError::configuration(
                "DEPENDENCY_CYCLE",
                format!(
                    "[{operator_name}] dependency cycle among plugins: {}",
                    stuck.join(", ")
                ),
            ));
        }
        resolved.extend(level.iter().cloned());
        levels.push(level);
    }
    Ok(levels)
}
