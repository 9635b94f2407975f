//! Port adapters bridging operator I/O calls to channel endpoints.
//!
//! One [`InputPort`] owns exactly one [`ChannelReader`], no matter how many
//! output ports feed it. One [`OutputPort`] owns one [`ChannelWriter`] per
//! connected input port. The connection lists come from the pipeline graph,
//! an external collaborator, as plain [`ConnectionSpec`]s.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use flowline_channels::{ChannelReader, ChannelWriter, ContextLogger};
use flowline_types::config::{InputPortConfig, OutputPortConfig};
use flowline_types::endpoint::{EndpointDescriptor, EndpointRole};
use flowline_types::error::{CoreError, CoreResult};
use flowline_types::record::Record;
use flowline_types::state::ChannelState;
use flowline_transport::Transport;

use crate::params::{resolve_params, ParamMap};
use crate::plugin::{Capability, Plugin, Progress};

/// One edge of the pipeline connection graph, as seen from a port.
///
/// For an input port: a connected output port (`id` = its instance id,
/// `group_size` = its replication group size). For an output port: a
/// connected input port (`id` = the reader group's channel name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
    pub id: String,
    pub group_size: u32,
}

impl ConnectionSpec {
    #[must_use]
    pub fn new(id: impl Into<String>, group_size: u32) -> Self {
        Self { id: id.into(), group_size: group_size.max(1) }
    }
}

fn parse_config<T: serde::de::DeserializeOwned>(mut params: ParamMap) -> CoreResult<T> {
    resolve_params(&mut params)?;
    serde_json::from_value(serde_json::Value::Object(params))
        .map_err(|e| CoreError::configuration("INVALID_PARAMETERS", e.to_string()))
}

// ---------------------------------------------------------------------------
// Input port
// ---------------------------------------------------------------------------

/// Consumer port: owns the channel reader and its resource lifecycle.
pub struct InputPort {
    name: String,
    config: InputPortConfig,
    reader: ChannelReader,
    /// Total writers expected to connect: sum of connected output ports'
    /// group sizes.
    expected_outputs: usize,
    is_principal: bool,
    error_occurred: bool,
    resource_created: bool,
    resource_deleted: bool,
    connections_checked: bool,
    open_wait_start: Option<Instant>,
    log: ContextLogger,
}

impl std::fmt::Debug for InputPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputPort")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("expected_outputs", &self.expected_outputs)
            .field("is_principal", &self.is_principal)
            .field("error_occurred", &self.error_occurred)
            .field("resource_created", &self.resource_created)
            .field("resource_deleted", &self.resource_deleted)
            .field("connections_checked", &self.connections_checked)
            .field("open_wait_start", &self.open_wait_start)
            .finish_non_exhaustive()
    }
}

impl InputPort {
    /// Build an input port from raw parameters.
    ///
    /// `channel` is the reader group's shared channel name (the principal's
    /// name); `connections` lists the output ports expected to feed it.
    ///
    /// # Errors
    ///
    /// Returns a configuration [`CoreError`] on malformed parameters or
    /// unresolved environment references.
    pub fn from_params(
        name: impl Into<String>,
        descriptor: EndpointDescriptor,
        channel: impl Into<String>,
        connections: &[ConnectionSpec],
        transport: Arc<dyn Transport>,
        params: ParamMap,
    ) -> CoreResult<Self> {
        let name = name.into();
        let config: InputPortConfig = parse_config(params)?;
        let log = ContextLogger::new(name.clone(), &config.channel_config.log_level);
        let reader = ChannelReader::new(
            channel,
            config.channel_location.clone().unwrap_or_default(),
            descriptor.clone(),
            config.channel_config.clone(),
            transport,
        );
        Ok(Self {
            name,
            config,
            reader,
            expected_outputs: connections.iter().map(|c| c.group_size as usize).sum(),
            is_principal: descriptor.is_principal(),
            error_occurred: false,
            resource_created: false,
            resource_deleted: false,
            connections_checked: false,
            open_wait_start: None,
            log,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &InputPortConfig {
        &self.config
    }

    #[must_use]
    pub fn reader(&self) -> &ChannelReader {
        &self.reader
    }

    fn check_open_timeout(&mut self) -> CoreResult<()> {
        if self.config.port_open_timeout_ms == 0 {
            return Ok(());
        }
        let started = *self.open_wait_start.get_or_insert_with(Instant::now);
        if started.elapsed() >= Duration::from_millis(self.config.port_open_timeout_ms) {
            return Err(CoreError::connectivity(
                "PORT_OPEN_TIMEOUT",
                format!("timeout exceeded {} ms", self.config.port_open_timeout_ms),
            ));
        }
        Ok(())
    }

    /// Whether records are currently available. Under sequential mode this
    /// stays `false` until every connected writer reported itself finished.
    ///
    /// # Errors
    ///
    /// Surfaces transport failures as [`CoreError`].
    pub fn has_records(&self) -> CoreResult<bool> {
        if self.config.sequential_mode_enabled
            && self.reader.board().any_active(EndpointRole::Writer)
        {
            return Ok(false);
        }
        self.reader.has_records()
    }

    /// Poll available records (non-blocking; may return an empty batch).
    ///
    /// # Errors
    ///
    /// Surfaces transport failures as [`CoreError`].
    pub fn retrieve(&mut self) -> CoreResult<Vec<Record>> {
        if self.config.sequential_mode_enabled
            && self.reader.board().any_active(EndpointRole::Writer)
        {
            self.reader.tick()?;
            return Ok(Vec::new());
        }
        self.reader.read_records()
    }

    /// Whether this port may still see records: either some are buffered
    /// now, or not every expected writer has finished yet.
    ///
    /// # Errors
    ///
    /// Returns a runtime [`CoreError`] when the channel is not open.
    pub fn can_retrieve(&self) -> CoreResult<bool> {
        if !self.reader.is_open() {
            return Err(CoreError::runtime(
                "PORT_NOT_OPEN",
                format!("can_retrieve is only allowed on an open port ({})", self.name),
            ));
        }
        let finished = self.reader.board().finished_count(EndpointRole::Writer);
        Ok(self.has_records()? || self.expected_outputs > finished)
    }

    /// Commit everything read so far.
    ///
    /// # Errors
    ///
    /// Surfaces transport failures as [`CoreError`].
    pub fn commit_current_offset(&mut self) -> CoreResult<()> {
        self.reader.commit_current_offset()
    }

    /// Commit an operator-counted offset (relative to the resume offset).
    ///
    /// # Errors
    ///
    /// Surfaces transport failures as [`CoreError`].
    pub fn commit_offset(&mut self, offset: u64) -> CoreResult<()> {
        self.reader.commit_offset(offset, true)
    }
}

impl Plugin for InputPort {
    fn capabilities(&self) -> &[Capability] {
        &[Capability::Resource, Capability::InputPort]
    }

    fn missing_parameters(&self) -> Vec<String> {
        if self.config.channel_location.is_none() {
            vec!["channelLocation".to_string()]
        } else {
            Vec::new()
        }
    }

    fn on_resource_creation(&mut self) -> Result<Progress> {
        // Replicas attach to existing resources and never create them.
        if !self.is_principal || self.resource_created {
            return Ok(Progress::Done);
        }
        self.reader.create_resource()?;
        self.resource_created = true;
        Ok(Progress::Done)
    }

    fn on_resource_deletion(&mut self) -> Result<Progress> {
        if !self.is_principal || self.resource_deleted {
            return Ok(Progress::Done);
        }
        // Never delete after an error: a restarted principal must be able
        // to attach to the same resources and resume.
        if self.error_occurred {
            self.log.debug("skipping resource deletion after error");
            return Ok(Progress::Done);
        }
        self.reader.delete_resource()?;
        self.resource_deleted = true;
        Ok(Progress::Done)
    }

    fn on_port_open(&mut self) -> Result<Progress> {
        if !self.reader.is_open() {
            if !self.reader.open_attempt()? {
                self.check_open_timeout()?;
                self.log.debug("waiting for channel to open");
                return Ok(Progress::Pending);
            }
        }

        if !self.reader.offset_loaded() {
            let offset = self.reader.load_resume_offset()?;
            self.log.debug(format!("initialized offset: {offset}"));
        }
        if self.reader.state() == ChannelState::Opened {
            self.reader.start()?;
        }
        self.reader.tick()?;

        // Wait for connected outputs before declaring the port open.
        if !self.connections_checked {
            if self.expected_outputs > 0 {
                let connected = self.reader.board().connected_count(EndpointRole::Writer);
                let complete = if self.config.sync_connections_open {
                    connected >= self.expected_outputs
                } else {
                    connected > 0
                };
                if !complete {
                    self.check_open_timeout()?;
                    self.log.debug(format!(
                        "waiting for output connections ({connected}/{})",
                        self.expected_outputs
                    ));
                    return Ok(Progress::Pending);
                }
            }
            self.connections_checked = true;
            self.open_wait_start = None;
        }

        // Sequential mode delays readiness until every upstream finished.
        if self.config.sequential_mode_enabled
            && self.reader.board().any_active(EndpointRole::Writer)
        {
            self.log.debug("waiting for output channel(s) to finish");
            return Ok(Progress::Pending);
        }

        Ok(Progress::Done)
    }

    fn on_port_close(&mut self) -> Result<Progress> {
        if matches!(
            self.reader.state(),
            ChannelState::Opened | ChannelState::Started | ChannelState::Stopped
        ) {
            if self.reader.can_close() {
                self.reader.close()?;
            } else {
                self.reader.tick()?;
                self.log.debug("waiting for channel to close");
                return Ok(Progress::Pending);
            }
        }
        Ok(Progress::Done)
    }

    fn on_tick(&mut self) -> Result<()> {
        self.reader.tick()?;
        Ok(())
    }

    fn on_error(&mut self) {
        self.error_occurred = true;
        self.reader.mark_errored();
    }

    fn on_interrupt(&mut self) {
        self.log.warn("interrupted by external signal");
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Output port
// ---------------------------------------------------------------------------

/// Producer port: owns one channel writer per connected input port.
pub struct OutputPort {
    name: String,
    config: OutputPortConfig,
    writers: Vec<ChannelWriter>,
    is_principal: bool,
    error_occurred: bool,
    resource_created: bool,
    resource_deleted: bool,
    close_failed: BTreeSet<usize>,
    open_wait_start: Option<Instant>,
    log: ContextLogger,
}

impl OutputPort {
    /// Build an output port from raw parameters.
    ///
    /// `connections` lists the input ports this port feeds; each one gets
    /// its own writer over that reader group's channel.
    ///
    /// # Errors
    ///
    /// Returns a configuration [`CoreError`] on malformed parameters or
    /// unresolved environment references.
    pub fn from_params(
        name: impl Into<String>,
        descriptor: EndpointDescriptor,
        connections: &[ConnectionSpec],
        transport: Arc<dyn Transport>,
        params: ParamMap,
    ) -> CoreResult<Self> {
        let name = name.into();
        let config: OutputPortConfig = parse_config(params)?;
        let log = ContextLogger::new(name.clone(), &config.channel_config.log_level);
        let location = config.channel_location.clone().unwrap_or_default();
        let writers = connections
            .iter()
            .map(|conn| {
                ChannelWriter::new(
                    conn.id.clone(),
                    location.clone(),
                    descriptor.clone(),
                    config.channel_config.clone(),
                    config.port_open_timeout_ms,
                    transport.clone(),
                )
            })
            .collect();
        Ok(Self {
            name,
            config,
            writers,
            is_principal: descriptor.is_principal(),
            error_occurred: false,
            resource_created: false,
            resource_deleted: false,
            close_failed: BTreeSet::new(),
            open_wait_start: None,
            log,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn config(&self) -> &OutputPortConfig {
        &self.config
    }

    #[must_use]
    pub fn writers(&self) -> &[ChannelWriter] {
        &self.writers
    }

    fn check_open_timeout(&mut self) -> CoreResult<()> {
        if self.config.port_open_timeout_ms == 0 {
            return Ok(());
        }
        let started = *self.open_wait_start.get_or_insert_with(Instant::now);
        if started.elapsed() >= Duration::from_millis(self.config.port_open_timeout_ms) {
            return Err(CoreError::connectivity(
                "PORT_OPEN_TIMEOUT",
                format!("timeout exceeded {} ms", self.config.port_open_timeout_ms),
            ));
        }
        Ok(())
    }

    /// Send a batch of records through every connected channel. Blocks per
    /// channel until its reader signals readiness (bounded by
    /// `portOpenTimeoutMs`); failures surface to the caller.
    ///
    /// # Errors
    ///
    /// Surfaces readiness timeouts and transport failures as [`CoreError`].
    pub fn send(&mut self, records: &[Vec<u8>]) -> CoreResult<()> {
        for writer in &mut self.writers {
            writer.write_records(records)?;
        }
        Ok(())
    }
}

impl Plugin for OutputPort {
    fn capabilities(&self) -> &[Capability] {
        &[Capability::Resource, Capability::OutputPort]
    }

    fn missing_parameters(&self) -> Vec<String> {
        if self.config.channel_location.is_none() {
            vec!["channelLocation".to_string()]
        } else {
            Vec::new()
        }
    }

    fn on_resource_creation(&mut self) -> Result<Progress> {
        if !self.is_principal || self.resource_created {
            return Ok(Progress::Done);
        }
        for writer in &mut self.writers {
            writer.create_resource()?;
        }
        if self.writers.is_empty() {
            self.log.warn("no channel reader(s) connected");
        }
        self.resource_created = true;
        Ok(Progress::Done)
    }

    fn on_resource_deletion(&mut self) -> Result<Progress> {
        if !self.is_principal || self.resource_deleted {
            return Ok(Progress::Done);
        }
        if self.error_occurred {
            self.log.debug("skipping resource deletion after error");
            return Ok(Progress::Done);
        }
        let mut failed = Vec::new();
        for writer in &mut self.writers {
            // One failed channel must not abort deletion on the others.
            if let Err(err) = writer.delete_resource() {
                self.log.error(format!("resource deletion failed on {}: {err}", writer.channel()));
                failed.push(writer.channel().to_string());
            }
        }
        self.resource_deleted = true;
        if failed.is_empty() {
            Ok(Progress::Done)
        } else {
            Err(CoreError::resource(
                "RESOURCE_DELETION_FAILED",
                format!("resource deletion failed in channels: {}", failed.join(", ")),
            )
            .into())
        }
    }

    fn on_port_open(&mut self) -> Result<Progress> {
        let mut all_open = true;
        for writer in &mut self.writers {
            if !writer.is_open() {
                if writer.open_attempt()? {
                    writer.logger().debug("channel opened");
                } else {
                    all_open = false;
                }
            }
        }
        if !all_open {
            self.check_open_timeout()?;
            self.log.debug("waiting for channel(s) to open");
            return Ok(Progress::Pending);
        }
        for writer in &mut self.writers {
            if writer.state() == ChannelState::Opened {
                writer.start()?;
            }
        }
        self.open_wait_start = None;
        Ok(Progress::Done)
    }

    fn on_port_close(&mut self) -> Result<Progress> {
        let mut all_closed = true;
        for (idx, writer) in self.writers.iter_mut().enumerate() {
            let closeable = matches!(
                writer.state(),
                ChannelState::Opened | ChannelState::Started | ChannelState::Stopped
            );
            if closeable && !self.close_failed.contains(&idx) {
                if !writer.can_close() {
                    writer.tick()?;
                    all_closed = false;
                    continue;
                }
                // One failed channel must not abort closing the others.
                if let Err(err) = writer.close() {
                    self.log.error(format!("close failed on {}: {err}", writer.channel()));
                    self.close_failed.insert(idx);
                }
            }
        }
        if !all_closed {
            self.log.debug("waiting for channel(s) to close");
            return Ok(Progress::Pending);
        }
        if self.close_failed.is_empty() {
            Ok(Progress::Done)
        } else {
            let names: Vec<String> = self
                .close_failed
                .iter()
                .map(|&idx| self.writers[idx].channel().to_string())
                .collect();
            Err(CoreError::runtime(
                "PORT_CLOSE_FAILED",
                format!("close failed in channels: {}", names.join(", ")),
            )
            .into())
        }
    }

    fn on_tick(&mut self) -> Result<()> {
        for writer in &mut self.writers {
            writer.tick()?;
        }
        Ok(())
    }

    fn on_error(&mut self) {
        self.error_occurred = true;
        for writer in &mut self.writers {
            if writer.is_open() {
                writer.mark_errored();
            }
        }
    }

    fn on_interrupt(&mut self) {
        self.log.warn("interrupted by external signal");
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Port access
// ---------------------------------------------------------------------------

/// Typed port lookup handed to operator hooks.
pub struct PortAccess<'a> {
    plugins: &'a mut std::collections::BTreeMap<String, Box<dyn Plugin>>,
}

impl<'a> PortAccess<'a> {
    #[must_use]
    pub fn new(plugins: &'a mut std::collections::BTreeMap<String, Box<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    /// The input port attached under `name`, if any.
    pub fn input(&mut self, name: &str) -> Option<&mut InputPort> {
        self.plugins.get_mut(name)?.as_any_mut().downcast_mut()
    }

    /// The output port attached under `name`, if any.
    pub fn output(&mut self, name: &str) -> Option<&mut OutputPort> {
        self.plugins.get_mut(name)?.as_any_mut().downcast_mut()
    }

    /// Every attached input port, in attach-name order.
    pub fn inputs(&mut self) -> impl Iterator<Item = &mut InputPort> + '_ {
        self.plugins.values_mut().filter_map(|p| p.as_any_mut().downcast_mut())
    }

    /// Every attached output port, in attach-name order.
    pub fn outputs(&mut self) -> impl Iterator<Item = &mut OutputPort> + '_ {
        self.plugins.values_mut().filter_map(|p| p.as_any_mut().downcast_mut())
    }
}
