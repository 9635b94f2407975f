//! Producer endpoint of a channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flowline_types::config::ChannelTuning;
use flowline_types::control::ControlMessage;
use flowline_types::endpoint::{EndpointDescriptor, EndpointRole};
use flowline_types::error::{CoreError, CoreResult};
use flowline_types::state::ChannelState;
use flowline_types::time::now_millis;
use flowline_transport::{Transport, TransportKind};

use crate::backoff::poll_backoff;
use crate::logctx::ContextLogger;
use crate::metrics::ChannelMetrics;
use crate::reader::drain_resource;
use crate::status::StatusBoard;
use crate::{READER_STATE_SUFFIX, WRITER_STATE_SUFFIX};

/// Producer endpoint: waits for reader readiness, emits data records and
/// heartbeats.
///
/// The matching reader owns resource creation, so `open` only attaches; the
/// writer synchronizes on reader *readiness*, not on resource existence by
/// itself. On log transports records are distributed round-robin across the
/// data partitions; each partition is one reader replica's shard.
pub struct ChannelWriter {
    channel: String,
    location: String,
    descriptor: EndpointDescriptor,
    tuning: ChannelTuning,
    transport: Arc<dyn Transport>,
    log: ContextLogger,

    state: ChannelState,
    data_partitions: u32,
    next_partition: u32,
    written_count: u64,
    /// Upper bound for blocking on reader readiness, ms. 0 = unbounded.
    ready_timeout_ms: u64,

    reader_ctrl_position: u64,
    board: StatusBoard,
    metrics: ChannelMetrics,
    payload: serde_json::Map<String, serde_json::Value>,
    last_heartbeat_ms: i64,
}

impl ChannelWriter {
    /// Create an unopened writer for `channel` at `location`.
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        location: impl Into<String>,
        descriptor: EndpointDescriptor,
        tuning: ChannelTuning,
        ready_timeout_ms: u64,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let channel = channel.into();
        let log = ContextLogger::new(
            format!("{}/{channel}", descriptor.instance_id),
            &tuning.log_level,
        );
        let board = StatusBoard::new(
            descriptor.instance_id.clone(),
            tuning.liveness_timeout_ms,
            log.clone(),
        );
        Self {
            channel,
            location: location.into(),
            descriptor,
            tuning,
            transport,
            log,
            state: ChannelState::Unopened,
            data_partitions: 1,
            next_partition: 0,
            written_count: 0,
            ready_timeout_ms,
            reader_ctrl_position: 0,
            board,
            metrics: ChannelMetrics::new(),
            payload: serde_json::Map::new(),
            last_heartbeat_ms: 0,
        }
    }

    fn data_resource(&self) -> &str {
        &self.channel
    }

    fn writer_state_resource(&self) -> String {
        format!("{}{WRITER_STATE_SUFFIX}", self.channel)
    }

    fn reader_state_resource(&self) -> String {
        format!("{}{READER_STATE_SUFFIX}", self.channel)
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn descriptor(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.is_ready()
    }

    #[must_use]
    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    #[must_use]
    pub fn logger(&self) -> &ContextLogger {
        &self.log
    }

    #[must_use]
    pub fn written_count(&self) -> u64 {
        self.written_count
    }

    /// Resource creation is reader-owned; the writer only validates its
    /// addressing.
    ///
    /// # Errors
    ///
    /// Returns a configuration [`CoreError`] when the location is empty.
    pub fn create_resource(&mut self) -> CoreResult<()> {
        if self.location.is_empty() {
            return Err(CoreError::configuration(
                "MISSING_LOCATION",
                "channel location must be provided",
            ));
        }
        Ok(())
    }

    /// Resource deletion is reader-owned. No-op.
    ///
    /// # Errors
    ///
    /// Infallible; fallible signature for lifecycle symmetry.
    pub fn delete_resource(&mut self) -> CoreResult<()> {
        Ok(())
    }

    /// One non-blocking open attempt: attach to existing resources and
    /// announce `Opened`. Returns `Ok(false)` while the reader has not
    /// created the resources yet.
    ///
    /// # Errors
    ///
    /// Surfaces transport failures as [`CoreError`].
    pub fn open_attempt(&mut self) -> CoreResult<bool> {
        if self.state != ChannelState::Unopened {
            return Ok(true);
        }
        for resource in
            [self.data_resource().to_string(), self.writer_state_resource(), self.reader_state_resource()]
        {
            if !self.transport.resource_exists(&resource)? {
                self.log.debug(format!("waiting for resource {resource}"));
                return Ok(false);
            }
        }
        self.data_partitions = self.transport.partition_count(self.data_resource())?.max(1);
        self.publish(ChannelState::Opened)?;
        self.state = ChannelState::Opened;
        self.drain_control()?;
        self.log.debug(format!("channel opened, {} data partition(s)", self.data_partitions));
        Ok(true)
    }

    /// Write a batch of records, blocking until at least one peer reader
    /// signals readiness (bounded by the configured timeout; 0 waits
    /// indefinitely). Send failures surface to the caller.
    ///
    /// # Errors
    ///
    /// Returns a connectivity [`CoreError`] on readiness timeout, a runtime
    /// one when the channel is not open, and surfaces transport failures.
    pub fn write_records(&mut self, records: &[Vec<u8>]) -> CoreResult<()> {
        if !self.state.is_ready() {
            return Err(CoreError::runtime(
                "CHANNEL_NOT_OPEN",
                format!("cannot write in state {}", self.state),
            ));
        }
        self.wait_for_reader_ready()?;

        for payload in records {
            self.transport.append(self.data_resource(), self.next_partition, payload.clone())?;
            if self.transport.kind() == TransportKind::Log && self.data_partitions > 1 {
                self.next_partition = (self.next_partition + 1) % self.data_partitions;
            }
        }

        let count = records.len() as u64;
        self.written_count += count;
        self.payload.insert("sentRecordCount".into(), self.written_count.into());
        if self.tuning.metrics_enabled {
            self.metrics.record_io(count);
        }
        Ok(())
    }

    fn wait_for_reader_ready(&mut self) -> CoreResult<()> {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            self.tick()?;
            if self.board.ready_count(EndpointRole::Reader) > 0 {
                return Ok(());
            }
            attempt += 1;
            if self.ready_timeout_ms > 0
                && started.elapsed() >= Duration::from_millis(self.ready_timeout_ms)
            {
                return Err(CoreError::connectivity(
                    "READER_READY_TIMEOUT",
                    format!("no reader became ready within {} ms", self.ready_timeout_ms),
                ));
            }
            std::thread::sleep(poll_backoff(attempt));
        }
    }

    /// Announce `Started`.
    ///
    /// # Errors
    ///
    /// Returns a runtime [`CoreError`] when the transition is illegal.
    pub fn start(&mut self) -> CoreResult<()> {
        self.advance(ChannelState::Started)
    }

    /// Announce `Stopped`.
    ///
    /// # Errors
    ///
    /// Returns a runtime [`CoreError`] when the transition is illegal.
    pub fn stop(&mut self) -> CoreResult<()> {
        self.advance(ChannelState::Stopped)
    }

    fn advance(&mut self, to: ChannelState) -> CoreResult<()> {
        if self.state == to {
            return Ok(());
        }
        if !self.state.can_transition(to) {
            return Err(CoreError::runtime(
                "INVALID_TRANSITION",
                format!("cannot transition channel from {} to {to}", self.state),
            ));
        }
        self.publish(to)?;
        self.state = to;
        Ok(())
    }

    /// Writers never block closing on their peers.
    #[must_use]
    pub fn can_close(&self) -> bool {
        true
    }

    /// Close the channel: announce `Stopped` (when started) and `Closed`,
    /// best-effort. An errored channel stays errored.
    ///
    /// # Errors
    ///
    /// Infallible today; fallible signature for lifecycle symmetry.
    pub fn close(&mut self) -> CoreResult<()> {
        match self.state {
            ChannelState::Unopened | ChannelState::Closed | ChannelState::Errored => Ok(()),
            _ => {
                if self.state == ChannelState::Started {
                    if let Err(err) = self.publish(ChannelState::Stopped) {
                        self.log.error(format!("failed to announce Stopped at close: {err}"));
                    }
                }
                if let Err(err) = self.publish(ChannelState::Closed) {
                    self.log.error(format!("failed to announce Closed: {err}"));
                }
                self.state = ChannelState::Closed;
                self.log.debug("channel closed");
                Ok(())
            }
        }
    }

    /// Announce `Errored`. No-op when already closed.
    pub fn mark_errored(&mut self) {
        if !self.state.can_transition(ChannelState::Errored) {
            return;
        }
        if let Err(err) = self.publish(ChannelState::Errored) {
            self.log.error(format!("failed to announce Errored: {err}"));
        }
        self.state = ChannelState::Errored;
    }

    /// Heartbeat and control maintenance, mirroring the reader side.
    ///
    /// # Errors
    ///
    /// Surfaces transport failures as [`CoreError`].
    pub fn tick(&mut self) -> CoreResult<()> {
        if self.state == ChannelState::Unopened {
            return Ok(());
        }
        let now = now_millis();
        if now - self.last_heartbeat_ms
            >= i64::try_from(self.tuning.heartbeat_interval_ms).unwrap_or(i64::MAX)
        {
            self.publish(self.state)?;
        }
        self.drain_control()
    }

    fn publish(&mut self, state: ChannelState) -> CoreResult<()> {
        let mut msg = ControlMessage::new(
            &self.descriptor.instance_id,
            EndpointRole::Writer,
            self.descriptor.group_index,
            state,
        );
        let mut payload = self.payload.clone();
        if self.tuning.metrics_enabled {
            payload.insert("io".into(), self.metrics.snapshot());
        }
        if !payload.is_empty() {
            msg = msg.with_payload(serde_json::Value::Object(payload));
        }
        let bytes = msg
            .to_bytes()
            .map_err(|e| CoreError::runtime("ENCODE_CONTROL", e.to_string()))?;
        self.transport.append(&self.writer_state_resource(), 0, bytes)?;
        self.last_heartbeat_ms = now_millis();
        Ok(())
    }

    fn drain_control(&mut self) -> CoreResult<()> {
        let reader_resource = self.reader_state_resource();
        self.reader_ctrl_position = drain_resource(
            &*self.transport,
            &reader_resource,
            self.reader_ctrl_position,
            &mut self.board,
            &self.log,
        )?;
        Ok(())
    }
}
