//! Consumer endpoint of a channel.

use std::sync::Arc;

use flowline_types::config::ChannelTuning;
use flowline_types::control::ControlMessage;
use flowline_types::endpoint::{EndpointDescriptor, EndpointRole};
use flowline_types::error::{CoreError, CoreResult};
use flowline_types::record::Record;
use flowline_types::state::ChannelState;
use flowline_types::time::now_millis;
use flowline_transport::{Transport, TransportKind};

use crate::logctx::ContextLogger;
use crate::metrics::ChannelMetrics;
use crate::status::StatusBoard;
use crate::{
    assign, MAX_POLL_RECORDS, READER_COMMIT_GROUP, READER_STATE_SUFFIX, WRITER_STATE_SUFFIX,
};

/// Consumer endpoint: owns the channel's resource lifecycle, tracks the
/// consumption position, and monitors writer health.
///
/// One reader aggregates every writer feeding the channel; `has_records` and
/// `read_records` reflect the union. Record order is preserved within one
/// writer's stream only.
///
/// All operations are single non-blocking attempts; the port layer loops
/// them under its own timeout budget and calls [`tick`](Self::tick) to keep
/// heartbeats flowing.
pub struct ChannelReader {
    channel: String,
    location: String,
    descriptor: EndpointDescriptor,
    tuning: ChannelTuning,
    transport: Arc<dyn Transport>,
    log: ContextLogger,

    state: ChannelState,
    data_partitions: u32,
    assigned_partition: u32,

    read_position: u64,
    initial_position: u64,
    offset_loaded: bool,
    read_count: u64,
    last_committed: u64,

    writer_ctrl_position: u64,
    reader_ctrl_position: u64,
    board: StatusBoard,
    metrics: ChannelMetrics,
    payload: serde_json::Map<String, serde_json::Value>,
    last_heartbeat_ms: i64,
}

impl ChannelReader {
    /// Create an unopened reader for `channel` at `location`.
    ///
    /// The channel name is the group principal's name, shared by every
    /// replica; the descriptor identifies this particular member.
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        location: impl Into<String>,
        descriptor: EndpointDescriptor,
        tuning: ChannelTuning,
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
            assigned_partition: 0,
            read_position: 0,
            initial_position: 0,
            offset_loaded: false,
            read_count: 0,
            last_committed: 0,
            writer_ctrl_position: 0,
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

    fn desired_partitions(&self) -> u32 {
        match self.transport.kind() {
            TransportKind::Queue => 1,
            TransportKind::Log => self.descriptor.group_size.max(1),
        }
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
    pub fn read_count(&self) -> u64 {
        self.read_count
    }

    #[must_use]
    pub fn read_position(&self) -> u64 {
        self.read_position
    }

    #[must_use]
    pub fn offset_loaded(&self) -> bool {
        self.offset_loaded
    }

    /// Create the channel's transport resources: the data resource (one
    /// partition per group member on log transports) and the two control
    /// resources. Idempotent; a data resource whose partition layout no
    /// longer matches the group size is recreated.
    ///
    /// # Errors
    ///
    /// Surfaces transport failures as [`CoreError`].
    pub fn create_resource(&mut self) -> CoreResult<()> {
        let desired = self.desired_partitions();
        if self.transport.resource_exists(self.data_resource())?
            && self.transport.kind() == TransportKind::Log
            && self.transport.partition_count(self.data_resource())? != desired
        {
            self.log.warn(format!(
                "partition layout changed, recreating data resource {}",
                self.data_resource()
            ));
            self.transport.delete_resource(self.data_resource())?;
        }
        self.transport.create_resource(self.data_resource(), desired)?;
        self.transport.create_resource(&self.writer_state_resource(), 1)?;
        self.transport.create_resource(&self.reader_state_resource(), 1)?;
        self.log.debug("resources created");
        Ok(())
    }

    /// Delete the channel's transport resources. Only ever called from the
    /// resource-deletion phase, and only on the group principal.
    ///
    /// # Errors
    ///
    /// Surfaces transport failures as [`CoreError`].
    pub fn delete_resource(&mut self) -> CoreResult<()> {
        self.transport.delete_resource(self.data_resource())?;
        self.transport.delete_resource(&self.writer_state_resource())?;
        self.transport.delete_resource(&self.reader_state_resource())?;
        self.log.debug("resources deleted");
        Ok(())
    }

    /// One non-blocking open attempt. Returns `Ok(false)` while the channel
    /// resources are not available yet; publishes `Opened` and starts
    /// tracking peers once they are.
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

        self.data_partitions = self.transport.partition_count(self.data_resource())?;
        self.assigned_partition = match self.transport.kind() {
            TransportKind::Queue => 0,
            TransportKind::Log => {
                assign::partition_for(self.descriptor.group_index, self.data_partitions)
            }
        };

        self.publish(ChannelState::Opened)?;
        self.state = ChannelState::Opened;
        self.drain_control()?;
        self.log.debug(format!(
            "channel opened, partition {}/{}",
            self.assigned_partition, self.data_partitions
        ));
        Ok(true)
    }

    /// Load the committed consumption position for this group member and
    /// seek to it. Returns 0 when nothing was ever committed (or on queue
    /// transports, where the pop itself acknowledges consumption).
    ///
    /// # Errors
    ///
    /// Surfaces transport failures as [`CoreError`].
    pub fn load_resume_offset(&mut self) -> CoreResult<u64> {
        let committed = match self.transport.kind() {
            TransportKind::Queue => None,
            TransportKind::Log => self.transport.committed(
                self.data_resource(),
                READER_COMMIT_GROUP,
                self.assigned_partition,
            )?,
        };
        let position = committed.unwrap_or(0);
        self.read_position = position;
        self.initial_position = position;
        self.last_committed = position;
        self.offset_loaded = true;
        self.log.debug(format!("resume offset loaded: {position}"));
        Ok(position)
    }

    /// Whether data records are currently available, across all writers.
    ///
    /// # Errors
    ///
    /// Surfaces transport failures as [`CoreError`].
    pub fn has_records(&self) -> CoreResult<bool> {
        match self.transport.kind() {
            TransportKind::Queue => Ok(self.transport.backlog(self.data_resource())? > 0),
            TransportKind::Log => Ok(self
                .transport
                .end_position(self.data_resource(), self.assigned_partition)?
                > self.read_position),
        }
    }

    /// Non-blocking poll of available records; may return an empty batch.
    ///
    /// # Errors
    ///
    /// Surfaces transport failures as [`CoreError`].
    pub fn read_records(&mut self) -> CoreResult<Vec<Record>> {
        self.tick()?;
        let records = match self.transport.kind() {
            TransportKind::Queue => self.transport.pop(self.data_resource(), MAX_POLL_RECORDS)?,
            TransportKind::Log => {
                let records = self.transport.read_from(
                    self.data_resource(),
                    self.assigned_partition,
                    self.read_position,
                    MAX_POLL_RECORDS,
                )?;
                self.read_position += records.len() as u64;
                records
            }
        };
        let count = records.len() as u64;
        if count > 0 {
            self.read_count += count;
            self.payload.insert("receivedRecordCount".into(), self.read_count.into());
        }
        if self.tuning.metrics_enabled {
            self.metrics.record_io(count);
        }
        Ok(records)
    }

    /// Commit a consumption position. With `compensate`, `offset` is
    /// relative to the resume offset (what the operator counted itself);
    /// otherwise it is absolute. Commits never move backwards: a lower
    /// offset is logged and ignored.
    ///
    /// # Errors
    ///
    /// Returns a runtime [`CoreError`] when a compensated offset lies past
    /// the current read position; surfaces transport failures.
    pub fn commit_offset(&mut self, offset: u64, compensate: bool) -> CoreResult<()> {
        if self.transport.kind() == TransportKind::Queue {
            return Ok(());
        }
        let mut to_commit = offset;
        if compensate {
            to_commit += self.initial_position;
            if to_commit > self.read_position {
                return Err(CoreError::runtime(
                    "OFFSET_OUT_OF_RANGE",
                    format!(
                        "offset to commit ({to_commit}) exceeds read position ({})",
                        self.read_position
                    ),
                ));
            }
        }
        if to_commit < self.last_committed {
            self.log.warn(format!(
                "offset to commit ({to_commit}) is lower than the last committed ({}), ignored",
                self.last_committed
            ));
            return Ok(());
        }
        if to_commit == self.last_committed {
            return Ok(());
        }
        self.transport.commit(
            self.data_resource(),
            READER_COMMIT_GROUP,
            self.assigned_partition,
            to_commit,
        )?;
        self.last_committed = to_commit;
        Ok(())
    }

    /// Commit everything read so far.
    ///
    /// # Errors
    ///
    /// Surfaces transport failures as [`CoreError`].
    pub fn commit_current_offset(&mut self) -> CoreResult<()> {
        self.commit_offset(self.read_position, false)
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

    /// Whether closing now loses nothing: a group principal waits until
    /// every replica reader reported itself finished.
    #[must_use]
    pub fn can_close(&self) -> bool {
        if !self.descriptor.is_principal() || self.descriptor.group_size <= 1 {
            return true;
        }
        if self.board.connected_count(EndpointRole::Reader) == 0 {
            return true;
        }
        self.board.finished_count(EndpointRole::Reader)
            >= (self.descriptor.group_size - 1) as usize
    }

    /// Close the channel: announce `Stopped` (when started) and `Closed`,
    /// best-effort. An errored channel stays errored so peers retain the
    /// error information.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for parity with the rest of the
    /// lifecycle surface.
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

    /// Heartbeat and control maintenance: re-publishes the current state
    /// when the heartbeat interval elapsed and drains peer control
    /// messages. Called from every poll-loop pass.
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
            EndpointRole::Reader,
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
        self.transport.append(&self.reader_state_resource(), 0, bytes)?;
        self.last_heartbeat_ms = now_millis();
        Ok(())
    }

    fn drain_control(&mut self) -> CoreResult<()> {
        let writer_resource = self.writer_state_resource();
        self.writer_ctrl_position = drain_resource(
            &*self.transport,
            &writer_resource,
            self.writer_ctrl_position,
            &mut self.board,
            &self.log,
        )?;
        // The principal of a replicated group also follows its replicas so
        // it can hold the channel open until all of them finished.
        if self.descriptor.is_principal() && self.descriptor.group_size > 1 {
            let reader_resource = self.reader_state_resource();
            self.reader_ctrl_position = drain_resource(
                &*self.transport,
                &reader_resource,
                self.reader_ctrl_position,
                &mut self.board,
                &self.log,
            )?;
        }
        Ok(())
    }
}

/// Pull all pending control messages from `resource` into `board`,
/// returning the new read position. Shared with the writer side.
pub(crate) fn drain_resource(
    transport: &dyn Transport,
    resource: &str,
    mut position: u64,
    board: &mut StatusBoard,
    log: &ContextLogger,
) -> CoreResult<u64> {
    loop {
        let batch = transport.read_from(resource, 0, position, MAX_POLL_RECORDS)?;
        if batch.is_empty() {
            return Ok(position);
        }
        position += batch.len() as u64;
        for record in batch {
            match ControlMessage::from_bytes(&record.payload) {
                Ok(msg) => board.observe(&msg),
                Err(err) => {
                    log.warn(format!("discarding malformed control message: {err}"));
                }
            }
        }
    }
}
