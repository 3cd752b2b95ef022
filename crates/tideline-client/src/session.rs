//! The sync session: one live connection following one target timeline.
//!
//! Control flow: `connect` opens the transport and — once it reports open —
//! triggers the snapshot bootstrap. Frames that arrive before bootstrap
//! resolves are buffered; on success the store is seeded, the buffer is
//! sorted by sequence number and replayed, and the session switches to
//! direct dispatch gated by the high-water mark. Every asynchronous
//! continuation carries the generation it was spawned under; a superseded
//! connection's late callbacks are inert.
//!
//! ```text
//!   SessionHandle (Send+Sync)    mpsc     SessionDriver (tokio task)
//!   ┌──────────────────────┐  ────────▶  ┌───────────────────────────┐
//!   │ .connect(target)     │             │ SessionCore state machine │
//!   │ .disconnect()        │  ◀────────  │ TransportLink + bootstrap │
//!   │ .subscribe()         │  broadcast  │ generation-checked events │
//!   └──────────────────────┘             └───────────────────────────┘
//! ```
//!
//! The split mirrors the rest of the engine: `SessionCore` is a plain,
//! synchronous state machine (unit-testable without a runtime); the driver
//! wires it to a [`Transport`] and a [`SnapshotSource`].

use std::sync::Arc;
use std::time::Duration;

use tideline_types::EventFrame;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::bootstrap::{Bootstrap, SnapshotError, SnapshotSource};
use crate::constants::{EVENT_CHANNEL_CAPACITY, MAX_BUFFERED_FRAMES, READY_TIMEOUT};
use crate::dispatch::{DispatchOutcome, EventDispatcher};
use crate::store::{SharedTimeline, TimelineStore};
use crate::transport::{LinkEvent, Transport, TransportLink};

// ============================================================================
// Status + config
// ============================================================================

/// Connection lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// No target set.
    #[default]
    Idle,
    /// Target set, transport opening.
    Connecting,
    /// Transport open, snapshot fetch in flight; inbound frames buffer.
    Bootstrapping,
    /// Bootstrap resolved and buffered frames drained; direct dispatch.
    Connected,
    /// The transport ended cleanly.
    Closed,
    /// The transport or bootstrap failed; see `last_error`.
    Error,
}

impl SessionStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Bootstrapping => "bootstrapping",
            SessionStatus::Connected => "connected",
            SessionStatus::Closed => "closed",
            SessionStatus::Error => "error",
        }
    }

    /// True once bootstrap has resolved and live dispatch is direct.
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionStatus::Connected)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tunables for one session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Bounded wait for the readiness notification after transport open.
    pub ready_timeout: Duration,
    /// Cap on the pre-bootstrap frame buffer; overflow drops oldest.
    pub max_buffered_frames: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ready_timeout: READY_TIMEOUT,
            max_buffered_frames: MAX_BUFFERED_FRAMES,
        }
    }
}

// ============================================================================
// Core state machine
// ============================================================================

/// What `begin_connect` decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectAction {
    /// Already following this target with bootstrap complete; nothing to do.
    AlreadyConnected,
    /// Open a transport under this (freshly bumped) generation.
    Open { generation: u64 },
}

/// What happened to one inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Queued for replay after bootstrap.
    Buffered,
    /// Sequence at or below the high-water mark — an idempotent redelivery.
    AlreadyApplied,
    /// Dispatched to a handler.
    Dispatched(DispatchOutcome),
    /// Stale generation or no active follow.
    Ignored,
}

/// What happened to a bootstrap resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootstrapDisposition {
    /// Store seeded, buffer replayed, session connected.
    Completed { replayed: usize },
    /// Bootstrap failed; session torn down. Retry is the caller's call.
    Failed,
    /// The resolution belonged to a superseded connection.
    Superseded,
}

/// The synchronous sync state machine for one session.
///
/// Owns the dispatcher, the shared timeline, the pre-bootstrap buffer and
/// the high-water mark. The mark is rebuilt from scratch on every
/// reconnect — no cross-connection memory is assumed, since the producer
/// may replay history and items self-deduplicate by version.
pub struct SessionCore {
    status: SessionStatus,
    target_id: Option<String>,
    high_water_mark: u64,
    /// Reconnect token: every async continuation checks it before mutating.
    generation: u64,
    buffer: Vec<EventFrame>,
    last_error: Option<String>,
    fetch_started: bool,
    max_buffered: usize,
    dispatcher: EventDispatcher,
    timeline: SharedTimeline,
}

impl SessionCore {
    /// Create an idle core around a dispatcher and a shared timeline.
    pub fn new(dispatcher: EventDispatcher, timeline: SharedTimeline, max_buffered: usize) -> Self {
        Self {
            status: SessionStatus::Idle,
            target_id: None,
            high_water_mark: 0,
            generation: 0,
            buffer: Vec::new(),
            last_error: None,
            fetch_started: false,
            max_buffered,
            dispatcher,
            timeline,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn target_id(&self) -> Option<&str> {
        self.target_id.as_deref()
    }

    pub fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn timeline(&self) -> SharedTimeline {
        Arc::clone(&self.timeline)
    }

    fn stale(&self, generation: u64) -> bool {
        generation != self.generation
    }

    /// Start (or decline to start) a follow of `target`.
    ///
    /// Idempotent when already connected to the same target. Otherwise any
    /// existing connection is superseded: the generation bumps so its late
    /// callbacks are ignored, and session-local state resets.
    pub fn begin_connect(&mut self, target: &str) -> ConnectAction {
        if self.status == SessionStatus::Connected && self.target_id.as_deref() == Some(target) {
            debug!(target, "already connected, ignoring connect");
            return ConnectAction::AlreadyConnected;
        }

        self.generation += 1;
        self.buffer.clear();
        self.high_water_mark = 0;
        self.last_error = None;
        self.fetch_started = false;
        self.target_id = Some(target.to_string());
        self.status = SessionStatus::Connecting;
        info!(target, generation = self.generation, "connecting");
        ConnectAction::Open {
            generation: self.generation,
        }
    }

    /// The transport reported open. Returns `true` when the session moved
    /// into bootstrapping (the caller should start the bounded ready wait).
    pub fn handle_open(&mut self, generation: u64) -> bool {
        if self.stale(generation) || self.status != SessionStatus::Connecting {
            return false;
        }
        self.status = SessionStatus::Bootstrapping;
        true
    }

    /// The readiness notification arrived (or its bounded wait expired).
    /// Returns `true` exactly once per connection: the caller should fire
    /// the snapshot fetch.
    pub fn handle_ready(&mut self, generation: u64) -> bool {
        if self.stale(generation) || self.status != SessionStatus::Bootstrapping || self.fetch_started
        {
            return false;
        }
        self.fetch_started = true;
        true
    }

    /// One inbound frame from the live channel.
    pub fn handle_frame(&mut self, generation: u64, frame: EventFrame) -> FrameDisposition {
        if self.stale(generation) {
            trace!(generation, "frame from superseded connection, ignoring");
            return FrameDisposition::Ignored;
        }
        match self.status {
            SessionStatus::Connecting | SessionStatus::Bootstrapping => {
                self.buffer_frame(frame);
                FrameDisposition::Buffered
            }
            SessionStatus::Connected => {
                if frame.seq <= self.high_water_mark {
                    trace!(seq = frame.seq, mark = self.high_water_mark, "already applied");
                    return FrameDisposition::AlreadyApplied;
                }
                self.high_water_mark = frame.seq;
                let outcome = {
                    let mut store = self.timeline.lock();
                    self.dispatcher.dispatch(&frame, &mut store)
                };
                FrameDisposition::Dispatched(outcome)
            }
            SessionStatus::Idle | SessionStatus::Closed | SessionStatus::Error => {
                FrameDisposition::Ignored
            }
        }
    }

    /// The snapshot fetch resolved.
    pub fn handle_bootstrap(
        &mut self,
        generation: u64,
        result: Result<Bootstrap, SnapshotError>,
    ) -> BootstrapDisposition {
        if self.stale(generation) || self.status != SessionStatus::Bootstrapping {
            trace!(generation, "bootstrap result for superseded connection, ignoring");
            return BootstrapDisposition::Superseded;
        }
        match result {
            Ok(bootstrap) => {
                {
                    let mut store = self.timeline.lock();
                    self.dispatcher.seed(bootstrap.items, &mut store);
                }
                self.high_water_mark = bootstrap.high_water_mark;

                let mut frames = std::mem::take(&mut self.buffer);
                frames.sort_by_key(|frame| frame.seq);
                let mut replayed = 0;
                for frame in frames {
                    if frame.seq <= self.high_water_mark {
                        trace!(seq = frame.seq, "buffered frame below snapshot frontier");
                        continue;
                    }
                    self.high_water_mark = frame.seq;
                    let mut store = self.timeline.lock();
                    let _ = self.dispatcher.dispatch(&frame, &mut store);
                    replayed += 1;
                }

                self.status = SessionStatus::Connected;
                info!(
                    target = self.target_id.as_deref().unwrap_or_default(),
                    high_water_mark = self.high_water_mark,
                    replayed,
                    "bootstrap complete"
                );
                BootstrapDisposition::Completed { replayed }
            }
            Err(err) => {
                error!(%err, "bootstrap failed, tearing down");
                self.last_error = Some(err.to_string());
                self.buffer.clear();
                self.high_water_mark = 0;
                self.status = SessionStatus::Error;
                BootstrapDisposition::Failed
            }
        }
    }

    /// The transport ended, cleanly (`None`) or with an error.
    pub fn handle_closed(&mut self, generation: u64, reason: Option<String>) {
        if self.stale(generation) || self.status == SessionStatus::Idle {
            return;
        }
        self.buffer.clear();
        match reason {
            Some(reason) => {
                warn!(reason, "connection lost");
                self.last_error = Some(reason);
                self.status = SessionStatus::Error;
            }
            None => {
                debug!("connection closed");
                self.status = SessionStatus::Closed;
            }
        }
    }

    /// Stop following. Clears session-local buffers and marks; the
    /// materialized timeline stays readable until the next bootstrap
    /// reseeds it.
    pub fn disconnect(&mut self) {
        self.generation += 1;
        self.buffer.clear();
        self.high_water_mark = 0;
        self.fetch_started = false;
        self.target_id = None;
        self.last_error = None;
        self.status = SessionStatus::Idle;
    }

    fn buffer_frame(&mut self, frame: EventFrame) {
        if self.buffer.len() >= self.max_buffered {
            let drop_count = self.buffer.len() - self.max_buffered + 1;
            warn!(
                buffered = self.buffer.len(),
                dropped = drop_count,
                "pre-bootstrap buffer full, dropping oldest frames"
            );
            self.buffer.drain(..drop_count);
        }
        self.buffer.push(frame);
    }
}

// ============================================================================
// Driver
// ============================================================================

/// Commands from the handle to the driver task.
enum SessionCommand {
    Connect { target: String },
    Disconnect,
    Shutdown,
}

/// Notifications broadcast to session subscribers.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// The session status changed.
    Status(SessionStatus),
    /// The materialized timeline changed; re-read it.
    TimelineChanged,
}

/// Internal driver events from spawned continuations, tagged with the
/// generation they belong to.
enum DriverEvent {
    BootstrapDone {
        generation: u64,
        result: Result<Bootstrap, SnapshotError>,
    },
    ReadyTimeout {
        generation: u64,
    },
}

/// Send+Sync handle to a running session driver.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    status: watch::Receiver<SessionStatus>,
    events: broadcast::Sender<SessionEvent>,
    timeline: SharedTimeline,
}

impl SessionHandle {
    /// Follow a target timeline. No-op when already connected to it.
    pub fn connect(&self, target: impl Into<String>) {
        let _ = self.commands.send(SessionCommand::Connect {
            target: target.into(),
        });
    }

    /// Stop following and return to idle.
    pub fn disconnect(&self) {
        let _ = self.commands.send(SessionCommand::Disconnect);
    }

    /// Stop the driver task.
    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }

    /// Current session status.
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// A watch on the session status, for awaiting transitions.
    pub fn status_stream(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Subscribe to session notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The materialized timeline this session maintains.
    pub fn timeline(&self) -> SharedTimeline {
        Arc::clone(&self.timeline)
    }
}

/// Spawn a session driver task and return its handle.
pub fn spawn_session(
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    snapshots: Arc<dyn SnapshotSource>,
    dispatcher: EventDispatcher,
) -> SessionHandle {
    let timeline = TimelineStore::shared();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(SessionStatus::Idle);
    let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let core = SessionCore::new(dispatcher, Arc::clone(&timeline), config.max_buffered_frames);
    let driver = SessionDriver {
        core,
        transport,
        snapshots,
        config,
        link: None,
        link_generation: 0,
        internal_tx,
        status_tx,
        events_tx: events_tx.clone(),
    };
    tokio::spawn(driver.run(commands_rx, internal_rx));

    SessionHandle {
        commands: commands_tx,
        status: status_rx,
        events: events_tx,
        timeline,
    }
}

/// One unit of driver work, pulled out of the select loop.
enum Step {
    Command(Option<SessionCommand>),
    Internal(DriverEvent),
    Link(Option<LinkEvent>),
}

struct SessionDriver {
    core: SessionCore,
    transport: Arc<dyn Transport>,
    snapshots: Arc<dyn SnapshotSource>,
    config: SessionConfig,
    link: Option<TransportLink>,
    link_generation: u64,
    internal_tx: mpsc::UnboundedSender<DriverEvent>,
    status_tx: watch::Sender<SessionStatus>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut internal: mpsc::UnboundedReceiver<DriverEvent>,
    ) {
        loop {
            // The select borrows only `self.link`; handling happens after
            // the borrow ends so the handlers get the whole driver.
            let has_link = self.link.is_some();
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                Some(event) = internal.recv() => Step::Internal(event),
                link_event = Self::next_link_event(&mut self.link), if has_link => {
                    Step::Link(link_event)
                }
            };
            match step {
                Step::Command(None) | Step::Command(Some(SessionCommand::Shutdown)) => break,
                Step::Command(Some(SessionCommand::Connect { target })) => {
                    self.connect(target).await;
                }
                Step::Command(Some(SessionCommand::Disconnect)) => {
                    self.core.disconnect();
                    self.drop_link();
                    self.publish_status();
                }
                Step::Internal(event) => self.on_internal(event),
                Step::Link(event) => self.on_link_event(event),
            }
        }
        debug!("session driver exiting");
    }

    async fn next_link_event(link: &mut Option<TransportLink>) -> Option<LinkEvent> {
        match link {
            Some(link) => link.next().await,
            None => std::future::pending().await,
        }
    }

    async fn connect(&mut self, target: String) {
        let ConnectAction::Open { generation } = self.core.begin_connect(&target) else {
            return;
        };
        self.drop_link();
        self.publish_status();

        match self.transport.open(&target).await {
            Ok(link) => {
                self.link = Some(link);
                self.link_generation = generation;
            }
            Err(err) => {
                self.core.handle_closed(generation, Some(err.to_string()));
                self.publish_status();
            }
        }
    }

    fn on_link_event(&mut self, event: Option<LinkEvent>) {
        let generation = self.link_generation;
        match event {
            Some(LinkEvent::Opened) => {
                if self.core.handle_open(generation) {
                    self.publish_status();
                    self.arm_ready_timer(generation);
                }
            }
            Some(LinkEvent::Ready) => {
                if self.core.handle_ready(generation) {
                    self.spawn_fetch(generation);
                }
            }
            Some(LinkEvent::Frame(raw)) => match EventFrame::from_envelope(&raw) {
                Some(frame) => {
                    let disposition = self.core.handle_frame(generation, frame);
                    if matches!(
                        disposition,
                        FrameDisposition::Dispatched(DispatchOutcome::Applied)
                    ) {
                        self.notify_timeline();
                    }
                }
                None => trace!("dropping inbound message without envelope marker"),
            },
            Some(LinkEvent::Closed(reason)) => {
                self.core.handle_closed(generation, reason);
                self.drop_link();
                self.publish_status();
            }
            None => {
                // The pump vanished without a close notification.
                self.core.handle_closed(generation, None);
                self.drop_link();
                self.publish_status();
            }
        }
    }

    fn on_internal(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::ReadyTimeout { generation } => {
                if self.core.handle_ready(generation) {
                    warn!("readiness notification not seen in time, bootstrapping anyway");
                    self.spawn_fetch(generation);
                }
            }
            DriverEvent::BootstrapDone { generation, result } => {
                match self.core.handle_bootstrap(generation, result) {
                    BootstrapDisposition::Completed { .. } => {
                        self.publish_status();
                        self.notify_timeline();
                    }
                    BootstrapDisposition::Failed => {
                        self.drop_link();
                        self.publish_status();
                    }
                    BootstrapDisposition::Superseded => {}
                }
            }
        }
    }

    fn spawn_fetch(&self, generation: u64) {
        let Some(target) = self.core.target_id().map(String::from) else {
            return;
        };
        let snapshots = Arc::clone(&self.snapshots);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = snapshots.fetch(&target).await;
            let _ = tx.send(DriverEvent::BootstrapDone { generation, result });
        });
    }

    fn arm_ready_timer(&self, generation: u64) {
        let tx = self.internal_tx.clone();
        let timeout = self.config.ready_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(DriverEvent::ReadyTimeout { generation });
        });
    }

    fn drop_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }

    fn publish_status(&mut self) {
        let status = self.core.status();
        let changed = self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
        if changed {
            let _ = self.events_tx.send(SessionEvent::Status(status));
        }
    }

    fn notify_timeline(&self) {
        let _ = self.events_tx.send(SessionEvent::TimelineChanged);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tideline_types::wire::event_type;
    use tideline_types::{Item, ItemKind};

    fn core() -> SessionCore {
        SessionCore::new(
            EventDispatcher::with_defaults(),
            TimelineStore::shared(),
            MAX_BUFFERED_FRAMES,
        )
    }

    fn frame(event_type: &str, id: &str, seq: u64, data: serde_json::Value) -> EventFrame {
        EventFrame {
            event_type: event_type.to_string(),
            id: id.to_string(),
            seq,
            data,
        }
    }

    fn log_frame(id: &str, seq: u64) -> EventFrame {
        frame(event_type::LOG_APPENDED, id, seq, json!({ "text": id }))
    }

    fn empty_bootstrap() -> Bootstrap {
        Bootstrap {
            items: vec![],
            high_water_mark: 0,
        }
    }

    /// Drive a core to Connected with the given bootstrap, returning the
    /// live generation.
    fn connect_with(core: &mut SessionCore, target: &str, bootstrap: Bootstrap) -> u64 {
        let ConnectAction::Open { generation } = core.begin_connect(target) else {
            panic!("expected a fresh connection");
        };
        assert!(core.handle_open(generation));
        assert!(core.handle_ready(generation));
        assert_eq!(
            core.handle_bootstrap(generation, Ok(bootstrap)),
            BootstrapDisposition::Completed { replayed: 0 }
        );
        generation
    }

    // =========================================================================
    // Connect / status machine
    // =========================================================================

    #[test]
    fn connect_walks_the_status_machine() {
        let mut core = core();
        assert_eq!(core.status(), SessionStatus::Idle);

        let ConnectAction::Open { generation } = core.begin_connect("conv-1") else {
            panic!("expected open");
        };
        assert_eq!(core.status(), SessionStatus::Connecting);

        assert!(core.handle_open(generation));
        assert_eq!(core.status(), SessionStatus::Bootstrapping);

        assert!(core.handle_ready(generation));
        core.handle_bootstrap(generation, Ok(empty_bootstrap()));
        assert_eq!(core.status(), SessionStatus::Connected);
        assert_eq!(core.target_id(), Some("conv-1"));
    }

    #[test]
    fn reconnect_to_same_target_is_a_noop_once_connected() {
        let mut core = core();
        let generation = connect_with(&mut core, "conv-1", empty_bootstrap());

        assert_eq!(core.begin_connect("conv-1"), ConnectAction::AlreadyConnected);
        assert_eq!(core.generation(), generation);

        // A different target supersedes the connection.
        let ConnectAction::Open { generation: next } = core.begin_connect("conv-2") else {
            panic!("expected open");
        };
        assert!(next > generation);
        assert_eq!(core.status(), SessionStatus::Connecting);
    }

    #[test]
    fn ready_fires_the_fetch_exactly_once() {
        let mut core = core();
        let ConnectAction::Open { generation } = core.begin_connect("conv-1") else {
            panic!("expected open");
        };
        assert!(core.handle_open(generation));
        // Ready and its timeout can both arrive; only the first wins.
        assert!(core.handle_ready(generation));
        assert!(!core.handle_ready(generation));
    }

    // =========================================================================
    // Buffering + replay
    // =========================================================================

    #[test]
    fn buffered_frames_replay_in_seq_order() {
        let mut core = core();
        let ConnectAction::Open { generation } = core.begin_connect("conv-1") else {
            panic!("expected open");
        };
        core.handle_open(generation);
        core.handle_ready(generation);

        // Out-of-order arrival before bootstrap resolves.
        assert_eq!(
            core.handle_frame(generation, log_frame("log-6", 6)),
            FrameDisposition::Buffered
        );
        assert_eq!(
            core.handle_frame(generation, log_frame("log-5", 5)),
            FrameDisposition::Buffered
        );
        assert_eq!(core.buffered_len(), 2);

        let disposition = core.handle_bootstrap(generation, Ok(empty_bootstrap()));
        assert_eq!(disposition, BootstrapDisposition::Completed { replayed: 2 });
        assert_eq!(core.buffered_len(), 0);

        // seq 5 applied before seq 6 despite arrival order.
        let timeline = core.timeline();
        let store = timeline.lock();
        assert_eq!(store.ids(), ["log-5", "log-6"]);
        assert_eq!(core.high_water_mark(), 6);
    }

    #[test]
    fn buffered_frames_below_snapshot_frontier_are_redundant() {
        let mut core = core();
        let ConnectAction::Open { generation } = core.begin_connect("conv-1") else {
            panic!("expected open");
        };
        core.handle_open(generation);
        core.handle_ready(generation);

        core.handle_frame(generation, log_frame("log-3", 3));
        core.handle_frame(generation, log_frame("log-9", 9));

        let bootstrap = Bootstrap {
            items: vec![Item::new("log-3", ItemKind::Log, 1).with_prop("text", "log-3")],
            high_water_mark: 5,
        };
        assert_eq!(
            core.handle_bootstrap(generation, Ok(bootstrap)),
            BootstrapDisposition::Completed { replayed: 1 }
        );

        let timeline = core.timeline();
        let store = timeline.lock();
        assert_eq!(store.ids(), ["log-3", "log-9"]);
        assert_eq!(core.high_water_mark(), 9);
    }

    #[test]
    fn buffer_cap_drops_oldest_frames() {
        let mut core = SessionCore::new(
            EventDispatcher::with_defaults(),
            TimelineStore::shared(),
            3,
        );
        let ConnectAction::Open { generation } = core.begin_connect("conv-1") else {
            panic!("expected open");
        };
        core.handle_open(generation);

        for seq in 1..=4 {
            core.handle_frame(generation, log_frame(&format!("log-{seq}"), seq));
        }
        assert_eq!(core.buffered_len(), 3);

        core.handle_ready(generation);
        core.handle_bootstrap(generation, Ok(empty_bootstrap()));
        let timeline = core.timeline();
        let store = timeline.lock();
        assert_eq!(store.ids(), ["log-2", "log-3", "log-4"]);
    }

    // =========================================================================
    // Live dispatch + watermark gating
    // =========================================================================

    #[test]
    fn bootstrap_plus_live_upsert() {
        let mut core = core();
        let bootstrap = Bootstrap {
            items: vec![Item::new("msg-1", ItemKind::Message, 1)
                .with_version(5)
                .with_prop("content", "before")],
            high_water_mark: 5,
        };
        let generation = connect_with(&mut core, "conv-1", bootstrap);

        let disposition = core.handle_frame(
            generation,
            frame(
                event_type::MESSAGE_COMPLETED,
                "msg-1",
                6,
                json!({ "content": "after", "version": 6 }),
            ),
        );
        assert_eq!(
            disposition,
            FrameDisposition::Dispatched(DispatchOutcome::Applied)
        );

        let timeline = core.timeline();
        let store = timeline.lock();
        let item = store.get("msg-1").expect("message");
        assert_eq!(item.content(), Some("after"));
        assert_eq!(item.version, 6);
        assert_eq!(core.high_water_mark(), 6);
    }

    #[test]
    fn live_frames_at_or_below_the_mark_are_dropped() {
        let mut core = core();
        let bootstrap = Bootstrap {
            items: vec![],
            high_water_mark: 5,
        };
        let generation = connect_with(&mut core, "conv-1", bootstrap);

        assert_eq!(
            core.handle_frame(generation, log_frame("log-1", 5)),
            FrameDisposition::AlreadyApplied
        );
        assert_eq!(
            core.handle_frame(generation, log_frame("log-1", 6)),
            FrameDisposition::Dispatched(DispatchOutcome::Applied)
        );
        // Redelivery of the same seq is an idempotent no-op.
        assert_eq!(
            core.handle_frame(generation, log_frame("log-1", 6)),
            FrameDisposition::AlreadyApplied
        );

        let timeline = core.timeline();
        assert_eq!(timeline.lock().ids(), ["log-1"]);
    }

    #[test]
    fn reconnect_replay_is_a_noop() {
        let mut core = core();
        let generation = connect_with(&mut core, "conv-1", empty_bootstrap());

        core.handle_frame(generation, log_frame("log-1", 1));
        core.handle_closed(generation, None);
        assert_eq!(core.status(), SessionStatus::Closed);

        // Reconnect: the server's snapshot now materializes log-1, and the
        // producer replays it on the new connection at a different seq.
        let bootstrap = Bootstrap {
            items: vec![Item::new("log-1", ItemKind::Log, 1).with_prop("text", "log-1")],
            high_water_mark: 3,
        };
        let generation = connect_with(&mut core, "conv-1", bootstrap);
        core.handle_frame(generation, log_frame("log-1", 5));

        let timeline = core.timeline();
        let store = timeline.lock();
        assert_eq!(store.ids(), ["log-1"]);
    }

    // =========================================================================
    // Generation races + teardown
    // =========================================================================

    #[test]
    fn superseded_callbacks_are_inert() {
        let mut core = core();
        let ConnectAction::Open { generation: old } = core.begin_connect("conv-a") else {
            panic!("expected open");
        };
        core.handle_open(old);
        core.handle_ready(old);

        // Switch targets before A's bootstrap resolves.
        let ConnectAction::Open { generation: new } = core.begin_connect("conv-b") else {
            panic!("expected open");
        };

        // A's late callbacks: all inert.
        assert_eq!(
            core.handle_frame(old, log_frame("log-a", 1)),
            FrameDisposition::Ignored
        );
        assert_eq!(
            core.handle_bootstrap(
                old,
                Ok(Bootstrap {
                    items: vec![Item::new("stale", ItemKind::Log, 1)],
                    high_water_mark: 99,
                })
            ),
            BootstrapDisposition::Superseded
        );
        core.handle_closed(old, Some("socket reset".into()));

        assert_eq!(core.status(), SessionStatus::Connecting);
        assert_eq!(core.high_water_mark(), 0);
        assert!(core.last_error().is_none());
        let timeline = core.timeline();
        assert!(timeline.lock().is_empty());

        // B proceeds normally under its own generation.
        assert!(core.handle_open(new));
        assert!(core.handle_ready(new));
        core.handle_bootstrap(new, Ok(empty_bootstrap()));
        assert_eq!(core.status(), SessionStatus::Connected);
        assert_eq!(core.target_id(), Some("conv-b"));
    }

    #[test]
    fn bootstrap_failure_tears_down_without_partial_state() {
        let mut core = core();
        let ConnectAction::Open { generation } = core.begin_connect("conv-1") else {
            panic!("expected open");
        };
        core.handle_open(generation);
        core.handle_ready(generation);
        core.handle_frame(generation, log_frame("log-1", 1));

        let disposition = core.handle_bootstrap(
            generation,
            Err(SnapshotError::Status {
                target: "conv-1".into(),
                status: 502,
            }),
        );
        assert_eq!(disposition, BootstrapDisposition::Failed);
        assert_eq!(core.status(), SessionStatus::Error);
        assert!(core.last_error().expect("error recorded").contains("502"));
        assert_eq!(core.buffered_len(), 0);
        let timeline = core.timeline();
        assert!(timeline.lock().is_empty());

        // No automatic retry: recovery is an explicit connect.
        assert!(matches!(
            core.begin_connect("conv-1"),
            ConnectAction::Open { .. }
        ));
    }

    #[test]
    fn disconnect_resets_session_state() {
        let mut core = core();
        let bootstrap = Bootstrap {
            items: vec![Item::new("log-1", ItemKind::Log, 1).with_prop("text", "log-1")],
            high_water_mark: 4,
        };
        let generation = connect_with(&mut core, "conv-1", bootstrap);

        core.disconnect();
        assert_eq!(core.status(), SessionStatus::Idle);
        assert_eq!(core.target_id(), None);
        assert_eq!(core.high_water_mark(), 0);

        // Old-generation traffic after disconnect is inert.
        assert_eq!(
            core.handle_frame(generation, log_frame("log-2", 9)),
            FrameDisposition::Ignored
        );

        // The materialized view survives until the next bootstrap.
        let timeline = core.timeline();
        assert_eq!(timeline.lock().ids(), ["log-1"]);
    }

    #[test]
    fn transport_error_surfaces_as_status() {
        let mut core = core();
        let generation = connect_with(&mut core, "conv-1", empty_bootstrap());

        core.handle_closed(generation, Some("connection refused".into()));
        assert_eq!(core.status(), SessionStatus::Error);
        assert_eq!(core.last_error(), Some("connection refused"));
    }
}
