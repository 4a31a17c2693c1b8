//! Session engine.
//!
//! Owns the link lifecycle, the select handshake, and the correlation of
//! secondaries to the primaries that caused them.
//!
//! # Example
//!
//! ```no_run
//! use secs_device::{Item, SecsMessage, Session, SessionEvent};
//!
//! # async fn example() -> secs_device::Result<()> {
//! let session = Session::builder().passive().port(5000).build()?;
//! let mut events = session.subscribe();
//! session.enable().await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let SessionEvent::PrimaryReceived(entry) = event {
//!         let reply = entry.message().reply(Some(Item::ascii("OK")));
//!         entry.reply(reply)?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! State, the pending registry and the unreplied queue sit behind one
//! mutex. The link's read loop, background timers and API callers all take
//! it briefly and never hold it across an await. Subscribers and the trace
//! sink are only reached outside the lock.
//!
//! Every transport generation carries an epoch. Frames, timers and close
//! notifications from an older epoch are ignored. Within one epoch, every
//! entry into `Connected` or `Selected` starts a new phase; the T7 timer and
//! the linktest heartbeat belong to the phase that started them.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, sleep, timeout};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::{SessionId, SystemBytes};
use crate::protocol::header::{
    REJECT_NOT_SELECTED, REJECT_PTYPE_NOT_SUPPORTED, REJECT_STYPE_NOT_SUPPORTED,
};
use crate::protocol::{HsmsMessage, MessageType, SecsMessage, SelectStatus};
use crate::trace::{TraceSink, TracingSink};
use crate::transport::{Connection, FrameHandler, HsmsCodec, Listener, connect};

use super::builder::SessionBuilder;
use super::event::SessionEvent;
use super::options::SessionOptions;
use super::registry::{PendingExchanges, UnrepliedQueue};
use super::state::{ConnectionRole, ConnectionState};
use super::unreplied::UnrepliedPrimary;

// ============================================================================
// Types
// ============================================================================

/// Mutable session state, guarded by [`SessionInner::core`].
struct Core {
    /// Current lifecycle state.
    state: ConnectionState,
    /// Transport generation.
    epoch: u64,
    /// Live link, once connected.
    connection: Option<Connection>,
    /// Bound or connected local address.
    local_addr: Option<SocketAddr>,
    /// Bumped on every entry into `Connected` or `Selected`.
    phase: u64,
    /// Passive accept task of the current epoch.
    accept_task: Option<JoinHandle<()>>,
    /// T7 timer of the current `Connected` phase.
    select_timer: Option<JoinHandle<()>>,
    /// Heartbeat of the current `Selected` phase.
    linktest: Option<JoinHandle<()>>,
    /// Next candidate transaction id.
    next_id: SystemBytes,
    /// Data exchanges awaiting a secondary.
    pending: PendingExchanges,
    /// Control exchanges awaiting a response.
    control: FxHashMap<SystemBytes, oneshot::Sender<HsmsMessage>>,
    /// Peer primaries awaiting our reply.
    unreplied: UnrepliedQueue,
}

impl Core {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            epoch: 0,
            connection: None,
            local_addr: None,
            phase: 0,
            accept_task: None,
            select_timer: None,
            linktest: None,
            next_id: SystemBytes::new(1),
            pending: PendingExchanges::default(),
            control: FxHashMap::default(),
            unreplied: UnrepliedQueue::default(),
        }
    }

    /// Returns `true` if `id` names a live exchange or unreplied entry.
    fn is_live(&self, id: SystemBytes) -> bool {
        self.pending.contains(id) || self.control.contains_key(&id) || self.unreplied.contains_id(id)
    }

    /// Picks the next transaction id that is not live.
    fn allocate_id(&mut self) -> SystemBytes {
        loop {
            let id = self.next_id;
            self.next_id = id.next();
            if !self.is_live(id) {
                return id;
            }
        }
    }

    /// Returns `true` while both `epoch` and `phase` are current.
    fn is_current(&self, epoch: u64, phase: u64) -> bool {
        self.epoch == epoch && self.phase == phase
    }

    /// Enters a new phase, stopping the timers of the previous one.
    fn next_phase(&mut self) {
        self.phase += 1;
        for task in [self.select_timer.take(), self.linktest.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }

    /// Queues a frame on the live link.
    fn transmit(&self, frame: HsmsMessage) -> Result<()> {
        self.connection
            .as_ref()
            .ok_or(Error::SessionClosed)?
            .send(frame)
            .map_err(|_| Error::SessionClosed)
    }
}

/// Trace output gathered under the lock and emitted after it is released.
enum TraceNote {
    Inbound(SecsMessage, SystemBytes),
    Info(String),
    Warning(String),
    Error(String, Option<Error>),
    Debug(String),
}

/// Internal shared state for a session.
pub(crate) struct SessionInner {
    /// Instance id, used as a log field.
    id: SessionId,
    /// Immutable configuration.
    options: SessionOptions,
    /// Mutable state.
    core: Mutex<Core>,
    /// Latest state, for `wait_for_state`.
    state_tx: watch::Sender<ConnectionState>,
    /// Event subscribers.
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
    /// Diagnostic sink.
    trace: Arc<dyn TraceSink>,
}

// ============================================================================
// Session
// ============================================================================

/// A simulated SECS/HSMS endpoint.
///
/// Cloning is cheap; all clones drive the same session. The link is shut
/// down when the last clone is dropped.
#[derive(Clone)]
pub struct Session {
    /// Shared inner state.
    pub(crate) inner: Arc<SessionInner>,
}

// ============================================================================
// Session - Display
// ============================================================================

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("role", &self.role())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Construction
// ============================================================================

impl Session {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Creates a disabled session tracing to `tracing`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` fail validation.
    pub fn new(options: SessionOptions) -> Result<Self> {
        Self::with_trace_sink(options, Arc::new(TracingSink))
    }

    /// Creates a disabled session reporting to `trace`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `options` fail validation.
    pub fn with_trace_sink(options: SessionOptions, trace: Arc<dyn TraceSink>) -> Result<Self> {
        options.validate()?;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Arc::new(SessionInner {
            id: SessionId::generate(),
            options,
            core: Mutex::new(Core::new()),
            state_tx,
            subscribers: Mutex::new(Vec::new()),
            trace,
        });

        debug!(session = %inner.id, role = %inner.options.role, "Session created");

        Ok(Self { inner })
    }
}

// ============================================================================
// Session - Queries
// ============================================================================

impl Session {
    /// Returns the instance id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    /// Returns the connection role.
    #[inline]
    #[must_use]
    pub fn role(&self) -> ConnectionRole {
        self.inner.options.role
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.core.lock().state
    }

    /// Returns the bound (Passive) or connected (Active) local address.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.core.lock().local_addr
    }

    /// Returns the number of sends awaiting a secondary.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.core.lock().pending.len()
    }

    /// Returns the peer primaries awaiting our reply, oldest first.
    #[must_use]
    pub fn unreplied(&self) -> Vec<UnrepliedPrimary> {
        self.inner.core.lock().unreplied.snapshot()
    }

    /// Returns the number of peer primaries awaiting our reply.
    #[must_use]
    pub fn unreplied_count(&self) -> usize {
        self.inner.core.lock().unreplied.len()
    }
}

// ============================================================================
// Session - Subscriptions
// ============================================================================

impl Session {
    /// Subscribes to session events.
    ///
    /// Events published before the call are not replayed.
    #[must_use]
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Waits until the session is in `state`.
    ///
    /// Returns immediately if it already is. A state held only briefly may
    /// be missed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WaitTimeout`] if `state` is not reached in time.
    pub async fn wait_for_state(&self, state: ConnectionState, wait: Duration) -> Result<()> {
        let mut rx = self.inner.state_tx.subscribe();

        match timeout(wait, rx.wait_for(|current| *current == state)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => Err(Error::WaitTimeout {
                state,
                timeout_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

// ============================================================================
// Session - Lifecycle
// ============================================================================

impl Session {
    /// Starts the link in the configured role.
    ///
    /// - **Active**: connects (T5), sends Select.req and waits for the
    ///   response (T6). Returns once `Selected`.
    /// - **Passive**: binds and returns in `Connecting`. The first peer to
    ///   connect is accepted in the background and must select within T7.
    ///
    /// On failure the session is back in `Disconnected`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] if not `Disconnected`
    /// - [`Error::Connection`] if bind or connect fails
    /// - [`Error::Handshake`] if the peer refuses or ignores Select.req
    /// - [`Error::SessionClosed`] if disabled before completion
    pub async fn enable(&self) -> Result<()> {
        let epoch = {
            let mut core = self.inner.core.lock();
            if core.state != ConnectionState::Disconnected {
                return Err(Error::invalid_state("enable", core.state));
            }
            core.epoch += 1;
            self.inner.set_state(&mut core, ConnectionState::Connecting);
            core.epoch
        };

        match self.inner.options.role {
            ConnectionRole::Active => self.enable_active(epoch).await,
            ConnectionRole::Passive => self.enable_passive(epoch).await,
        }
    }

    /// Stops the link and discards all outstanding work.
    ///
    /// Sends Separate.req if selected, fails every pending send with
    /// [`Error::SessionClosed`] and drops every unreplied entry. Idempotent.
    pub fn disable(&self) {
        if self.inner.shutdown(None, true) {
            self.inner.trace.info("Session disabled");
        }
    }

    async fn enable_active(&self, epoch: u64) -> Result<()> {
        let inner = &self.inner;
        let options = &inner.options;

        let stream = match connect(options.address, options.port, options.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                if inner.shutdown(Some(epoch), false) {
                    inner.trace.error("Connect failed", Some(&e));
                }
                return Err(e);
            }
        };

        let local_addr = stream.local_addr().ok();
        if let Err(e) = inner.attach(stream, epoch, local_addr) {
            inner.shutdown(Some(epoch), false);
            return Err(e);
        }

        if let Err(e) = inner.select(epoch).await {
            if inner.shutdown(Some(epoch), false) {
                inner.trace.error("Select failed", Some(&e));
            }
            return Err(e);
        }

        let mut core = inner.core.lock();
        if core.epoch != epoch {
            return Err(Error::SessionClosed);
        }
        match core.state {
            ConnectionState::Connected => {
                inner.mark_selected(&mut core);
                Ok(())
            }
            ConnectionState::Selected => Ok(()),
            _ => Err(Error::SessionClosed),
        }
    }

    async fn enable_passive(&self, epoch: u64) -> Result<()> {
        let inner = &self.inner;
        let options = &inner.options;

        let listener = match Listener::bind(options.address, options.port).await {
            Ok(listener) => listener,
            Err(e) => {
                if inner.shutdown(Some(epoch), false) {
                    inner.trace.error("Bind failed", Some(&e));
                }
                return Err(e);
            }
        };

        let local_addr = listener.local_addr();
        {
            let mut core = inner.core.lock();
            if core.epoch != epoch {
                return Err(Error::SessionClosed);
            }
            core.local_addr = Some(local_addr);
            let task = tokio::spawn(accept_peer(Arc::downgrade(inner), listener, epoch));
            core.accept_task = Some(task);
        }

        inner.trace.info(&format!("Listening on {local_addr}"));
        Ok(())
    }
}

// ============================================================================
// Session - Messaging
// ============================================================================

impl Session {
    /// Sends a data message under a fresh transaction id.
    ///
    /// With the W-bit set on a primary, waits up to T3 for the matching
    /// secondary and returns it. Otherwise returns `None` once queued.
    ///
    /// # Errors
    ///
    /// - [`Error::NotSelected`] if not `Selected`; nothing is sent
    /// - [`Error::MalformedMessage`] if the message cannot be encoded
    /// - [`Error::Timeout`] if no secondary arrives within T3
    /// - [`Error::Aborted`] if the peer answers with `SxF0`
    /// - [`Error::SessionClosed`] if the session is disabled while waiting
    pub async fn send(&self, message: SecsMessage) -> Result<Option<SecsMessage>> {
        self.inner.send(message, None).await
    }

    /// Sends a data message under the caller's transaction id.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus [`Error::DuplicateTransaction`] if
    /// `id` is still live.
    pub async fn send_with_id(
        &self,
        message: SecsMessage,
        id: SystemBytes,
    ) -> Result<Option<SecsMessage>> {
        self.inner.send(message, Some(id)).await
    }

    /// Answers a peer primary. Equivalent to [`UnrepliedPrimary::reply`].
    ///
    /// # Errors
    ///
    /// - [`Error::StaleReply`] if `entry` was already answered, was
    ///   dropped by `disable()`, or belongs to another session
    /// - [`Error::NotSelected`] if not `Selected`; the entry is kept
    /// - [`Error::MalformedMessage`] if `reply` cannot be encoded
    pub fn reply_to(&self, entry: &UnrepliedPrimary, reply: SecsMessage) -> Result<()> {
        self.inner.reply_to(entry, reply)
    }
}

// ============================================================================
// SessionInner - State & Notification
// ============================================================================

impl SessionInner {
    /// Moves to `state` and notifies subscribers. Called under the lock.
    fn set_state(&self, core: &mut Core, state: ConnectionState) {
        if core.state == state {
            return;
        }

        info!(session = %self.id, from = %core.state, to = %state, "State changed");
        core.state = state;
        self.state_tx.send_replace(state);
        self.publish(SessionEvent::StateChanged(state));
    }

    /// Queues `event` for every live subscriber.
    fn publish(&self, event: SessionEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit(&self, notes: Vec<TraceNote>) {
        for note in notes {
            match note {
                TraceNote::Inbound(message, id) => self.trace.message_in(&message, id),
                TraceNote::Info(text) => self.trace.info(&text),
                TraceNote::Warning(text) => self.trace.warning(&text),
                TraceNote::Error(text, error) => self.trace.error(&text, error.as_ref()),
                TraceNote::Debug(text) => self.trace.debug(&text),
            }
        }
    }
}

// ============================================================================
// SessionInner - Link Lifecycle
// ============================================================================

impl SessionInner {
    /// Installs a connected stream for `epoch` and moves to `Connected`.
    fn attach(
        self: &Arc<Self>,
        stream: TcpStream,
        epoch: u64,
        local_addr: Option<SocketAddr>,
    ) -> Result<()> {
        let peer = {
            let mut core = self.core.lock();
            if core.epoch != epoch || core.state != ConnectionState::Connecting {
                return Err(Error::SessionClosed);
            }

            let intake = Arc::new(Intake {
                session: Arc::downgrade(self),
                epoch,
            });
            let codec = HsmsCodec::new(self.options.max_frame_len);
            let connection = Connection::spawn(stream, codec, intake)?;
            let peer = connection.peer_addr();

            debug!(session = %self.id, %peer, epoch, "Link attached");

            core.connection = Some(connection);
            if local_addr.is_some() {
                core.local_addr = local_addr;
            }
            core.next_phase();
            self.set_state(&mut core, ConnectionState::Connected);
            peer
        };

        self.trace.debug(&format!("Link to {peer} attached"));
        Ok(())
    }

    /// Tears down the link and discards outstanding work.
    ///
    /// With `expected_epoch` set, does nothing unless that epoch is still
    /// current. Returns `false` if there was nothing to tear down.
    fn shutdown(&self, expected_epoch: Option<u64>, send_separate: bool) -> bool {
        let mut notes = Vec::new();
        let done = {
            let mut core = self.core.lock();
            if expected_epoch.is_some_and(|epoch| epoch != core.epoch) {
                return false;
            }
            self.shutdown_locked(&mut core, send_separate, &mut notes)
        };
        self.emit(notes);
        done
    }

    /// Tears down the link if `epoch` and `phase` are still current.
    fn expire(&self, epoch: u64, phase: u64) -> bool {
        let mut notes = Vec::new();
        let done = {
            let mut core = self.core.lock();
            core.is_current(epoch, phase) && self.shutdown_locked(&mut core, false, &mut notes)
        };
        self.emit(notes);
        done
    }

    fn shutdown_locked(
        &self,
        core: &mut Core,
        send_separate: bool,
        notes: &mut Vec<TraceNote>,
    ) -> bool {
        if core.state == ConnectionState::Disconnected
            && core.connection.is_none()
            && core.accept_task.is_none()
        {
            return false;
        }

        core.epoch += 1;

        if let Some(connection) = core.connection.take() {
            if send_separate && core.state == ConnectionState::Selected {
                let id = core.allocate_id();
                let _ = connection.send(HsmsMessage::separate_req(id));
                notes.push(TraceNote::Debug(format!("SeparateReq [{id}] sent")));
            }
            connection.shutdown();
        }

        if let Some(task) = core.accept_task.take() {
            task.abort();
        }
        core.next_phase();

        let pending = core.pending.len();
        let unreplied = core.unreplied.len();

        core.local_addr = None;
        core.control.clear();
        core.pending.fail_all();
        core.unreplied.clear();

        debug!(session = %self.id, pending, unreplied, "Link torn down");
        notes.push(TraceNote::Debug(format!(
            "Link torn down; {pending} pending sends failed, {unreplied} unreplied primaries dropped"
        )));

        self.set_state(core, ConnectionState::Disconnected);
        true
    }

    /// Enters `Selected` and starts the linktest heartbeat if configured.
    fn mark_selected(self: &Arc<Self>, core: &mut Core) {
        core.next_phase();
        self.set_state(core, ConnectionState::Selected);

        if let Some(period) = self.options.linktest_interval {
            core.linktest = Some(tokio::spawn(linktest_loop(
                Arc::downgrade(self),
                core.epoch,
                core.phase,
                period,
            )));
        }
    }

    /// Starts the T7 timer for the current `Connected` phase.
    fn arm_select_timer(self: &Arc<Self>, core: &mut Core) {
        if let Some(task) = core.select_timer.take() {
            task.abort();
        }
        core.select_timer = Some(tokio::spawn(select_timer(
            Arc::downgrade(self),
            core.epoch,
            core.phase,
            self.options.select_timeout,
        )));
    }
}

// ============================================================================
// SessionInner - Control Transactions
// ============================================================================

impl SessionInner {
    /// Sends a control request and waits up to T6 for its response.
    async fn control_transaction(
        &self,
        build: fn(SystemBytes) -> HsmsMessage,
        epoch: u64,
    ) -> Result<HsmsMessage> {
        let (id, kind, rx) = {
            let mut core = self.core.lock();
            if core.epoch != epoch {
                return Err(Error::SessionClosed);
            }

            let id = core.allocate_id();
            let frame = build(id);
            let kind = frame.message_type();
            let (tx, rx) = oneshot::channel();
            core.control.insert(id, tx);
            if let Err(e) = core.transmit(frame) {
                core.control.remove(&id);
                return Err(e);
            }
            (id, kind, rx)
        };

        if let Some(kind) = kind {
            self.trace.debug(&format!("{kind:?} [{id}] sent"));
        }

        let limit = self.options.control_timeout;
        match timeout(limit, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => {
                self.core.lock().control.remove(&id);
                Err(Error::timeout(
                    id,
                    u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        }
    }

    /// Runs the active select handshake.
    async fn select(&self, epoch: u64) -> Result<()> {
        let response = match self.control_transaction(HsmsMessage::select_req, epoch).await {
            Ok(response) => response,
            Err(Error::Timeout { timeout_ms, .. }) => {
                return Err(Error::handshake(format!(
                    "no Select.rsp within {timeout_ms}ms"
                )));
            }
            Err(e) => return Err(e),
        };

        match response.message_type() {
            Some(MessageType::SelectRsp) => match SelectStatus::from_u8(response.header.byte3) {
                SelectStatus::Ok => Ok(()),
                status => Err(Error::handshake(format!("select refused: {status:?}"))),
            },
            Some(MessageType::RejectReq) => Err(Error::handshake(format!(
                "select rejected (reason {})",
                response.header.byte3
            ))),
            other => Err(Error::handshake(format!(
                "unexpected response to Select.req: {other:?}"
            ))),
        }
    }
}

// ============================================================================
// SessionInner - Data Exchange
// ============================================================================

impl SessionInner {
    async fn send(&self, message: SecsMessage, explicit: Option<SystemBytes>) -> Result<Option<SecsMessage>> {
        let body = message.encode_body()?;

        let (id, rx) = {
            let mut core = self.core.lock();
            if core.state != ConnectionState::Selected {
                return Err(Error::not_selected(core.state));
            }

            let id = match explicit {
                Some(id) if core.is_live(id) => return Err(Error::duplicate_transaction(id)),
                Some(id) => id,
                None => core.allocate_id(),
            };

            let rx = if message.expects_reply() {
                Some(core.pending.register(id, message.stream)?)
            } else {
                None
            };

            let frame = HsmsMessage::data(self.options.device_id, id, &message, body);
            if let Err(e) = core.transmit(frame) {
                core.pending.remove(id);
                return Err(e);
            }
            (id, rx)
        };

        self.trace.message_out(&message, id);

        let Some(rx) = rx else {
            return Ok(None);
        };

        match timeout(self.options.reply_timeout, rx).await {
            Ok(Ok(outcome)) => outcome.map(Some),
            Ok(Err(_)) => Err(Error::SessionClosed),
            Err(_) => {
                self.core.lock().pending.remove(id);
                let error = Error::timeout(id, self.options.reply_timeout_ms());
                self.trace
                    .error(&format!("No reply to {} [{id}]", message.label()), Some(&error));
                Err(error)
            }
        }
    }

    pub(crate) fn reply_to(self: &Arc<Self>, entry: &UnrepliedPrimary, reply: SecsMessage) -> Result<()> {
        let id = entry.id();
        if !entry.belongs_to(self) {
            return Err(Error::stale_reply(id));
        }

        let reply = SecsMessage {
            reply_expected: false,
            ..reply
        };
        let body = reply.encode_body()?;

        {
            let mut core = self.core.lock();
            if !core.unreplied.contains(entry.token()) {
                return Err(Error::stale_reply(id));
            }
            if core.state != ConnectionState::Selected {
                return Err(Error::not_selected(core.state));
            }
            core.unreplied.take(entry.token());

            let frame = HsmsMessage::data(self.options.device_id, id, &reply, body);
            core.transmit(frame)?;
        }

        if reply.is_primary() {
            self.trace.warning(&format!(
                "Reply {} to {} [{id}] has an odd function",
                reply.label(),
                entry.message().label()
            ));
        }
        self.trace.message_out(&reply, id);
        Ok(())
    }
}

// ============================================================================
// SessionInner - Inbound
// ============================================================================

impl SessionInner {
    /// Classifies one frame from the link of `epoch`.
    fn handle_frame(self: &Arc<Self>, frame: HsmsMessage, epoch: u64) {
        let mut notes = Vec::new();

        {
            let mut core = self.core.lock();
            if core.epoch != epoch {
                return;
            }

            if frame.header.ptype != 0 {
                notes.push(TraceNote::Warning(format!(
                    "Rejecting frame [{}] with PType {}",
                    frame.system_bytes(),
                    frame.header.ptype
                )));
                let _ = core.transmit(HsmsMessage::reject_req(
                    &frame.header,
                    REJECT_PTYPE_NOT_SUPPORTED,
                ));
            } else {
                match frame.message_type() {
                    Some(MessageType::Data) => self.handle_data(&mut core, &frame, &mut notes),
                    Some(kind) => self.handle_control(&mut core, kind, frame, &mut notes),
                    None => {
                        notes.push(TraceNote::Warning(format!(
                            "Rejecting frame [{}] with SType {}",
                            frame.system_bytes(),
                            frame.header.stype
                        )));
                        let _ = core.transmit(HsmsMessage::reject_req(
                            &frame.header,
                            REJECT_STYPE_NOT_SUPPORTED,
                        ));
                    }
                }
            }
        }

        self.emit(notes);
    }

    fn handle_data(self: &Arc<Self>, core: &mut Core, frame: &HsmsMessage, notes: &mut Vec<TraceNote>) {
        let id = frame.system_bytes();

        if core.state != ConnectionState::Selected {
            notes.push(TraceNote::Warning(format!(
                "Data message [{id}] received while {}; rejected",
                core.state
            )));
            let _ = core.transmit(HsmsMessage::reject_req(&frame.header, REJECT_NOT_SELECTED));
            return;
        }

        let message = match frame.to_secs_message() {
            Ok(message) => message,
            Err(e) => {
                notes.push(TraceNote::Error(
                    format!("Undecodable data message [{id}]: {e}"),
                    None,
                ));
                if frame.header.byte3 % 2 == 0 {
                    core.pending.fail(id, e);
                }
                return;
            }
        };

        notes.push(TraceNote::Inbound(message.clone(), id));

        if message.is_secondary() {
            if let Some(unmatched) = core.pending.resolve(id, message) {
                notes.push(TraceNote::Warning(format!(
                    "Unmatched reply {} [{id}] dropped",
                    unmatched.label()
                )));
            }
        } else if message.expects_reply() {
            let label = message.label();
            match core.unreplied.insert(id, message, Arc::downgrade(self)) {
                Some(entry) => self.publish(SessionEvent::PrimaryReceived(entry)),
                None => notes.push(TraceNote::Warning(format!(
                    "Primary {label} reuses live transaction id {id}; ignored"
                ))),
            }
        } else {
            self.publish(SessionEvent::Message(message));
        }
    }

    fn handle_control(
        self: &Arc<Self>,
        core: &mut Core,
        kind: MessageType,
        frame: HsmsMessage,
        notes: &mut Vec<TraceNote>,
    ) {
        let id = frame.system_bytes();

        match kind {
            MessageType::SelectReq => {
                let status = match core.state {
                    ConnectionState::Connected => SelectStatus::Ok,
                    ConnectionState::Selected => SelectStatus::AlreadyActive,
                    _ => SelectStatus::NotReady,
                };
                notes.push(TraceNote::Debug(format!(
                    "SelectReq [{id}] answered with {status:?}"
                )));
                if core.transmit(HsmsMessage::select_rsp(id, status)).is_ok()
                    && status == SelectStatus::Ok
                {
                    self.mark_selected(core);
                    notes.push(TraceNote::Info("Selected by peer".to_string()));
                }
            }

            MessageType::SelectRsp | MessageType::DeselectRsp | MessageType::LinktestRsp => {
                match core.control.remove(&id) {
                    Some(tx) => {
                        notes.push(TraceNote::Debug(format!("{kind:?} [{id}] received")));
                        let _ = tx.send(frame);
                    }
                    None => notes.push(TraceNote::Warning(format!(
                        "Unexpected {kind:?} [{id}] dropped"
                    ))),
                }
            }

            MessageType::RejectReq => {
                let reason = frame.header.byte3;
                if let Some(tx) = core.control.remove(&id) {
                    let _ = tx.send(frame);
                } else if core.pending.fail(
                    id,
                    Error::protocol(format!("peer rejected transaction {id} (reason {reason})")),
                ) {
                    notes.push(TraceNote::Warning(format!(
                        "Peer rejected transaction [{id}] (reason {reason})"
                    )));
                } else {
                    notes.push(TraceNote::Warning(format!(
                        "Reject.req [{id}] (reason {reason}) matches nothing"
                    )));
                }
            }

            MessageType::LinktestReq => {
                notes.push(TraceNote::Debug(format!("LinktestReq [{id}] answered")));
                let _ = core.transmit(HsmsMessage::linktest_rsp(id));
            }

            MessageType::DeselectReq => {
                notes.push(TraceNote::Debug(format!("DeselectReq [{id}] answered")));
                let _ = core.transmit(HsmsMessage::deselect_rsp(id));
                if core.state == ConnectionState::Selected {
                    core.next_phase();
                    self.set_state(core, ConnectionState::Connected);
                    self.arm_select_timer(core);
                    notes.push(TraceNote::Info("Deselected by peer".to_string()));
                }
            }

            MessageType::SeparateReq => {
                notes.push(TraceNote::Debug(format!("SeparateReq [{id}] received")));
                if self.shutdown_locked(core, false, notes) {
                    notes.push(TraceNote::Info("Peer separated".to_string()));
                }
            }

            MessageType::Data => {}
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if let Some(connection) = core.connection.take() {
            connection.shutdown();
        }
        if let Some(task) = core.accept_task.take() {
            task.abort();
        }
        core.next_phase();
    }
}

// ============================================================================
// Intake
// ============================================================================

/// Link-side view of a session for one epoch.
struct Intake {
    session: Weak<SessionInner>,
    epoch: u64,
}

impl FrameHandler for Intake {
    fn on_frame(&self, frame: HsmsMessage) {
        if let Some(inner) = self.session.upgrade() {
            inner.handle_frame(frame, self.epoch);
        }
    }

    fn on_closed(&self, error: Option<Error>) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };

        if inner.shutdown(Some(self.epoch), false) {
            match error {
                Some(e) => inner.trace.error("Link lost", Some(&e)),
                None => inner.trace.info("Peer closed the link"),
            }
        }
    }
}

// ============================================================================
// Background Tasks
// ============================================================================

/// Accepts the single peer of a passive session.
async fn accept_peer(session: Weak<SessionInner>, listener: Listener, epoch: u64) {
    let accepted = listener.accept().await;
    drop(listener);

    let Some(inner) = session.upgrade() else {
        return;
    };

    let (stream, peer) = match accepted {
        Ok(accepted) => accepted,
        Err(e) => {
            if inner.shutdown(Some(epoch), false) {
                inner.trace.error("Accept failed", Some(&e));
            }
            return;
        }
    };

    if let Err(e) = inner.attach(stream, epoch, None) {
        debug!(session = %inner.id, error = %e, "Accepted peer discarded");
        inner.shutdown(Some(epoch), false);
        return;
    }

    {
        let mut core = inner.core.lock();
        if core.epoch == epoch {
            core.accept_task = None;
            inner.arm_select_timer(&mut core);
        }
    }

    inner.trace.info(&format!("Peer {peer} connected"));
}

/// Tears the link down if it is still not selected after T7.
async fn select_timer(session: Weak<SessionInner>, epoch: u64, phase: u64, limit: Duration) {
    sleep(limit).await;

    let Some(inner) = session.upgrade() else {
        return;
    };

    if inner.expire(epoch, phase) {
        let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
        warn!(session = %inner.id, timeout_ms, "Not selected in time");
        inner.trace.error(
            &format!("Not selected within {timeout_ms}ms; link closed"),
            None,
        );
    }
}

/// Sends Linktest.req every `period` while the epoch lasts.
async fn linktest_loop(session: Weak<SessionInner>, epoch: u64, phase: u64, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        ticker.tick().await;

        let Some(inner) = session.upgrade() else {
            break;
        };
        if !inner.core.lock().is_current(epoch, phase) {
            break;
        }

        match inner.control_transaction(HsmsMessage::linktest_req, epoch).await {
            Ok(response) if response.message_type() == Some(MessageType::LinktestRsp) => {
                debug!(session = %inner.id, id = %response.system_bytes(), "Linktest answered");
            }
            Ok(response) => {
                let error = Error::protocol(format!(
                    "unexpected response to Linktest.req: {:?}",
                    response.message_type()
                ));
                if inner.expire(epoch, phase) {
                    inner.trace.error("Linktest failed", Some(&error));
                }
                break;
            }
            Err(Error::SessionClosed) => break,
            Err(e) => {
                if inner.expire(epoch, phase) {
                    inner.trace.error("Linktest failed", Some(&e));
                }
                break;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
