//! Streaming connection lifecycle.
//!
//! `ConnectionManager` keeps exactly one logical connection to the detector
//! and turns transport events into connection-state changes and frames.
//!
//! States: `Disconnected -> Connecting -> Connected`, and `Reconnecting` after
//! any loss. A lost transport schedules one reconnect timer on the session's
//! timer queue; when it fires a fresh transport is opened.
//!
//! Transports run their I/O elsewhere (usually a reader thread) and report
//! back through an `EventSink`. Every transport is tagged with a
//! `TransportId`; events from anything but the current transport are ignored.
//! That is what keeps a connect that completes after `close()` from
//! resurrecting the connection.

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use crate::frame::DetectionFrame;
use crate::timers::{SessionTimer, TimerId, TimerQueue};
use crate::transport::reconnect::ReconnectPolicy;
use crate::transport::wire::parse_detection_message;

/// Failed attempts between "backend still unreachable" warnings.
const UNREACHABLE_WARN_EVERY: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransportId(pub u64);

#[derive(Clone, Debug, PartialEq)]
pub enum TransportEventKind {
    Opened,
    Message(String),
    Error(String),
    Closed { reason: Option<String> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransportEvent {
    pub transport: TransportId,
    pub kind: TransportEventKind,
}

pub type EventSink = Sender<TransportEvent>;

/// Creates transports. `connect` must not block on the network: it starts
/// the attempt and reports the outcome through `sink`.
pub trait Connector {
    fn connect(&mut self, url: &str, id: TransportId, sink: EventSink)
        -> Result<Box<dyn Transport>>;
}

/// A live (or in-flight) transport. Dropping the box without `close` is
/// allowed but `close` must be called for deterministic teardown.
pub trait Transport {
    fn id(&self) -> TransportId;
    fn close(&mut self);
}

/// Outcome of handling one transport event.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionUpdate {
    State(ConnectionState),
    Frame(DetectionFrame),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub connect_attempts: u64,
    pub frames_received: u64,
    pub malformed_dropped: u64,
    pub reconnects_scheduled: u64,
    pub stale_events_ignored: u64,
}

pub struct ConnectionManager {
    state: ConnectionState,
    url: Option<String>,
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    policy: Box<dyn ReconnectPolicy>,
    failed_attempts: u32,
    reconnect_timer: Option<TimerId>,
    next_transport: u64,
    sink: EventSink,
    inbox: Receiver<TransportEvent>,
    stats: ConnectionStats,
}

impl ConnectionManager {
    pub fn new(connector: Box<dyn Connector>, policy: Box<dyn ReconnectPolicy>) -> Self {
        let (sink, inbox) = mpsc::channel();
        Self {
            state: ConnectionState::Disconnected,
            url: None,
            connector,
            transport: None,
            policy,
            failed_attempts: 0,
            reconnect_timer: None,
            next_transport: 1,
            sink,
            inbox,
            stats: ConnectionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    /// Start connecting to `url`.
    ///
    /// No-op while `Connecting` or `Connected`. From `Reconnecting` the
    /// pending retry is cancelled and the attempt starts now. Returns whether
    /// an attempt was started.
    pub fn open(&mut self, url: &str, timers: &mut TimerQueue<SessionTimer>) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                log::debug!("open({}) ignored: already {}", url, self.state);
                return false;
            }
            ConnectionState::Reconnecting => self.cancel_reconnect(timers),
            ConnectionState::Disconnected => {}
        }
        self.url = Some(url.to_string());
        self.start_attempt(timers);
        true
    }

    /// Tear down the transport and any pending retry. Always ends `Disconnected`.
    pub fn close(&mut self, timers: &mut TimerQueue<SessionTimer>) {
        self.cancel_reconnect(timers);
        if let Some(mut transport) = self.transport.take() {
            log::info!("closing transport {}", transport.id().0);
            transport.close();
        }
        // Anything still queued belongs to the transport we just closed.
        while self.inbox.try_recv().is_ok() {
            self.stats.stale_events_ignored += 1;
        }
        self.state = ConnectionState::Disconnected;
        self.failed_attempts = 0;
        self.url = None;
    }

    /// Drain queued transport events in delivery order.
    pub fn poll(&mut self, timers: &mut TimerQueue<SessionTimer>) -> Vec<ConnectionUpdate> {
        let mut updates = Vec::new();
        loop {
            match self.inbox.try_recv() {
                Ok(event) => updates.extend(self.handle_event(event, timers)),
                Err(TryRecvError::Empty) => break,
                // The manager holds a sender itself, so this cannot happen.
                Err(TryRecvError::Disconnected) => break,
            }
        }
        updates
    }

    /// Handle a single transport event.
    pub fn handle_event(
        &mut self,
        event: TransportEvent,
        timers: &mut TimerQueue<SessionTimer>,
    ) -> Option<ConnectionUpdate> {
        let current = self.transport.as_ref().map(|t| t.id());
        if current != Some(event.transport) {
            log::debug!(
                "ignoring {:?} from stale transport {}",
                event.kind,
                event.transport.0
            );
            self.stats.stale_events_ignored += 1;
            return None;
        }

        match event.kind {
            TransportEventKind::Opened => {
                if self.state != ConnectionState::Connecting {
                    return None;
                }
                log::info!(
                    "detection stream connected: {}",
                    self.url.as_deref().unwrap_or("?")
                );
                self.state = ConnectionState::Connected;
                self.failed_attempts = 0;
                self.policy.reset();
                Some(ConnectionUpdate::State(ConnectionState::Connected))
            }
            TransportEventKind::Message(text) => {
                if self.state != ConnectionState::Connected {
                    log::debug!("message before open on transport {}", event.transport.0);
                    return None;
                }
                match parse_detection_message(text.as_bytes()) {
                    Ok(frame) => {
                        self.stats.frames_received += 1;
                        Some(ConnectionUpdate::Frame(frame))
                    }
                    Err(e) => {
                        self.stats.malformed_dropped += 1;
                        log::warn!("dropping malformed detection message: {}", e);
                        None
                    }
                }
            }
            TransportEventKind::Error(reason) => {
                log::warn!("detection stream error: {}", reason);
                self.transport_lost(timers)
            }
            TransportEventKind::Closed { reason } => {
                log::warn!(
                    "detection stream closed{}",
                    reason.map(|r| format!(": {}", r)).unwrap_or_default()
                );
                self.transport_lost(timers)
            }
        }
    }

    /// Called by the session loop when a `SessionTimer::Reconnect` fires.
    pub fn on_reconnect_timer(&mut self, id: TimerId, timers: &mut TimerQueue<SessionTimer>) {
        if self.reconnect_timer != Some(id) {
            return;
        }
        self.reconnect_timer = None;
        if self.state == ConnectionState::Reconnecting {
            log::info!("reconnect attempt {}", self.failed_attempts + 1);
            self.start_attempt(timers);
        }
    }

    fn start_attempt(&mut self, timers: &mut TimerQueue<SessionTimer>) {
        if let Some(mut old) = self.transport.take() {
            old.close();
        }
        let Some(url) = self.url.clone() else {
            self.state = ConnectionState::Disconnected;
            return;
        };
        let id = TransportId(self.next_transport);
        self.next_transport += 1;
        self.state = ConnectionState::Connecting;
        self.stats.connect_attempts += 1;

        match self.connector.connect(&url, id, self.sink.clone()) {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => {
                log::warn!("failed to start connection to {}: {}", url, e);
                self.transport_lost(timers);
            }
        }
    }

    fn transport_lost(
        &mut self,
        timers: &mut TimerQueue<SessionTimer>,
    ) -> Option<ConnectionUpdate> {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.cancel_reconnect(timers);
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        if self.failed_attempts % UNREACHABLE_WARN_EVERY == 0 {
            log::warn!(
                "detection backend unreachable after {} consecutive attempts; still retrying",
                self.failed_attempts
            );
        }

        match self.policy.next_delay(self.failed_attempts) {
            Some(delay) => {
                self.state = ConnectionState::Reconnecting;
                self.reconnect_timer = Some(timers.schedule_once(delay, SessionTimer::Reconnect));
                self.stats.reconnects_scheduled += 1;
                log::info!("reconnecting in {} ms", delay.as_millis());
                Some(ConnectionUpdate::State(ConnectionState::Reconnecting))
            }
            None => {
                log::error!(
                    "reconnect policy gave up after {} attempts",
                    self.failed_attempts
                );
                self.state = ConnectionState::Disconnected;
                Some(ConnectionUpdate::State(ConnectionState::Disconnected))
            }
        }
    }

    fn cancel_reconnect(&mut self, timers: &mut TimerQueue<SessionTimer>) {
        if let Some(id) = self.reconnect_timer.take() {
            timers.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::reconnect::FixedDelay;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Default)]
    struct Record {
        opened: Vec<(TransportId, EventSink)>,
        closed: Vec<TransportId>,
    }

    struct FakeConnector(Rc<RefCell<Record>>);

    struct FakeTransport {
        id: TransportId,
        record: Rc<RefCell<Record>>,
    }

    impl Connector for FakeConnector {
        fn connect(
            &mut self,
            _url: &str,
            id: TransportId,
            sink: EventSink,
        ) -> Result<Box<dyn Transport>> {
            self.0.borrow_mut().opened.push((id, sink));
            Ok(Box::new(FakeTransport {
                id,
                record: self.0.clone(),
            }))
        }
    }

    impl Transport for FakeTransport {
        fn id(&self) -> TransportId {
            self.id
        }
        fn close(&mut self) {
            self.record.borrow_mut().closed.push(self.id);
        }
    }

    fn setup() -> (
        ManualClock,
        TimerQueue<SessionTimer>,
        ConnectionManager,
        Rc<RefCell<Record>>,
    ) {
        let clock = ManualClock::default();
        let timers = TimerQueue::new(Rc::new(clock.clone()));
        let record = Rc::new(RefCell::new(Record::default()));
        let manager = ConnectionManager::new(
            Box::new(FakeConnector(record.clone())),
            Box::new(FixedDelay::default()),
        );
        (clock, timers, manager, record)
    }

    fn event(id: TransportId, kind: TransportEventKind) -> TransportEvent {
        TransportEvent {
            transport: id,
            kind,
        }
    }

    #[test]
    fn open_is_idempotent_while_connecting() {
        let (_clock, mut timers, mut manager, record) = setup();
        assert!(manager.open("ws://detector/ws", &mut timers));
        assert!(!manager.open("ws://detector/ws", &mut timers));
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(record.borrow().opened.len(), 1);
    }

    #[test]
    fn opened_event_connects() {
        let (_clock, mut timers, mut manager, record) = setup();
        manager.open("ws://detector/ws", &mut timers);
        let id = record.borrow().opened[0].0;
        let update = manager.handle_event(event(id, TransportEventKind::Opened), &mut timers);
        assert_eq!(
            update,
            Some(ConnectionUpdate::State(ConnectionState::Connected))
        );
        assert!(!manager.open("ws://detector/ws", &mut timers));
    }

    #[test]
    fn malformed_message_keeps_state() {
        let (_clock, mut timers, mut manager, record) = setup();
        manager.open("ws://detector/ws", &mut timers);
        let id = record.borrow().opened[0].0;
        manager.handle_event(event(id, TransportEventKind::Opened), &mut timers);
        let update = manager.handle_event(
            event(id, TransportEventKind::Message("{broken".into())),
            &mut timers,
        );
        assert!(update.is_none());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.stats().malformed_dropped, 1);
    }

    #[test]
    fn close_schedules_single_reconnect() {
        let (clock, mut timers, mut manager, record) = setup();
        manager.open("ws://detector/ws", &mut timers);
        let id = record.borrow().opened[0].0;
        manager.handle_event(event(id, TransportEventKind::Opened), &mut timers);
        manager.handle_event(event(id, TransportEventKind::Error("reset".into())), &mut timers);
        // The close that follows an error for the same transport is stale.
        manager.handle_event(
            event(id, TransportEventKind::Closed { reason: None }),
            &mut timers,
        );
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(timers.pending(), 1);

        clock.advance(Duration::from_secs(3));
        for (timer, kind) in timers.take_due() {
            assert_eq!(kind, SessionTimer::Reconnect);
            manager.on_reconnect_timer(timer, &mut timers);
        }
        assert_eq!(record.borrow().opened.len(), 2);
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[test]
    fn close_while_connecting_ignores_late_open() {
        let (_clock, mut timers, mut manager, record) = setup();
        manager.open("ws://detector/ws", &mut timers);
        let (id, sink) = record.borrow().opened[0].clone();
        manager.close(&mut timers);
        assert_eq!(record.borrow().closed, vec![id]);

        sink.send(event(id, TransportEventKind::Opened)).unwrap();
        assert!(manager.poll(&mut timers).is_empty());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.has_transport());
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn close_cancels_pending_reconnect() {
        let (clock, mut timers, mut manager, record) = setup();
        manager.open("ws://detector/ws", &mut timers);
        let id = record.borrow().opened[0].0;
        manager.handle_event(
            event(id, TransportEventKind::Closed { reason: None }),
            &mut timers,
        );
        assert!(manager.reconnect_pending());
        manager.close(&mut timers);
        assert_eq!(timers.pending(), 0);
        clock.advance(Duration::from_secs(10));
        assert!(timers.take_due().is_empty());
        assert_eq!(record.borrow().opened.len(), 1);
    }

    #[test]
    fn open_while_reconnecting_attempts_now() {
        let (clock, mut timers, mut manager, record) = setup();
        manager.open("ws://detector/ws", &mut timers);
        let id = record.borrow().opened[0].0;
        manager.handle_event(event(id, TransportEventKind::Error("refused".into())), &mut timers);
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(timers.pending(), 1);

        assert!(manager.open("ws://detector/ws", &mut timers));
        assert_eq!(timers.pending(), 0);
        assert!(!manager.reconnect_pending());
        assert_eq!(record.borrow().opened.len(), 2);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        // The cancelled retry never fires.
        clock.advance(Duration::from_secs(10));
        assert!(timers.take_due().is_empty());
        assert_eq!(record.borrow().opened.len(), 2);
        assert_eq!(manager.stats().connect_attempts, 2);
    }

    struct GiveUpAfter(u32);

    impl ReconnectPolicy for GiveUpAfter {
        fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
            (attempt < self.0).then_some(Duration::from_millis(10))
        }
    }

    #[test]
    fn policy_can_stop_retrying() {
        let record = Rc::new(RefCell::new(Record::default()));
        let clock = ManualClock::default();
        let mut timers = TimerQueue::new(Rc::new(clock.clone()));
        let mut manager = ConnectionManager::new(
            Box::new(FakeConnector(record.clone())),
            Box::new(GiveUpAfter(1)),
        );
        manager.open("ws://detector/ws", &mut timers);
        let id = record.borrow().opened[0].0;
        let update = manager.handle_event(
            event(id, TransportEventKind::Error("refused".into())),
            &mut timers,
        );
        assert_eq!(
            update,
            Some(ConnectionUpdate::State(ConnectionState::Disconnected))
        );
        assert_eq!(timers.pending(), 0);
    }
}
