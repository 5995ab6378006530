use futures::future::BoxFuture;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::time::{sleep, Sleep};

use crate::codec::{ControlMessage, DecodedMessage, MessageCodec};
use crate::connection::backoff::ReconnectPolicy;
use crate::connection::transport::{Connector, Link, Outbound, TransportEvent, ABNORMAL_CLOSE, NORMAL_CLOSE};
use crate::models::config::PipelineConfig;
use crate::models::events::{ConnectionState, PipelineEvent};
use crate::utils::error::{PipelineError, PipelineResult};

/// Completion of a `connect` call
pub type ConnectWaiter = oneshot::Sender<PipelineResult<()>>;

/// What woke the manager up
enum Wake {
    Opened(PipelineResult<Link>),
    Inbound(Option<TransportEvent>),
    RetryDue,
}

/// Owns the backend connection.
///
/// Drives the open attempt, reconnects with exponential backoff after an
/// unclean close, queues outbound control messages while not connected and
/// decodes inbound frames into [`PipelineEvent`]s.
pub struct ConnectionManager {
    endpoint: String,
    connector: Box<dyn Connector>,
    codec: MessageCodec,
    policy: ReconnectPolicy,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    /// Automatic retries since the last successful open
    attempts: u32,
    connecting: Option<BoxFuture<'static, PipelineResult<Link>>>,
    waiters: Vec<ConnectWaiter>,
    link: Option<Link>,
    outbound: VecDeque<ControlMessage>,
    reconnect: Option<Pin<Box<Sleep>>>,
    /// Cause of an `Error` not yet followed by `Disconnected`
    unsettled: Option<String>,
}

impl ConnectionManager {
    pub fn new(config: &PipelineConfig, connector: Box<dyn Connector>) -> Self {
        let policy = ReconnectPolicy::new(config.reconnect_base_delay(), config.max_reconnect_attempts)
            .with_max_delay(config.reconnect_max_delay());
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            endpoint: config.endpoint.clone(),
            connector,
            codec: MessageCodec::new(),
            policy,
            state: ConnectionState::Disconnected,
            state_tx,
            attempts: 0,
            connecting: None,
            waiters: Vec::new(),
            link: None,
            outbound: VecDeque::new(),
            reconnect: None,
            unsettled: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Receiver that tracks every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Open the connection, or join the attempt already in flight.
    ///
    /// `waiter` is resolved with the attempt's outcome; immediately if the
    /// connection is already open.
    pub fn connect(&mut self, waiter: Option<ConnectWaiter>) {
        match self.state {
            ConnectionState::Connected => {
                debug!("connect(): already connected");
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Ok(()));
                }
            }
            ConnectionState::Connecting => {
                debug!("connect(): joining attempt in flight");
                self.waiters.extend(waiter);
            }
            ConnectionState::Disconnected | ConnectionState::Error => {
                self.unsettled = None;
                self.waiters.extend(waiter);
                // Explicit connect supersedes a scheduled retry
                self.reconnect = None;
                self.start_attempt();
            }
        }
    }

    /// Intentional close. Cancels any pending retry or attempt, discards the
    /// outbound queue and never triggers a reconnect. Idempotent.
    pub fn disconnect(&mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        self.reconnect = None;
        self.unsettled = None;

        if !self.outbound.is_empty() {
            info!("Discarding {} queued outbound messages", self.outbound.len());
            self.outbound.clear();
        }

        if self.connecting.take().is_some() {
            info!("Cancelling connection attempt to {}", self.endpoint);
            self.resolve_waiters(Err(PipelineError::Transport(
                "connection attempt cancelled by disconnect".to_string(),
            )));
        }

        if let Some(link) = self.link.take() {
            info!("Disconnecting from {}", self.endpoint);
            let _ = link.outbound.send(Outbound::Close);
            events.push(PipelineEvent::Disconnected {
                code: NORMAL_CLOSE,
                reason: "client disconnect".to_string(),
            });
        }

        self.set_state(ConnectionState::Disconnected);
        events
    }

    /// Transmit now if connected, otherwise queue for the next open.
    ///
    /// Returns the events of a close noticed while writing.
    pub fn send(&mut self, message: ControlMessage) -> Vec<PipelineEvent> {
        if self.state == ConnectionState::Connected {
            self.transmit(message)
        } else {
            debug!("Queueing {:?} until connected", message);
            self.outbound.push_back(message);
            Vec::new()
        }
    }

    /// Finish an error transition: `Error` becomes `Disconnected` and a
    /// reconnect is scheduled. Call once listeners have seen the `Error`
    /// event. Empty if there is nothing to settle.
    pub fn settle_error(&mut self) -> Vec<PipelineEvent> {
        let Some(cause) = self.unsettled.take() else {
            return Vec::new();
        };
        if self.state != ConnectionState::Error {
            return Vec::new();
        }
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
        vec![PipelineEvent::Disconnected {
            code: ABNORMAL_CLOSE,
            reason: cause,
        }]
    }

    /// Wait for the next thing to happen on the connection.
    ///
    /// Never resolves while idle. An error left unsettled is settled first.
    /// Cancel safe: dropping the future loses
    /// nothing.
    pub async fn next_events(&mut self) -> Vec<PipelineEvent> {
        // Caller never settled the last error
        let settled = self.settle_error();
        if !settled.is_empty() {
            return settled;
        }

        let wake = {
            let connecting = &mut self.connecting;
            let link = &mut self.link;
            let reconnect = &mut self.reconnect;

            tokio::select! {
                opened = poll_connecting(connecting) => Wake::Opened(opened),
                event = poll_inbound(link) => Wake::Inbound(event),
                _ = poll_retry(reconnect) => Wake::RetryDue,
            }
        };

        match wake {
            Wake::Opened(Ok(link)) => self.on_open(link),
            Wake::Opened(Err(e)) => {
                self.connecting = None;
                self.resolve_waiters(Err(e.clone()));
                self.fail(e.to_string())
            }
            Wake::Inbound(Some(TransportEvent::Frame(frame))) => match self.codec.decode(&frame) {
                Some(DecodedMessage::Flow(record)) => vec![PipelineEvent::Flow(Arc::new(record))],
                Some(DecodedMessage::Control(event)) => vec![PipelineEvent::from(event)],
                None => Vec::new(),
            },
            Wake::Inbound(Some(TransportEvent::Closed { code, reason })) => self.on_close(code, reason),
            Wake::Inbound(Some(TransportEvent::Error(cause))) => {
                self.link = None;
                self.fail(cause)
            }
            Wake::Inbound(None) => self.on_close(ABNORMAL_CLOSE, "transport ended".to_string()),
            Wake::RetryDue => {
                self.reconnect = None;
                self.start_attempt();
                Vec::new()
            }
        }
    }

    fn start_attempt(&mut self) {
        if self.attempts == 0 {
            info!("Connecting to {}", self.endpoint);
        } else {
            info!(
                "Reconnecting to {} (attempt {}/{})",
                self.endpoint,
                self.attempts,
                self.policy.max_attempts()
            );
        }
        self.connecting = Some(self.connector.open(&self.endpoint));
        self.set_state(ConnectionState::Connecting);
    }

    fn on_open(&mut self, link: Link) -> Vec<PipelineEvent> {
        self.connecting = None;
        self.link = Some(link);
        self.attempts = 0;
        self.set_state(ConnectionState::Connected);
        info!("Connected to {}", self.endpoint);

        if !self.outbound.is_empty() {
            debug!("Flushing {} queued messages", self.outbound.len());
        }
        self.resolve_waiters(Ok(()));

        let mut events = vec![PipelineEvent::Connected];
        while self.state == ConnectionState::Connected {
            let Some(message) = self.outbound.pop_front() else {
                break;
            };
            events.extend(self.transmit(message));
        }
        events
    }

    fn on_close(&mut self, code: u16, reason: String) -> Vec<PipelineEvent> {
        self.link = None;
        self.set_state(ConnectionState::Disconnected);

        if code == NORMAL_CLOSE {
            info!("Connection closed cleanly: {}", reason);
        } else {
            warn!("Connection closed with code {}: {}", code, reason);
            self.schedule_reconnect();
        }
        vec![PipelineEvent::Disconnected { code, reason }]
    }

    /// Open failure or transport I/O error. The state stays `Error` until
    /// [`ConnectionManager::settle_error`].
    fn fail(&mut self, cause: String) -> Vec<PipelineEvent> {
        warn!("Connection error: {}", cause);
        self.set_state(ConnectionState::Error);
        self.unsettled = Some(cause.clone());
        vec![PipelineEvent::Error { cause }]
    }

    fn schedule_reconnect(&mut self) {
        if self.policy.exhausted(self.attempts) {
            warn!(
                "Giving up on {} after {} reconnect attempts",
                self.endpoint, self.attempts
            );
            return;
        }
        self.attempts += 1;
        let delay = self.policy.delay_for(self.attempts);
        info!("Reconnecting in {:?}", delay);
        self.reconnect = Some(Box::pin(sleep(delay)));
    }

    fn transmit(&mut self, message: ControlMessage) -> Vec<PipelineEvent> {
        let frame = match self.codec.encode(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping unencodable {:?}: {}", message, e);
                return Vec::new();
            }
        };

        let Some(link) = &self.link else {
            self.outbound.push_back(message);
            return Vec::new();
        };
        if link.outbound.send(Outbound::Frame(frame)).is_err() {
            // Message goes out again after the reconnect
            debug!("Transport writer closed; requeueing {:?}", message);
            self.outbound.push_front(message);
            return self.on_close(ABNORMAL_CLOSE, "transport writer closed".to_string());
        }
        Vec::new()
    }

    fn resolve_waiters(&mut self, outcome: PipelineResult<()>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state {} -> {}", self.state, state);
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }
}

async fn poll_connecting(
    connecting: &mut Option<BoxFuture<'static, PipelineResult<Link>>>,
) -> PipelineResult<Link> {
    match connecting {
        Some(opening) => opening.await,
        None => pending().await,
    }
}

async fn poll_inbound(link: &mut Option<Link>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => pending().await,
    }
}

async fn poll_retry(reconnect: &mut Option<Pin<Box<Sleep>>>) {
    match reconnect {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::transport::{ChannelConnector, PendingOpen, RemoteEnd};
    use crate::codec::Frame;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Instant};

    fn config(base_ms: u64, attempts: u32) -> PipelineConfig {
        PipelineConfig {
            endpoint: "ws://memory/ws".to_string(),
            reconnect_base_delay_ms: base_ms,
            max_reconnect_attempts: attempts,
            ping_interval_secs: None,
            ..PipelineConfig::default()
        }
    }

    fn manager(base_ms: u64, attempts: u32) -> (ConnectionManager, mpsc::UnboundedReceiver<PendingOpen>) {
        let (connector, opens) = ChannelConnector::new();
        (ConnectionManager::new(&config(base_ms, attempts), Box::new(connector)), opens)
    }

    async fn open(manager: &mut ConnectionManager, opens: &mut mpsc::UnboundedReceiver<PendingOpen>) -> RemoteEnd {
        let remote = opens.recv().await.unwrap().accept();
        assert_eq!(manager.next_events().await, vec![PipelineEvent::Connected]);
        remote
    }

    #[tokio::test]
    async fn test_connect_while_connecting_joins_attempt() {
        let (mut manager, mut opens) = manager(100, 3);
        let (first_tx, first) = oneshot::channel();
        let (second_tx, second) = oneshot::channel();

        manager.connect(Some(first_tx));
        manager.connect(Some(second_tx));
        assert_eq!(manager.state(), ConnectionState::Connecting);

        let _remote = open(&mut manager, &mut opens).await;
        assert_eq!(first.await.unwrap(), Ok(()));
        assert_eq!(second.await.unwrap(), Ok(()));
        assert!(opens.try_recv().is_err(), "a second transport was opened");

        let (third_tx, third) = oneshot::channel();
        manager.connect(Some(third_tx));
        assert_eq!(third.await.unwrap(), Ok(()));
        assert!(opens.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_queued_messages_flush_in_order() {
        let (mut manager, mut opens) = manager(100, 3);
        manager.send(ControlMessage::Ping { timestamp: 1 });
        manager.send(ControlMessage::Ping { timestamp: 2 });
        assert_eq!(manager.outbound.len(), 2);

        manager.connect(None);
        let mut remote = open(&mut manager, &mut opens).await;
        assert_eq!(manager.outbound.len(), 0);

        for ts in [1, 2] {
            let expected = format!(r#"{{"type":"ping","timestamp":{}}}"#, ts);
            assert_eq!(remote.recv().await, Some(Outbound::Frame(Frame::Text(expected))));
        }

        manager.send(ControlMessage::Pong);
        assert_eq!(
            remote.recv().await,
            Some(Outbound::Frame(Frame::Text(r#"{"type":"pong"}"#.to_string())))
        );
    }

    #[tokio::test]
    async fn test_inbound_frames_become_events() {
        let (mut manager, mut opens) = manager(100, 3);
        manager.connect(None);
        let remote = open(&mut manager, &mut opens).await;

        remote.send_text(r#"{"type":"interception_status","status":"stopped","port":8080}"#);
        assert_eq!(
            manager.next_events().await,
            vec![PipelineEvent::InterceptionStopped { port: Some(8080) }]
        );

        // Undecodable frames are dropped without an event
        remote.send(Frame::Binary(vec![0xff, 0x01]));
        assert!(manager.next_events().await.is_empty());
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_then_gives_up() {
        let (mut manager, mut opens) = manager(100, 3);
        let (tx, rx) = oneshot::channel();
        manager.connect(Some(tx));
        opens.recv().await.unwrap().refuse("connection refused");

        assert_eq!(
            manager.next_events().await,
            vec![PipelineEvent::Error {
                cause: "Transport error: connection refused".to_string()
            }]
        );
        assert_eq!(manager.state(), ConnectionState::Error);
        assert!(!manager.reconnect.is_some());
        assert!(matches!(rx.await.unwrap(), Err(PipelineError::Transport(_))));

        assert_eq!(
            manager.settle_error(),
            vec![PipelineEvent::Disconnected {
                code: ABNORMAL_CLOSE,
                reason: "Transport error: connection refused".to_string()
            }]
        );
        assert!(manager.settle_error().is_empty());

        let mut gaps = Vec::new();
        for _ in 0..3 {
            let failed_at = Instant::now();
            // Retry timer fires and starts a new attempt
            assert!(manager.next_events().await.is_empty());
            gaps.push(failed_at.elapsed().as_millis());
            assert_eq!(manager.state(), ConnectionState::Connecting);

            opens.recv().await.unwrap().refuse("connection refused");
            assert_eq!(manager.next_events().await.len(), 1);
            assert_eq!(manager.settle_error().len(), 1);
        }
        for (gap, expected) in gaps.iter().zip([100u128, 200, 400]) {
            assert!((expected..expected + 5).contains(gap), "gap {}ms, expected {}ms", gap, expected);
        }

        assert!(!manager.reconnect.is_some());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(timeout(Duration::from_secs(60), manager.next_events()).await.is_err());
        assert!(opens.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_open_resets_attempts() {
        let (mut manager, mut opens) = manager(100, 2);
        manager.connect(None);
        opens.recv().await.unwrap().refuse("down");
        manager.next_events().await;
        manager.settle_error();

        // First retry succeeds
        assert!(manager.next_events().await.is_empty());
        let remote = open(&mut manager, &mut opens).await;

        remote.close(1001, "going away");
        assert_eq!(
            manager.next_events().await,
            vec![PipelineEvent::Disconnected {
                code: 1001,
                reason: "going away".to_string()
            }]
        );

        // Counter starts over: next delay is the base delay again
        let closed_at = Instant::now();
        assert!(manager.next_events().await.is_empty());
        let waited = closed_at.elapsed();
        assert!(waited >= Duration::from_millis(100) && waited < Duration::from_millis(105));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_close_does_not_reconnect() {
        let (mut manager, mut opens) = manager(100, 3);
        manager.connect(None);
        let remote = open(&mut manager, &mut opens).await;

        remote.close(NORMAL_CLOSE, "bye");
        assert_eq!(manager.next_events().await.len(), 1);
        assert!(!manager.reconnect.is_some());
        assert!(timeout(Duration::from_secs(60), manager.next_events()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_intentional_and_idempotent() {
        let (mut manager, mut opens) = manager(100, 3);
        manager.connect(None);
        let mut remote = open(&mut manager, &mut opens).await;

        manager.send(ControlMessage::Pong);
        assert_eq!(
            manager.disconnect(),
            vec![PipelineEvent::Disconnected {
                code: NORMAL_CLOSE,
                reason: "client disconnect".to_string()
            }]
        );
        assert!(matches!(remote.recv().await, Some(Outbound::Frame(_))));
        assert_eq!(remote.recv().await, Some(Outbound::Close));
        assert!(remote.recv().await.is_none());

        assert!(manager.disconnect().is_empty());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(timeout(Duration::from_secs(60), manager.next_events()).await.is_err());
        assert!(opens.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_scheduled_retry_and_queue() {
        let (mut manager, mut opens) = manager(100, 3);
        manager.connect(None);
        opens.recv().await.unwrap().refuse("down");
        manager.next_events().await;
        manager.settle_error();
        assert!(manager.reconnect.is_some());

        assert!(manager.send(ControlMessage::Pong).is_empty());
        assert!(manager.disconnect().is_empty());
        assert_eq!(manager.outbound.len(), 0);
        assert!(!manager.reconnect.is_some());
        assert!(timeout(Duration::from_secs(60), manager.next_events()).await.is_err());
        assert!(opens.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_during_attempt_fails_waiters() {
        let (mut manager, mut opens) = manager(100, 3);
        let (tx, rx) = oneshot::channel();
        manager.connect(Some(tx));
        let pending_open = opens.recv().await.unwrap();

        assert!(manager.disconnect().is_empty());
        assert!(matches!(rx.await.unwrap(), Err(PipelineError::Transport(_))));

        // Late accept goes nowhere
        let remote = pending_open.accept();
        assert!(!remote.send_text(r#"{"type":"pong"}"#));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_then_reconnect() {
        let (mut manager, mut opens) = manager(100, 3);
        let mut states = manager.watch_state();
        manager.connect(None);
        let remote = open(&mut manager, &mut opens).await;

        states.borrow_and_update();

        remote.fail("connection reset");
        assert_eq!(
            manager.next_events().await,
            vec![PipelineEvent::Error {
                cause: "connection reset".to_string()
            }]
        );
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), ConnectionState::Error);

        // Left unsettled, the next poll settles it
        assert_eq!(
            manager.next_events().await,
            vec![PipelineEvent::Disconnected {
                code: ABNORMAL_CLOSE,
                reason: "connection reset".to_string()
            }]
        );
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
        assert!(manager.reconnect.is_some());

        assert!(manager.next_events().await.is_empty());
        let _remote = open(&mut manager, &mut opens).await;
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_connect_after_error_skips_settling() {
        let (mut manager, mut opens) = manager(100, 3);
        manager.connect(None);
        opens.recv().await.unwrap().refuse("down");
        manager.next_events().await;

        manager.connect(None);
        assert!(manager.settle_error().is_empty());
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(!manager.reconnect.is_some());
        let _remote = open(&mut manager, &mut opens).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_to_closed_writer_reports_close() {
        let (mut manager, mut opens) = manager(100, 3);
        manager.connect(None);
        let remote = open(&mut manager, &mut opens).await;
        drop(remote);

        assert_eq!(
            manager.send(ControlMessage::Pong),
            vec![PipelineEvent::Disconnected {
                code: ABNORMAL_CLOSE,
                reason: "transport writer closed".to_string()
            }]
        );
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.reconnect.is_some());
        assert_eq!(manager.outbound.len(), 1);

        // The kept message goes out on the next link
        assert!(manager.next_events().await.is_empty());
        let mut remote = open(&mut manager, &mut opens).await;
        assert_eq!(
            remote.recv().await,
            Some(Outbound::Frame(Frame::Text(r#"{"type":"pong"}"#.to_string())))
        );
    }
}
