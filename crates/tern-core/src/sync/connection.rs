//! Push connection manager
//!
//! Owns the single WebSocket connection of an authenticated session. The
//! connection task dials with the current bearer token, pumps inbound
//! frames onto the event bus, and reconnects on transport failure with
//! capped exponential backoff until retries are exhausted or the session
//! is torn down. State is observable on a `watch` channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use url::Url;

use super::backoff::{ReconnectConfig, ReconnectPolicy};
use crate::auth::TokenProvider;
use crate::bus::EventBus;
use crate::models::Event;

/// Observable connection lifecycle
///
/// `Idle` is both the initial state and the terminal state after an
/// intentional teardown or exhausted retries; only [`connect`] or
/// [`reconnect`] leave it.
///
/// [`connect`]: ConnectionManager::connect
/// [`reconnect`]: ConnectionManager::reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    ReconnectScheduled,
}

/// Errors surfaced by connection operations
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("no bearer token available; not connecting")]
    NotAuthenticated,

    #[error("invalid websocket url '{0}'")]
    InvalidUrl(String),

    #[error("connection is not open")]
    NotConnected,
}

/// Control messages for the connection task
enum Command {
    Reconnect,
    Shutdown,
}

/// Why the pump returned
enum PumpEnd {
    /// Intentional teardown; do not reconnect
    Shutdown,
    /// Transport closed (remote close, error upstream, or manual
    /// reconnect); the retry loop decides what happens next
    Closed,
}

pub struct ConnectionManager {
    ws_url: String,
    tokens: Arc<dyn TokenProvider>,
    bus: Arc<EventBus>,
    state: watch::Sender<ConnectionState>,
    policy: Mutex<ReconnectPolicy>,
    reconnect_wanted: AtomicBool,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        ws_url: impl Into<String>,
        config: ReconnectConfig,
        tokens: Arc<dyn TokenProvider>,
        bus: Arc<EventBus>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            ws_url: ws_url.into(),
            tokens,
            bus,
            state,
            policy: Mutex::new(ReconnectPolicy::new(config)),
            reconnect_wanted: AtomicBool::new(false),
            commands: Mutex::new(None),
            outbound: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Open the push connection
    ///
    /// A no-op when an attempt is already in flight or the connection is
    /// open. Requires a bearer token: without one the manager stays
    /// `Idle` and reports the failure instead of spinning a retry loop.
    pub fn connect(self: &Arc<Self>) -> Result<(), ConnectError> {
        let mut task = self.task.lock().unwrap();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!("connect ignored; connection task already running");
                return Ok(());
            }
        }

        Url::parse(&self.ws_url).map_err(|_| ConnectError::InvalidUrl(self.ws_url.clone()))?;

        if !self.tokens.is_authenticated() {
            warn!("no bearer token available; staying idle");
            return Err(ConnectError::NotAuthenticated);
        }

        self.reconnect_wanted.store(true, Ordering::SeqCst);
        self.policy.lock().unwrap().reset();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.commands.lock().unwrap() = Some(command_tx);

        self.set_state(ConnectionState::Connecting);
        let manager = self.clone();
        *task = Some(tokio::spawn(manager.run(command_rx)));
        Ok(())
    }

    /// Manually restart the connection
    ///
    /// Cancels any pending scheduled attempt, resets the retry counter,
    /// and either closes the open connection (triggering the normal
    /// reopening path) or dials directly when no task is running.
    pub fn reconnect(self: &Arc<Self>) -> Result<(), ConnectError> {
        info!("manual reconnect requested");
        self.reconnect_wanted.store(true, Ordering::SeqCst);
        self.policy.lock().unwrap().reset();

        let delivered = {
            let commands = self.commands.lock().unwrap();
            match commands.as_ref() {
                Some(tx) => tx.send(Command::Reconnect).is_ok(),
                None => false,
            }
        };

        if delivered {
            Ok(())
        } else {
            self.connect()
        }
    }

    /// Tear the connection down and suppress any further reconnects
    ///
    /// The do-not-reconnect flag is set before anything is closed, so no
    /// retry can be scheduled after an intentional shutdown.
    pub async fn shutdown(&self) {
        self.reconnect_wanted.store(false, Ordering::SeqCst);

        let delivered = {
            let commands = self.commands.lock().unwrap();
            match commands.as_ref() {
                Some(tx) => tx.send(Command::Shutdown).is_ok(),
                None => false,
            }
        };

        let task = self.task.lock().unwrap().take();
        if let Some(handle) = task {
            if delivered {
                handle.await.ok();
            } else {
                handle.abort();
                handle.await.ok();
            }
        }

        *self.outbound.lock().unwrap() = None;
        *self.commands.lock().unwrap() = None;
        self.set_state(ConnectionState::Idle);
    }

    /// Send an event to the server
    ///
    /// Fails with [`ConnectError::NotConnected`] unless the connection is
    /// open.
    pub fn send(&self, event: &Event) -> Result<(), ConnectError> {
        if self.state() != ConnectionState::Open {
            return Err(ConnectError::NotConnected);
        }
        let outbound = self.outbound.lock().unwrap();
        match outbound.as_ref() {
            Some(tx) => tx.send(event.clone()).map_err(|_| ConnectError::NotConnected),
            None => Err(ConnectError::NotConnected),
        }
    }

    /// Connection task: dial, pump, and reschedule until shutdown or
    /// exhausted retries
    async fn run(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            match self.open_and_pump(&mut commands).await {
                Ok(PumpEnd::Shutdown) => {
                    info!("push connection shut down");
                    break;
                }
                Ok(PumpEnd::Closed) => info!("push connection closed"),
                Err(error) => warn!(error = %error, "push connection failed"),
            }
            *self.outbound.lock().unwrap() = None;

            if !self.reconnect_wanted.load(Ordering::SeqCst) {
                break;
            }

            let delay = self.policy.lock().unwrap().next_delay();
            let Some(delay) = delay else {
                warn!("reconnect attempts exhausted; manual reconnect required");
                break;
            };

            let attempt = self.policy.lock().unwrap().retries();
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            self.set_state(ConnectionState::ReconnectScheduled);

            let mut teardown = false;
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                command = commands.recv() => match command {
                    // Timer cancelled; the counter was already reset
                    Some(Command::Reconnect) => {}
                    Some(Command::Shutdown) | None => teardown = true,
                }
            }
            if teardown || !self.reconnect_wanted.load(Ordering::SeqCst) {
                break;
            }

            if !self.tokens.is_authenticated() {
                warn!("bearer token no longer available; abandoning reconnect");
                break;
            }
            self.set_state(ConnectionState::Connecting);
        }

        *self.outbound.lock().unwrap() = None;
        *self.commands.lock().unwrap() = None;
        self.set_state(ConnectionState::Idle);
    }

    /// Dial once and pump frames until the connection ends
    async fn open_and_pump(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Result<PumpEnd> {
        let token = self
            .tokens
            .token()
            .context("bearer token disappeared before dialing")?;
        let url = self.connect_url(&token)?;

        let (stream, _response) = connect_async(url.as_str())
            .await
            .context("websocket handshake failed")?;
        info!("websocket connected");

        // Successful handshake resets the backoff schedule
        self.policy.lock().unwrap().reset();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Event>();
        *self.outbound.lock().unwrap() = Some(outbound_tx);
        self.set_state(ConnectionState::Open);

        let (mut write, mut read) = stream.split();
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Reconnect) => {
                        info!("manual reconnect; closing current connection");
                        write.close().await.ok();
                        return Ok(PumpEnd::Closed);
                    }
                    Some(Command::Shutdown) | None => {
                        write.close().await.ok();
                        return Ok(PumpEnd::Shutdown);
                    }
                },

                outbound = outbound_rx.recv() => match outbound {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(frame) => {
                            write
                                .send(WsMessage::Text(frame))
                                .await
                                .context("failed to send frame")?;
                        }
                        Err(err) => error!(error = %err, "failed to encode outbound event"),
                    },
                    None => {
                        debug!("outbound channel closed");
                        return Ok(PumpEnd::Closed);
                    }
                },

                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => self.handle_frame(&text),
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "server closed the connection");
                        return Ok(PumpEnd::Closed);
                    }
                    // Pings and pongs are handled by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        return Err(anyhow::anyhow!("websocket error: {error}"));
                    }
                    None => return Ok(PumpEnd::Closed),
                },
            }
        }
    }

    /// Decode one inbound frame and publish it; malformed frames are
    /// dropped without affecting the connection
    fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<Event>(text) {
            Ok(event) => {
                debug!(
                    event_type = ?event.event_type,
                    event_id = %event.event_id,
                    "event received"
                );
                self.bus.emit(&event);
            }
            Err(error) => warn!(error = %error, "dropping malformed frame"),
        }
    }

    /// The websocket URL with the bearer token as a query parameter
    fn connect_url(&self, token: &str) -> Result<Url> {
        let mut url = Url::parse(&self.ws_url)
            .with_context(|| format!("invalid websocket url '{}'", self.ws_url))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current != state {
                debug!(from = ?*current, to = ?state, "connection state changed");
                *current = state;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use crate::models::EventType;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use uuid::Uuid;

    fn manager(
        ws_url: String,
        config: ReconnectConfig,
        token: Option<&str>,
    ) -> (Arc<ConnectionManager>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let tokens: Arc<dyn TokenProvider> = match token {
            Some(t) => Arc::new(StaticTokenProvider::new(t)),
            None => Arc::new(StaticTokenProvider::empty()),
        };
        let manager = Arc::new(ConnectionManager::new(ws_url, config, tokens, bus.clone()));
        (manager, bus)
    }

    fn fast_config(max_retries: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(30),
            max_delay: Duration::from_millis(120),
            max_retries,
        }
    }

    async fn wait_for_state(manager: &Arc<ConnectionManager>, state: ConnectionState) {
        let mut rx = manager.subscribe_state();
        timeout(Duration::from_secs(5), rx.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for connection state")
            .expect("state channel closed");
    }

    /// An address nothing is listening on: dials are refused immediately
    async fn refused_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_connect_without_token_stays_idle() {
        let (manager, _) = manager("ws://127.0.0.1:1/ws".into(), fast_config(5), None);

        let result = manager.connect();
        assert!(matches!(result, Err(ConnectError::NotAuthenticated)));
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let (manager, _) = manager("not a url".into(), fast_config(5), Some("token"));

        let result = manager.connect();
        assert!(matches!(result, Err(ConnectError::InvalidUrl(_))));
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_send_requires_open_connection() {
        let (manager, _) = manager("ws://127.0.0.1:1/ws".into(), fast_config(5), Some("token"));

        let event = Event::new(EventType::Message, Uuid::new_v4(), Uuid::new_v4(), "hi");
        assert!(matches!(
            manager.send(&event),
            Err(ConnectError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_open_pumps_events_and_survives_malformed_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let inbound = Event::new(EventType::Message, Uuid::new_v4(), Uuid::new_v4(), "live");
        let inbound_frame = serde_json::to_string(&inbound).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(WsMessage::Text("definitely not json".into()))
                .await
                .unwrap();
            ws.send(WsMessage::Text(inbound_frame)).await.unwrap();
            // Echo whatever the client sends until it hangs up
            while let Some(Ok(message)) = ws.next().await {
                if message.is_text() {
                    ws.send(message).await.ok();
                }
            }
        });

        let (manager, bus) = manager(format!("ws://{addr}"), fast_config(5), Some("token"));
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        bus.subscribe(EventType::Message, move |event| {
            seen_tx.send(event.clone()).ok();
        });

        manager.connect().unwrap();
        wait_for_state(&manager, ConnectionState::Open).await;

        // Connecting again while open is a no-op
        manager.connect().unwrap();
        assert_eq!(manager.state(), ConnectionState::Open);

        let received = timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, inbound);
        // The malformed frame was dropped without closing the connection
        assert_eq!(manager.state(), ConnectionState::Open);

        // Outbound path: the echoed event comes back through the bus
        let outbound = Event::new(EventType::Message, Uuid::new_v4(), Uuid::new_v4(), "sent");
        manager.send(&outbound).unwrap();
        let echoed = timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, outbound);

        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Idle);
        server.abort();
    }

    #[tokio::test]
    async fn test_refused_dial_schedules_reconnect_until_exhausted() {
        let url = refused_addr().await;
        let (manager, _) = manager(url, fast_config(2), Some("token"));

        manager.connect().unwrap();
        wait_for_state(&manager, ConnectionState::ReconnectScheduled).await;
        wait_for_state(&manager, ConnectionState::Idle).await;

        // Exhausted retries are terminal until a manual reconnect
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_reconnect() {
        let url = refused_addr().await;
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            max_retries: 5,
        };
        let (manager, _) = manager(url, config, Some("token"));

        manager.connect().unwrap();
        wait_for_state(&manager, ConnectionState::ReconnectScheduled).await;

        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Idle);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_server_drop_schedules_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (drop_tx, drop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop_rx.await.ok();
            // Non-intentional drop from the client's point of view
            drop(ws);
        });

        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_millis(300),
            max_retries: 5,
        };
        let (manager, _) = manager(format!("ws://{addr}"), config, Some("token"));

        manager.connect().unwrap();
        wait_for_state(&manager, ConnectionState::Open).await;
        drop_tx.send(()).unwrap();
        wait_for_state(&manager, ConnectionState::ReconnectScheduled).await;

        // Logout while a retry is pending settles at Idle
        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Idle);
        server.abort();
    }

    #[tokio::test]
    async fn test_manual_reconnect_leaves_terminal_idle() {
        let url = refused_addr().await;
        let (manager, _) = manager(url, fast_config(1), Some("token"));

        manager.connect().unwrap();
        wait_for_state(&manager, ConnectionState::Idle).await;

        // A fresh attempt cycle starts with a reset counter
        manager.reconnect().unwrap();
        wait_for_state(&manager, ConnectionState::ReconnectScheduled).await;

        manager.shutdown().await;
        assert_eq!(manager.state(), ConnectionState::Idle);
    }
}
