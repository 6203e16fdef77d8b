//! WebSocket transport over tokio-tungstenite.
//!
//! One logical connection at a time. A driver task owns the socket and pumps
//! two directions: outbound frames from the session, inbound frames parsed
//! into [`TransportEvent`]s. On unexpected close the driver reconnects with
//! bounded exponential backoff, then falls back to a single long-delay
//! retry instead of looping tightly forever.

use std::sync::Arc;
use std::sync::RwLock as StdRwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::{
    ConnectionState, EVENT_BUFFER_SIZE, OUTBOUND_BUFFER_SIZE, Transport, TransportEvent,
};
use crate::config::ChatConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use formcoach_protocol::{ClientFrame, ServerFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnection schedule derived from [`ChatConfig`].
#[derive(Debug, Clone)]
struct ReconnectSchedule {
    connect_timeout: Duration,
    attempts: u32,
    base_delay: Duration,
    long_delay: Duration,
}

impl ReconnectSchedule {
    fn from_config(config: &ChatConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            attempts: config.reconnect_attempts,
            base_delay: config.reconnect_base_delay(),
            long_delay: config.reconnect_long_delay(),
        }
    }
}

/// State owned per logical connection.
struct Active {
    target: String,
    out_tx: mpsc::Sender<ClientFrame>,
    closed: Arc<AtomicBool>,
}

/// WebSocket implementation of [`Transport`].
pub struct WsTransport {
    stream_url: String,
    schedule: ReconnectSchedule,
    state: Arc<StdRwLock<ConnectionState>>,
    active: Mutex<Option<Active>>,
}

impl WsTransport {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            stream_url: config.stream_url.clone(),
            schedule: ReconnectSchedule::from_config(config),
            state: Arc::new(StdRwLock::new(ConnectionState::Disconnected)),
            active: Mutex::new(None),
        }
    }

    fn target_url(&self, target: &str) -> String {
        format!(
            "{}?conversation={}",
            self.stream_url.trim_end_matches('/'),
            target
        )
    }
}

fn set_state(state: &Arc<StdRwLock<ConnectionState>>, next: ConnectionState) {
    if let Ok(mut guard) = state.write() {
        *guard = next;
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(
        &self,
        target: &str,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let mut active = self.active.lock().await;

        // A new target (or an explicit re-connect to the same one) replaces
        // the previous logical connection entirely.
        if let Some(prev) = active.take() {
            debug!(prev = %prev.target, next = %target, "replacing streaming connection");
            prev.closed.store(true, Ordering::SeqCst);
            // Dropping prev.out_tx closes the outbound channel; the driver
            // sends a Close frame and winds down on its own.
        }

        set_state(&self.state, ConnectionState::Connecting);
        let url = self.target_url(target);

        let ws = match tokio::time::timeout(self.schedule.connect_timeout, connect_async(&url))
            .await
        {
            Err(_) => {
                set_state(&self.state, ConnectionState::Disconnected);
                return Err(TransportError::Timeout(self.schedule.connect_timeout));
            }
            Ok(Err(e)) => {
                set_state(&self.state, ConnectionState::Disconnected);
                return Err(TransportError::Connection(e.to_string()));
            }
            Ok(Ok((ws, _response))) => ws,
        };

        info!(%target, "streaming connection established");
        set_state(&self.state, ConnectionState::Connected);

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER_SIZE);
        let _ = events_tx
            .send(TransportEvent::StateChanged(ConnectionState::Connected))
            .await;

        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER_SIZE);
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(drive(
            ws,
            out_rx,
            events_tx,
            Arc::clone(&self.state),
            Arc::clone(&closed),
            self.schedule.clone(),
            url,
        ));

        *active = Some(Active {
            target: target.to_string(),
            out_tx,
            closed,
        });

        Ok(events_rx)
    }

    async fn send(&self, frame: ClientFrame) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let active = self.active.lock().await;
        let Some(active) = active.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        active
            .out_tx
            .send(frame)
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    async fn disconnect(&self) {
        let mut active = self.active.lock().await;
        if let Some(prev) = active.take() {
            info!(target = %prev.target, "closing streaming connection");
            prev.closed.store(true, Ordering::SeqCst);
        }
        set_state(&self.state, ConnectionState::Disconnected);
    }

    fn state(&self) -> ConnectionState {
        self.state
            .read()
            .map(|guard| *guard)
            .unwrap_or(ConnectionState::Disconnected)
    }
}

/// Why a pump loop ended.
enum PumpEnd {
    /// The client side closed the channel (disconnect or replacement).
    LocalClose,
    /// The socket ended or failed underneath us.
    ConnectionLost,
}

/// Own the socket for the lifetime of one logical connection, reconnecting
/// across unexpected closes.
async fn drive(
    mut ws: WsStream,
    mut out_rx: mpsc::Receiver<ClientFrame>,
    events_tx: mpsc::Sender<TransportEvent>,
    state: Arc<StdRwLock<ConnectionState>>,
    closed: Arc<AtomicBool>,
    schedule: ReconnectSchedule,
    url: String,
) {
    loop {
        let end = pump(&mut ws, &mut out_rx, &events_tx).await;

        // A retired connection (replaced or explicitly closed) no longer
        // owns the shared state; writing here would misreport its successor.
        let retired = closed.load(Ordering::SeqCst);
        if !retired {
            set_state(&state, ConnectionState::Disconnected);
            let _ = events_tx
                .send(TransportEvent::StateChanged(ConnectionState::Disconnected))
                .await;
        }

        match end {
            PumpEnd::LocalClose => break,
            PumpEnd::ConnectionLost if retired => break,
            PumpEnd::ConnectionLost => {}
        }

        match reconnect(&schedule, &url, &events_tx, &state, &closed).await {
            Some(new_ws) => {
                ws = new_ws;
            }
            None => {
                if !closed.load(Ordering::SeqCst) {
                    let _ = events_tx
                        .send(TransportEvent::Error {
                            message: "connection lost".to_string(),
                        })
                        .await;
                }
                break;
            }
        }
    }
    debug!("streaming connection driver ended");
}

/// Pump one live socket until it ends or the client closes the channel.
async fn pump(
    ws: &mut WsStream,
    out_rx: &mut mpsc::Receiver<ClientFrame>,
    events_tx: &mpsc::Sender<TransportEvent>,
) -> PumpEnd {
    loop {
        tokio::select! {
            frame = out_rx.recv() => match frame {
                Some(frame) => {
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("failed to serialize outbound frame: {e}");
                            continue;
                        }
                    };
                    if ws.send(WsMessage::Text(json.into())).await.is_err() {
                        return PumpEnd::ConnectionLost;
                    }
                }
                None => {
                    let _ = ws.close(None).await;
                    return PumpEnd::LocalClose;
                }
            },
            msg = ws.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => {
                            if events_tx.send(frame.into()).await.is_err() {
                                // Receiver gone: the session moved on.
                                return PumpEnd::LocalClose;
                            }
                        }
                        Err(e) => {
                            let head: String = text.chars().take(200).collect();
                            warn!("unparseable server frame: {e}, text: {head}");
                        }
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => return PumpEnd::ConnectionLost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("streaming connection error: {e}");
                    return PumpEnd::ConnectionLost;
                }
            },
        }
    }
}

/// Bounded exponential backoff, then one long-delay retry.
async fn reconnect(
    schedule: &ReconnectSchedule,
    url: &str,
    events_tx: &mpsc::Sender<TransportEvent>,
    state: &Arc<StdRwLock<ConnectionState>>,
    closed: &Arc<AtomicBool>,
) -> Option<WsStream> {
    let mut delay = schedule.base_delay;
    for attempt in 1..=schedule.attempts {
        tokio::time::sleep(delay).await;
        if closed.load(Ordering::SeqCst) {
            return None;
        }

        set_state(state, ConnectionState::Connecting);
        let _ = events_tx
            .send(TransportEvent::StateChanged(ConnectionState::Connecting))
            .await;
        info!(attempt, "reconnecting streaming connection");

        if let Some(ws) = try_connect(schedule, url, events_tx, state).await {
            return Some(ws);
        }
        delay *= 2;
    }

    // Exhausted the bounded attempts. One long-delay retry instead of a
    // tight loop.
    warn!(
        "reconnect attempts exhausted, retrying once in {:?}",
        schedule.long_delay
    );
    tokio::time::sleep(schedule.long_delay).await;
    if closed.load(Ordering::SeqCst) {
        return None;
    }
    set_state(state, ConnectionState::Connecting);
    let _ = events_tx
        .send(TransportEvent::StateChanged(ConnectionState::Connecting))
        .await;
    try_connect(schedule, url, events_tx, state).await
}

async fn try_connect(
    schedule: &ReconnectSchedule,
    url: &str,
    events_tx: &mpsc::Sender<TransportEvent>,
    state: &Arc<StdRwLock<ConnectionState>>,
) -> Option<WsStream> {
    match tokio::time::timeout(schedule.connect_timeout, connect_async(url)).await {
        Ok(Ok((ws, _response))) => {
            set_state(state, ConnectionState::Connected);
            let _ = events_tx
                .send(TransportEvent::StateChanged(ConnectionState::Connected))
                .await;
            info!("streaming connection re-established");
            Some(ws)
        }
        Ok(Err(e)) => {
            set_state(state, ConnectionState::Disconnected);
            debug!("reconnect attempt failed: {e}");
            None
        }
        Err(_) => {
            set_state(state, ConnectionState::Disconnected);
            debug!("reconnect attempt timed out");
            None
        }
    }
}
