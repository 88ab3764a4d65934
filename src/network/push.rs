//! Push Gateway
//!
//! WebSocket fan-out for subscribed clients: targeted notifications
//! multiplexed by device id plus the global event broadcast. Firmware
//! pollers never connect here; they drain the same queues through
//! `report_tick`.
//!
//! Delivery discipline per the concurrency model: the coordinator
//! stages [`Outgoing`] values under the state lock and hands them to
//! [`PushHub::dispatch`] after releasing it, so no socket I/O ever
//! happens inside a critical section. Slow push consumers lose frames
//! (`try_send`); the authoritative copy stays in the player's
//! notification ring until drained.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::core::ids::DeviceId;
use crate::game::events::{Event, Outgoing};
use crate::network::protocol::{ClientFrame, ServerFrame};

/// Per-client outbound channel depth.
const CLIENT_CHANNEL_DEPTH: usize = 64;

/// Broadcast channel depth for the global event stream.
const EVENT_CHANNEL_DEPTH: usize = 256;

/// Routing core shared by the coordinator and the gateway.
pub struct PushHub {
    events_tx: broadcast::Sender<Event>,
    subscribers: RwLock<BTreeMap<DeviceId, mpsc::Sender<ServerFrame>>>,
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PushHub {
    /// Create a hub with no subscribers.
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);
        Self { events_tx, subscribers: RwLock::new(BTreeMap::new()) }
    }

    /// Subscribe to the global event stream (push clients, observers).
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    /// Bind a device to an outbound channel, replacing any prior one
    /// (latest connection wins after a reconnect).
    pub async fn register(&self, device: DeviceId, sender: mpsc::Sender<ServerFrame>) {
        self.subscribers.write().await.insert(device, sender);
    }

    /// Drop a device's outbound channel.
    pub async fn unregister(&self, device: &DeviceId) {
        self.subscribers.write().await.remove(device);
    }

    /// Deliver staged outgoing values.
    pub async fn dispatch(&self, outgoing: Vec<Outgoing>) {
        for out in outgoing {
            match out {
                Outgoing::Broadcast { event } => {
                    // No receivers is fine; the audit log already has it.
                    let _ = self.events_tx.send(event);
                }
                Outgoing::Notify { device, notification } => {
                    let sender = self.subscribers.read().await.get(&device).cloned();
                    if let Some(sender) = sender {
                        let _ = sender.try_send(ServerFrame::Notification { notification });
                    }
                }
            }
        }
    }

    /// Number of live push subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:8081".parse().unwrap() }
    }
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Failed to bind to the configured address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// The WebSocket push gateway.
pub struct PushGateway {
    config: GatewayConfig,
    coordinator: Coordinator,
}

impl PushGateway {
    /// Create a gateway serving the given coordinator.
    pub fn new(config: GatewayConfig, coordinator: Coordinator) -> Self {
        Self { config, coordinator }
    }

    /// Accept connections until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("Push gateway listening on {}", self.config.bind_addr);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("Push connection from {addr}");
                            let coordinator = self.coordinator.clone();
                            tokio::spawn(async move {
                                handle_connection(coordinator, stream, addr).await;
                            });
                        }
                        Err(e) => warn!("Accept error: {e}"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Push gateway shutting down");
                    break;
                }
            }
        }
        Ok(())
    }
}

/// Drive one client connection: subscribe handshake, notification
/// replay, then frame forwarding until either side closes.
async fn handle_connection(coordinator: Coordinator, stream: TcpStream, addr: SocketAddr) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake failed for {addr}: {e}");
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // First frame must be a subscribe.
    let device = loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Text(text))) => match ClientFrame::from_json(&text) {
                Ok(ClientFrame::Subscribe { device_id }) => match DeviceId::parse(&device_id) {
                    Ok(device) => break device,
                    Err(e) => {
                        let _ = send_frame(&mut ws_sender, &ServerFrame::Error { message: e.to_string() }).await;
                        return;
                    }
                },
                Ok(_) | Err(_) => {
                    let _ = send_frame(
                        &mut ws_sender,
                        &ServerFrame::Error { message: "subscribe first".into() },
                    )
                    .await;
                }
            },
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(e)) => {
                debug!("WebSocket error for {addr} before subscribe: {e}");
                return;
            }
            _ => {}
        }
    };

    // Register before replaying so nothing falls between the two.
    let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(CLIENT_CHANNEL_DEPTH);
    coordinator.hub().register(device.clone(), frame_tx).await;
    let mut events_rx = coordinator.hub().subscribe_events();

    if send_frame(&mut ws_sender, &ServerFrame::Subscribed { device_id: device.clone() })
        .await
        .is_err()
    {
        coordinator.hub().unregister(&device).await;
        return;
    }

    // Resynchronize: replay queued-but-undelivered notifications.
    for notification in coordinator.drain_notifications(&device).await {
        if send_frame(&mut ws_sender, &ServerFrame::Notification { notification })
            .await
            .is_err()
        {
            coordinator.hub().unregister(&device).await;
            return;
        }
    }

    info!("Push client {device} subscribed from {addr}");

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(ClientFrame::Ping { timestamp }) = ClientFrame::from_json(&text) {
                            if send_frame(&mut ws_sender, &ServerFrame::Pong { timestamp }).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws_sender.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("WebSocket error for {device}: {e}");
                        break;
                    }
                    _ => {}
                }
            }
            frame = frame_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if send_frame(&mut ws_sender, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            event = events_rx.recv() => {
                match event {
                    Ok(event) => {
                        if send_frame(&mut ws_sender, &ServerFrame::Event { event }).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Push client {device} lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    coordinator.hub().unregister(&device).await;
    info!("Push client {device} disconnected");
}

async fn send_frame<S>(sender: &mut S, frame: &ServerFrame) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = frame.to_json().map_err(|_| ())?;
    sender.send(Message::Text(text)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::{EventData, Notification, NotifyKind};
    use chrono::Utc;

    fn dev(s: &str) -> DeviceId {
        DeviceId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_hub_routes_targeted_frames() {
        let hub = PushHub::new();
        let device = dev("T0001");
        let (tx, mut rx) = mpsc::channel(8);
        hub.register(device.clone(), tx).await;

        let notification = Notification::new("hi", NotifyKind::Info, Utc::now());
        hub.dispatch(vec![Outgoing::Notify { device: device.clone(), notification: notification.clone() }])
            .await;

        match rx.recv().await {
            Some(ServerFrame::Notification { notification: got }) => assert_eq!(got, notification),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hub_broadcasts_events() {
        let hub = PushHub::new();
        let mut rx = hub.subscribe_events();

        let mut log = crate::game::events::EventLog::new();
        let event = log.record(EventData::GamePaused, Utc::now());
        hub.dispatch(vec![Outgoing::Broadcast { event: event.clone() }]).await;

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_unregistered_device_frames_are_dropped() {
        let hub = PushHub::new();
        // No subscriber: dispatch must not error or block.
        hub.dispatch(vec![Outgoing::Notify {
            device: dev("T0001"),
            notification: Notification::new("x", NotifyKind::Info, Utc::now()),
        }])
        .await;
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_subscription() {
        let hub = PushHub::new();
        let device = dev("T0001");
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        hub.register(device.clone(), tx1).await;
        hub.register(device.clone(), tx2).await;
        assert_eq!(hub.subscriber_count().await, 1);

        hub.dispatch(vec![Outgoing::Notify {
            device: device.clone(),
            notification: Notification::new("x", NotifyKind::Info, Utc::now()),
        }])
        .await;

        assert!(rx2.try_recv().is_ok());
        assert!(rx1.try_recv().is_err());
    }
}
