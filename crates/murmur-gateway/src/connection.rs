use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::oneshot;
use tracing::{info, warn};

use murmur_types::events::ClientEvent;

use crate::dispatcher::{Dispatcher, Session};
use crate::gate::Identity;
use crate::presence::{ConnectionHandle, Outbound};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drives one WebSocket that already passed the Connection Gate, from
/// registration to disconnect.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();

    let (handle, mut outbound_rx) = ConnectionHandle::new();
    let session = Arc::new(Session::new(identity, handle));

    info!(
        "{} ({}) connected to gateway [conn={}]",
        session.username(),
        session.user_id(),
        session.handle().conn_id()
    );

    // Queues Ready + the presence snapshot, registers, announces us
    dispatcher.connect(&session).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Outbound queue -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = outbound_rx.recv() => {
                    match result {
                        Some(Outbound::Event(event)) => {
                            let text = match serde_json::to_string(&event) {
                                Ok(text) => text,
                                Err(e) => {
                                    warn!("Failed to encode outbound event: {}", e);
                                    continue;
                                }
                            };
                            if sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Superseded) => {
                            let _ = sender.send(Message::Close(None)).await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Client -> dispatcher. Each event is fully handled before the next
    // frame is read; a stop request is only honoured between events.
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let dispatcher_recv = dispatcher.clone();
    let session_recv = session.clone();
    let mut recv_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                msg = receiver.next() => msg,
            };
            let Some(Ok(msg)) = msg else { break };
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => dispatcher_recv.handle_event(&session_recv, event).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad event: {} -- raw: {}",
                            session_recv.username(),
                            session_recv.user_id(),
                            e,
                            text.as_str().chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            // Writer is gone. Close the session first so an event in flight
            // still persists but pushes nothing here, then stop reading.
            dispatcher.disconnect(&session).await;
            let _ = stop_tx.send(());
            if let Err(e) = recv_task.await {
                warn!("gateway reader for {} ended abnormally: {}", session.user_id(), e);
            }
        }
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(&session).await;
    info!("{} ({}) disconnected from gateway", session.username(), session.user_id());
}
