//! WebSocket fan-out hub.
//!
//! Every subscriber holds one long-lived duplex connection. The
//! connection task multiplexes three flows:
//!
//! - inbound requests (`get_sdk_keys`, `get_datafiles`), answered to
//!   this subscriber only;
//! - change events from the bus, forwarded as pushes;
//! - liveness probes — a ping per interval, and a connection that goes a
//!   whole interval without ponging is dropped, bounding memory growth
//!   from half-open connections.
//!
//! Messages to one subscriber are delivered in send order; nothing is
//! guaranteed across subscribers, and a push may land between a request
//! and its reply.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::AppState;
use crate::events::ChangeEvent;
use crate::telemetry;
use crate::types::{WirePush, WireRequest};

/// Upgrade handler for `GET /ws`.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

/// Run one subscriber connection to completion.
async fn handle_socket(socket: WebSocket, state: AppState, peer: SocketAddr) {
    info!(%peer, "subscriber connected");
    metrics::gauge!(telemetry::SUBSCRIBERS).increment(1.0);

    let (mut sink, mut frames) = socket.split();
    let mut events = state.bus.subscribe();

    // One-time greeting; diagnostic only.
    let greeting = WirePush::ServerMessage {
        data: format!("Hello from server to client on IP: {peer}"),
    };
    if send_push(&mut sink, &greeting).await.is_err() {
        metrics::gauge!(telemetry::SUBSCRIBERS).decrement(1.0);
        return;
    }

    let mut alive = true;
    let mut probe = tokio::time::interval(state.probe_interval);
    probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = frames.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WireRequest>(&text) {
                            Ok(request) => {
                                debug!(%peer, ?request, "subscriber request");
                                if answer(&mut sink, &state, request).await.is_err() {
                                    break;
                                }
                            }
                            // Unrecognized type: silently ignored.
                            Err(_) => debug!(%peer, frame = %text, "ignoring unrecognized message"),
                        }
                    }
                    Some(Ok(Message::Pong(_))) => alive = true,
                    // axum answers client pings itself.
                    Some(Ok(Message::Ping(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        debug!(%peer, %error, "subscriber receive error");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let push = push_for(event);
                        metrics::counter!(telemetry::PUSHES_TOTAL,
                            "event" => push.event_type())
                        .increment(1);
                        if send_push(&mut sink, &push).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%peer, skipped, "subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = probe.tick() => {
                if !alive {
                    info!(%peer, "no pong since last probe, dropping subscriber");
                    break;
                }
                alive = false;
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    metrics::gauge!(telemetry::SUBSCRIBERS).decrement(1.0);
    info!(%peer, "subscriber disconnected");
}

/// Answer one inbound request on this subscriber's connection.
async fn answer(
    sink: &mut SplitSink<WebSocket, Message>,
    state: &AppState,
    request: WireRequest,
) -> Result<(), axum::Error> {
    match request {
        WireRequest::GetSdkKeys => {
            send_push(
                sink,
                &WirePush::ActiveSdkKeys {
                    data: state.active.snapshot(),
                },
            )
            .await
        }
        WireRequest::GetDatafiles => {
            let keys = state.active.snapshot();
            if keys.is_empty() {
                return send_push(
                    sink,
                    &WirePush::ServerMessage {
                        data: "Websocket server does not have any registered datafiles."
                            .to_string(),
                    },
                )
                .await;
            }
            for key in keys {
                // A registered key with no cached record yet (set via
                // update_sdk_keys, not fetched) has nothing to send.
                match state.cache.get(&key) {
                    Some(record) => {
                        send_push(
                            sink,
                            &WirePush::ActiveDatafile {
                                data: record.document.clone(),
                                id: key,
                            },
                        )
                        .await?;
                    }
                    None => debug!(key, "active key has no cached datafile"),
                }
            }
            Ok(())
        }
    }
}

/// Translate a bus event into its wire push.
fn push_for(event: ChangeEvent) -> WirePush {
    match event {
        ChangeEvent::KeysChanged { keys } => WirePush::ActiveSdkKeys { data: keys },
        ChangeEvent::DocumentChanged { key, document } => WirePush::ActiveDatafile {
            data: document,
            id: key,
        },
    }
}

async fn send_push(
    sink: &mut SplitSink<WebSocket, Message>,
    push: &WirePush,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(push).map_err(axum::Error::new)?;
    sink.send(Message::Text(json)).await
}
