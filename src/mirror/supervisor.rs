//! Fan-out channel client session with reconnect backoff.
//!
//! Connection lifecycle is an explicit loop:
//! `Disconnected -> Connecting -> Connected -> (on drop) Disconnected`,
//! with exponential backoff between attempts and a mandatory priming
//! request on every (re)connect. Priming re-requests the full current
//! state, so pushes missed during a disconnect window are recovered
//! without replay.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::Mirror;
use crate::types::{WirePush, WireRequest};
use crate::{GjallarhornError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect backoff parameters.
///
/// Exponential growth from `initial` up to `max`; the delay resets after
/// every successful connect.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Create a config with the default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay before the first reconnect attempt.
    pub fn initial(mut self, delay: Duration) -> Self {
        self.initial = delay;
        self
    }

    /// Set the cap on the reconnect delay.
    pub fn max(mut self, delay: Duration) -> Self {
        self.max = delay;
        self
    }

    /// Set the growth factor between attempts.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    fn next_delay(&self, current: Duration) -> Duration {
        let grown = current.as_secs_f64() * self.multiplier;
        Duration::from_secs_f64(grown.min(self.max.as_secs_f64()))
    }
}

/// Spawn the reconnecting subscriber session for `mirror`.
///
/// The task runs until aborted; every push received is applied to the
/// mirror.
pub fn spawn(mirror: Arc<Mirror>, url: String, backoff: BackoffConfig)
-> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { run(mirror, url, backoff).await })
}

async fn run(mirror: Arc<Mirror>, url: String, backoff: BackoffConfig) {
    let mut delay = backoff.initial;
    loop {
        debug!(%url, "connecting to fan-out channel");
        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                info!(%url, "connected to fan-out channel");
                delay = backoff.initial;
                match session(&mirror, stream).await {
                    Ok(()) => info!(%url, "fan-out connection closed"),
                    Err(error) => warn!(%url, %error, "fan-out session failed"),
                }
            }
            Err(error) => warn!(%url, %error, "fan-out connect failed"),
        }

        tokio::time::sleep(delay).await;
        delay = backoff.next_delay(delay);
    }
}

/// One connected session: prime, then apply pushes until the stream
/// ends.
async fn session(mirror: &Mirror, stream: WsStream) -> Result<()> {
    let (mut sink, mut frames) = stream.split();

    // Prime the mirror with the manager's full current state.
    let prime = serde_json::to_string(&WireRequest::GetDatafiles)?;
    sink.send(Message::Text(prime))
        .await
        .map_err(|e| GjallarhornError::Transport(e.to_string()))?;

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<WirePush>(&text) {
                Ok(push) => mirror.apply_push(push).await,
                Err(error) => debug!(%error, "ignoring unrecognized frame"),
            },
            // tungstenite answers pings itself; nothing to do here.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => return Ok(()),
            Ok(_) => {}
            Err(error) => return Err(GjallarhornError::Transport(error.to_string())),
        }
    }
    Ok(())
}
