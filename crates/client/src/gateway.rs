//! Persistent bidirectional framed channel to the server (§4.4, C5).
//!
//! Adapted from the Nexus SDK's gateway client: a background task owns the
//! actual websocket, redialing with backoff on disconnect, and publishes
//! inbound frames over a broadcast channel. The one behavioral addition
//! over that source is jitter on the reconnect delay (§4.4): the teacher's
//! `min(2^attempt, cap)` backoff reconnects a whole disconnected fleet in
//! lockstep, which this component must avoid.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use tessera_shared::ids::MessageId;
use tessera_shared::wire::GatewayFrame;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Gateway client with auto-reconnect, jittered backoff, and heartbeat.
pub struct GatewayClient {
    token: String,
    gateway_url: String,
    heartbeat_interval: Duration,
    reconnect_base: Duration,
    reconnect_max: Duration,
    sender: broadcast::Sender<GatewayFrame>,
    sink: Arc<Mutex<Option<WsSink>>>,
}

impl GatewayClient {
    pub fn new(token: impl Into<String>, gateway_url: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            token: token.into(),
            gateway_url: gateway_url.into(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(30),
            sender,
            sink: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_bounds(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base = base;
        self.reconnect_max = max;
        self
    }

    /// Subscribe to inbound frames (envelopes, pings, etc).
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayFrame> {
        self.sender.subscribe()
    }

    /// Spawn the background connection-maintaining task. Returns immediately.
    pub fn connect(&self) {
        let token = self.token.clone();
        let url = self.gateway_url.clone();
        let hb_interval = self.heartbeat_interval;
        let reconnect_base = self.reconnect_base;
        let reconnect_max = self.reconnect_max;
        let tx = self.sender.clone();
        let sink = Arc::clone(&self.sink);

        tokio::spawn(async move {
            let mut attempts: u32 = 0;
            loop {
                match run_once(&token, &url, hb_interval, &tx, Arc::clone(&sink)).await {
                    Ok(()) => {
                        attempts = 0;
                    }
                    Err(e) => {
                        attempts += 1;
                        let delay = jittered_backoff(reconnect_base, reconnect_max, attempts);
                        warn!("gateway disconnected ({e}), reconnecting in {delay:?} (attempt {attempts})");
                        sleep(delay).await;
                    }
                }
            }
        });
    }

    /// Acknowledge successful processing of an envelope. Per §4.4/§5, this
    /// must be called only after the envelope has been fully processed; if
    /// the connection has dropped, the ack is simply not sent and the
    /// server will redeliver the envelope once reconnected (at-least-once).
    pub async fn ack(&self, message_id: MessageId) -> bool {
        let frame = GatewayFrame::Ack { message_id };
        self.send_frame(frame).await
    }

    async fn send_frame(&self, frame: GatewayFrame) -> bool {
        let Ok(text) = serde_json::to_string(&frame) else {
            return false;
        };
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink.send(Message::Text(text.into())).await.is_ok(),
            None => false,
        }
    }
}

/// `min(base * 2^attempt, cap)` perturbed by a uniformly-sampled multiplicative
/// factor in `[0.5, 1.5)`, so a fleet disconnected by the same event does not
/// reconnect in lockstep (§4.4).
fn jittered_backoff(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX).max(1));
    let bounded = exp.min(cap);
    let factor = rand::rng().random_range(0.5..1.5);
    Duration::from_secs_f64((bounded.as_secs_f64() * factor).max(0.0))
}

async fn run_once(
    token: &str,
    url: &str,
    hb_interval: Duration,
    tx: &broadcast::Sender<GatewayFrame>,
    shared_sink: Arc<Mutex<Option<WsSink>>>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let full_url = format!("{url}?token={token}");
    let (ws, _) = connect_async(full_url).await?;
    let (sink, mut stream) = ws.split();

    *shared_sink.lock().await = Some(sink);

    let hb_shared_sink = Arc::clone(&shared_sink);
    let hb_task = tokio::spawn(async move {
        loop {
            sleep(hb_interval).await;
            let ts = chrono::Utc::now().timestamp_millis();
            let frame = GatewayFrame::Ping { ts };
            let Ok(text) = serde_json::to_string(&frame) else {
                continue;
            };
            let mut guard = hb_shared_sink.lock().await;
            if let Some(sink) = guard.as_mut() {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            } else {
                break;
            }
        }
    });

    let result = async {
        while let Some(msg) = stream.next().await {
            let msg = msg?;
            let text = match &msg {
                Message::Text(t) => t.as_str().to_owned(),
                Message::Close(_) => break,
                _ => continue,
            };
            match serde_json::from_str::<GatewayFrame>(&text) {
                Ok(frame) => {
                    debug!("gateway frame received");
                    let _ = tx.send(frame);
                }
                Err(e) => {
                    error!("failed to parse gateway frame: {e}");
                }
            }
        }
        Ok::<(), tokio_tungstenite::tungstenite::Error>(())
    }
    .await;

    hb_task.abort();
    *shared_sink.lock().await = None;
    info!("gateway connection closed");
    result
}
