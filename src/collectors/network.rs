use crate::collectors::{with_host, NetworkTotals, SharedHost};
use crate::metrics::Metrics;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};
use tungstenite::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    ClientClosed,
    TransportError,
}

pub struct NetworkPublisher {
    host: SharedHost,
    tick: Duration,
    metrics: Arc<Metrics>,
}

impl NetworkPublisher {
    pub fn new(host: SharedHost, tick: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            host,
            tick,
            metrics,
        }
    }

    pub async fn totals(&self) -> Option<NetworkTotals> {
        with_host(&self.host, |h| h.network_totals()).await
    }

    /// Pushes cumulative counters every tick until the client goes away.
    pub async fn stream(&self, socket: WebSocket) -> StreamEnd {
        let (mut sender, mut receiver) = socket.split();
        let mut ticker = time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.metrics.stream_opened();
        info!("клиент подключился к потоку сети");

        let end = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(totals) = self.totals().await else {
                        continue;
                    };
                    let payload = match serde_json::to_string(&totals) {
                        Ok(payload) => payload,
                        Err(err) => {
                            warn!(error = %err, "не удалось сериализовать счётчики сети");
                            break StreamEnd::TransportError;
                        }
                    };
                    if let Err(err) = sender.send(Message::Text(payload)).await {
                        break classify(&err, "ошибка отправки в поток сети");
                    }
                    self.metrics.inc_stream_message();
                }
                incoming = receiver.next() => match incoming {
                    None | Some(Ok(Message::Close(_))) => {
                        info!("клиент отключился от потока сети");
                        break StreamEnd::ClientClosed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break classify(&err, "ошибка чтения из потока сети"),
                },
            }
        };

        let _ = sender.close().await;
        self.metrics.stream_closed();
        end
    }
}

fn classify(err: &axum::Error, context: &'static str) -> StreamEnd {
    if is_disconnect(err) {
        info!(error = %err, "клиент отключился от потока сети без close-кадра");
        StreamEnd::ClientClosed
    } else {
        warn!(error = %err, "{context}");
        StreamEnd::TransportError
    }
}

/// True when the peer went away: no close handshake, reset or broken pipe.
fn is_disconnect(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(ws) = e.downcast_ref::<tungstenite::Error>() {
            match ws {
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed
                | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                    return true
                }
                tungstenite::Error::Io(io_err) => return is_disconnect_kind(io_err.kind()),
                _ => {}
            }
        }
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if is_disconnect_kind(io_err.kind()) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

fn is_disconnect_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
