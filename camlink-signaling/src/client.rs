//! WebSocket client for the signaling relay

use crate::error::SignalingError;
use crate::protocol::{ClientMessage, ServerMessage, SignalData};
use camlink_core::{CamlinkError, RetryPolicy, SessionId};
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};
use url::Url;

/// Inbound messages buffered before the reader applies backpressure
const INBOUND_CAPACITY: usize = 64;

/// Turn a configured relay address into a WebSocket URL.
///
/// `http`/`https` are rewritten to `ws`/`wss`, mirroring how browser clients
/// are usually pointed at a relay's HTTP origin.
pub fn normalize_url(raw: &str) -> Result<Url, SignalingError> {
    let mut url = Url::parse(raw).map_err(|e| SignalingError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(SignalingError::InvalidUrl {
                url: raw.to_string(),
                reason: format!("unsupported scheme {}", other),
            })
        }
    };

    if url.scheme() != scheme && url.set_scheme(scheme).is_err() {
        return Err(SignalingError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("cannot switch scheme to {}", scheme),
        });
    }
    Ok(url)
}

enum Outbound {
    Message(ClientMessage),
    Close,
}

/// Connection to the signaling relay
///
/// Outbound messages are serialised by a writer task; a reader task parses
/// inbound frames and queues them for [`SignalingClient::recv`].
pub struct SignalingClient {
    url: Url,
    outbound: mpsc::UnboundedSender<Outbound>,
    inbound: mpsc::Receiver<ServerMessage>,
    connected: Arc<AtomicBool>,
    writer: Option<JoinHandle<()>>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("url", &self.url.as_str())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl SignalingClient {
    /// Connect to the relay at `url`
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, SignalingError> {
        let url = normalize_url(url)?;
        debug!("Connecting to signaling relay {}", url);

        let (ws_stream, _) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| SignalingError::Timeout {
                operation: format!("connecting to {}", url),
                duration: timeout,
            })?
            .map_err(|e| match e {
                WsError::Io(io) => SignalingError::ConnectionFailed {
                    url: url.to_string(),
                    reason: io.to_string(),
                },
                other => SignalingError::from(other),
            })?;

        let (mut sink, mut stream) = ws_stream.split();
        let connected = Arc::new(AtomicBool::new(true));
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        let writer_connected = connected.clone();
        let writer = tokio::spawn(async move {
            while let Some(outbound) = outbound_rx.recv().await {
                let frame = match outbound {
                    Outbound::Message(message) => match message.to_json() {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            warn!("Dropping unserialisable signaling message: {}", e);
                            continue;
                        }
                    },
                    Outbound::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                };

                if let Err(e) = sink.send(frame).await {
                    warn!("Signaling write failed: {}", e);
                    break;
                }
            }
            writer_connected.store(false, Ordering::SeqCst);
            debug!("Signaling writer stopped");
        });

        let reader_connected = connected.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::from_json(&text) {
                        Ok(message) => {
                            if inbound_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring malformed signaling frame: {}", e),
                    },
                    Ok(Message::Close(reason)) => {
                        info!("Signaling relay closed the connection: {:?}", reason);
                        break;
                    }
                    Ok(Message::Binary(data)) => {
                        debug!("Ignoring {} byte binary frame", data.len());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling read failed: {}", e);
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            debug!("Signaling reader stopped");
        });

        info!("Connected to signaling relay {}", url);
        Ok(Self {
            url,
            outbound: outbound_tx,
            inbound: inbound_rx,
            connected,
            writer: Some(writer),
            reader,
        })
    }

    /// Connect, retrying with backoff according to `policy`
    pub async fn connect_with_retry(
        url: &str,
        timeout: Duration,
        policy: &RetryPolicy,
    ) -> Result<Self, SignalingError> {
        let mut attempt = 1;
        loop {
            match Self::connect(url, timeout).await {
                Ok(client) => return Ok(client),
                Err(e) if e.is_recoverable() && policy.should_retry(attempt) => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "Signaling connection attempt {} failed: {}; retrying in {:?}",
                        attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_recoverable() => {
                    warn!("Giving up on signaling after {} attempts: {}", attempt, e);
                    return Err(CamlinkError::RetriesExhausted {
                        operation: "signaling connection".to_string(),
                        attempts: attempt,
                    }
                    .into());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Relay URL
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether both directions of the connection are still up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue a message for the relay
    pub fn send(&self, message: ClientMessage) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::ConnectionClosed);
        }
        self.outbound
            .send(Outbound::Message(message))
            .map_err(|_| SignalingError::ConnectionClosed)
    }

    /// Join a pairing room
    pub fn join(&self, room: &SessionId) -> Result<(), SignalingError> {
        debug!("Joining signaling room {}", room);
        self.send(ClientMessage::join(room))
    }

    /// Leave a pairing room
    pub fn leave(&self, room: &SessionId) -> Result<(), SignalingError> {
        debug!("Leaving signaling room {}", room);
        self.send(ClientMessage::leave(room))
    }

    /// Relay negotiation data to the room
    pub fn signal(&self, room: &SessionId, data: SignalData) -> Result<(), SignalingError> {
        self.send(ClientMessage::signal(room, data))
    }

    /// Next message from the relay; `None` once the connection is gone
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.inbound.recv().await
    }

    /// Close the connection, flushing queued messages first
    pub async fn close(mut self) {
        let _ = self.outbound.send(Outbound::Close);
        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(Duration::from_secs(2), writer)
                .await
                .is_err()
            {
                debug!("Signaling writer did not finish in time");
            }
        }
        self.reader.abort();
        info!("Disconnected from signaling relay {}", self.url);
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("http://localhost:3001").unwrap().as_str(),
            "ws://localhost:3001/"
        );
        assert_eq!(
            normalize_url("https://relay.example.com/socket").unwrap().as_str(),
            "wss://relay.example.com/socket"
        );
        assert_eq!(
            normalize_url("ws://127.0.0.1:9000").unwrap().as_str(),
            "ws://127.0.0.1:9000/"
        );
        assert!(normalize_url("ftp://example.com").is_err());
        assert!(normalize_url("localhost:3001").is_err());
    }

    #[tokio::test]
    async fn test_connect_refused_is_recoverable() {
        // Port 9 (discard) is closed on test hosts.
        let err = SignalingClient::connect("ws://127.0.0.1:9", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_recoverable(), "unexpected {:?}", err);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(10),
            multiplier: 1.0,
        };
        let err =
            SignalingClient::connect_with_retry("ws://127.0.0.1:9", Duration::from_secs(2), &policy)
                .await
                .unwrap_err();
        assert_eq!(err.error_code(), "RETRIES_EXHAUSTED");
    }
}
