//! Transport session: one WebSocket per streaming session.
//!
//! A driver task owns the socket; the session talks to it over channels and
//! tracks the connection state through `TransportState::on_event`. Sends are
//! fire-and-forget and only accepted while the state is `Open`; the outbound
//! queue holds at most `OUTBOUND_CAPACITY` payloads and anything past that is
//! dropped, so a stalled peer costs frames, never memory.

use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
/// Payloads waiting for the socket. Small, like the frame channel of a
/// screen share: a slow peer sees gaps instead of growing latency.
pub const OUTBOUND_CAPACITY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

/// What the driver reports about the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Failed(String),
    Closed,
}

impl TransportState {
    /// The single transition function of the session.
    pub fn on_event(self, event: &TransportEvent) -> Self {
        use TransportState as S;
        match (self, event) {
            (S::Connecting, TransportEvent::Opened) => S::Open,
            (S::Connecting, TransportEvent::Failed(_) | TransportEvent::Closed) => S::Failed,
            (S::Open, TransportEvent::Failed(_)) => S::Failed,
            (S::Open | S::Closing | S::Failed, TransportEvent::Closed) => S::Closed,
            (S::Closing, TransportEvent::Failed(_)) => S::Closed,
            (state, _) => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransportState::Closed | TransportState::Failed)
    }
}

/// Where frames go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub path: Option<String>,
    /// Use `wss://` instead of `ws://`.
    pub secure: bool,
}

impl Endpoint {
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let path = match self.path.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => {
                if p.starts_with('/') {
                    p.to_string()
                } else {
                    format!("/{}", p)
                }
            }
            _ => String::new(),
        };
        format!("{}://{}:{}{}", scheme, host, self.port, path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

enum Outbound {
    Binary(Vec<u8>),
    Text(String),
}

pub struct TransportSession {
    url: String,
    state: TransportState,
    outbound: mpsc::Sender<Outbound>,
    /// Close request; kept off the payload queue so it can never be dropped.
    close_tx: Option<oneshot::Sender<()>>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportSession {
    /// Start connecting to `url`. The outcome arrives through `next_event`.
    pub fn connect(url: String) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (close_tx, close_rx) = oneshot::channel();
        let (event_tx, events) = mpsc::unbounded_channel();

        info!(url = %url, "connecting");
        tokio::spawn(drive(url.clone(), outbound_rx, close_rx, event_tx));

        Self {
            url,
            state: TransportState::Connecting,
            outbound,
            close_tx: Some(close_tx),
            events,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[cfg(test)]
    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransportState::Open
    }

    /// Wait for the next lifecycle event and apply it to the state.
    pub async fn next_event(&mut self) -> TransportEvent {
        let event = match self.events.recv().await {
            Some(event) => event,
            None if self.state.is_terminal() => std::future::pending().await,
            None => TransportEvent::Closed,
        };
        let next = self.state.on_event(&event);
        if next != self.state {
            debug!(url = %self.url, from = ?self.state, to = ?next, "transport state");
        }
        self.state = next;
        event
    }

    /// Hand a binary payload to the socket. Dropped unless the session is
    /// open and the outbound queue has room.
    pub fn send(&self, payload: Vec<u8>) -> bool {
        self.offer(Outbound::Binary(payload))
    }

    /// Hand a text control message to the socket. Same rules as `send`.
    pub fn send_text(&self, text: String) -> bool {
        self.offer(Outbound::Text(text))
    }

    fn offer(&self, message: Outbound) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(url = %self.url, "peer is behind, payload dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the driver to close the socket. Idempotent.
    pub fn close(&mut self) {
        if self.state.is_terminal() || self.state == TransportState::Closing {
            return;
        }
        info!(url = %self.url, "closing connection");
        self.state = TransportState::Closing;
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
    }
}

async fn drive(
    url: String,
    mut outbound: mpsc::Receiver<Outbound>,
    mut close_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let ws = match timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
        Ok(Ok((ws, _))) => ws,
        Ok(Err(e)) => {
            warn!(url = %url, error = %e, "connection failed");
            let _ = events.send(TransportEvent::Failed(e.to_string()));
            return;
        }
        Err(_) => {
            warn!(url = %url, "connection timed out");
            let _ = events.send(TransportEvent::Failed("connection timed out".to_string()));
            return;
        }
    };

    info!(url = %url, "connected");
    let _ = events.send(TransportEvent::Opened);

    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            biased;
            // A dropped session counts as a close request too.
            _ = &mut close_rx => {
                let _ = timeout(CLOSE_TIMEOUT, sink.close()).await;
                let _ = events.send(TransportEvent::Closed);
                return;
            }
            out = outbound.recv() => {
                let message = match out {
                    Some(Outbound::Binary(data)) => WsMessage::Binary(data),
                    Some(Outbound::Text(text)) => WsMessage::Text(text),
                    None => {
                        let _ = timeout(CLOSE_TIMEOUT, sink.close()).await;
                        let _ = events.send(TransportEvent::Closed);
                        return;
                    }
                };
                // A peer that stops reading must not pin the driver past a close.
                let sent = tokio::select! {
                    biased;
                    _ = &mut close_rx => None,
                    result = sink.send(message) => Some(result),
                };
                match sent {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        warn!(url = %url, error = %e, "send failed");
                        let _ = events.send(TransportEvent::Failed(e.to_string()));
                        return;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Closed);
                        return;
                    }
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!(url = %url, "server closed the connection");
                    let _ = events.send(TransportEvent::Closed);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "connection lost");
                    let _ = events.send(TransportEvent::Failed(e.to_string()));
                    return;
                }
            }
        }
    }
}

/// Loopback WebSocket sink for tests. Accepts any number of connections and
/// funnels every non-close message into one queue.
#[cfg(test)]
pub(crate) mod test_server {
    use futures_util::StreamExt;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::{broadcast, mpsc};
    use tokio_tungstenite::{accept_async, tungstenite::Message as WsMessage};

    pub struct TestServer {
        pub addr: SocketAddr,
        received: mpsc::UnboundedReceiver<WsMessage>,
        close_tx: broadcast::Sender<()>,
        accepted: Arc<AtomicUsize>,
    }

    impl TestServer {
        pub async fn spawn() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (msg_tx, received) = mpsc::unbounded_channel();
            let (close_tx, _) = broadcast::channel::<()>(4);
            let accepted = Arc::new(AtomicUsize::new(0));

            let closer = close_tx.clone();
            let counter = accepted.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let msg_tx = msg_tx.clone();
                    let mut close_rx = closer.subscribe();
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(async move {
                        let Ok(mut ws) = accept_async(stream).await else {
                            return;
                        };
                        loop {
                            tokio::select! {
                                _ = close_rx.recv() => {
                                    let _ = ws.close(None).await;
                                    // Drain until the client acknowledges the close.
                                    while let Some(Ok(_)) = ws.next().await {}
                                    break;
                                }
                                msg = ws.next() => match msg {
                                    Some(Ok(m)) if !m.is_close() => {
                                        let _ = msg_tx.send(m);
                                    }
                                    _ => break,
                                }
                            }
                        }
                    });
                }
            });

            Self {
                addr,
                received,
                close_tx,
                accepted,
            }
        }

        pub fn url(&self) -> String {
            format!("ws://{}", self.addr)
        }

        /// Close every connection accepted so far.
        pub fn close(&self) {
            let _ = self.close_tx.send(());
        }

        pub fn accepted(&self) -> usize {
            self.accepted.load(Ordering::SeqCst)
        }

        pub async fn next_message(&mut self) -> WsMessage {
            tokio::time::timeout(Duration::from_secs(5), self.received.recv())
                .await
                .expect("no message within 5s")
                .expect("server task ended")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_server::TestServer;
    use super::*;

    async fn next(session: &mut TransportSession) -> TransportEvent {
        timeout(Duration::from_secs(5), session.next_event())
            .await
            .expect("no transport event within 5s")
    }

    #[test]
    fn test_state_machine() {
        use TransportState as S;
        let failed = TransportEvent::Failed("reset".into());

        assert_eq!(S::Connecting.on_event(&TransportEvent::Opened), S::Open);
        assert_eq!(S::Connecting.on_event(&failed), S::Failed);
        assert_eq!(S::Connecting.on_event(&TransportEvent::Closed), S::Failed);
        assert_eq!(S::Open.on_event(&failed), S::Failed);
        assert_eq!(S::Open.on_event(&TransportEvent::Closed), S::Closed);
        assert_eq!(S::Failed.on_event(&TransportEvent::Closed), S::Closed);
        assert_eq!(S::Closing.on_event(&TransportEvent::Closed), S::Closed);
        assert_eq!(S::Closing.on_event(&TransportEvent::Opened), S::Closing);
        assert_eq!(S::Closed.on_event(&TransportEvent::Opened), S::Closed);
    }

    #[test]
    fn test_endpoint_url() {
        let mut endpoint = Endpoint {
            host: "192.168.1.20".into(),
            port: 8181,
            path: None,
            secure: false,
        };
        assert_eq!(endpoint.url(), "ws://192.168.1.20:8181");

        endpoint.secure = true;
        endpoint.path = Some("stream".into());
        assert_eq!(endpoint.url(), "wss://192.168.1.20:8181/stream");

        endpoint.host = "::1".into();
        endpoint.path = Some("/ingest".into());
        assert_eq!(endpoint.url(), "wss://[::1]:8181/ingest");
    }

    #[tokio::test]
    async fn test_send_only_when_open() {
        let mut server = TestServer::spawn().await;
        let mut session = TransportSession::connect(server.url());

        assert_eq!(session.state(), TransportState::Connecting);
        assert!(!session.send(vec![1, 2, 3]));

        assert_eq!(next(&mut session).await, TransportEvent::Opened);
        assert!(session.send_text("hello".into()));
        assert!(session.send(vec![1, 2, 3]));

        assert_eq!(server.next_message().await, WsMessage::Text("hello".into()));
        assert_eq!(server.next_message().await, WsMessage::Binary(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let server = TestServer::spawn().await;
        let mut session = TransportSession::connect(server.url());
        assert_eq!(next(&mut session).await, TransportEvent::Opened);

        session.close();
        session.close();
        assert_eq!(session.state(), TransportState::Closing);
        assert!(!session.send(vec![0]));

        assert_eq!(next(&mut session).await, TransportEvent::Closed);
        assert_eq!(session.state(), TransportState::Closed);
        session.close();
        assert_eq!(session.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_server_close_is_reported() {
        let server = TestServer::spawn().await;
        let mut session = TransportSession::connect(server.url());
        assert_eq!(next(&mut session).await, TransportEvent::Opened);

        server.close();
        assert_eq!(next(&mut session).await, TransportEvent::Closed);
        assert_eq!(session.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_outbound_queue_is_bounded() {
        let server = TestServer::spawn().await;
        let mut session = TransportSession::connect(server.url());
        assert_eq!(next(&mut session).await, TransportEvent::Opened);

        // The driver never gets to run between these, so only the queue counts.
        let accepted = (0..10).filter(|i| session.send(vec![*i as u8])).count();
        assert_eq!(accepted, OUTBOUND_CAPACITY);
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_stalled_peer_drops_payloads() {
        // Completes the handshake, then never reads.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            std::future::pending::<()>().await;
        });

        let mut session = TransportSession::connect(format!("ws://{}", addr));
        assert_eq!(next(&mut session).await, TransportEvent::Opened);

        let payload = vec![0u8; 1 << 20];
        let mut accepted = 0;
        for _ in 0..256 {
            if session.send(payload.clone()) {
                accepted += 1;
            }
            tokio::task::yield_now().await;
        }
        assert!(accepted < 64, "{} MiB accepted by a peer that reads nothing", accepted);
        assert_eq!(session.state(), TransportState::Open);

        // Closing still works with the socket backed up.
        session.close();
        assert_eq!(next(&mut session).await, TransportEvent::Closed);
    }

    #[tokio::test]
    async fn test_refused_connection_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut session = TransportSession::connect(format!("ws://{}", addr));
        assert!(matches!(next(&mut session).await, TransportEvent::Failed(_)));
        assert_eq!(session.state(), TransportState::Failed);
    }
}
