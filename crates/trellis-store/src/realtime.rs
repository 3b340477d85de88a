use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use trellis_protocol::{
    Incoming, LineCodec, ProtocolError, ProtocolResult, RealtimeRequest, ServerFrame, StoreRequest,
    StoreResponse, MAX_MESSAGE_SIZE,
};

use crate::datastore::Datastore;
use crate::error::{StoreError, StoreResult};

/// An open realtime channel carrying one JSON document per message.
pub struct RealtimeConnection {
    pub outgoing: mpsc::UnboundedSender<String>,
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Opens persistent connections to realtime remotes.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self, url: &str) -> ProtocolResult<RealtimeConnection>;
}

/// Newline-delimited JSON over TCP. Accepts `host:port` or `tcp://host:port`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl RealtimeConnector for TcpConnector {
    async fn connect(&self, url: &str) -> ProtocolResult<RealtimeConnection> {
        let addr = url.strip_prefix("tcp://").unwrap_or(url);
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ProtocolError::Transport(format!("{addr}: {e}")))?;
        let (read_half, mut write_half) = stream.into_split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(line) = out_rx.recv().await {
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    warn!(error = %e, "realtime write failed");
                    break;
                }
            }
        });

        let peer = addr.to_string();
        tokio::spawn(async move {
            let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_MESSAGE_SIZE));
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => {
                        if in_tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(LinesCodecError::MaxLineLengthExceeded) => {
                        warn!(peer = %peer, max = MAX_MESSAGE_SIZE, "oversized realtime frame dropped");
                    }
                    Err(LinesCodecError::Io(e)) => {
                        warn!(peer = %peer, error = %e, "realtime read failed");
                        break;
                    }
                }
            }
            debug!(peer = %peer, "realtime connection closed");
        });

        debug!(peer = %addr, "realtime connection opened");
        Ok(RealtimeConnection {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

#[derive(Default)]
struct Pending {
    slots: Vec<Option<oneshot::Sender<StoreResponse>>>,
    closed: bool,
}

type PendingCallbacks = Arc<Mutex<Pending>>;

/// Client half of a realtime store.
///
/// A request's sequence number is the length of the pending-callback array
/// at the time it is sent. Answered slots are emptied, never removed, so
/// sequence numbers stay unique for the life of the connection.
pub(crate) struct RealtimeClient {
    outgoing: mpsc::UnboundedSender<String>,
    pending: PendingCallbacks,
}

/// Receiving half, consumed once the owning datastore exists.
pub(crate) struct RealtimeListener {
    incoming: mpsc::UnboundedReceiver<String>,
    pending: PendingCallbacks,
}

impl RealtimeClient {
    pub(crate) fn new(connection: RealtimeConnection) -> (Self, RealtimeListener) {
        let pending = PendingCallbacks::default();
        let client = Self {
            outgoing: connection.outgoing,
            pending: Arc::clone(&pending),
        };
        let listener = RealtimeListener {
            incoming: connection.incoming,
            pending,
        };
        (client, listener)
    }

    pub(crate) async fn request(&self, request: StoreRequest) -> StoreResult<StoreResponse> {
        let (tx, rx) = oneshot::channel();
        let callback = {
            let mut pending = self.pending.lock().expect("lock poisoned");
            if pending.closed {
                return Err(ProtocolError::ConnectionClosed.into());
            }
            let seq = pending.slots.len();
            pending.slots.push(Some(tx));
            seq
        };
        let line = LineCodec::encode(&RealtimeRequest { callback, request })?;
        self.outgoing
            .send(line)
            .map_err(|_| StoreError::from(ProtocolError::ConnectionClosed))?;
        rx.await
            .map_err(|_| StoreError::from(ProtocolError::ConnectionClosed))
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.pending
            .lock()
            .expect("lock poisoned")
            .slots
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

impl RealtimeListener {
    /// Route incoming frames until the connection closes or the datastore
    /// is dropped. Responses complete their pending callback; pushes are
    /// applied to the datastore's cache.
    pub(crate) fn spawn(self, store: Weak<Datastore>) {
        let Self {
            mut incoming,
            pending,
        } = self;
        tokio::spawn(async move {
            while let Some(line) = incoming.recv().await {
                let frame = match LineCodec::decode::<ServerFrame>(&line)
                    .and_then(ServerFrame::classify)
                {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "dropping malformed realtime frame");
                        continue;
                    }
                };
                match frame {
                    Incoming::Response { seq, response } => {
                        let waiter = pending
                            .lock()
                            .expect("lock poisoned")
                            .slots
                            .get_mut(seq)
                            .and_then(Option::take);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(response);
                            }
                            None => warn!(seq, "response for unknown callback"),
                        }
                    }
                    Incoming::Push(notification) => match store.upgrade() {
                        Some(store) => store.apply_notification(notification),
                        None => break,
                    },
                }
            }
            // Dropping the senders fails every request still waiting.
            let mut pending = pending.lock().expect("lock poisoned");
            pending.closed = true;
            pending.slots.clear();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;
    use trellis_types::Query;

    #[tokio::test]
    async fn sequence_numbers_follow_pending_length() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (client, listener) = RealtimeClient::new(RealtimeConnection {
            outgoing: out_tx,
            incoming: in_rx,
        });
        listener.spawn(Weak::new());
        let client = Arc::new(client);

        let first = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.request(StoreRequest::read(&Query::from("a"))).await }
        });
        let line = out_rx.recv().await.unwrap();
        let sent: RealtimeRequest = LineCodec::decode(&line).unwrap();
        assert_eq!(sent.callback, 0);
        assert_eq!(client.in_flight(), 1);

        let second = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.request(StoreRequest::read(&Query::from("b"))).await }
        });
        let line = out_rx.recv().await.unwrap();
        let sent: RealtimeRequest = LineCodec::decode(&line).unwrap();
        assert_eq!(sent.callback, 1);

        // Answer out of order.
        let reply = |seq, key: &str| {
            let data = json!({ "key": key });
            LineCodec::encode(&ServerFrame {
                callback: Some(seq),
                data,
                del: None,
            })
            .unwrap()
        };
        in_tx.send(reply(1, "b")).unwrap();
        in_tx.send(reply(0, "a")).unwrap();

        let a = first.await.unwrap().unwrap();
        let b = second.await.unwrap().unwrap();
        assert_eq!(a.to_json(), json!({"key": "a"}));
        assert_eq!(b.to_json(), json!({"key": "b"}));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn closed_connection_fails_pending() {
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let (client, listener) = RealtimeClient::new(RealtimeConnection {
            outgoing: out_tx,
            incoming: in_rx,
        });
        listener.spawn(Weak::new());
        let client = Arc::new(client);
        let request = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.request(StoreRequest::read(&Query::All)).await }
        });
        while client.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        drop(in_tx);
        let err = request.await.unwrap().unwrap_err();
        assert!(matches!(err, StoreError::Protocol(_)));

        let late = client.request(StoreRequest::read(&Query::All)).await.unwrap_err();
        assert!(matches!(late, StoreError::Protocol(_)));
    }

    #[tokio::test]
    async fn tcp_connector_exchanges_lines() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = server.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            write_half.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        });

        let mut conn = TcpConnector.connect(&format!("tcp://{addr}")).await.unwrap();
        conn.outgoing.send("{\"ping\":1}\n".into()).unwrap();
        let echoed = conn.incoming.recv().await.unwrap();
        assert_eq!(echoed, "{\"ping\":1}");
    }
}
