use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};
use trellis_protocol::{LineCodec, RealtimeRequest, ServerFrame, MAX_MESSAGE_SIZE};

use crate::error::{ServerError, ServerResult};
use crate::hub::{StoreHub, StoreId};

/// Accept realtime connections until the listener fails.
pub async fn serve_realtime(listener: TcpListener, hub: Arc<StoreHub>) -> ServerResult<()> {
    info!(addr = ?listener.local_addr().ok(), "realtime listener started");
    loop {
        let (socket, peer) = listener.accept().await?;
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            debug!(%peer, "realtime connection opened");
            match handle_connection(socket, hub, MAX_MESSAGE_SIZE).await {
                Ok(()) => debug!(%peer, "realtime connection closed"),
                Err(e) => warn!(%peer, error = %e, "realtime connection failed"),
            }
        });
    }
}

/// Answer requests on one connection and forward pushes for every store
/// the connection has addressed. Lines longer than `max_line` are dropped.
async fn handle_connection(socket: TcpStream, hub: Arc<StoreHub>, max_line: usize) -> ServerResult<()> {
    let (read, mut write) = socket.into_split();
    let mut lines = FramedRead::new(read, LinesCodec::new_with_max_length(max_line));
    let mut changes = hub.subscribe();
    let mut watched: HashSet<StoreId> = HashSet::new();

    loop {
        tokio::select! {
            line = lines.next() => {
                let line = match line {
                    None => break,
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!(max = max_line, "oversized realtime frame dropped");
                        continue;
                    }
                    Some(Err(LinesCodecError::Io(e))) => return Err(ServerError::Io(e)),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let RealtimeRequest { callback, request } = match LineCodec::decode::<RealtimeRequest>(&line) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "undecodable realtime frame");
                        continue;
                    }
                };
                if let Some(store) = &request.store_name {
                    watched.insert((request.db_name.clone(), store.clone()));
                }
                let response = hub.handle(request).await;
                let frame = LineCodec::encode(&ServerFrame::response(callback, &response))?;
                write.write_all(frame.as_bytes()).await?;
            }
            change = changes.recv() => match change {
                Ok(change) if watched.contains(&change.store) => {
                    let frame = LineCodec::encode(&ServerFrame::from(change.notification))?;
                    write.write_all(frame.as_bytes()).await?;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "realtime connection lagging, pushes dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAllAuth;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use trellis_protocol::{StoreRequest, StoreResponse};
    use trellis_types::Query;

    #[tokio::test]
    async fn oversized_lines_are_skipped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = Arc::new(StoreHub::new(Arc::new(AllowAllAuth), 8));
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            handle_connection(socket, hub, 256).await
        });

        let socket = TcpStream::connect(addr).await.unwrap();
        let (read, mut write) = socket.into_split();
        let request = RealtimeRequest {
            callback: 3,
            request: StoreRequest::read(&Query::All).in_store(Some("s".into()), None),
        };
        let mut payload = format!("{{\"junk\":\"{}\"}}\n", "x".repeat(1024));
        payload.push_str(&LineCodec::encode(&request).unwrap());
        write.write_all(payload.as_bytes()).await.unwrap();

        let mut lines = BufReader::new(read).lines();
        let reply: ServerFrame = LineCodec::decode(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply.callback, Some(3));
        assert_eq!(reply.data, StoreResponse::Records(Vec::new()).to_json());
    }
}
