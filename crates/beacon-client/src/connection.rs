use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use beacon_common::protocol::{Message, MessageType, RpcRequest, RpcResponse};
use beacon_common::transport::{read_message, write_message};
use beacon_common::{Result, RpcError};

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<Result<RpcResponse>>>>>;

/// One multiplexed session to a provider.
///
/// Writers share the stream through a lock; a single demultiplexer task
/// reads frames and completes the pending entry matching each response's
/// request id. Request ids are monotonic per connection, so correlation is
/// strictly per-session.
pub struct Connection {
    address: String,
    writer: Mutex<OwnedWriteHalf>,
    pending: PendingMap,
    next_request_id: AtomicU64,
    active: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl Connection {
    /// Dials the provider with the given deadline; a single attempt.
    pub async fn dial(address: &str, deadline: Duration) -> Result<Arc<Connection>> {
        let stream = tokio::time::timeout(deadline, TcpStream::connect(address))
            .await
            .map_err(|_| {
                RpcError::Transport(format!("connect to {address} exceeded deadline"))
            })?
            .map_err(|e| RpcError::Transport(format!("connect to {address} failed: {e}")))?;
        let _ = stream.set_nodelay(true);

        let (reader, writer) = stream.into_split();
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let active = Arc::new(AtomicBool::new(true));
        let reader_task = spawn_demux(reader, address.to_string(), pending.clone(), active.clone());

        tracing::info!(address, "provider connection established");
        Ok(Arc::new(Connection {
            address: address.to_string(),
            writer: Mutex::new(writer),
            pending,
            next_request_id: AtomicU64::new(0),
            active,
            reader_task,
        }))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Assigns the next request id, parks an awaiter, and writes the framed
    /// request. A failed write removes the entry and surfaces the error.
    pub async fn send(&self, request: &RpcRequest) -> Result<PendingCall> {
        if !self.is_active() {
            return Err(RpcError::Transport(format!(
                "connection to {} is closed",
                self.address
            )));
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        let msg = Message::request(request_id, request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id, tx);

        let write_result = {
            let mut writer = self.writer.lock().await;
            write_message(&mut *writer, &msg).await
        };
        if let Err(e) = write_result {
            self.pending.lock().unwrap().remove(&request_id);
            return Err(e);
        }

        tracing::debug!(request_id, address = %self.address, "request sent");
        Ok(PendingCall {
            request_id,
            rx,
            pending: self.pending.clone(),
        })
    }

    /// Tears the connection down: the demultiplexer stops and every pending
    /// entry completes exceptionally.
    pub fn close(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!(address = %self.address, "closing provider connection");
        self.reader_task.abort();
        fail_all_pending(&self.pending, "connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader_task.abort();
        fail_all_pending(&self.pending, "connection dropped");
    }
}

/// A parked response slot for one in-flight request.
///
/// The call completes exactly once: with the response, with the error the
/// demultiplexer observed, or with a timeout from [`PendingCall::wait`].
/// Individual requests cannot be cancelled; dropping the handle merely
/// abandons the slot and the timeout remains the only way to stop waiting.
#[derive(Debug)]
pub struct PendingCall {
    request_id: u64,
    rx: oneshot::Receiver<Result<RpcResponse>>,
    pending: PendingMap,
}

impl PendingCall {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Awaits the response for at most `timeout`. On timeout the pending
    /// entry is removed so a late response is dropped as unknown.
    pub async fn wait(self, timeout: Duration) -> Result<RpcResponse> {
        match tokio::time::timeout(timeout, self.rx).await {
            Err(_) => {
                self.pending.lock().unwrap().remove(&self.request_id);
                Err(RpcError::Timeout(timeout.as_millis() as u64))
            }
            Ok(Err(_)) => Err(RpcError::Transport(
                "connection closed while awaiting response".into(),
            )),
            Ok(Ok(result)) => result,
        }
    }
}

fn spawn_demux(
    mut reader: OwnedReadHalf,
    address: String,
    pending: PendingMap,
    active: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read_message(&mut reader).await {
                Ok(Some(msg)) => match msg.kind() {
                    Some(MessageType::Response) => {
                        let sender = pending.lock().unwrap().remove(&msg.request_id);
                        let Some(tx) = sender else {
                            tracing::warn!(
                                request_id = msg.request_id,
                                address,
                                "response for unknown request id, dropping"
                            );
                            continue;
                        };
                        let result = match msg.as_response() {
                            Ok(response) if msg.is_ok() => Ok(response),
                            Ok(response) => {
                                Err(RpcError::Remote(response.message_or_default()))
                            }
                            Err(e) => Err(RpcError::Protocol(format!(
                                "response payload malformed: {e}"
                            ))),
                        };
                        let _ = tx.send(result);
                    }
                    Some(MessageType::HeartbeatResponse) => {
                        tracing::debug!(%address, "heartbeat acknowledged");
                    }
                    _ => tracing::warn!(
                        message_type = msg.message_type,
                        address,
                        "unexpected message type from provider, discarding"
                    ),
                },
                Ok(None) => {
                    tracing::info!(%address, "provider closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!(%address, "connection read error: {e}");
                    break;
                }
            }
        }
        active.store(false, Ordering::SeqCst);
        fail_all_pending(&pending, "connection closed");
    })
}

fn fail_all_pending(pending: &PendingMap, reason: &str) {
    let drained: Vec<_> = pending.lock().unwrap().drain().collect();
    for (id, tx) in drained {
        tracing::debug!(request_id = id, "failing pending request: {reason}");
        let _ = tx.send(Err(RpcError::Transport(reason.to_string())));
    }
}
