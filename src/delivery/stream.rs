//! Streaming route over TCP with newline-delimited JSON.
//!
//! Each outbound message is one JSON line. The collector answers with one
//! `event_received` line per message. Acks carrying a correlation id resolve
//! that packet; acks without one resolve the oldest pending packet.
//!
//! A supervisor task owns the socket and reconnects according to the
//! [`ReconnectPolicy`]. Dropping the connection fails every pending ack so the
//! waiting deliveries move to the fallback route immediately.

use crate::config::ReconnectPolicy;
use crate::delivery::error::DeliveryError;
use crate::delivery::message::{DeliveryAck, DeliveryRoute, InboundAck, OutboundMessage};
use crate::delivery::transport::StreamingTransport;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

type PendingAck = (Uuid, oneshot::Sender<DeliveryAck>);

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<VecDeque<PendingAck>>,
}

impl Shared {
    fn attach(&self, outbound: mpsc::UnboundedSender<String>) {
        *self.outbound.lock() = Some(outbound);
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Mark the route down and fail every waiting delivery.
    fn detach(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.outbound.lock().take();
        let dropped = {
            let mut pending = self.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            debug!(dropped, "pending acks failed on disconnect");
        }
    }

    fn handle_line(&self, line: &str) {
        let ack: InboundAck = match serde_json::from_str(line) {
            Ok(ack) => ack,
            Err(e) => {
                debug!(error = %e, "ignoring unparseable stream line");
                return;
            }
        };
        if !ack.is_ack() {
            trace!(event = %ack.event, "ignoring stream event");
            return;
        }

        let entry = {
            let mut pending = self.pending.lock();
            match ack.correlation_id {
                Some(id) => pending
                    .iter()
                    .position(|(pending_id, _)| *pending_id == id)
                    .and_then(|index| pending.remove(index)),
                None => pending.pop_front(),
            }
        };

        match entry {
            Some((correlation_id, waiter)) => {
                let _ = waiter.send(DeliveryAck {
                    correlation_id: Some(correlation_id),
                    status: ack.status.unwrap_or_else(|| "received".to_string()),
                    route: DeliveryRoute::Stream,
                });
            }
            None => debug!(correlation_id = ?ack.correlation_id, "ack for unknown or expired packet"),
        }
    }
}

/// Streaming transport to a collector at `host:port`.
#[derive(Clone)]
pub struct TcpStreamTransport {
    addr: String,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
}

impl TcpStreamTransport {
    pub fn new(addr: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            addr: addr.into(),
            policy,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of messages still waiting for an ack.
    pub fn pending_acks(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Start the connection supervisor. It runs until `cancel` fires or the
    /// reconnect policy is exhausted.
    pub fn spawn_supervisor(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let addr = self.addr.clone();
        let policy = self.policy;
        let shared = self.shared.clone();
        tokio::spawn(async move {
            supervise(&addr, policy, &shared, &cancel).await;
            shared.detach();
        })
    }
}

async fn supervise(addr: &str, policy: ReconnectPolicy, shared: &Shared, cancel: &CancellationToken) {
    let mut failures = 0u32;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = TcpStream::connect(addr) => result,
        };

        match connected {
            Ok(socket) => {
                failures = 0;
                info!(%addr, "streaming channel connected");
                run_connection(socket, shared, cancel).await;
                shared.detach();
                if cancel.is_cancelled() {
                    return;
                }
                warn!(%addr, "streaming channel disconnected");
            }
            Err(e) => {
                failures += 1;
                warn!(%addr, attempt = failures, error = %e, "streaming connect failed");
                if failures >= policy.max_attempts {
                    warn!(%addr, "reconnect attempts exhausted, using fallback only");
                    return;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}

async fn run_connection(socket: TcpStream, shared: &Shared, cancel: &CancellationToken) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    shared.attach(tx);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            outgoing = rx.recv() => {
                let Some(mut line) = outgoing else { break };
                line.push('\n');
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    warn!(error = %e, "stream write failed");
                    break;
                }
            }
            incoming = lines.next_line() => match incoming {
                Ok(Some(line)) => shared.handle_line(&line),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stream read failed");
                    break;
                }
            },
        }
    }
}

#[async_trait]
impl StreamingTransport for TcpStreamTransport {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn send(
        &self,
        message: &OutboundMessage,
    ) -> Result<oneshot::Receiver<DeliveryAck>, DeliveryError> {
        let correlation_id = message
            .correlation_id
            .ok_or_else(|| DeliveryError::Protocol("message has no correlation id".to_string()))?;
        let line = serde_json::to_string(message)?;

        // Register before writing so a fast ack always finds its waiter
        let (waiter, ack) = oneshot::channel();
        self.shared.pending.lock().push_back((correlation_id, waiter));

        let queued = self
            .shared
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|outbound| outbound.send(line).is_ok());
        if !queued {
            self.forget(correlation_id);
            return Err(DeliveryError::NotConnected);
        }
        Ok(ack)
    }

    fn forget(&self, correlation_id: Uuid) {
        self.shared
            .pending
            .lock()
            .retain(|(pending_id, _)| *pending_id != correlation_id);
    }
}
