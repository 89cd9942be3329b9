//! Pool session client.
//!
//! One [`StratumClient`] owns one session. It spawns a reader task that
//! consumes inbound lines until the stream ends and a writer task that
//! serializes all outbound requests, then performs the handshake:
//! `mining.subscribe` (the only correlated, awaited call), followed by a
//! fire-and-forget `mining.authorize`.
//!
//! Responses are matched to outstanding calls through a correlation table
//! keyed by request id. Entries are removed exactly once: on success, on
//! an error response, or on timeout eviction. A terminated client must be
//! discarded; reconnection builds a fresh one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::connection::{ReadTransport, WriteTransport};
use super::error::{StratumError, StratumResult};
use super::messages::{classify, Inbound, PoolEvent, Request};
use crate::job::Job;
use crate::u256::U256;

/// How long a correlated call may stay outstanding before it is evicted
/// from the correlation table and fails with a timeout.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool session client.
///
/// Event sinks are supplied at construction; [`StratumClient::start`]
/// consumes the client, so a partially wired session is never reachable.
pub struct StratumClient {
    event_tx: mpsc::Sender<PoolEvent>,
    shutdown: CancellationToken,
    shared: Arc<Shared>,
    outbound_rx: mpsc::UnboundedReceiver<Request>,
    call_timeout: Duration,
}

/// State shared between the session tasks and [`ClientHandle`]s.
struct Shared {
    username: String,
    next_id: AtomicU64,
    calls: Mutex<HashMap<u64, PendingCall>>,
    outbound_tx: mpsc::UnboundedSender<Request>,
}

/// Correlation-table entry for an outstanding request.
struct PendingCall {
    tx: oneshot::Sender<StratumResult<Value>>,
}

/// Cloneable handle for issuing requests on a running session.
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

/// A started session; join it after cancellation to reap the tasks.
#[derive(Debug)]
pub struct Session {
    tracker: TaskTracker,
}

impl Session {
    /// Wait for the reader and writer tasks to finish.
    pub async fn join(self) {
        self.tracker.wait().await;
    }
}

impl StratumClient {
    /// Create a client and its request handle.
    pub fn new(
        username: String,
        event_tx: mpsc::Sender<PoolEvent>,
        shutdown: CancellationToken,
    ) -> (Self, ClientHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            username,
            next_id: AtomicU64::new(0),
            calls: Mutex::new(HashMap::new()),
            outbound_tx,
        });

        let client = Self {
            event_tx,
            shutdown,
            shared: shared.clone(),
            outbound_rx,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        };

        (client, ClientHandle { shared })
    }

    /// Override the correlated-call timeout.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Spawn the session tasks and perform the handshake.
    ///
    /// Issues `mining.subscribe` and blocks until its response resolves
    /// (the only synchronous wait in the handshake), emits the
    /// subscription event, then issues `mining.authorize` fire-and-forget:
    /// its response is never awaited or correlated.
    pub async fn start(
        self,
        reader: impl ReadTransport,
        writer: impl WriteTransport,
    ) -> StratumResult<Session> {
        let tracker = TaskTracker::new();
        tracker.spawn(write_loop(writer, self.outbound_rx, self.shutdown.clone()));
        tracker.spawn(read_loop(
            reader,
            self.shared.clone(),
            self.event_tx.clone(),
            self.shutdown.clone(),
        ));
        tracker.close();

        debug!("Subscribing to pool");
        let result = self
            .shared
            .call("mining.subscribe", vec![], self.call_timeout)
            .await
            .map_err(|e| StratumError::SubscriptionFailed(e.to_string()))?;

        let (extra_nonce, extra_nonce_size) = parse_subscribe_result(&result)?;
        debug!(
            extra_nonce = %format_args!("{extra_nonce:#x}"),
            extra_nonce_size,
            "Subscribed"
        );

        self.event_tx
            .send(PoolEvent::Subscribed {
                extra_nonce,
                extra_nonce_size,
            })
            .await
            .map_err(|_| StratumError::Disconnected)?;

        // Authorize is fire-and-forget; the pool's answer arrives as an
        // uncorrelated response and is dropped by the reader.
        let username = self.shared.username.clone();
        self.shared
            .send_request("mining.authorize", vec![username, String::new()])?;

        Ok(Session { tracker })
    }
}

impl ClientHandle {
    /// Submit a found share. Fire-and-forget: no response is awaited.
    ///
    /// Params: `[username, job_id, extraNonce as 8 bytes hex, timestamp as
    /// 4 bytes hex, nonce as 4 bytes hex]`, all big-endian.
    pub fn submit_share(
        &self,
        job_id: &str,
        extra_nonce: u64,
        timestamp: u32,
        nonce: u32,
    ) -> StratumResult<()> {
        let params = vec![
            self.shared.username.clone(),
            job_id.to_string(),
            format!("{extra_nonce:016x}"),
            format!("{timestamp:08x}"),
            format!("{nonce:08x}"),
        ];
        self.shared.send_request("mining.submit", params)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pending_calls(&self) -> usize {
        self.shared.calls.lock().unwrap().len()
    }

    #[cfg(test)]
    pub(crate) fn test_handle() -> (Self, mpsc::UnboundedReceiver<Request>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            username: "V-test-address".to_string(),
            next_id: AtomicU64::new(0),
            calls: Mutex::new(HashMap::new()),
            outbound_tx,
        });
        (Self { shared }, outbound_rx)
    }
}

impl Shared {
    /// Allocate a fresh request id, strictly increasing within the session.
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Send a request without correlating its response.
    fn send_request(&self, method: &str, params: Vec<String>) -> StratumResult<u64> {
        let id = self.next_request_id();
        self.send(Request::new(id, method, params))?;
        Ok(id)
    }

    /// Send a request and wait for its response.
    ///
    /// The pending call is evicted from the correlation table on timeout,
    /// so the table cannot grow across a long session even if the pool
    /// never replies.
    async fn call(
        &self,
        method: &str,
        params: Vec<String>,
        timeout_dur: Duration,
    ) -> StratumResult<Value> {
        let id = self.next_request_id();
        let (tx, rx) = oneshot::channel();

        self.calls
            .lock()
            .unwrap()
            .insert(id, PendingCall { tx });

        if let Err(e) = self.send(Request::new(id, method, params)) {
            self.calls.lock().unwrap().remove(&id);
            return Err(e);
        }

        match timeout(timeout_dur, rx).await {
            Err(_elapsed) => {
                self.calls.lock().unwrap().remove(&id);
                Err(StratumError::Timeout)
            }
            Ok(Err(_recv)) => Err(StratumError::Disconnected),
            Ok(Ok(outcome)) => outcome,
        }
    }

    fn send(&self, req: Request) -> StratumResult<()> {
        self.outbound_tx
            .send(req)
            .map_err(|_| StratumError::Disconnected)
    }

    /// Complete the pending call matching a response id, removing its
    /// table entry.
    fn complete(&self, id: &str, outcome: StratumResult<Value>) {
        let Ok(id) = id.parse::<u64>() else {
            warn!(msg_id = %id, "Response id is not numeric");
            return;
        };

        match self.calls.lock().unwrap().remove(&id) {
            // Receiver may have timed out and gone away; that is fine.
            Some(pending) => {
                let _ = pending.tx.send(outcome);
            }
            None => debug!(msg_id = id, "Response matches no pending call"),
        }
    }
}

/// Parse the subscribe result array: index 1 is a hex extraNonce (up to
/// 64 bits), index 2 an integer size.
fn parse_subscribe_result(result: &Value) -> StratumResult<(u64, usize)> {
    let arr = result.as_array().ok_or_else(|| {
        StratumError::SubscriptionFailed("subscribe result not an array".to_string())
    })?;

    if arr.len() < 3 {
        return Err(StratumError::SubscriptionFailed(
            "subscribe result too short".to_string(),
        ));
    }

    let extra_hex = arr[1].as_str().ok_or_else(|| {
        StratumError::SubscriptionFailed("extraNonce not a string".to_string())
    })?;
    let extra_nonce = u64::from_str_radix(extra_hex.trim_start_matches("0x"), 16)
        .map_err(|e| StratumError::SubscriptionFailed(format!("extraNonce hex: {e}")))?;

    let extra_nonce_size = arr[2].as_u64().ok_or_else(|| {
        StratumError::SubscriptionFailed("extraNonce size not a number".to_string())
    })? as usize;

    Ok((extra_nonce, extra_nonce_size))
}

/// Reader task: consume inbound lines until the stream ends or errors.
///
/// Malformed and unclassifiable lines are logged and skipped, leaving the
/// session alive; only transport errors and EOF end it.
async fn read_loop(
    mut reader: impl ReadTransport,
    shared: Arc<Shared>,
    event_tx: mpsc::Sender<PoolEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            msg = reader.read_message() => match msg {
                Ok(Some(raw)) => match classify(raw) {
                    Ok(Inbound::Notification { method, params }) => {
                        if let Err(e) = handle_notification(&method, &params, &event_tx).await {
                            if matches!(e, StratumError::Disconnected) {
                                break;
                            }
                            warn!(method = %method, error = %e, "Error handling notification");
                        }
                    }
                    Ok(Inbound::Success { id, result }) => {
                        shared.complete(&id, Ok(result));
                    }
                    Ok(Inbound::Failure { id, error }) => {
                        // No recovery beyond logging; submit rejections
                        // surface here since submits are uncorrelated.
                        warn!(msg_id = %id, error = %error, "Pool returned error response");
                        shared.complete(&id, Err(StratumError::PoolError(error.to_string())));
                    }
                    Err(e) => {
                        warn!(error = %e, "Unclassifiable message from pool, ignoring");
                    }
                },
                Ok(None) => {
                    info!("Connection closed by pool");
                    break;
                }
                Err(StratumError::InvalidMessage(e)) => {
                    warn!(error = %e, "Malformed line from pool, ignoring");
                }
                Err(e) => {
                    warn!(error = %e, "Read failed, ending session");
                    break;
                }
            },

            _ = shutdown.cancelled() => break,
        }
    }

    // Report session termination to the owner; retry is its concern.
    let _ = event_tx.send(PoolEvent::Disconnected).await;
}

/// Writer task: the single owner of the write half, serializing all
/// outbound requests from the handshake and submit paths.
async fn write_loop(
    mut writer: impl WriteTransport,
    mut rx: mpsc::UnboundedReceiver<Request>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            req = rx.recv() => match req {
                Some(req) => {
                    if let Err(e) = writer.write_message(&req).await {
                        warn!(error = %e, "Write failed, ending session");
                        shutdown.cancel();
                        break;
                    }
                }
                None => break,
            },

            _ = shutdown.cancelled() => break,
        }
    }
}

/// Dispatch one notification to the owning sinks.
async fn handle_notification(
    method: &str,
    params: &Value,
    event_tx: &mpsc::Sender<PoolEvent>,
) -> StratumResult<()> {
    match method {
        "mining.notify" => {
            let arr = params.as_array().ok_or_else(|| {
                StratumError::InvalidMessage("mining.notify params not an array".to_string())
            })?;
            let job = Job::from_notify_params(arr)
                .map_err(|e| StratumError::InvalidMessage(format!("failed to parse job: {e}")))?;

            event_tx
                .send(PoolEvent::NewJob(job))
                .await
                .map_err(|_| StratumError::Disconnected)?;
        }
        "mining.set_difficulty" => {
            let target = parse_difficulty(params)?;
            event_tx
                .send(PoolEvent::DifficultyChanged(target))
                .await
                .map_err(|_| StratumError::Disconnected)?;
        }
        _ => {
            warn!(method = %method, "Unknown notification method");
        }
    }
    Ok(())
}

/// Parse a difficulty notification payload.
///
/// The pool sends the target as a decimal string; a bare number is
/// tolerated as well.
fn parse_difficulty(params: &Value) -> StratumResult<U256> {
    let arr = params.as_array().ok_or_else(|| {
        StratumError::InvalidMessage("set_difficulty params not an array".to_string())
    })?;
    let first = arr.first().ok_or_else(|| {
        StratumError::InvalidMessage("set_difficulty params empty".to_string())
    })?;

    match first {
        Value::String(s) => U256::from_dec_str(s)
            .map_err(|e| StratumError::InvalidMessage(format!("difficulty: {e}"))),
        Value::Number(n) => n.as_u64().map(U256::from).ok_or_else(|| {
            StratumError::InvalidMessage("difficulty not an unsigned integer".to_string())
        }),
        _ => Err(StratumError::InvalidMessage(
            "difficulty has unexpected type".to_string(),
        )),
    }
}
