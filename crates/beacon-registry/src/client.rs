use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use beacon_common::protocol::{
    LookupRequest, LookupResponse, Message, MessageType, ServiceInfo,
};
use beacon_common::transport::{read_message, write_message};
use beacon_common::{Result, RpcError};

/// Per-call response deadline for registry exchanges.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(3);
const CONNECT_DEADLINE: Duration = Duration::from_secs(5);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const REGISTER_RETRIES: u32 = 3;
const REGISTER_RETRY_PAUSE: Duration = Duration::from_secs(1);
const HEARTBEAT_FAILURE_WARN: u32 = 3;
// 12 ticks at the 5 s interval puts the refresh at 60 s, half the
// registry's 120 s expiry window.
const REGISTRATION_REFRESH_TICKS: u32 = 12;

/// Lifecycle of the client's registry session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    HeartbeatFailing,
    Reconnecting,
    Closed,
}

/// Timing knobs; production values by default, compressed in tests.
#[derive(Debug, Clone)]
pub struct RegistryClientOptions {
    pub call_timeout: Duration,
    pub connect_attempts: u32,
    pub connect_retry_interval: Duration,
    pub connect_deadline: Duration,
    pub heartbeat_interval: Duration,
    pub register_retry_pause: Duration,
    /// Every this many heartbeat ticks the cached registrations are sent
    /// again. REGISTER doubles as a heartbeat for the *advertised* address,
    /// which a PING (keyed by the session's observed endpoint) cannot
    /// refresh; the periodic refresh keeps the advertised address inside
    /// the registry's expiry window.
    pub registration_refresh_ticks: u32,
}

impl Default for RegistryClientOptions {
    fn default() -> Self {
        RegistryClientOptions {
            call_timeout: CALL_TIMEOUT,
            connect_attempts: CONNECT_ATTEMPTS,
            connect_retry_interval: CONNECT_RETRY_INTERVAL,
            connect_deadline: CONNECT_DEADLINE,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            register_retry_pause: REGISTER_RETRY_PAUSE,
            registration_refresh_ticks: REGISTRATION_REFRESH_TICKS,
        }
    }
}

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Client side of a registry session.
///
/// Holds one TCP session to the registry for its lifetime. Requests are
/// correlated by a monotonic id through a pending map; each pending entry is
/// completed exactly once by the reader task, a send failure, or the call
/// timeout. When constructed with `enable_heartbeat` a supervised loop keeps
/// the session alive, reconnects when it drops, and re-registers every
/// cached service in registration order.
///
/// Providers enable the heartbeat; consumers leave it off and let their
/// calls reconnect on demand.
#[derive(Clone)]
pub struct RegistryClient {
    inner: Arc<Inner>,
}

struct Inner {
    address: String,
    enable_heartbeat: bool,
    options: RegistryClientOptions,
    next_request_id: AtomicU64,
    pending: PendingMap,
    session: Mutex<Option<Session>>,
    /// Everything this client has registered, in registration order; the
    /// replay source after a reconnect.
    registered: StdMutex<Vec<ServiceInfo>>,
    state: StdMutex<SessionState>,
    heartbeat_failures: AtomicU32,
    heartbeat_task: StdMutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

struct Session {
    writer: OwnedWriteHalf,
    reader_task: JoinHandle<()>,
    active: Arc<AtomicBool>,
}

impl Session {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl RegistryClient {
    /// Connects to the registry at `address` (`host:port`), retrying per the
    /// default timing, and starts the heartbeat loop when asked.
    pub async fn connect(address: impl Into<String>, enable_heartbeat: bool) -> Result<Self> {
        Self::connect_with_options(address, enable_heartbeat, RegistryClientOptions::default())
            .await
    }

    pub async fn connect_with_options(
        address: impl Into<String>,
        enable_heartbeat: bool,
        options: RegistryClientOptions,
    ) -> Result<Self> {
        let inner = Arc::new(Inner {
            address: address.into(),
            enable_heartbeat,
            options,
            next_request_id: AtomicU64::new(0),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            session: Mutex::new(None),
            registered: StdMutex::new(Vec::new()),
            state: StdMutex::new(SessionState::Connecting),
            heartbeat_failures: AtomicU32::new(0),
            heartbeat_task: StdMutex::new(None),
            closed: AtomicBool::new(false),
        });
        let client = RegistryClient { inner };

        client.ensure_session().await?;
        tracing::info!(
            address = %client.inner.address,
            heartbeat = enable_heartbeat,
            "registry client connected"
        );

        if enable_heartbeat {
            let task = spawn_heartbeat_loop(Arc::downgrade(&client.inner));
            *client.inner.heartbeat_task.lock().unwrap() = Some(task);
        }

        Ok(client)
    }

    /// The registry address this client talks to.
    pub fn registry_address(&self) -> &str {
        &self.inner.address
    }

    /// Current session lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.lock().unwrap()
    }

    /// Registers a service and remembers it for replay after reconnects.
    pub async fn register(&self, info: ServiceInfo) -> Result<()> {
        self.check_open()?;
        {
            let mut cache = self.inner.registered.lock().unwrap();
            if !cache.contains(&info) {
                cache.push(info.clone());
            }
        }
        self.register_with_retries(&info).await
    }

    /// Unregisters a service and forgets it locally.
    pub async fn unregister(&self, info: &ServiceInfo) -> Result<()> {
        self.check_open()?;
        self.inner
            .registered
            .lock()
            .unwrap()
            .retain(|cached| cached != info);

        match self.call(|id| Message::unregister(id, info), true).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_retryable() => {
                tracing::warn!("unregister failed ({e}), retrying once after reconnect");
                self.call(|id| Message::unregister(id, info), true)
                    .await
                    .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    /// Queries the providers for a `(name, version, group)` triple.
    ///
    /// Degrades to an empty list on timeout or transport failure; the
    /// consumer treats an empty list as service-not-found.
    pub async fn lookup(
        &self,
        name: &str,
        version: Option<&str>,
        group: Option<&str>,
    ) -> Vec<ServiceInfo> {
        if self.check_open().is_err() {
            return Vec::new();
        }
        let request = LookupRequest {
            service_name: name.to_string(),
            version: version.map(str::to_string),
            group: group.map(str::to_string),
        };

        match self.call(|id| Message::lookup(id, &request), true).await {
            Ok(value) => match serde_json::from_value::<LookupResponse>(value) {
                Ok(response) => {
                    tracing::debug!(
                        key = %request.service_key(),
                        found = response.services.len(),
                        "lookup answered"
                    );
                    response.services
                }
                Err(e) => {
                    tracing::error!("lookup response malformed: {e}");
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::error!(key = %request.service_key(), "lookup failed: {e}");
                Vec::new()
            }
        }
    }

    /// Sends one PING on the current session without parking a pending
    /// entry; the PONG is consumed by the reader task.
    pub async fn send_heartbeat(&self) -> Result<()> {
        let id = self.next_id();
        let msg = Message::heartbeat_request(id);

        let write_result = {
            let mut guard = self.inner.session.lock().await;
            match guard.as_mut() {
                Some(session) if session.is_active() => {
                    write_message(&mut session.writer, &msg).await
                }
                _ => Err(RpcError::Transport("registry session not active".into())),
            }
        };

        match write_result {
            Ok(()) => {
                self.inner.heartbeat_failures.store(0, Ordering::SeqCst);
                let mut state = self.inner.state.lock().unwrap();
                if *state == SessionState::HeartbeatFailing {
                    *state = SessionState::Connected;
                }
                Ok(())
            }
            Err(e) => {
                let failures = self.inner.heartbeat_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= HEARTBEAT_FAILURE_WARN {
                    tracing::warn!(
                        failures,
                        "consecutive heartbeat failures, reconnecting on next tick"
                    );
                    *self.inner.state.lock().unwrap() = SessionState::HeartbeatFailing;
                }
                Err(e)
            }
        }
    }

    /// Gracefully unregisters everything this client registered, stops the
    /// heartbeat loop, and closes the session. Idempotent.
    pub async fn destroy(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("destroying registry client");

        // Best-effort unregistration, only over a session that is already
        // up; destroy must not start a reconnect storm.
        let session_active = {
            let guard = self.inner.session.lock().await;
            matches!(guard.as_ref(), Some(session) if session.is_active())
        };
        if session_active {
            let services = self.inner.registered.lock().unwrap().clone();
            for info in &services {
                if let Err(e) = self.exchange(|id| Message::unregister(id, info)).await {
                    tracing::warn!(
                        service = %info.service_name,
                        "unregister during destroy failed: {e}"
                    );
                }
            }
        }
        self.inner.registered.lock().unwrap().clear();

        if let Some(task) = self.inner.heartbeat_task.lock().unwrap().take() {
            task.abort();
        }

        let mut guard = self.inner.session.lock().await;
        if let Some(session) = guard.take() {
            session.reader_task.abort();
        }
        drop(guard);
        fail_all_pending(&self.inner.pending, "registry client destroyed");

        *self.inner.state.lock().unwrap() = SessionState::Closed;
        tracing::info!("registry client destroyed");
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(RpcError::Transport("registry client is closed".into()))
        } else {
            Ok(())
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.next_request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Makes sure an active session exists, dialing (with retries) when it
    /// does not. Returns whether a fresh session was established.
    async fn ensure_session(&self) -> Result<bool> {
        let mut guard = self.inner.session.lock().await;
        if let Some(session) = guard.as_ref() {
            if session.is_active() {
                return Ok(false);
            }
        }

        {
            let mut state = self.inner.state.lock().unwrap();
            *state = if guard.is_none() {
                SessionState::Connecting
            } else {
                SessionState::Reconnecting
            };
        }

        if let Some(stale) = guard.take() {
            tracing::warn!("registry session inactive, reconnecting");
            stale.reader_task.abort();
            fail_all_pending(&self.inner.pending, "registry connection lost");
        }

        let session = self.open_session().await?;
        *guard = Some(session);
        *self.inner.state.lock().unwrap() = SessionState::Connected;
        self.inner.heartbeat_failures.store(0, Ordering::SeqCst);
        Ok(true)
    }

    async fn open_session(&self) -> Result<Session> {
        let opts = &self.inner.options;
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=opts.connect_attempts {
            if attempt > 1 {
                tokio::time::sleep(opts.connect_retry_interval).await;
                tracing::info!(attempt, address = %self.inner.address, "retrying registry connect");
            }

            match tokio::time::timeout(
                opts.connect_deadline,
                TcpStream::connect(&self.inner.address),
            )
            .await
            {
                Ok(Ok(stream)) => {
                    let _ = stream.set_nodelay(true);
                    let (reader, writer) = stream.into_split();
                    let active = Arc::new(AtomicBool::new(true));
                    let reader_task = spawn_reader(
                        reader,
                        self.inner.pending.clone(),
                        active.clone(),
                    );
                    tracing::info!(address = %self.inner.address, "connected to registry");
                    return Ok(Session {
                        writer,
                        reader_task,
                        active,
                    });
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = "connect deadline exceeded".into(),
            }
            tracing::warn!(
                attempt,
                max = opts.connect_attempts,
                address = %self.inner.address,
                "registry connect failed: {last_error}"
            );
        }

        Err(RpcError::Transport(format!(
            "failed to connect to registry {} after {} attempts: {last_error}",
            self.inner.address, opts.connect_attempts
        )))
    }

    /// Register with the original's bounded retry: a timeout or failure is
    /// retried after a short pause up to [`REGISTER_RETRIES`] times.
    async fn register_with_retries(&self, info: &ServiceInfo) -> Result<()> {
        let mut last_error = None;
        for attempt in 0..=REGISTER_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(self.inner.options.register_retry_pause).await;
                tracing::info!(attempt, service = %info.service_name, "retrying register");
            }
            match self.call(|id| Message::register(id, info), true).await {
                Ok(_) => {
                    tracing::info!(
                        service = %info.service_name,
                        address = %info.address,
                        "service registered with registry"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(service = %info.service_name, "register attempt failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| RpcError::Transport("register failed".into())))
    }

    /// One request/response exchange with the registry.
    ///
    /// `allow_replay` gates re-registration when this very call had to
    /// re-establish the session; the replay itself sends raw exchanges.
    async fn call<F>(&self, build: F, allow_replay: bool) -> Result<Value>
    where
        F: FnOnce(u64) -> Result<Message>,
    {
        let established = self.ensure_session().await?;
        if established && allow_replay && self.inner.enable_heartbeat {
            self.replay_registrations().await;
        }
        self.exchange(build).await
    }

    /// The raw request/response exchange over the current session: park a
    /// pending entry, write the frame, await the reader's completion.
    async fn exchange<F>(&self, build: F) -> Result<Value>
    where
        F: FnOnce(u64) -> Result<Message>,
    {
        let id = self.next_id();
        let msg = build(id)?;
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id, tx);

        let write_result = {
            let mut guard = self.inner.session.lock().await;
            match guard.as_mut() {
                Some(session) => write_message(&mut session.writer, &msg).await,
                None => Err(RpcError::Transport("registry session missing".into())),
            }
        };
        if let Err(e) = write_result {
            self.inner.pending.lock().unwrap().remove(&id);
            return Err(e);
        }

        let timeout = self.inner.options.call_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                self.inner.pending.lock().unwrap().remove(&id);
                Err(RpcError::Timeout(timeout.as_millis() as u64))
            }
            Ok(Err(_)) => Err(RpcError::Transport(
                "registry session closed while awaiting response".into(),
            )),
            Ok(Ok(result)) => result,
        }
    }

    /// Re-registers every cached service in order, best-effort.
    async fn replay_registrations(&self) {
        let services = self.inner.registered.lock().unwrap().clone();
        if services.is_empty() {
            return;
        }
        tracing::info!(count = services.len(), "re-registering services after reconnect");
        for info in services {
            match self.exchange(|id| Message::register(id, &info)).await {
                Ok(_) => tracing::info!(service = %info.service_name, "service re-registered"),
                Err(e) => {
                    tracing::error!(service = %info.service_name, "re-register failed: {e}")
                }
            }
        }
    }

    async fn heartbeat_tick(&self, refresh_registrations: bool) {
        let needs_reconnect = {
            let guard = self.inner.session.lock().await;
            !matches!(guard.as_ref(), Some(session) if session.is_active())
        };

        if needs_reconnect {
            tracing::warn!("registry session is down, reconnecting");
            match self.ensure_session().await {
                Ok(true) => self.replay_registrations().await,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!("reconnect to registry failed: {e}");
                    return;
                }
            }
        } else if refresh_registrations {
            self.replay_registrations().await;
        }

        if let Err(e) = self.send_heartbeat().await {
            tracing::warn!("heartbeat send failed: {e}");
        }
    }
}

fn spawn_reader(
    mut reader: OwnedReadHalf,
    pending: PendingMap,
    active: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match read_message(&mut reader).await {
                Ok(Some(msg)) => match msg.kind() {
                    Some(MessageType::RegistryResponse) => {
                        let sender = pending.lock().unwrap().remove(&msg.request_id);
                        match sender {
                            Some(tx) => {
                                let result = if msg.is_ok() {
                                    Ok(msg.data)
                                } else {
                                    Err(RpcError::Remote(msg.data_as_text()))
                                };
                                let _ = tx.send(result);
                            }
                            None => tracing::warn!(
                                request_id = msg.request_id,
                                "registry response for unknown request id"
                            ),
                        }
                    }
                    Some(MessageType::HeartbeatResponse) => {
                        tracing::debug!("heartbeat acknowledged");
                    }
                    _ => tracing::warn!(
                        message_type = msg.message_type,
                        "unexpected message from registry, discarding"
                    ),
                },
                Ok(None) => {
                    tracing::info!("registry closed the session");
                    break;
                }
                Err(e) => {
                    tracing::warn!("registry session read error: {e}");
                    break;
                }
            }
        }
        active.store(false, Ordering::SeqCst);
        fail_all_pending(&pending, "registry connection closed");
    })
}

fn fail_all_pending(pending: &PendingMap, reason: &str) {
    let drained: Vec<_> = pending.lock().unwrap().drain().collect();
    for (id, tx) in drained {
        tracing::debug!(request_id = id, "failing pending registry call: {reason}");
        let _ = tx.send(Err(RpcError::Transport(reason.to_string())));
    }
}

fn spawn_heartbeat_loop(inner: Weak<Inner>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick: u32 = 0;
        loop {
            let (interval, refresh_every) = match inner.upgrade() {
                Some(strong) => (
                    strong.options.heartbeat_interval,
                    strong.options.registration_refresh_ticks.max(1),
                ),
                None => break,
            };
            tokio::time::sleep(interval).await;

            let Some(strong) = inner.upgrade() else { break };
            if strong.closed.load(Ordering::SeqCst) {
                break;
            }
            tick = tick.wrapping_add(1);
            let client = RegistryClient { inner: strong };
            client.heartbeat_tick(tick % refresh_every == 0).await;
        }
    })
}
