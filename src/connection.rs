//! Connection: owns one socket, drives the reader, writer and timeout-sweep
//! tasks, and hosts the operation tables for everything in flight on it.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::channel::WeakChannel;
use crate::clock::Instant;
use crate::debug;
use crate::error::Error;
use crate::frame::FrameError;
use crate::handler::RequestHandler;
use crate::message;
use crate::operation::{OperationTable, Retain};
use crate::options::{Options, DEFAULT_OUTGOING_REQ_TIMEOUT};
use crate::protocol::{self, CallId, InitPayload, ProtocolError, WireMessage};

/// The advertised address a dial-only peer uses in the init handshake: "do
/// not store me under any name" in the peer registry.
pub const EPHEMERAL_HOST_PORT: &str = "0.0.0.0:0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A fully connected peer endpoint. Cheap to clone (an `Arc` underneath);
/// clones refer to the same underlying socket and operation tables.
pub type Connection = Arc<ConnectionInner>;

/// An inbound call, handed to a [`RequestHandler`].
pub struct IncomingRequest {
    pub id: CallId,
    pub arg1: Vec<u8>,
    pub arg2: Vec<u8>,
    pub arg3: Vec<u8>,
    /// The sending peer's advertised `host:port` from its init handshake,
    /// not the literal socket peer address.
    pub remote_addr: String,
    pub ttl: Option<Duration>,
}

/// The result of an outbound call.
#[derive(Debug, Clone)]
pub struct IncomingResponse {
    pub ok: bool,
    pub arg2: Vec<u8>,
    pub arg3: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct CallOptions {
    pub arg1: Vec<u8>,
    pub arg2: Vec<u8>,
    pub arg3: Vec<u8>,
    pub timeout: Option<Duration>,
}

/// A linear capability for answering one inbound call. `send_ok`/
/// `send_not_ok` consume it by value, so a second reply to the same call is
/// a compile error rather than a runtime "already responded" check.
pub struct ResponseBuilder {
    id: CallId,
    epoch: u64,
    conn: Connection,
}

impl ResponseBuilder {
    pub async fn send_ok(self, arg2: Vec<u8>, arg3: Vec<u8>) -> Result<(), Error> {
        self.finish(true, arg2, arg3).await
    }

    pub async fn send_not_ok(self, arg2: Vec<u8>, arg3: Vec<u8>) -> Result<(), Error> {
        self.finish(false, arg2, arg3).await
    }

    async fn finish(self, ok: bool, arg2: Vec<u8>, arg3: Vec<u8>) -> Result<(), Error> {
        let result = self.conn.send_frame(&WireMessage::CallResponse {
            id: self.id,
            ok,
            arg2,
            arg3,
        });
        let retired = self
            .conn
            .inbound
            .remove_if(self.id, |entry| entry.epoch == self.epoch);
        if retired.is_none() {
            tracing::debug!(id = self.id, "response finish after reset; dropping");
        }
        result
    }
}

struct OutboundEntry {
    start: Instant,
    ttl: Duration,
    timed_out: bool,
    /// Consumed exactly once: by response/error dispatch, or by the sweep's
    /// first observed timeout. Left `None` afterwards so a late response
    /// for an id the sweep already flagged is recognized (found by `pop`)
    /// but has nothing left to notify. A timed-out entry lingers one more
    /// sweep pass before being dropped, so a response racing the timeout
    /// is still distinguishable from one for a truly unknown id.
    notify: Option<oneshot::Sender<Result<IncomingResponse, Error>>>,
}

struct InboundEntry {
    start: Instant,
    /// Bumped each time a [`ResponseBuilder`] is handed out for this id;
    /// compared in `ResponseBuilder::finish` so a `reset_all` that already
    /// cleared the table can't be raced by a late `finish`.
    epoch: u64,
}

pub struct ConnectionInner {
    pub direction: Direction,
    pub remote_addr: SocketAddr,
    remote_name: Mutex<Option<String>>,
    identified: AtomicBool,
    closing: AtomicBool,
    outbound: OperationTable<OutboundEntry>,
    inbound: OperationTable<InboundEntry>,
    inbound_epoch: AtomicU64,
    last_timeout_time: Mutex<Option<Instant>>,
    next_call_id: AtomicU32,
    writer_tx: mpsc::UnboundedSender<Vec<u8>>,
    options: Options,
    channel: WeakChannel,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_host_port: String,
}

impl fmt::Debug for ConnectionInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("direction", &self.direction)
            .field("remote_addr", &self.remote_addr)
            .field("remote_name", &self.remote_name.lock().unwrap())
            .field("closing", &self.closing.load(Ordering::SeqCst))
            .finish()
    }
}

impl ConnectionInner {
    /// Constructs a connection over an already-connected socket and starts
    /// its reader, writer and sweep tasks. Fails immediately if `remote_addr`
    /// is this channel's own advertised address.
    pub(crate) fn new(
        channel: WeakChannel,
        stream: TcpStream,
        direction: Direction,
        remote_addr: SocketAddr,
        local_host_port: String,
        options: Options,
    ) -> Result<Connection, Error> {
        if let Some(ch) = channel.upgrade() {
            if let Some(own) = ch.local_host_port() {
                if own == remote_addr.to_string() {
                    return Err(Error::SelfPeer { addr: remote_addr });
                }
            }
        }

        stream.set_nodelay(true).ok();
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let conn = Arc::new(ConnectionInner {
            direction,
            remote_addr,
            remote_name: Mutex::new(None),
            identified: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            outbound: OperationTable::new(),
            inbound: OperationTable::new(),
            inbound_epoch: AtomicU64::new(0),
            last_timeout_time: Mutex::new(None),
            next_call_id: AtomicU32::new(0),
            writer_tx,
            options,
            channel,
            tasks: Mutex::new(Vec::new()),
            local_host_port,
        });

        let reader_handle = tokio::spawn(run_reader(conn.clone(), read_half));
        let writer_handle = tokio::spawn(run_writer(conn.clone(), write_half, writer_rx));
        let sweep_handle = tokio::spawn(run_sweep(conn.clone()));
        *conn.tasks.lock().unwrap() = vec![reader_handle, writer_handle, sweep_handle];

        if direction == Direction::Outbound {
            conn.send_frame(&WireMessage::InitRequest(InitPayload {
                host_port: conn.local_host_port.clone(),
                process_name: conn.options.process_name.clone(),
            }))?;
        }

        Ok(conn)
    }

    fn send_frame(&self, msg: &WireMessage) -> Result<(), Error> {
        let bytes = protocol::encode(msg);
        self.writer_tx.send(bytes).map_err(|_| Error::Closing)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn remote_name(&self) -> Option<String> {
        self.remote_name.lock().unwrap().clone()
    }

    pub fn out_pending(&self) -> usize {
        self.outbound.len()
    }

    pub fn in_pending(&self) -> usize {
        self.inbound.len()
    }

    fn allocate_call_id(&self) -> Result<CallId, Error> {
        let max_tries = self.options.max_outstanding_outbound.max(1);
        for _ in 0..max_tries {
            let id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
            if !self.outbound.contains(id) {
                return Ok(id);
            }
        }
        Err(Error::TooManyOutstanding)
    }

    /// Enrolls and sends an outbound call, returning its eventual response.
    pub async fn request(
        self: &Arc<Self>,
        opts: CallOptions,
    ) -> Result<IncomingResponse, Error> {
        if self.is_closing() {
            return Err(Error::Closing);
        }
        let ttl = opts.timeout.unwrap_or(DEFAULT_OUTGOING_REQ_TIMEOUT);
        let id = self.allocate_call_id()?;
        let (tx, rx) = oneshot::channel();
        let entry = OutboundEntry {
            start: self.options.clock.now(),
            ttl,
            timed_out: false,
            notify: Some(tx),
        };
        if self.outbound.enroll(id, entry).is_err() {
            return Err(Error::Closing);
        }

        if let Err(e) = self.send_frame(&WireMessage::CallRequest {
            id,
            ttl_millis: ttl.as_millis() as u64,
            arg1: opts.arg1,
            arg2: opts.arg2,
            arg3: opts.arg3,
        }) {
            self.outbound.pop(id);
            return Err(e);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::Closing),
        }
    }

    fn dispatch(self: &Arc<Self>, msg: WireMessage) -> Result<(), ProtocolError> {
        match msg {
            WireMessage::InitRequest(payload) => {
                if self.direction != Direction::Inbound || self.identified.load(Ordering::SeqCst) {
                    return Err(ProtocolError::DuplicateInit);
                }
                let _ = self.send_frame(&WireMessage::InitResponse(InitPayload {
                    host_port: self.local_host_port.clone(),
                    process_name: self.options.process_name.clone(),
                }));
                self.complete_identification(payload);
                if let Some(ch) = self.channel.upgrade() {
                    let name = self.remote_name().unwrap_or_default();
                    if name != EPHEMERAL_HOST_PORT {
                        let _ = ch.insert_peer(&name, self.clone());
                    }
                }
            }
            WireMessage::InitResponse(payload) => {
                if self.direction != Direction::Outbound || self.identified.load(Ordering::SeqCst) {
                    return Err(ProtocolError::DuplicateInit);
                }
                self.complete_identification(payload);
            }
            WireMessage::CallRequest {
                id,
                ttl_millis,
                arg1,
                arg2,
                arg3,
            } => {
                if !self.identified.load(Ordering::SeqCst) {
                    return Err(ProtocolError::CallBeforeInit);
                }
                self.handle_call_request(id, ttl_millis, arg1, arg2, arg3);
            }
            WireMessage::CallResponse { id, ok, arg2, arg3 } => {
                if !self.identified.load(Ordering::SeqCst) {
                    return Err(ProtocolError::CallBeforeInit);
                }
                match self.outbound.pop(id) {
                    Some(mut entry) => {
                        if let Some(tx) = entry.notify.take() {
                            let _ = tx.send(Ok(IncomingResponse { ok, arg2, arg3 }));
                        }
                    }
                    None => tracing::debug!(id, "response for unknown or timed-out call; dropping"),
                }
            }
            WireMessage::CallError { original_id, message } => {
                if !self.identified.load(Ordering::SeqCst) {
                    return Err(ProtocolError::CallBeforeInit);
                }
                match self.outbound.pop(original_id) {
                    Some(mut entry) => {
                        if let Some(tx) = entry.notify.take() {
                            let _ = tx.send(Err(Error::Remote(message)));
                        }
                    }
                    None => tracing::debug!(
                        id = original_id,
                        "call-error for unknown or timed-out call; dropping"
                    ),
                }
            }
        }
        Ok(())
    }

    fn complete_identification(&self, payload: InitPayload) {
        *self.remote_name.lock().unwrap() = Some(payload.host_port.clone());
        self.identified.store(true, Ordering::SeqCst);
        tracing::debug!(remote = %payload.host_port, process = %payload.process_name, "identified");
    }

    fn handle_call_request(
        self: &Arc<Self>,
        id: CallId,
        ttl_millis: u64,
        arg1: Vec<u8>,
        arg2: Vec<u8>,
        arg3: Vec<u8>,
    ) {
        let remote_addr = self.remote_name().unwrap_or_else(|| self.remote_addr.to_string());
        let epoch = self.inbound_epoch.fetch_add(1, Ordering::Relaxed);
        if self
            .inbound
            .enroll(
                id,
                InboundEntry {
                    start: self.options.clock.now(),
                    epoch,
                },
            )
            .is_err()
        {
            tracing::warn!(id, "duplicate inbound call id; dropping");
            return;
        }

        let req = IncomingRequest {
            id,
            arg1,
            arg2,
            arg3,
            remote_addr,
            ttl: if ttl_millis == 0 {
                None
            } else {
                Some(Duration::from_millis(ttl_millis))
            },
        };
        let builder = ResponseBuilder {
            id,
            epoch,
            conn: self.clone(),
        };
        let handler = self.options.handler.clone();
        // Deferred via tokio::spawn so a slow or misbehaving handler can
        // never block the reader loop that decoded this frame.
        tokio::spawn(async move {
            handler.handle_request(req, builder).await;
        });
    }

    /// Abandons every in-flight operation and marks the connection as
    /// closing. Does not tear down the socket; callers destroy it
    /// separately.
    pub(crate) fn reset_all(self: &Arc<Self>, err: Error) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(remote = %self.remote_addr, error = %err, "connection reset");

        // Inbound entries are retired silently; any ResponseBuilder still in
        // flight will find its epoch gone at finish time and log a mismatch
        // instead of double-retiring.
        let _ = self.inbound.clear();

        for (_, mut entry) in self.outbound.clear() {
            if let Some(tx) = entry.notify.take() {
                let _ = tx.send(Err(err.clone()));
            }
        }

        if let Some(ch) = self.channel.upgrade() {
            if let Some(name) = self.remote_name() {
                if name == EPHEMERAL_HOST_PORT {
                    ch.remove_peer(&name, self);
                }
            }
        }
        tracing::debug!(remote = %self.remote_addr, "socket close");
    }

    /// Aborts the reader/writer/sweep tasks, unblocking any pending socket
    /// I/O. Idempotent. Does not wait for the aborted tasks to actually
    /// stop running; callers that must observe the socket as fully closed
    /// (e.g. `Channel::close`) should use [`ConnectionInner::destroy_and_wait`]
    /// instead. Used by the reader/writer/sweep tasks themselves, which
    /// cannot await their own `JoinHandle` without deadlocking.
    pub(crate) fn destroy(&self) {
        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
    }

    /// Aborts the reader/writer/sweep tasks and waits for all three to
    /// actually finish, so the caller only observes completion once the
    /// socket has reported close. Must not be called from within one of
    /// this connection's own tasks.
    pub(crate) async fn destroy_and_wait(&self) {
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn note_progress(&self) {
        // Any successfully read frame is proof of life; clear a pending
        // dead-link suspicion so the sweep doesn't kill a connection that's
        // merely slow to respond to a specific call.
        *self.last_timeout_time.lock().unwrap() = None;
    }
}

async fn run_reader(conn: Connection, mut read_half: ReadHalf<TcpStream>) {
    loop {
        match message::read_message(&mut read_half).await {
            Ok(Some(payload)) => {
                debug::tee_in(conn.remote_addr, &payload);
                conn.note_progress();
                let outcome = protocol::decode(&payload).and_then(|msg| conn.dispatch(msg));
                if let Err(reason) = outcome {
                    let err = Error::ReadFailed {
                        remote: conn.remote_addr.to_string(),
                        local: conn.local_host_port.clone(),
                        reason: reason.to_string(),
                    };
                    conn.reset_all(err);
                    conn.destroy();
                    return;
                }
            }
            Ok(None) => {
                if !conn.is_closing() {
                    conn.reset_all(Error::Shutdown);
                }
                conn.destroy();
                return;
            }
            Err(FrameError::TooLarge(_)) => unreachable!("read_frame never returns TooLarge"),
            Err(FrameError::Io(e)) => {
                let err = Error::ReadFailed {
                    remote: conn.remote_addr.to_string(),
                    local: conn.local_host_port.clone(),
                    reason: e.to_string(),
                };
                conn.reset_all(err);
                conn.destroy();
                return;
            }
        }
    }
}

async fn run_writer(
    conn: Connection,
    mut write_half: WriteHalf<TcpStream>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(payload) = rx.recv().await {
        debug::tee_out(conn.remote_addr, &payload);
        if let Err(e) = message::write_message(&mut write_half, &payload).await {
            let err = Error::ReadFailed {
                remote: conn.remote_addr.to_string(),
                local: conn.local_host_port.clone(),
                reason: e.to_string(),
            };
            conn.reset_all(err);
            conn.destroy();
            return;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn run_sweep(conn: Connection) {
    loop {
        let base = conn.options.timeout_check_interval.as_millis() as i64;
        let fuzz = conn
            .options
            .random
            .fuzz_millis(conn.options.timeout_fuzz.as_millis() as u64);
        let wait_ms = (base + fuzz).max(0) as u64;
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;

        if conn.is_closing() {
            return;
        }

        let had_prior_timeout = conn.last_timeout_time.lock().unwrap().is_some();
        if had_prior_timeout {
            tracing::warn!(
                remote = %conn.remote_addr,
                "no progress since last timeout; declaring connection dead"
            );
            conn.reset_all(Error::TimedOut);
            conn.destroy();
            return;
        }

        let now = conn.options.clock.now();
        let mut saw_new_timeout = false;
        let _lingering = conn.outbound.retain_mut(|id, entry| {
            if entry.timed_out {
                tracing::debug!(id, "dropping lingering timed-out outbound entry");
                Retain::Remove
            } else if now.saturating_duration_since(entry.start) > entry.ttl {
                entry.timed_out = true;
                if let Some(tx) = entry.notify.take() {
                    let _ = tx.send(Err(Error::TimedOut));
                }
                saw_new_timeout = true;
                Retain::Keep
            } else {
                Retain::Keep
            }
        });
        if saw_new_timeout {
            *conn.last_timeout_time.lock().unwrap() = Some(now);
        }

        let server_timeout = conn.options.server_timeout_default;
        let _ = conn.inbound.retain_mut(|_id, entry| {
            if now.saturating_duration_since(entry.start) > server_timeout {
                Retain::Remove
            } else {
                Retain::Keep
            }
        });
    }
}
