//! The `Channel`: a listening and/or dialing endpoint that owns a peer
//! registry, a shared handler, and the options every connection it makes
//! inherits.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::connection::{CallOptions, Connection, ConnectionInner, Direction, IncomingResponse};
use crate::error::Error;
use crate::handler::{EndpointRouter, RequestHandler};
use crate::options::Options;
use crate::registry::PeerRegistry;

pub(crate) type WeakChannel = Weak<ChannelInner>;

pub struct ChannelInner {
    options: Mutex<Options>,
    /// The endpoint router installed as the default handler. `register`
    /// succeeds only while `options.handler` still points at this router;
    /// once `set_handler` installs something else, registration is
    /// rejected rather than silently mutating a handler no connection is
    /// using anymore.
    router: Arc<EndpointRouter>,
    registry: Mutex<PeerRegistry>,
    local_host_port: Mutex<Option<String>>,
    listening: AtomicBool,
    destroyed: AtomicBool,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

/// A process-wide endpoint for making and receiving calls. Cheap to clone;
/// clones share the same registry, handler and listening socket.
#[derive(Clone)]
pub struct Channel(Arc<ChannelInner>);

impl Channel {
    pub fn new(mut options: Options) -> Self {
        let router = Arc::new(EndpointRouter::new());
        if Arc::ptr_eq(&options.handler, &*crate::options::DEFAULT_HANDLER) {
            options.handler = router.clone();
        }
        Channel(Arc::new(ChannelInner {
            options: Mutex::new(options),
            router,
            registry: Mutex::new(PeerRegistry::new()),
            local_host_port: Mutex::new(None),
            listening: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            listener_task: Mutex::new(None),
        }))
    }

    fn options(&self) -> Options {
        self.0.options.lock().unwrap().clone()
    }

    /// Binds `host:port` and starts accepting inbound connections in the
    /// background. Returns the actual bound address (useful when `port` is
    /// `0`).
    pub async fn listen(&self, host: &str, port: u16) -> Result<SocketAddr, Error> {
        if host.is_empty() || host == "0.0.0.0" {
            return Err(Error::InvalidListenAddress(host.to_string()));
        }
        if self.0.listening.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyClosed);
        }
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::ListenFailed {
                host: host.to_string(),
                port,
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| Error::ListenFailed {
            host: host.to_string(),
            port,
            reason: e.to_string(),
        })?;
        *self.0.local_host_port.lock().unwrap() = Some(local_addr.to_string());

        let inner = self.0.clone();
        let handle = tokio::spawn(run_listener(inner, listener, local_addr));
        *self.0.listener_task.lock().unwrap() = Some(handle);
        Ok(local_addr)
    }

    /// Advertises `host_port` as this channel's identity without actually
    /// binding a socket (a dial-only client that still wants a stable name
    /// in its peers' registries).
    pub fn set_local_host_port(&self, host_port: impl Into<String>) {
        *self.0.local_host_port.lock().unwrap() = Some(host_port.into());
    }

    pub fn local_host_port(&self) -> Option<String> {
        self.0.local_host_port.lock().unwrap().clone()
    }

    /// Installs the given closure as the handler for `name`, lazily
    /// creating an [`EndpointRouter`] the first time this is called.
    ///
    /// Fails with [`Error::InvalidHandlerForRegistration`] if a custom
    /// `RequestHandler` (not an `EndpointRouter`) was set via
    /// [`Channel::set_handler`].
    pub fn register<F, Fut>(&self, name: impl Into<String>, f: F) -> Result<(), Error>
    where
        F: Fn(crate::connection::IncomingRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = (bool, Vec<u8>, Vec<u8>)> + Send + 'static,
    {
        let options = self.0.options.lock().unwrap();
        let router_as_handler: Arc<dyn RequestHandler> = self.0.router.clone();
        if !Arc::ptr_eq(&options.handler, &router_as_handler) {
            return Err(Error::InvalidHandlerForRegistration);
        }
        drop(options);
        self.0.router.register(name, f);
        Ok(())
    }

    /// Replaces the channel's handler outright. Must be called before any
    /// `register` call if you intend to bypass the endpoint router.
    pub fn set_handler(&self, handler: Arc<dyn RequestHandler>) {
        self.0.options.lock().unwrap().handler = handler;
    }

    /// Makes an outbound call to `host_port`, dialing it first if there is
    /// no live connection yet.
    pub async fn request(
        &self,
        host_port: &str,
        opts: CallOptions,
    ) -> Result<IncomingResponse, Error> {
        let conn = self.get_or_create_outbound(host_port).await?;
        conn.request(opts).await
    }

    async fn get_or_create_outbound(&self, host_port: &str) -> Result<Connection, Error> {
        if host_port == crate::connection::EPHEMERAL_HOST_PORT {
            return Err(Error::EphemeralPeer);
        }
        if let Some(conn) = self.0.registry.lock().unwrap().get(host_port) {
            if !conn.is_closing() {
                return Ok(conn);
            }
        }

        let addr: SocketAddr = host_port
            .parse()
            .map_err(|_| Error::InvalidListenAddress(host_port.to_string()))?;
        if addr.ip().is_unspecified() || addr.port() == 0 {
            return Err(Error::EphemeralPeer);
        }
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::ReadFailed {
                remote: host_port.to_string(),
                local: self.local_host_port().unwrap_or_default(),
                reason: e.to_string(),
            })?;

        let local_host_port = self
            .local_host_port()
            .unwrap_or_else(|| crate::connection::EPHEMERAL_HOST_PORT.to_string());
        let conn = ConnectionInner::new(
            Arc::downgrade(&self.0),
            stream,
            Direction::Outbound,
            addr,
            local_host_port,
            self.options(),
        )?;
        self.0
            .registry
            .lock()
            .unwrap()
            .set(host_port, conn.clone(), self.local_host_port().as_deref())?;
        Ok(conn)
    }

    /// Stops accepting new connections and resets every live one. Returns
    /// only once the listener and every connection's reader/writer/sweep
    /// tasks have actually finished (all `N+1` sockets reported closed).
    pub async fn close(&self) -> Result<(), Error> {
        if self.0.destroyed.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyClosed);
        }
        let listener_handle = self.0.listener_task.lock().unwrap().take();
        if let Some(handle) = &listener_handle {
            handle.abort();
        }
        let peers = self.0.registry.lock().unwrap().all();
        for conn in &peers {
            conn.reset_all(Error::Shutdown);
        }
        for conn in &peers {
            conn.destroy_and_wait().await;
        }
        if let Some(handle) = listener_handle {
            let _ = handle.await;
        }
        Ok(())
    }

    pub fn peer_count(&self) -> usize {
        self.0.registry.lock().unwrap().peer_count()
    }
}

impl ChannelInner {
    pub(crate) fn local_host_port(&self) -> Option<String> {
        self.local_host_port.lock().unwrap().clone()
    }

    pub(crate) fn insert_peer(&self, host_port: &str, conn: Connection) -> Result<(), Error> {
        self.registry
            .lock()
            .unwrap()
            .set(host_port, conn, self.local_host_port().as_deref())
    }

    pub(crate) fn remove_peer(&self, host_port: &str, conn: &Connection) {
        self.registry.lock().unwrap().remove(host_port, conn);
    }
}

async fn run_listener(inner: Arc<ChannelInner>, listener: TcpListener, local_addr: SocketAddr) {
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let options = inner.options.lock().unwrap().clone();
        let weak = Arc::downgrade(&inner);
        match ConnectionInner::new(
            weak,
            stream,
            Direction::Inbound,
            remote_addr,
            local_addr.to_string(),
            options,
        ) {
            Ok(_conn) => {
                // Registered in the peer registry once its init handshake
                // completes; see `ConnectionInner::dispatch`.
            }
            Err(e) => tracing::warn!(error = %e, remote = %remote_addr, "rejected inbound connection"),
        }
    }
}
