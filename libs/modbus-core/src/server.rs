//! Concurrent Modbus slave over TCP
//!
//! One task per accepted connection, all sharing a single
//! `Arc<ModbusData>`. Each connection is strictly sequential:
//! read frame, dispatch, write response, read the next frame.
//!
//! # Shutdown
//!
//! [`ModbusServer::stop`] cancels a shared token that the accept loop and
//! every connection loop select on, then waits on a task tracker until all
//! of them have exited. Nothing touches the data store after `stop` returns.
//!
//! ```ignore
//! let data = Arc::new(ModbusData::new(DataSizes::uniform(100)));
//! let mut server = ModbusServer::new(ServerConfig::default(), data);
//! let addr = server.start().await?;
//! // ...
//! server.stop().await;
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::constants::{DEFAULT_PORT, DEFAULT_READ_TIMEOUT, DEFAULT_WRITE_TIMEOUT, MAX_FRAME_SIZE};
use crate::data::ModbusData;
use crate::error::{ModbusError, ModbusResult};
use crate::handlers::{dispatch, DispatchError};
use crate::packet::Direction;
use crate::protocol::ProtocolVariant;
use crate::transport::{read_frame, write_frame};

/// Listener and per-connection settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host (name or IP)
    pub host: String,
    /// Bind port, 0 picks an ephemeral port
    pub port: u16,
    /// Framing used by every connection
    pub protocol: ProtocolVariant,
    /// Silence after which a partial frame is discarded
    pub read_timeout: Duration,
    /// Upper bound for writing one response
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            protocol: ProtocolVariant::RtuOverTcp,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

/// Lock-free counters updated by the connection tasks
#[derive(Debug, Default)]
pub struct ServerStats {
    total_connections: AtomicU64,
    connected_clients: AtomicU64,
    total_requests: AtomicU64,
    successful_responses: AtomicU64,
    error_responses: AtomicU64,
    discarded_frames: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStatsSnapshot {
    pub total_connections: u64,
    pub connected_clients: u64,
    pub total_requests: u64,
    pub successful_responses: u64,
    pub error_responses: u64,
    pub discarded_frames: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl ServerStats {
    pub fn snapshot(&self) -> ServerStatsSnapshot {
        ServerStatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            connected_clients: self.connected_clients.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_responses: self.successful_responses.load(Ordering::Relaxed),
            error_responses: self.error_responses.load(Ordering::Relaxed),
            discarded_frames: self.discarded_frames.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }

    fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.connected_clients.fetch_add(1, Ordering::Relaxed);
    }

    fn connection_closed(&self) {
        self.connected_clients.fetch_sub(1, Ordering::Relaxed);
    }

    fn request_received(&self, bytes: usize) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn response_sent(&self, bytes: usize, success: bool) {
        let counter = if success {
            &self.successful_responses
        } else {
            &self.error_responses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn frame_discarded(&self) {
        self.discarded_frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared by the accept loop and every connection task
struct ConnectionContext {
    variant: ProtocolVariant,
    data: Arc<ModbusData>,
    stats: Arc<ServerStats>,
    read_timeout: Duration,
    write_timeout: Duration,
    shutdown: CancellationToken,
}

/// Modbus TCP server exposing a [`ModbusData`] store
pub struct ModbusServer {
    config: ServerConfig,
    data: Arc<ModbusData>,
    stats: Arc<ServerStats>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    local_addr: Option<SocketAddr>,
}

impl ModbusServer {
    pub fn new(config: ServerConfig, data: Arc<ModbusData>) -> Self {
        Self {
            config,
            data,
            stats: Arc::new(ServerStats::default()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            local_addr: None,
        }
    }

    /// Bind the listener and spawn the accept loop
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(&mut self) -> ModbusResult<SocketAddr> {
        if let Some(addr) = self.local_addr {
            return Ok(addr);
        }
        if self.shutdown.is_cancelled() {
            return Err(ModbusError::Stopped);
        }
        let variant = self.config.protocol.ensure_known()?;

        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;
        info!("Modbus server listening on {} ({})", addr, variant);

        let ctx = Arc::new(ConnectionContext {
            variant,
            data: Arc::clone(&self.data),
            stats: Arc::clone(&self.stats),
            read_timeout: self.config.read_timeout,
            write_timeout: self.config.write_timeout,
            shutdown: self.shutdown.clone(),
        });
        self.tracker
            .spawn(accept_loop(listener, ctx, self.tracker.clone()));

        self.local_addr = Some(addr);
        Ok(addr)
    }

    /// Stop accepting, close every connection and wait for all tasks to exit
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        if let Some(addr) = self.local_addr.take() {
            info!("Modbus server on {} stopped", addr);
        }
    }

    pub fn is_running(&self) -> bool {
        self.local_addr.is_some() && !self.shutdown.is_cancelled()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn data(&self) -> Arc<ModbusData> {
        Arc::clone(&self.data)
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for ModbusServer {
    /// Tasks still running are told to exit; `stop` is the only way to wait for them
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ConnectionContext>, tracker: TaskTracker) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => {
                debug!("Accept loop stopped");
                break;
            },
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    ctx.stats.connection_opened();
                    info!("Client connected: {}", peer);

                    let ctx = Arc::clone(&ctx);
                    tracker.spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, &ctx).await {
                            error!("Connection {}: {}", peer, e);
                        }
                        ctx.stats.connection_closed();
                        info!("Client disconnected: {}", peer);
                    });
                },
                Err(e) => {
                    // Typically fd exhaustion; back off instead of spinning
                    error!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                },
            },
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &ConnectionContext,
) -> ModbusResult<()> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("{}: TCP_NODELAY: {}", peer, e);
    }
    let mut buf = BytesMut::with_capacity(MAX_FRAME_SIZE * 2);

    loop {
        let read = tokio::select! {
            _ = ctx.shutdown.cancelled() => return Ok(()),
            read = timeout(
                ctx.read_timeout,
                read_frame(&mut stream, ctx.variant, Direction::Request, &mut buf),
            ) => read,
        };

        let request = match read {
            Err(_) => {
                if !buf.is_empty() {
                    warn!(
                        "Src->{}: partial frame of {} bytes discarded after {:?} silence",
                        peer,
                        buf.len(),
                        ctx.read_timeout
                    );
                    buf.clear();
                    ctx.stats.frame_discarded();
                }
                continue;
            },
            Ok(Ok(packet)) => packet,
            Ok(Err(ModbusError::ConnectionClosed)) => {
                if !buf.is_empty() {
                    debug!("Src->{}: {} bytes pending at close", peer, buf.len());
                }
                return Ok(());
            },
            Ok(Err(e)) if e.is_connection_fatal() => return Err(e),
            Ok(Err(e)) => {
                warn!("Src->{}: frame discarded: {}", peer, e);
                ctx.stats.frame_discarded();
                continue;
            },
        };

        ctx.stats.request_received(request.len());
        debug!("Src->{}: {:?}", peer, request);

        let (response, success) = match dispatch(&request, &ctx.data) {
            Ok(response) => (response, true),
            Err(DispatchError {
                cause,
                reply: Some(reply),
            }) => {
                warn!("Src->{}: {}", peer, cause);
                (*reply, false)
            },
            Err(DispatchError { cause, reply: None }) => {
                warn!("Src->{}: request dropped: {}", peer, cause);
                ctx.stats.frame_discarded();
                continue;
            },
        };

        debug!("Dst<-{}: {:?}", peer, response);
        timeout(ctx.write_timeout, write_frame(&mut stream, &response))
            .await
            .map_err(|_| ModbusError::Timeout(format!("writing response to {}", peer)))??;
        ctx.stats.response_sent(response.len(), success);
    }
}
