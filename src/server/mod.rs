//! The central loop. Every socket and pty is served by a small task that
//! reports back over a channel; all session and connection state lives here
//! and is only touched between waits.

mod connection;

pub use connection::{ConnectionEvent, ConnectionId, Phase};

use crate::config::Config;
use crate::error::{ApiError, ErrorCode, PtyError, PtyResult};
use crate::http::{self, PollRequest, Reply, Request};
use crate::render;
use crate::screen::Geometry;
use crate::session::{PtyBackend, Resolved, SessionId, SessionRegistry, Spawner};
use axum::http::StatusCode;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const PTY_EVENT_BACKLOG: usize = 64;
const PTY_READ_CHUNK: usize = 4096;

pub enum PtyEvent {
    Output { id: SessionId, bytes: Vec<u8> },
    Written { id: SessionId, result: PtyResult<usize> },
    Closed { id: SessionId, reason: Option<PtyError> },
}

struct ConnectionState {
    peer: SocketAddr,
    phase: Phase,
    opened_at: Instant,
}

pub struct EventLoop {
    listener: TcpListener,
    config: Config,
    registry: SessionRegistry,
    connections: HashMap<ConnectionId, ConnectionState>,
    next_connection: u64,
    connection_tx: mpsc::UnboundedSender<ConnectionEvent>,
    connection_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    pty_tx: mpsc::Sender<PtyEvent>,
    pty_rx: mpsc::Receiver<PtyEvent>,
}

impl EventLoop {
    pub async fn bind(config: Config, spawner: Arc<dyn Spawner>) -> PtyResult<Self> {
        let listener = TcpListener::bind(&config.server.listen)
            .await
            .map_err(|err| {
                ApiError::new(ErrorCode::IoError, "Failed to bind listener")
                    .with_details(format!("{}: {err}", config.server.listen))
            })?;
        Ok(Self::from_listener(listener, config, spawner))
    }

    pub fn from_listener(listener: TcpListener, config: Config, spawner: Arc<dyn Spawner>) -> Self {
        let (connection_tx, connection_rx) = mpsc::unbounded_channel();
        let (pty_tx, pty_rx) = mpsc::channel(PTY_EVENT_BACKLOG);
        Self {
            listener,
            registry: SessionRegistry::new(config.session.clone(), spawner),
            config,
            connections: HashMap::new(),
            next_connection: 1,
            connection_tx,
            connection_rx,
            pty_tx,
            pty_rx,
        }
    }

    pub fn local_addr(&self) -> PtyResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(mut self) -> PtyResult<()> {
        tracing::info!(
            version = crate::version::VERSION,
            listen = %self.config.server.listen,
            command = %self.config.session.command,
            root = %self.config.files.root.display(),
            "Listening"
        );
        loop {
            self.turn().await;
        }
    }

    /// One iteration: start pending keyboard writes, handle the first ready
    /// source, then drop whatever finished.
    pub async fn turn(&mut self) {
        self.dispatch_keyboards();

        let timeout = Duration::from_millis(self.config.server.poll_timeout_ms);
        tokio::select! {
            biased;
            accepted = self.listener.accept() => self.on_accept(accepted),
            Some(event) = self.connection_rx.recv() => self.on_connection_event(event),
            Some(event) = self.pty_rx.recv() => self.on_pty_event(event),
            _ = tokio::time::sleep(timeout) => self.idle(),
        }

        self.sweep();
    }

    fn dispatch_keyboards(&mut self) {
        for session in self.registry.sessions_mut() {
            let Some((backend, keys)) = session.begin_write() else {
                continue;
            };
            let id = session.id;
            let events = self.pty_tx.clone();
            tokio::spawn(async move {
                let result = backend.write(&keys).await;
                let _ = events.send(PtyEvent::Written { id, result }).await;
            });
        }
    }

    fn on_accept(&mut self, accepted: io::Result<(TcpStream, SocketAddr)>) {
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "Accept failed");
                return;
            }
        };
        let id = ConnectionId(self.next_connection);
        self.next_connection += 1;
        tracing::debug!(connection = %id, peer = %peer, "Connection accepted");

        self.connections.insert(
            id,
            ConnectionState {
                peer,
                phase: Phase::Receiving,
                opened_at: Instant::now(),
            },
        );
        let limits = connection::Limits {
            max_request_bytes: self.config.server.max_request_bytes,
            request_timeout: Duration::from_millis(self.config.server.request_timeout_ms),
        };
        tokio::spawn(connection::serve(
            id,
            stream,
            peer,
            limits,
            self.connection_tx.clone(),
        ));
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Request { id, request, reply } => {
                if let Some(state) = self.connections.get_mut(&id) {
                    state.phase = Phase::Sending;
                }
                tracing::debug!(connection = %id, request = ?request, "Request");
                let response = self.respond(request);
                tracing::debug!(
                    connection = %id,
                    status = response.status().as_u16(),
                    "Response"
                );
                let _ = reply.send(response);
            }
            ConnectionEvent::Closed { id, error } => {
                let Some(state) = self.connections.get_mut(&id) else {
                    return;
                };
                state.phase = Phase::Closed;
                match error {
                    Some(err) => tracing::debug!(
                        connection = %id,
                        peer = %state.peer,
                        error = %err,
                        "Connection failed"
                    ),
                    None => tracing::trace!(
                        connection = %id,
                        elapsed_ms = state.opened_at.elapsed().as_millis() as u64,
                        "Connection closed"
                    ),
                }
            }
        }
    }

    fn respond(&mut self, request: Request) -> Reply {
        match request {
            Request::Poll(poll) => self.poll(poll),
            Request::File(resource) => match http::resolve_static(&resource, &self.config.files) {
                Ok(path) => Reply::File { path, resource },
                Err(err) => {
                    tracing::debug!(resource = %resource, error = %err, "Static path refused");
                    Reply::resource_error(StatusCode::FORBIDDEN, &resource, "invalid pathname")
                }
            },
            Request::Invalid(reason) => Reply::text(StatusCode::BAD_REQUEST, &reason),
        }
    }

    fn poll(&mut self, poll: PollRequest) -> Reply {
        let geometry = Geometry::requested(poll.rows, poll.cols);
        match self.registry.resolve_or_create(&poll.session, geometry) {
            Ok(Resolved { session, created }) => {
                if created {
                    spawn_output_pump(session.id, session.backend(), self.pty_tx.clone());
                }
                if !poll.keys.is_empty() {
                    session.feed_keystrokes(&poll.keys);
                }
                Reply::Frame(render::render(session).into_body())
            }
            Err(err) if err.code() == ErrorCode::SpawnFailed => {
                tracing::warn!(session = %poll.session, error = %err, "Failed to start session");
                Reply::text(StatusCode::BAD_REQUEST, "fork failed")
            }
            Err(err) => {
                tracing::warn!(session = %poll.session, error = %err, "Poll refused");
                Reply::text(StatusCode::BAD_REQUEST, &err.to_string())
            }
        }
    }

    fn on_pty_event(&mut self, event: PtyEvent) {
        match event {
            PtyEvent::Output { id, bytes } => {
                if let Some(session) = self.registry.get_mut(id)
                    && session.is_alive()
                {
                    session.consume_output(&bytes);
                }
            }
            PtyEvent::Written { id, result } => {
                let Some(session) = self.registry.get_mut(id) else {
                    return;
                };
                match result {
                    Ok(written) if written > 0 => session.complete_write(written),
                    Ok(_) => {
                        session.complete_write(0);
                        tracing::info!(session = %session.name, "Session pty accepted no input");
                        self.registry.mark_dead(id);
                    }
                    Err(err) => {
                        session.complete_write(0);
                        tracing::info!(session = %session.name, error = %err, "Session pty write failed");
                        self.registry.mark_dead(id);
                    }
                }
            }
            PtyEvent::Closed { id, reason } => {
                if self.registry.mark_dead(id) {
                    match reason {
                        Some(err) => {
                            tracing::info!(id = %id, error = %err, "Session pty read failed")
                        }
                        None => tracing::info!(id = %id, "Session process exited"),
                    }
                }
            }
        }
    }

    fn sweep(&mut self) {
        self.connections
            .retain(|_, state| state.phase != Phase::Closed);

        for session in self.registry.sweep_dead() {
            let id = session.id;
            let (created_at, bytes_in, bytes_out, dropped_keys) = session.metrics();
            tracing::info!(
                session = %session.name,
                id = %id,
                uptime_secs = created_at.elapsed().as_secs(),
                bytes_in,
                bytes_out,
                dropped_keys,
                "Session removed"
            );
            let backend = session.backend();
            tokio::spawn(async move {
                if let Err(err) = backend.close().await {
                    tracing::warn!(id = %id, error = %err, "Failed to close session process");
                }
            });
        }
    }

    fn idle(&self) {
        tracing::trace!(
            sessions = self.registry.len(),
            connections = self.connections.len(),
            "Idle"
        );
    }
}

/// Forwards everything the child writes to the loop until the pty reports
/// end of stream or an error.
fn spawn_output_pump(id: SessionId, backend: Arc<dyn PtyBackend>, events: mpsc::Sender<PtyEvent>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; PTY_READ_CHUNK];
        let reason = loop {
            match backend.read(&mut buf).await {
                Ok(0) => break None,
                Ok(n) => {
                    let bytes = buf[..n].to_vec();
                    if events.send(PtyEvent::Output { id, bytes }).await.is_err() {
                        return;
                    }
                }
                Err(err) => break Some(err),
            }
        };
        let _ = events.send(PtyEvent::Closed { id, reason }).await;
    });
}
