mod pty;
mod queue;

use crate::config::SessionConfig;
use crate::error::{ApiError, ErrorCode, PtyResult};
use crate::screen::{Geometry, Screen};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

pub use pty::{NativePty, NativeSpawner};
pub use queue::ByteQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process side of a session: the master end of a pseudo-terminal with a
/// child attached to the slave end.
#[async_trait]
pub trait PtyBackend: Send + Sync {
    /// Waits for output and reads at most `buf.len()` bytes; `Ok(0)` means
    /// the child side is gone.
    async fn read(&self, buf: &mut [u8]) -> PtyResult<usize>;
    /// Performs a single write and reports how much the pty accepted.
    async fn write(&self, data: &[u8]) -> PtyResult<usize>;
    /// Terminates and reaps the child.
    async fn close(&self) -> PtyResult<()>;
}

#[derive(Debug, Clone)]
pub struct SpawnRequest<'a> {
    pub name: &'a str,
    pub command: &'a str,
    pub term: &'a str,
    pub geometry: Geometry,
}

pub trait Spawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest<'_>) -> PtyResult<Arc<dyn PtyBackend>>;
}

pub struct Session {
    pub id: SessionId,
    pub name: String,
    screen: Screen,
    snapshot: Option<Vec<u8>>,
    keyboard: ByteQueue,
    pending: ByteQueue,
    backend: Arc<dyn PtyBackend>,
    alive: bool,
    write_in_flight: bool,
    created_at: Instant,
    bytes_in: u64,
    bytes_out: u64,
}

impl Session {
    fn new(
        id: SessionId,
        name: &str,
        geometry: Geometry,
        backend: Arc<dyn PtyBackend>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            screen: Screen::new(geometry),
            snapshot: None,
            keyboard: ByteQueue::new(config.keyboard_capacity),
            pending: ByteQueue::new(config.output_capacity),
            backend,
            alive: true,
            write_in_flight: false,
            created_at: Instant::now(),
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn geometry(&self) -> Geometry {
        self.screen.geometry()
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn backend(&self) -> Arc<dyn PtyBackend> {
        self.backend.clone()
    }

    pub fn pending_keys(&self) -> usize {
        self.keyboard.len()
    }

    pub fn metrics(&self) -> (Instant, u64, u64, u64) {
        (
            self.created_at,
            self.bytes_in,
            self.bytes_out,
            self.keyboard.dropped_bytes_total(),
        )
    }

    /// Queues keystrokes for the child. Whatever exceeds the keyboard queue
    /// is dropped; the return value is the number of bytes kept.
    pub fn feed_keystrokes(&mut self, keys: &[u8]) -> usize {
        let accepted = self.keyboard.push(keys);
        if accepted < keys.len() {
            tracing::debug!(
                session = %self.name,
                dropped_bytes = keys.len() - accepted,
                "Keyboard queue full; keystrokes dropped"
            );
        }
        accepted
    }

    /// Runs pty output through the interpreter, keeping any trailing partial
    /// escape sequence for the next call. Returns whether anything was
    /// interpreted.
    pub fn consume_output(&mut self, bytes: &[u8]) -> bool {
        self.bytes_in = self.bytes_in.saturating_add(bytes.len() as u64);
        let mut applied = false;
        let mut rest = bytes;
        while !rest.is_empty() {
            let accepted = self.pending.push(rest);
            rest = &rest[accepted..];

            let pending = self.pending.contiguous();
            let consumed = pending.len() - self.screen.apply(pending).len();
            self.pending.consume(consumed);
            applied |= consumed > 0;

            if self.pending.is_full() {
                tracing::warn!(
                    session = %self.name,
                    discarded_bytes = self.pending.len(),
                    "Unterminated escape sequence filled the output buffer; discarding"
                );
                self.pending.clear();
            }
        }
        applied
    }

    /// Returns the screen when it differs from what was last sent, and
    /// records it as sent.
    pub fn take_changed_screen(&mut self) -> Option<&Screen> {
        if self.snapshot.as_deref() == Some(self.screen.cells()) {
            return None;
        }
        match &mut self.snapshot {
            Some(snapshot) => snapshot.copy_from_slice(self.screen.cells()),
            None => self.snapshot = Some(self.screen.cells().to_vec()),
        }
        Some(&self.screen)
    }

    /// Starts a keyboard flush: hands out the whole queue for one write.
    /// Returns `None` when there is nothing to send, a write is already
    /// outstanding, or the session is dead.
    pub fn begin_write(&mut self) -> Option<(Arc<dyn PtyBackend>, Vec<u8>)> {
        if !self.alive || self.write_in_flight || self.keyboard.is_empty() {
            return None;
        }
        self.write_in_flight = true;
        Some((self.backend.clone(), self.keyboard.to_vec()))
    }

    /// Finishes a keyboard flush; the unwritten remainder stays queued.
    pub fn complete_write(&mut self, written: usize) {
        self.write_in_flight = false;
        self.keyboard.consume(written);
        self.bytes_out = self.bytes_out.saturating_add(written as u64);
    }

    fn mark_dead(&mut self) -> bool {
        self.write_in_flight = false;
        std::mem::replace(&mut self.alive, false)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("geometry", &self.geometry())
            .field("alive", &self.is_alive())
            .field("pending_keys", &self.keyboard.len())
            .finish()
    }
}

pub struct Resolved<'a> {
    pub session: &'a mut Session,
    pub created: bool,
}

pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    names: HashMap<String, SessionId>,
    next_id: u64,
    spawner: Arc<dyn Spawner>,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            sessions: HashMap::new(),
            names: HashMap::new(),
            next_id: 1,
            spawner,
            config,
        }
    }

    /// Finds the live session called `name`, or spawns the configured
    /// command on a new pty and registers a blank session for it.
    pub fn resolve_or_create(&mut self, name: &str, geometry: Geometry) -> PtyResult<Resolved<'_>> {
        if let Some(id) = self.live_id(name) {
            let session = self
                .sessions
                .get_mut(&id)
                .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "Session not found"))?;
            return Ok(Resolved {
                session,
                created: false,
            });
        }

        if self.live_count() >= self.config.max_sessions {
            return Err(ApiError::new(ErrorCode::LimitExceeded, "Too many sessions").into());
        }

        let backend = self
            .spawner
            .spawn(&SpawnRequest {
                name,
                command: &self.config.command,
                term: &self.config.term,
                geometry,
            })
            .map_err(|err| match err.code() {
                ErrorCode::SpawnFailed => err,
                _ => ApiError::new(ErrorCode::SpawnFailed, "Failed to spawn session")
                    .with_details(err.to_string())
                    .into(),
            })?;
        let id = SessionId(self.next_id);
        self.next_id += 1;
        tracing::info!(
            session = %name,
            id = %id,
            rows = geometry.rows,
            cols = geometry.cols,
            command = %self.config.command,
            "Session created"
        );

        let session = Session::new(id, name, geometry, backend, &self.config);
        self.names.insert(name.to_string(), id);
        let session = self.sessions.entry(id).or_insert(session);
        Ok(Resolved {
            session,
            created: true,
        })
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Session> {
        self.names.get(name).and_then(|id| self.sessions.get(id))
    }

    /// Flags a session whose child is gone. It stays registered until the
    /// next sweep but can no longer be resolved.
    pub fn mark_dead(&mut self, id: SessionId) -> bool {
        self.sessions
            .get_mut(&id)
            .is_some_and(|session| session.mark_dead())
    }

    /// Removes a session from the registry and hands it back so the caller
    /// can release its process.
    pub fn teardown(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        if self.names.get(&session.name) == Some(&id) {
            self.names.remove(&session.name);
        }
        Some(session)
    }

    /// Tears down every session marked dead.
    pub fn sweep_dead(&mut self) -> Vec<Session> {
        self.dead_ids()
            .into_iter()
            .filter_map(|id| self.teardown(id))
            .collect()
    }

    pub fn dead_ids(&self) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|session| !session.is_alive())
            .map(|session| session.id)
            .collect()
    }

    pub fn live_ids(&self) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|session| session.is_alive())
            .map(|session| session.id)
            .collect()
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn live_id(&self, name: &str) -> Option<SessionId> {
        let id = *self.names.get(name)?;
        self.sessions
            .get(&id)
            .filter(|session| session.is_alive())
            .map(|session| session.id)
    }

    fn live_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|session| session.is_alive())
            .count()
    }
}
