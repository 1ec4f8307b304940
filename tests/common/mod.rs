#![allow(dead_code)]

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use termpoll::config::{Config, FilesConfig};
use termpoll::error::{ApiError, ErrorCode, PtyResult};
use termpoll::screen::Geometry;
use termpoll::server::EventLoop;
use termpoll::session::{PtyBackend, SpawnRequest, Spawner};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, sleep};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Test side of a scripted pty: feeds output to the session and observes
/// what the session wrote.
#[derive(Clone)]
pub struct PtyHandle {
    pub name: String,
    pub geometry: Geometry,
    output: mpsc::UnboundedSender<Vec<u8>>,
    writes: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl PtyHandle {
    pub fn emit(&self, bytes: &[u8]) {
        let _ = self.output.send(bytes.to_vec());
    }

    /// Makes the next read report end of stream, as if the child exited.
    pub fn hang_up(&self) {
        let _ = self.output.send(Vec::new());
    }

    pub fn written(&self) -> Vec<u8> {
        self.writes.lock().expect("writes lock").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// How every scripted pty answers keyboard writes while a fault is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    Error,
    /// The pty accepts nothing.
    Zero,
}

struct ScriptedPty {
    output: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    writes: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
    max_write: usize,
    write_fault: Arc<Mutex<Option<WriteFault>>>,
}

#[async_trait]
impl PtyBackend for ScriptedPty {
    async fn read(&self, buf: &mut [u8]) -> PtyResult<usize> {
        let mut output = self.output.lock().await;
        match output.recv().await {
            Some(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    async fn write(&self, data: &[u8]) -> PtyResult<usize> {
        let fault = *self.write_fault.lock().expect("fault lock");
        match fault {
            Some(WriteFault::Error) => return Err(io::Error::other("scripted write failure").into()),
            Some(WriteFault::Zero) => return Ok(0),
            None => {}
        }
        let n = data.len().min(self.max_write);
        self.writes.lock().expect("writes lock").extend_from_slice(&data[..n]);
        Ok(n)
    }

    async fn close(&self) -> PtyResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedSpawner {
    handles: Mutex<Vec<PtyHandle>>,
    spawned: AtomicUsize,
    fail: AtomicBool,
    max_write: Option<usize>,
    write_fault: Arc<Mutex<Option<WriteFault>>>,
}

impl ScriptedSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every pty accepts at most `max_write` bytes per write.
    pub fn with_max_write(max_write: usize) -> Arc<Self> {
        Arc::new(Self {
            max_write: Some(max_write),
            ..Self::default()
        })
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Applies to every pty, already spawned or not.
    pub fn fault_writes(&self, fault: Option<WriteFault>) {
        *self.write_fault.lock().expect("fault lock") = fault;
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// All ptys spawned for `name`, oldest first.
    pub fn handles(&self, name: &str) -> Vec<PtyHandle> {
        self.handles
            .lock()
            .expect("handles lock")
            .iter()
            .filter(|handle| handle.name == name)
            .cloned()
            .collect()
    }

    pub fn handle(&self, name: &str) -> PtyHandle {
        self.handles(name)
            .pop()
            .unwrap_or_else(|| panic!("no pty spawned for {name}"))
    }
}

impl Spawner for ScriptedSpawner {
    fn spawn(&self, request: &SpawnRequest<'_>) -> PtyResult<Arc<dyn PtyBackend>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ApiError::new(ErrorCode::SpawnFailed, "Failed to spawn session command")
                .with_details("scripted failure")
                .into());
        }
        self.spawned.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        let writes = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.handles.lock().expect("handles lock").push(PtyHandle {
            name: request.name.to_string(),
            geometry: request.geometry,
            output: tx,
            writes: writes.clone(),
            closed: closed.clone(),
        });
        Ok(Arc::new(ScriptedPty {
            output: tokio::sync::Mutex::new(rx),
            writes,
            closed,
            max_write: self.max_write.unwrap_or(usize::MAX),
            write_fault: self.write_fault.clone(),
        }))
    }
}

pub fn test_config(files: FilesConfig) -> Config {
    let mut config = Config::default();
    config.server.poll_timeout_ms = 20;
    config.server.request_timeout_ms = 1_000;
    config.files = files;
    config
}

/// Starts an event loop on an ephemeral port and returns its address.
pub async fn start_server(config: Config, spawner: Arc<dyn Spawner>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let event_loop = EventLoop::from_listener(listener, config, spawner);
    let addr = event_loop.local_addr().expect("local addr");
    tokio::spawn(event_loop.run());
    addr
}

pub struct HttpReply {
    pub status: u16,
    pub head: String,
    pub body: Vec<u8>,
}

impl HttpReply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

/// Sends one raw request and reads until the server closes the socket.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> HttpReply {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(request).await.expect("write request");
    let mut raw = Vec::new();
    tokio::time::timeout(TIMEOUT, stream.read_to_end(&mut raw))
        .await
        .expect("response timed out")
        .expect("read response");

    let split = raw
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .expect("response head");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    HttpReply {
        status,
        head,
        body: raw[split + 4..].to_vec(),
    }
}

pub async fn get(addr: SocketAddr, target: &str) -> HttpReply {
    send_raw(
        addr,
        format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes(),
    )
    .await
}

pub async fn poll(addr: SocketAddr, query: &str) -> HttpReply {
    get(addr, &format!("/u?{query}")).await
}

/// Polls `session` until a rendered screen satisfies `check`.
pub async fn poll_until(addr: SocketAddr, session: &str, check: impl Fn(&str) -> bool) -> String {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let reply = poll(addr, &format!("s={session}")).await;
        assert_eq!(reply.status, 200);
        let body = reply.text();
        if check(&body) {
            return body;
        }
        assert!(Instant::now() < deadline, "screen never matched; last body {body}");
        sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        sleep(Duration::from_millis(10)).await;
    }
}
