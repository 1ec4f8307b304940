use crate::error::{ApiError, ErrorCode, PtyResult};
use crate::session::{PtyBackend, SpawnRequest, Spawner};
use async_trait::async_trait;
use portable_pty::{Child, CommandBuilder, PtySize, native_pty_system};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::sync::{Arc, Mutex};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

/// Spawns the configured command on a fresh native pseudo-terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSpawner;

impl Spawner for NativeSpawner {
    fn spawn(&self, request: &SpawnRequest<'_>) -> PtyResult<Arc<dyn PtyBackend>> {
        Ok(Arc::new(NativePty::spawn(request)?))
    }
}

struct MasterFd(File);

impl AsRawFd for MasterFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

pub struct NativePty {
    master: AsyncFd<MasterFd>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    pid: Option<u32>,
}

impl NativePty {
    pub fn spawn(request: &SpawnRequest<'_>) -> PtyResult<Self> {
        let mut parts = request.command.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            ApiError::new(ErrorCode::InvalidArgument, "Session command is empty")
        })?;

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: request.geometry.rows,
                cols: request.geometry.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| {
                ApiError::new(ErrorCode::SpawnFailed, "Failed to allocate PTY")
                    .with_details(err.to_string())
            })?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(parts);
        cmd.env("TERM", request.term);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair.slave.spawn_command(cmd).map_err(|err| {
            ApiError::new(ErrorCode::SpawnFailed, "Failed to spawn session command")
                .with_details(err.to_string())
        })?;
        // The child holds its own copy of the slave side; ours must go so
        // that reads see EOF once the child exits.
        drop(pair.slave);

        let raw = pair.master.as_raw_fd().ok_or_else(|| {
            ApiError::new(ErrorCode::Unsupported, "PTY master has no file descriptor")
        })?;
        // SAFETY: `raw` belongs to `pair.master`, which is alive for the
        // duration of the borrow; the clone owns an independent descriptor.
        let owned = unsafe { BorrowedFd::borrow_raw(raw) }.try_clone_to_owned()?;
        let file = File::from(owned);
        set_nonblocking(file.as_raw_fd())?;
        let master =
            AsyncFd::with_interest(MasterFd(file), Interest::READABLE | Interest::WRITABLE)?;

        let pid = child.process_id();
        tracing::debug!(
            session = %request.name,
            pid = ?pid,
            command = %request.command,
            "Spawned session process"
        );

        Ok(Self {
            master,
            child: Arc::new(Mutex::new(child)),
            pid,
        })
    }
}

#[async_trait]
impl PtyBackend for NativePty {
    async fn read(&self, buf: &mut [u8]) -> PtyResult<usize> {
        loop {
            let mut guard = self.master.readable().await?;
            match guard.try_io(|inner| (&inner.get_ref().0).read(buf)) {
                Ok(Ok(n)) => return Ok(n),
                // Linux reports a hung-up pty master as EIO rather than EOF.
                Ok(Err(err)) if err.raw_os_error() == Some(libc::EIO) => return Ok(0),
                Ok(Err(err)) if err.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(err)) => return Err(err.into()),
                Err(_would_block) => continue,
            }
        }
    }

    async fn write(&self, data: &[u8]) -> PtyResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        loop {
            let mut guard = self.master.writable().await?;
            match guard.try_io(|inner| (&inner.get_ref().0).write(data)) {
                Ok(Ok(n)) => return Ok(n),
                Ok(Err(err)) if err.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(err)) => return Err(err.into()),
                Err(_would_block) => continue,
            }
        }
    }

    async fn close(&self) -> PtyResult<()> {
        let child = self.child.clone();
        let pid = self.pid;

        tokio::task::spawn_blocking(move || -> PtyResult<()> {
            let mut child = child.lock().map_err(|_| {
                ApiError::new(ErrorCode::IoError, "Session process lock poisoned")
            })?;
            if child.try_wait()?.is_none()
                && let Err(err) = child.kill()
            {
                tracing::debug!(pid = ?pid, error = %err, "Kill failed; process already gone");
            }
            let status = child.wait()?;
            tracing::debug!(pid = ?pid, status = ?status, "Session process reaped");
            Ok(())
        })
        .await
        .map_err(|err| {
            ApiError::new(ErrorCode::IoError, "Failed to join close").with_details(err.to_string())
        })?
    }
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain fcntl flag manipulation on a descriptor we own.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
