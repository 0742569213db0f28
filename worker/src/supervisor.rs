//! Process supervisor: owns at most one live worker.
//!
//! Each spawn gets a new generation number. Pump tasks tag everything they
//! forward with that generation, and the proxy core drops events whose
//! generation is no longer current, so a killed worker's trailing output and
//! exit notification never leak into its successor.
//!
//! Writes never block the caller: frames go through a bounded queue to a
//! per-generation writer task, so a worker that stops reading its stdin
//! cannot stall whoever owns the supervisor.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::launcher::{BoxedReader, BoxedWriter, ProcessLauncher, SpawnSpec, WorkerChild};

/// Consecutive unexpected failures tolerated before giving up.
pub const MAX_RESTART_ATTEMPTS: u32 = 10;

/// A worker that stayed up this long resets the retry budget when it dies.
pub const STABLE_UPTIME: Duration = Duration::from_secs(60);

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 8 * 1024;

/// Frames queued for the writer task before the worker counts as stuck.
pub const WRITE_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
pub enum WorkerEventKind {
    Stdout(Vec<u8>),
    Stderr(String),
    /// Writing to stdin failed; frames still queued are lost.
    StdinClosed(String),
    /// Exit code, `None` when terminated by a signal.
    Exited(Option<i32>),
    /// The stream or the wait call failed.
    Failed(String),
}

#[derive(Debug)]
pub struct WorkerEvent {
    pub generation: u64,
    pub kind: WorkerEventKind,
}

struct LiveWorker {
    generation: u64,
    pid: Option<u32>,
    frames: mpsc::Sender<Vec<u8>>,
    shutdown: CancellationToken,
    kill_tx: Option<oneshot::Sender<()>>,
    started_at: Instant,
}

pub struct Supervisor<L> {
    launcher: Arc<L>,
    events: mpsc::Sender<WorkerEvent>,
    generation: u64,
    live: Option<LiveWorker>,
}

impl<L: ProcessLauncher> Supervisor<L> {
    pub fn new(launcher: Arc<L>, events: mpsc::Sender<WorkerEvent>) -> Self {
        Self {
            launcher,
            events,
            generation: 0,
            live: None,
        }
    }

    #[must_use]
    pub fn launcher(&self) -> &Arc<L> {
        &self.launcher
    }

    /// Start a worker, killing any current one first.
    ///
    /// Returns the new generation.
    pub fn spawn(&mut self, spec: &SpawnSpec) -> Result<u64, SpawnError> {
        self.kill();
        self.generation += 1;
        let generation = self.generation;

        let spawned = self
            .launcher
            .spawn(spec)
            .map_err(|source| SpawnError::Launch {
                program: spec.program().to_path_buf(),
                source,
            })?;
        let pid = spawned.child.id();

        let (frames, frames_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();
        tokio::spawn(pump_stdin(
            generation,
            spawned.stdin,
            frames_rx,
            shutdown.clone(),
            self.events.clone(),
        ));
        tokio::spawn(pump_stdout(generation, spawned.stdout, self.events.clone()));
        if let Some(stderr) = spawned.stderr {
            tokio::spawn(pump_stderr(generation, stderr, self.events.clone()));
        }
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(monitor_exit(
            generation,
            spawned.child,
            kill_rx,
            self.events.clone(),
        ));

        tracing::info!(generation, pid, program = %spec.program().display(), "Worker spawned");
        self.live = Some(LiveWorker {
            generation,
            pid,
            frames,
            shutdown,
            kill_tx: Some(kill_tx),
            started_at: Instant::now(),
        });
        Ok(generation)
    }

    /// Best-effort kill. A worker that already died is not an error.
    pub fn kill(&mut self) {
        let Some(mut live) = self.live.take() else {
            return;
        };
        live.shutdown.cancel();
        // Dropping the sender also kills; send only to make intent explicit.
        if let Some(tx) = live.kill_tx.take() {
            let _ = tx.send(());
        }
        tracing::debug!(generation = live.generation, pid = live.pid, "Worker killed");
    }

    /// How long the current worker has been running.
    #[must_use]
    pub fn uptime(&self) -> Option<Duration> {
        self.live.as_ref().map(|live| live.started_at.elapsed())
    }

    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.generation == generation)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.live.is_some()
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.live.as_ref().and_then(|live| live.pid)
    }

    /// Queue one encoded frame for the worker's stdin.
    ///
    /// Fails with `NotConnected` when no worker is live, `WouldBlock` when the
    /// worker has stopped draining its queue, and `BrokenPipe` when the
    /// writer already gave up. Later write errors arrive as
    /// [`WorkerEventKind::StdinClosed`].
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let live = self
            .live
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no live worker"))?;
        live.frames
            .try_send(bytes.to_vec())
            .map_err(|e| match e {
                TrySendError::Full(_) => io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "worker is not reading its stdin",
                ),
                TrySendError::Closed(_) => {
                    io::Error::new(io::ErrorKind::BrokenPipe, "worker stdin closed")
                }
            })
    }
}

async fn pump_stdin(
    generation: u64,
    mut stdin: BoxedWriter,
    mut frames: mpsc::Receiver<Vec<u8>>,
    shutdown: CancellationToken,
    events: mpsc::Sender<WorkerEvent>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let written = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            written = write_frame(&mut stdin, &frame) => written,
        };
        if let Err(e) = written {
            let kind = WorkerEventKind::StdinClosed(format!("stdin write failed: {e}"));
            let _ = events.send(WorkerEvent { generation, kind }).await;
            break;
        }
    }
    tracing::trace!(generation, "Worker stdin writer stopped");
}

async fn write_frame(stdin: &mut BoxedWriter, frame: &[u8]) -> io::Result<()> {
    stdin.write_all(frame).await?;
    stdin.flush().await
}

async fn pump_stdout(generation: u64, mut stdout: BoxedReader, events: mpsc::Sender<WorkerEvent>) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let kind = match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => WorkerEventKind::Stdout(buf[..n].to_vec()),
            Err(e) => WorkerEventKind::Failed(format!("stdout read failed: {e}")),
        };
        let failed = matches!(kind, WorkerEventKind::Failed(_));
        if events.send(WorkerEvent { generation, kind }).await.is_err() || failed {
            break;
        }
    }
    tracing::trace!(generation, "Worker stdout closed");
}

async fn pump_stderr(generation: u64, stderr: BoxedReader, events: mpsc::Sender<WorkerEvent>) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(generation, "Worker stderr read failed: {e}");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']).to_string();
        let event = WorkerEvent {
            generation,
            kind: WorkerEventKind::Stderr(line),
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
}

async fn monitor_exit<C: WorkerChild>(
    generation: u64,
    mut child: C,
    kill_rx: oneshot::Receiver<()>,
    events: mpsc::Sender<WorkerEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                tracing::trace!(generation, "Kill of exited worker: {e}");
            }
            child.wait().await
        }
    };
    let kind = match status {
        Ok(code) => WorkerEventKind::Exited(code),
        Err(e) => WorkerEventKind::Failed(format!("wait failed: {e}")),
    };
    let _ = events.send(WorkerEvent { generation, kind }).await;
}

/// What to do after an unexpected worker failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp { attempts: u32 },
}

/// Bounded restart budget with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    attempts: u32,
    cap: u32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(MAX_RESTART_ATTEMPTS)
    }
}

impl RetryBudget {
    #[must_use]
    pub fn new(cap: u32) -> Self {
        Self { attempts: 0, cap }
    }

    /// Record a failure of a worker that had been up for `uptime`
    /// (`None` when it never started).
    pub fn record_failure(&mut self, uptime: Option<Duration>) -> RetryDecision {
        if uptime.is_some_and(|up| up >= STABLE_UPTIME) {
            self.attempts = 0;
        }
        if self.attempts >= self.cap {
            return RetryDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        RetryDecision::Retry {
            attempt: self.attempts,
            delay: backoff_delay(self.attempts),
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// First retry is immediate, then 250 ms doubling up to 5 s.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }
    let exp = (attempt - 2).min(16);
    BACKOFF_BASE.saturating_mul(1 << exp).min(BACKOFF_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeLauncher;

    #[test]
    fn backoff_schedule() {
        assert_eq!(backoff_delay(1), Duration::ZERO);
        assert_eq!(backoff_delay(2), Duration::from_millis(250));
        assert_eq!(backoff_delay(3), Duration::from_millis(500));
        assert_eq!(backoff_delay(4), Duration::from_secs(1));
        assert_eq!(backoff_delay(7), Duration::from_secs(5));
        assert_eq!(backoff_delay(40), Duration::from_secs(5));
    }

    #[test]
    fn retry_budget_gives_up_after_cap() {
        let mut budget = RetryBudget::default();
        for expected in 1..=MAX_RESTART_ATTEMPTS {
            match budget.record_failure(Some(Duration::from_secs(1))) {
                RetryDecision::Retry { attempt, .. } => assert_eq!(attempt, expected),
                RetryDecision::GiveUp { .. } => panic!("gave up early at {expected}"),
            }
        }
        assert_eq!(
            budget.record_failure(None),
            RetryDecision::GiveUp {
                attempts: MAX_RESTART_ATTEMPTS
            }
        );
    }

    #[test]
    fn stable_worker_resets_budget() {
        let mut budget = RetryBudget::new(2);
        budget.record_failure(None);
        budget.record_failure(None);
        assert!(matches!(
            budget.record_failure(Some(STABLE_UPTIME)),
            RetryDecision::Retry { attempt: 1, .. }
        ));
    }

    #[tokio::test]
    async fn spawn_write_and_observe_output() {
        let launcher = Arc::new(FakeLauncher::new());
        let (tx, mut rx) = mpsc::channel(16);
        let mut supervisor = Supervisor::new(launcher.clone(), tx);

        let generation = supervisor.spawn(&SpawnSpec::new("python3")).unwrap();
        assert!(supervisor.is_running());
        assert!(supervisor.pid().is_some());
        let mut worker = launcher.next_worker().await;

        supervisor.write(b"{\"id\":0}\n").unwrap();
        assert_eq!(worker.read_line().await, "{\"id\":0}");

        worker.send_stdout(b"{\"id\":0,\"results\":[]}\n").await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.generation, generation);
        assert!(matches!(event.kind, WorkerEventKind::Stdout(ref bytes) if bytes.starts_with(b"{")));

        worker.send_stderr("warning: slow import\n").await;
        let event = rx.recv().await.unwrap();
        assert!(matches!(event.kind, WorkerEventKind::Stderr(ref line) if line == "warning: slow import"));
    }

    #[tokio::test]
    async fn stderr_with_invalid_utf8_keeps_flowing() {
        let launcher = Arc::new(FakeLauncher::new());
        let (tx, mut rx) = mpsc::channel(16);
        let mut supervisor = Supervisor::new(launcher.clone(), tx);
        supervisor.spawn(&SpawnSpec::new("python3")).unwrap();
        let mut worker = launcher.next_worker().await;

        worker.send_stderr_bytes(b"bad \xff byte\r\nsecond\n").await;
        let mut lines = Vec::new();
        while lines.len() < 2 {
            if let WorkerEventKind::Stderr(line) = rx.recv().await.unwrap().kind {
                lines.push(line);
            }
        }
        assert_eq!(lines, ["bad \u{fffd} byte", "second"]);
    }

    #[tokio::test]
    async fn unread_stdin_backs_up_without_blocking() {
        let launcher = Arc::new(FakeLauncher::new());
        let (tx, _rx) = mpsc::channel(16);
        let mut supervisor = Supervisor::new(launcher.clone(), tx);
        supervisor.spawn(&SpawnSpec::new("python3")).unwrap();
        let worker = launcher.next_worker().await;

        let frame = vec![b'x'; 256 * 1024];
        let mut queued = 0;
        let err = loop {
            match supervisor.write(&frame) {
                Ok(()) => queued += 1,
                Err(e) => break e,
            }
            assert!(queued <= 4 * WRITE_QUEUE_CAPACITY, "queue never filled");
            tokio::task::yield_now().await;
        };
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        // The writer is parked on a full pipe; kill still goes through.
        supervisor.kill();
        worker.killed().await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn exit_is_reported_with_generation() {
        let launcher = Arc::new(FakeLauncher::new());
        let (tx, mut rx) = mpsc::channel(16);
        let mut supervisor = Supervisor::new(launcher.clone(), tx);
        let generation = supervisor.spawn(&SpawnSpec::new("python3")).unwrap();
        let worker = launcher.next_worker().await;

        worker.exit(Some(1));
        loop {
            let event = rx.recv().await.unwrap();
            if let WorkerEventKind::Exited(code) = event.kind {
                assert_eq!(code, Some(1));
                assert_eq!(event.generation, generation);
                break;
            }
        }
        assert!(supervisor.uptime().is_some());
        supervisor.kill();
        assert!(!supervisor.is_running());
        assert!(supervisor.uptime().is_none());
    }

    #[tokio::test]
    async fn kill_makes_generation_stale_and_stops_child() {
        let launcher = Arc::new(FakeLauncher::new());
        let (tx, _rx) = mpsc::channel(16);
        let mut supervisor = Supervisor::new(launcher.clone(), tx);
        let generation = supervisor.spawn(&SpawnSpec::new("python3")).unwrap();
        let worker = launcher.next_worker().await;

        supervisor.kill();
        assert!(!supervisor.is_current(generation));
        worker.killed().await;

        // Killing again is harmless.
        supervisor.kill();
        let err = supervisor.write(b"x\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn respawn_bumps_generation() {
        let launcher = Arc::new(FakeLauncher::new());
        let (tx, _rx) = mpsc::channel(16);
        let mut supervisor = Supervisor::new(launcher.clone(), tx);
        let first = supervisor.spawn(&SpawnSpec::new("python3")).unwrap();
        let second = supervisor.spawn(&SpawnSpec::new("python3")).unwrap();
        assert!(second > first);
        assert!(supervisor.is_current(second));
        assert!(!supervisor.is_current(first));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let launcher = Arc::new(FakeLauncher::new());
        launcher.fail_next_spawns(1);
        let (tx, _rx) = mpsc::channel(16);
        let mut supervisor = Supervisor::new(launcher, tx);
        let err = supervisor.spawn(&SpawnSpec::new("/bad/python")).unwrap_err();
        assert!(err.to_string().contains("/bad/python"));
        assert!(!supervisor.is_running());
    }
}
