//! In-memory launcher and sampler for tests.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};
use tokio::sync::{mpsc, watch};

use crate::launcher::{ProcessLauncher, SpawnSpec, SpawnedWorker, WorkerChild};
use crate::watchdog::{MemorySampler, SampleError};

const PIPE_CAPACITY: usize = 1024 * 1024;
const WAIT: Duration = Duration::from_secs(5);

type ExitState = watch::Sender<Option<Option<i32>>>;

pub(crate) struct FakeChild {
    pid: u32,
    exit: Arc<ExitState>,
    killed: Arc<AtomicBool>,
}

impl WorkerChild for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.exit.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(None);
            true
        });
        Ok(())
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        let mut rx = self.exit.subscribe();
        let code = *rx
            .wait_for(Option::is_some)
            .await
            .map_err(io::Error::other)?;
        Ok(code.flatten())
    }
}

/// The far side of a fake worker's pipes.
pub(crate) struct FakeWorker {
    spec: SpawnSpec,
    pid: u32,
    stdin: BufReader<DuplexStream>,
    stdout: DuplexStream,
    stderr: DuplexStream,
    exit: Arc<ExitState>,
    killed: Arc<AtomicBool>,
}

impl FakeWorker {
    pub fn spec(&self) -> &SpawnSpec {
        &self.spec
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Next line the proxy wrote, without the terminator.
    pub async fn read_line(&mut self) -> String {
        let mut line = String::new();
        let n = tokio::time::timeout(WAIT, self.stdin.read_line(&mut line))
            .await
            .expect("timed out waiting for a request line")
            .unwrap();
        assert!(n > 0, "worker stdin closed");
        line.trim_end().to_string()
    }

    pub async fn read_request(&mut self) -> Value {
        serde_json::from_str(&self.read_line().await).unwrap()
    }

    pub async fn send_stdout(&mut self, bytes: &[u8]) {
        self.stdout.write_all(bytes).await.unwrap();
        self.stdout.flush().await.unwrap();
    }

    pub async fn respond(&mut self, response: Value) {
        let mut line = serde_json::to_vec(&response).unwrap();
        line.push(b'\n');
        self.send_stdout(&line).await;
    }

    pub async fn send_stderr(&mut self, text: &str) {
        self.send_stderr_bytes(text.as_bytes()).await;
    }

    pub async fn send_stderr_bytes(&mut self, bytes: &[u8]) {
        self.stderr.write_all(bytes).await.unwrap();
        self.stderr.flush().await.unwrap();
    }

    pub fn exit(&self, code: Option<i32>) {
        self.exit.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(code);
            true
        });
    }

    /// Wait until the proxy kills this worker.
    pub async fn killed(&self) {
        let mut rx = self.exit.subscribe();
        tokio::time::timeout(WAIT, rx.wait_for(Option::is_some))
            .await
            .expect("worker was not killed")
            .unwrap();
        assert!(self.was_killed());
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeLauncher {
    workers_tx: mpsc::UnboundedSender<FakeWorker>,
    workers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeWorker>>,
    spawn_failures: AtomicU32,
    spawns: AtomicU32,
    next_pid: AtomicU32,
    exec_output: Mutex<Option<String>>,
    execs: Mutex<Vec<SpawnSpec>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        let (workers_tx, workers_rx) = mpsc::unbounded_channel();
        Self {
            workers_tx,
            workers_rx: tokio::sync::Mutex::new(workers_rx),
            spawn_failures: AtomicU32::new(0),
            spawns: AtomicU32::new(0),
            next_pid: AtomicU32::new(4000),
            exec_output: Mutex::new(Some("[]".to_string())),
            execs: Mutex::new(Vec::new()),
        }
    }

    /// Make the next `n` spawns fail with `NotFound`.
    pub fn fail_next_spawns(&self, n: u32) {
        self.spawn_failures.store(n, Ordering::SeqCst);
    }

    /// Stdout returned by `exec`; `None` makes `exec` fail.
    pub fn set_exec_output(&self, output: Option<&str>) {
        *self.exec_output.lock().unwrap() = output.map(str::to_string);
    }

    pub fn spawn_count(&self) -> u32 {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn exec_calls(&self) -> Vec<SpawnSpec> {
        self.execs.lock().unwrap().clone()
    }

    pub async fn next_worker(&self) -> FakeWorker {
        let mut rx = self.workers_rx.lock().await;
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for a spawn")
            .expect("launcher dropped")
    }

    /// Whether a spawned worker is waiting to be picked up.
    pub async fn has_pending_worker(&self) -> bool {
        !self.workers_rx.lock().await.is_empty()
    }
}

impl ProcessLauncher for FakeLauncher {
    type Child = FakeChild;

    fn spawn(&self, spec: &SpawnSpec) -> io::Result<SpawnedWorker<FakeChild>> {
        let remaining = self.spawn_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.spawn_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", spec.program().display()),
            ));
        }
        self.spawns.fetch_add(1, Ordering::SeqCst);
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);

        let (proxy_stdin, worker_stdin) = duplex(PIPE_CAPACITY);
        let (worker_stdout, proxy_stdout) = duplex(PIPE_CAPACITY);
        let (worker_stderr, proxy_stderr) = duplex(PIPE_CAPACITY);
        let (exit, _) = watch::channel(None);
        let exit = Arc::new(exit);
        let killed = Arc::new(AtomicBool::new(false));

        let worker = FakeWorker {
            spec: spec.clone(),
            pid,
            stdin: BufReader::new(worker_stdin),
            stdout: worker_stdout,
            stderr: worker_stderr,
            exit: exit.clone(),
            killed: killed.clone(),
        };
        let _ = self.workers_tx.send(worker);

        Ok(SpawnedWorker {
            child: FakeChild { pid, exit, killed },
            stdin: Box::new(proxy_stdin),
            stdout: Box::new(proxy_stdout),
            stderr: Some(Box::new(proxy_stderr)),
        })
    }

    async fn exec(&self, spec: &SpawnSpec) -> io::Result<String> {
        self.execs.lock().unwrap().push(spec.clone());
        self.exec_output
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| io::Error::other("exec unavailable"))
    }

    fn executable_path(&self, interpreter: Option<&Path>) -> io::Result<PathBuf> {
        Ok(interpreter.map_or_else(|| PathBuf::from("python3"), Path::to_path_buf))
    }
}

/// Memory sampler replaying queued readings. Clones share the queue.
#[derive(Clone, Default)]
pub(crate) struct ScriptedSampler {
    samples: Arc<Mutex<VecDeque<Result<u64, SampleError>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_mb(&self, mb: u64) {
        self.samples.lock().unwrap().push_back(Ok(mb * 1024 * 1024));
    }

    pub fn push_failure(&self) {
        self.samples
            .lock()
            .unwrap()
            .push_back(Err(SampleError::Unsupported("scripted".to_string())));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MemorySampler for ScriptedSampler {
    fn sample(&mut self, _pid: u32) -> Result<u64, SampleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.samples.lock().unwrap().pop_front().unwrap_or(Ok(0))
    }
}
