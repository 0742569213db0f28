//! Proxy core.
//!
//! One task owns every piece of mutable state: the state machine, the
//! command table, the line decoder, the supervisor and the watchdog. Callers
//! talk to it through a cloneable [`ProxyHandle`]. Because all mutation
//! happens on that task, id assignment, table updates and restarts never
//! race, and concurrent restart triggers collapse into one.

use std::collections::VecDeque;
use std::fmt;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use sidekick_types::{Request, RequestError, RequestId, WorkerResult, WorkerSettings};

use crate::codec::{LineDecoder, encode_line};
use crate::launcher::{ProcessLauncher, SpawnSpec};
use crate::middleware::{Debounce, LogThrottle, until};
use crate::protocol::{self, ResponseEnvelope, WireRequest};
use crate::search_paths::{self, EnvironmentProvider, PYTHONPATH, SearchPaths};
use crate::supervisor::{
    RetryBudget, RetryDecision, SpawnError, Supervisor, WorkerEvent, WorkerEventKind,
};
use crate::table::{CommandTable, QUEUE_CEILING};
use crate::watchdog::{self, MemorySampler, ResourceWatchdog, Verdict};

const COMMAND_CHANNEL_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Quiet period after the last environment change before paths are rebuilt.
pub const ENV_DEBOUNCE: Duration = Duration::from_secs(1);

const LOG_LINES_PER_WINDOW: u32 = 20;
const LOG_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),
    /// The worker is not running (spawn failed or never started).
    #[error("worker transport unavailable")]
    TransportUnavailable,
    /// Writing to the worker failed; the proxy restarts it.
    #[error("worker stream closed: {0}")]
    StreamClosed(String),
    #[error("worker kept failing; gave up after {attempts} restart attempts")]
    Fatal { attempts: u32 },
    #[error("proxy disposed")]
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Uninitialized,
    Initializing,
    Ready,
    /// The worker could not be spawned. Submissions fail fast until a
    /// restart succeeds.
    NotStarted,
    Restarting,
    /// The retry budget is exhausted.
    Failed,
    Disposed,
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::NotStarted => "not started",
            Self::Restarting => "restarting",
            Self::Failed => "failed",
            Self::Disposed => "disposed",
        };
        f.write_str(label)
    }
}

/// Snapshot of the core's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyStats {
    pub state: ProxyState,
    pub pending: usize,
    pub queued: usize,
    pub parked: usize,
    pub deferred: usize,
    pub responses_processed: u64,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ProxyOptions {
    workspace: PathBuf,
    watchdog_interval: Duration,
    env_debounce: Duration,
    queue_ceiling: usize,
}

impl ProxyOptions {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            watchdog_interval: watchdog::DEFAULT_INTERVAL,
            env_debounce: ENV_DEBOUNCE,
            queue_ceiling: QUEUE_CEILING,
        }
    }

    #[must_use]
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    #[must_use]
    pub fn with_env_debounce(mut self, debounce: Duration) -> Self {
        self.env_debounce = debounce;
        self
    }

    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }
}

/// External services the core consumes.
pub struct Collaborators<E, S> {
    pub settings: watch::Receiver<WorkerSettings>,
    pub environment: Arc<E>,
    pub sampler: S,
}

type Reply = oneshot::Sender<Result<Option<WorkerResult>, ProxyError>>;

enum Command {
    Submit {
        request: Request,
        token: Option<CancellationToken>,
        reply: Reply,
    },
    Restart {
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<ProxyStats>,
    },
    Dispose {
        reply: oneshot::Sender<()>,
    },
}

/// A registered request waiting for its answer.
struct Pending {
    reply: Reply,
    token: Option<CancellationToken>,
}

impl Pending {
    fn is_cancelled(&self) -> bool {
        self.token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Resolve the caller's future. Consumes the entry, so at most once.
    fn resolve(self, result: Option<WorkerResult>) {
        let result = if self.is_cancelled() { None } else { result };
        let _ = self.reply.send(Ok(result));
    }

    fn fail(self, error: ProxyError) {
        let _ = self.reply.send(Err(error));
    }
}

/// A submission that arrived while no worker was ready.
struct Deferred {
    request: Request,
    token: Option<CancellationToken>,
    reply: Reply,
}

/// Cheap, cloneable front end to a running proxy.
#[derive(Clone)]
pub struct ProxyHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ProxyState>,
    ids: Arc<AtomicU64>,
}

impl ProxyHandle {
    /// Submit `request` and wait for its shaped result.
    ///
    /// `Ok(None)` means no result: evicted, drained by a restart, cancelled,
    /// or the worker's answer could not be shaped.
    pub async fn submit(&self, request: Request) -> Result<Option<WorkerResult>, ProxyError> {
        self.send_submit(request, None).await
    }

    /// Like [`Self::submit`], resolving with no result if `token` is
    /// cancelled by the time the answer arrives.
    pub async fn submit_with_token(
        &self,
        request: Request,
        token: CancellationToken,
    ) -> Result<Option<WorkerResult>, ProxyError> {
        self.send_submit(request, Some(token)).await
    }

    async fn send_submit(
        &self,
        request: Request,
        token: Option<CancellationToken>,
    ) -> Result<Option<WorkerResult>, ProxyError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                request,
                token,
                reply,
            })
            .await
            .map_err(|_| ProxyError::Disposed)?;
        // A dropped reply means the core went away with the entry unresolved.
        rx.await.unwrap_or(Ok(None))
    }

    /// Reserve a fresh request id. Ids are never handed out twice.
    #[must_use]
    pub fn next_id(&self) -> RequestId {
        RequestId::new(self.ids.fetch_add(1, Ordering::SeqCst))
    }

    /// Force a restart of the worker.
    pub async fn restart(&self) -> Result<(), ProxyError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Restart { reply })
            .await
            .map_err(|_| ProxyError::Disposed)?;
        rx.await.map_err(|_| ProxyError::Disposed)
    }

    pub async fn stats(&self) -> Result<ProxyStats, ProxyError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats { reply })
            .await
            .map_err(|_| ProxyError::Disposed)?;
        rx.await.map_err(|_| ProxyError::Disposed)
    }

    /// Kill the worker and reject everything after. Idempotent.
    pub async fn dispose(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Dispose { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<ProxyState> {
        self.state.clone()
    }
}

pub struct Proxy;

impl Proxy {
    /// Spawn the core task and return a handle to it.
    ///
    /// Must be called from within a Tokio runtime. The worker is spawned
    /// by the task right away; watch [`ProxyHandle::state`] for readiness.
    pub fn start<L, E, S>(
        options: ProxyOptions,
        launcher: Arc<L>,
        collaborators: Collaborators<E, S>,
    ) -> ProxyHandle
    where
        L: ProcessLauncher,
        E: EnvironmentProvider,
        S: MemorySampler,
    {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ProxyState::Uninitialized);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let ids = Arc::new(AtomicU64::new(0));

        let Collaborators {
            mut settings,
            environment,
            sampler,
        } = collaborators;
        let current = settings.borrow_and_update().clone();
        let env_changes = environment.subscribe();
        let now = Instant::now();

        let core = ProxyCore {
            state: ProxyState::Uninitialized,
            state_tx,
            commands: commands_rx,
            events: events_rx,
            supervisor: Supervisor::new(launcher, events_tx),
            table: CommandTable::new(),
            decoder: LineDecoder::new(),
            watchdog: ResourceWatchdog::new(current.memory_limit(), now),
            budget: RetryBudget::default(),
            search_paths: SearchPaths::default(),
            deferred: VecDeque::new(),
            ids: ids.clone(),
            responses_processed: 0,
            respawn_at: None,
            failed_attempts: 0,
            env_debounce: Debounce::new(options.env_debounce),
            stderr_log: LogThrottle::new(LOG_LINES_PER_WINDOW, LOG_WINDOW),
            malformed_log: LogThrottle::new(LOG_LINES_PER_WINDOW, LOG_WINDOW),
            settings: current,
            settings_rx: settings,
            environment,
            env_changes,
            sampler,
            options,
        };
        tokio::spawn(core.run());

        ProxyHandle {
            commands: commands_tx,
            state: state_rx,
            ids,
        }
    }
}

struct ProxyCore<L: ProcessLauncher, E, S> {
    options: ProxyOptions,
    state: ProxyState,
    state_tx: watch::Sender<ProxyState>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Receiver<WorkerEvent>,
    supervisor: Supervisor<L>,
    table: CommandTable<Pending>,
    decoder: LineDecoder,
    watchdog: ResourceWatchdog,
    budget: RetryBudget,
    search_paths: SearchPaths,
    deferred: VecDeque<Deferred>,
    ids: Arc<AtomicU64>,
    responses_processed: u64,
    /// Backoff deadline for a pending respawn after a crash.
    respawn_at: Option<Instant>,
    failed_attempts: u32,
    env_debounce: Debounce,
    stderr_log: LogThrottle,
    malformed_log: LogThrottle,
    settings: WorkerSettings,
    settings_rx: watch::Receiver<WorkerSettings>,
    environment: Arc<E>,
    env_changes: watch::Receiver<()>,
    sampler: S,
}

impl<L, E, S> ProxyCore<L, E, S>
where
    L: ProcessLauncher,
    E: EnvironmentProvider,
    S: MemorySampler,
{
    async fn run(mut self) {
        self.set_state(ProxyState::Initializing);
        self.rebuild_search_paths().await;
        self.start_worker("initial start");

        let period = self.options.watchdog_interval;
        let mut watchdog_timer = interval_at(Instant::now() + period, period);
        watchdog_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut settings_open = true;
        let mut env_open = true;

        loop {
            if self.state == ProxyState::Ready {
                self.flush_deferred();
            }

            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        // Every handle is gone.
                        self.dispose();
                        break;
                    };
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
                Some(event) = self.events.recv() => self.handle_event(event),
                _ = watchdog_timer.tick() => self.check_resources(),
                changed = self.settings_rx.changed(), if settings_open => {
                    match changed {
                        Ok(()) => self.apply_settings().await,
                        Err(_) => settings_open = false,
                    }
                }
                changed = self.env_changes.changed(), if env_open => {
                    match changed {
                        Ok(()) => self.env_debounce.poke(Instant::now()),
                        Err(_) => env_open = false,
                    }
                }
                () = until(self.env_debounce.deadline()), if self.env_debounce.deadline().is_some() => {
                    if self.env_debounce.take_due(Instant::now()) {
                        self.on_environment_changed().await;
                    }
                }
                () = until(self.respawn_at), if self.respawn_at.is_some() => {
                    self.respawn_at = None;
                    self.respawn_after_failure();
                }
            }
        }
        tracing::debug!("Proxy core stopped");
    }

    fn set_state(&mut self, state: ProxyState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "Proxy state");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Submit {
                request,
                token,
                reply,
            } => match self.state {
                ProxyState::Ready => self.dispatch(request, token, reply),
                ProxyState::Uninitialized | ProxyState::Initializing | ProxyState::Restarting => {
                    self.deferred.push_back(Deferred {
                        request,
                        token,
                        reply,
                    });
                }
                ProxyState::NotStarted => {
                    let _ = reply.send(Err(ProxyError::TransportUnavailable));
                }
                ProxyState::Failed => {
                    let _ = reply.send(Err(ProxyError::Fatal {
                        attempts: self.failed_attempts,
                    }));
                }
                ProxyState::Disposed => {
                    let _ = reply.send(Err(ProxyError::Disposed));
                }
            },
            Command::Restart { reply } => {
                tracing::info!("Worker restart requested");
                self.budget.reset();
                self.restart("restart requested");
                let _ = reply.send(());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Dispose { reply } => {
                self.dispose();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn stats(&self) -> ProxyStats {
        ProxyStats {
            state: self.state,
            pending: self.table.len(),
            queued: self.table.queue_len(),
            parked: self.table.parked_len(),
            deferred: self.deferred.len(),
            responses_processed: self.responses_processed,
            pid: self.supervisor.pid(),
        }
    }

    /// Queue one request for the worker and register it.
    fn dispatch(&mut self, request: Request, token: Option<CancellationToken>, reply: Reply) {
        if token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            let _ = reply.send(Ok(None));
            return;
        }

        let kind = request.kind();
        for (id, superseded) in self.table.supersede_parked(kind) {
            tracing::trace!(%id, %kind, "Parked request superseded");
            superseded.resolve(None);
        }

        let id = RequestId::new(self.ids.fetch_add(1, Ordering::SeqCst));
        let line = match encode_line(&WireRequest::new(id, &request, self.search_paths.as_slice()))
        {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(%id, "Failed to encode worker request: {e}");
                let _ = reply.send(Ok(None));
                return;
            }
        };

        if let Err(e) = self.supervisor.write(&line) {
            tracing::warn!(%id, "Worker write failed: {e}");
            let _ = reply.send(Err(ProxyError::StreamClosed(e.to_string())));
            let uptime = self.supervisor.uptime();
            self.on_worker_failure(uptime, "write failed");
            return;
        }

        tracing::trace!(%id, %kind, "Request sent");
        self.table.insert(id, kind, Pending { reply, token });
        for (id, evicted) in self.table.evict_overflow(self.options.queue_ceiling) {
            tracing::debug!(%id, "Request evicted by backpressure");
            evicted.resolve(None);
        }
    }

    fn flush_deferred(&mut self) {
        while self.state == ProxyState::Ready
            && let Some(deferred) = self.deferred.pop_front()
        {
            self.dispatch(deferred.request, deferred.token, deferred.reply);
        }
    }

    fn reject_deferred(&mut self, error: &ProxyError) {
        for deferred in self.deferred.drain(..) {
            let _ = deferred.reply.send(Err(error.clone()));
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        if !self.supervisor.is_current(event.generation) {
            tracing::trace!(generation = event.generation, "Ignoring stale worker event");
            return;
        }
        match event.kind {
            WorkerEventKind::Stdout(bytes) => {
                let decoded = self.decoder.push(&bytes);
                for error in decoded.errors {
                    if error.is_incomplete() {
                        tracing::debug!("Dropped truncated worker line: {error}");
                    } else if let Some(suppressed) = self.malformed_log.admit(Instant::now()) {
                        if suppressed > 0 {
                            tracing::warn!("{suppressed} malformed worker lines suppressed");
                        }
                        tracing::warn!("{error}");
                    }
                }
                for message in decoded.messages {
                    self.on_message(message);
                }
            }
            WorkerEventKind::Stderr(line) => {
                if let Some(suppressed) = self.stderr_log.admit(Instant::now()) {
                    if suppressed > 0 {
                        tracing::warn!("{suppressed} worker stderr lines suppressed");
                    }
                    tracing::warn!(target: "sidekick_worker::stderr", "{line}");
                }
            }
            WorkerEventKind::StdinClosed(message) => {
                tracing::warn!(generation = event.generation, "{message}");
                let error = ProxyError::StreamClosed(message);
                for (_, entry) in self.table.drain() {
                    entry.fail(error.clone());
                }
                let uptime = self.supervisor.uptime();
                self.on_worker_failure(uptime, "stdin closed");
            }
            WorkerEventKind::Exited(code) => {
                tracing::warn!(generation = event.generation, ?code, "Worker exited unexpectedly");
                let uptime = self.supervisor.uptime();
                self.on_worker_failure(uptime, "worker exited");
            }
            WorkerEventKind::Failed(message) => {
                tracing::warn!(generation = event.generation, "Worker transport failed: {message}");
                let uptime = self.supervisor.uptime();
                self.on_worker_failure(uptime, "transport failed");
            }
        }
    }

    fn on_message(&mut self, message: Value) {
        self.responses_processed += 1;
        let envelope = ResponseEnvelope::from_value(message);
        let Some(id) = envelope.id else {
            tracing::trace!("Discarding worker message without id");
            return;
        };
        let Some(kind) = self.table.kind_of(id) else {
            tracing::trace!(%id, "Discarding late or duplicate response");
            return;
        };
        if envelope.has_arguments {
            // Non-terminal: the worker answers this id again.
            self.table.park(id);
            return;
        }
        let Some(entry) = self.table.remove(id) else {
            return;
        };
        if entry.is_cancelled() {
            tracing::trace!(%id, "Response for cancelled request consumed");
            entry.resolve(None);
            return;
        }
        match protocol::shape(kind, envelope.results) {
            Ok(result) => entry.resolve(Some(result)),
            Err(e) => {
                tracing::warn!(%id, %kind, "Unexpected worker result shape: {e}");
                entry.resolve(None);
            }
        }
    }

    fn check_resources(&mut self) {
        let pid = if self.state == ProxyState::Ready {
            self.supervisor.pid()
        } else {
            None
        };
        let verdict = self.watchdog.tick(
            Instant::now(),
            pid,
            self.responses_processed,
            &mut self.sampler,
        );
        if let Verdict::Restart {
            observed_mb,
            limit_mb,
        } = verdict
        {
            tracing::warn!(observed_mb, limit_mb, "Worker exceeded memory ceiling");
            self.restart("memory ceiling exceeded");
        }
    }

    /// Resolve everything outstanding with no result.
    fn drain_pending(&mut self) {
        let drained = self.table.drain();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Draining pending requests");
        }
        for (_, entry) in drained {
            entry.resolve(None);
        }
        self.decoder.reset();
    }

    fn spawn_spec(&self) -> Result<SpawnSpec, SpawnError> {
        let interpreter = self.settings.interpreter();
        let program = self
            .supervisor
            .launcher()
            .executable_path(interpreter)
            .map_err(|source| SpawnError::Launch {
                program: interpreter.map_or_else(|| PathBuf::from("python"), PathBuf::from),
                source,
            })?;
        let mut spec = SpawnSpec::new(program)
            .arg(self.settings.script())
            .current_dir(&self.options.workspace);
        if let Some(worker_path) = self.settings.worker_path() {
            spec = spec.arg(worker_path);
        }
        if let Some(python_path) = self.search_paths.joined() {
            spec = spec.env(PYTHONPATH, python_path);
        }
        Ok(spec)
    }

    fn spawn_worker(&mut self) -> Result<(), SpawnError> {
        let spec = self.spawn_spec()?;
        self.supervisor.spawn(&spec)?;
        Ok(())
    }

    /// Spawn a fresh worker; a failure parks the proxy in `NotStarted`.
    fn start_worker(&mut self, reason: &str) {
        match self.spawn_worker() {
            Ok(()) => {
                tracing::info!(reason, "Worker ready");
                self.set_state(ProxyState::Ready);
            }
            Err(e) => {
                tracing::warn!(reason, "Worker not started: {e}");
                self.set_state(ProxyState::NotStarted);
                self.reject_deferred(&ProxyError::TransportUnavailable);
            }
        }
    }

    /// Kill, drain and respawn.
    fn restart(&mut self, reason: &str) {
        self.set_state(ProxyState::Restarting);
        self.supervisor.kill();
        self.respawn_at = None;
        self.drain_pending();
        self.start_worker(reason);
    }

    fn on_worker_failure(&mut self, uptime: Option<Duration>, reason: &str) {
        self.supervisor.kill();
        self.drain_pending();
        match self.budget.record_failure(uptime) {
            RetryDecision::Retry { attempt, delay } => {
                tracing::info!(attempt, ?delay, reason, "Restarting worker");
                self.set_state(ProxyState::Restarting);
                if delay.is_zero() {
                    self.respawn_after_failure();
                } else {
                    self.respawn_at = Some(Instant::now() + delay);
                }
            }
            RetryDecision::GiveUp { attempts } => {
                tracing::error!(attempts, reason, "Worker keeps failing; giving up");
                self.failed_attempts = attempts;
                self.set_state(ProxyState::Failed);
                self.reject_deferred(&ProxyError::Fatal { attempts });
            }
        }
    }

    fn respawn_after_failure(&mut self) {
        match self.spawn_worker() {
            Ok(()) => {
                tracing::info!(attempt = self.budget.attempts(), "Worker respawned");
                self.set_state(ProxyState::Ready);
            }
            Err(e) => {
                tracing::warn!("Worker respawn failed: {e}");
                self.on_worker_failure(None, "respawn failed");
            }
        }
    }

    async fn rebuild_search_paths(&mut self) {
        self.search_paths = search_paths::build(
            &self.settings,
            &self.options.workspace,
            self.supervisor.launcher().as_ref(),
            self.environment.as_ref(),
        )
        .await;
    }

    async fn apply_settings(&mut self) {
        let next = self.settings_rx.borrow_and_update().clone();
        if next == self.settings {
            return;
        }
        let needs_restart = self.settings.requires_restart(&next);
        let paths_changed = self.settings.extra_paths() != next.extra_paths();
        self.watchdog.set_limit(next.memory_limit());
        self.settings = next;

        if needs_restart {
            tracing::info!("Worker settings changed; restarting");
            self.budget.reset();
            self.rebuild_search_paths().await;
            self.restart("settings changed");
        } else if paths_changed {
            self.rebuild_search_paths().await;
        }
    }

    async fn on_environment_changed(&mut self) {
        let before = self.search_paths.clone();
        self.rebuild_search_paths().await;
        if before != self.search_paths
            && matches!(self.state, ProxyState::Ready | ProxyState::NotStarted)
        {
            tracing::info!("Environment search paths changed; restarting worker");
            self.restart("environment changed");
        }
    }

    fn dispose(&mut self) {
        tracing::info!("Disposing worker proxy");
        self.set_state(ProxyState::Disposed);
        self.supervisor.kill();
        self.respawn_at = None;
        self.drain_pending();
        self.reject_deferred(&ProxyError::Disposed);
    }
}
