//! Sidekick CLI - one-shot code-intelligence queries against a supervised worker.
//!
//! ```text
//! sidekick <kind> <file> [line column]
//! ```
//!
//! Loads `~/.sidekick/config.toml`, starts a worker proxy for the current
//! directory, submits a single request and prints the shaped result as JSON
//! on stdout. Logs never go to stdout.

use anyhow::{Context, Result, bail};
use std::{
    env,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use sidekick_config::{SettingsRegistry, SidekickConfig};
use sidekick_types::{Position, Request, RequestKind, SourceText};
use sidekick_worker::{
    CancellableProxy, Collaborators, ProcessEnvironment, Proxy, ProxyOptions, ProxyState,
    SysinfoSampler, TokioLauncher,
};

const LOG_FILE: &str = "sidekick.log";

const USAGE: &str = "usage: sidekick <completions|definitions|hover|usages|symbols|arguments> <file> [line column]";

/// Where log records go. Stdout carries the result, so never there.
#[derive(Debug)]
enum LogSink {
    File(PathBuf, File),
    Stderr,
}

impl LogSink {
    /// Append to the first candidate that opens, noting each one that did
    /// not. Falls back to stderr.
    fn open(candidates: &[PathBuf], problems: &mut Vec<String>) -> Self {
        candidates
            .iter()
            .find_map(|path| match append_to(path) {
                Ok(file) => Some(Self::File(path.clone(), file)),
                Err(e) => {
                    problems.push(format!("{}: {e}", path.display()));
                    None
                }
            })
            .unwrap_or(Self::Stderr)
    }
}

fn append_to(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// `~/.sidekick/logs/sidekick.log`, then the same under the working directory.
fn log_file_candidates() -> Vec<PathBuf> {
    let local = PathBuf::from(".sidekick");
    sidekick_config::sidekick_dir()
        .into_iter()
        .chain([local])
        .map(|dir| dir.join("logs").join(LOG_FILE))
        .collect()
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let mut problems = Vec::new();
    let (writer, ansi, path) = match LogSink::open(&log_file_candidates(), &mut problems) {
        LogSink::File(path, file) => (BoxMakeWriter::new(Mutex::new(file)), false, Some(path)),
        LogSink::Stderr => (BoxMakeWriter::new(io::stderr), true, None),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(ansi).with_writer(writer))
        .with(filter)
        .init();

    if let Some(path) = path {
        tracing::debug!(path = %path.display(), "Logging to file");
    }
    for problem in problems {
        tracing::warn!("Log file unavailable: {problem}");
    }
}

/// A parsed command line.
#[derive(Debug, PartialEq, Eq)]
struct Query {
    kind: RequestKind,
    file: PathBuf,
    position: Option<Position>,
}

impl Query {
    fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let (Some(kind), Some(file)) = (args.next(), args.next()) else {
            bail!("{USAGE}");
        };
        let kind = RequestKind::from_name(&kind)
            .with_context(|| format!("unknown request kind {kind:?}\n{USAGE}"))?;

        let position = match (args.next(), args.next()) {
            (Some(line), Some(column)) => Some(Position::new(
                line.parse().with_context(|| format!("invalid line {line:?}"))?,
                column
                    .parse()
                    .with_context(|| format!("invalid column {column:?}"))?,
            )),
            (None, None) => None,
            _ => bail!("line and column must be given together\n{USAGE}"),
        };
        if args.next().is_some() {
            bail!("too many arguments\n{USAGE}");
        }

        Ok(Self {
            kind,
            file: PathBuf::from(file),
            position,
        })
    }

    fn into_request(self) -> Result<Request> {
        Request::new(self.kind, self.file, SourceText::OnDisk, self.position)
            .context("invalid request")
    }
}

fn load_registry(workspace: &Path) -> Result<SettingsRegistry> {
    let path = SidekickConfig::path().context("could not determine the home directory")?;
    let config = SidekickConfig::load()?
        .with_context(|| format!("no config file at {}", path.display()))?;
    let settings = config.worker_settings(workspace, &path)?;
    Ok(SettingsRegistry::new(settings))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let query = Query::parse(env::args().skip(1))?;
    let request = query.into_request()?;
    let workspace = env::current_dir().context("failed to read the current directory")?;
    let registry = load_registry(&workspace)?;

    let handle = Proxy::start(
        ProxyOptions::new(&workspace),
        Arc::new(TokioLauncher),
        Collaborators {
            settings: registry.subscribe(&workspace),
            environment: Arc::new(ProcessEnvironment::new()),
            sampler: SysinfoSampler::new(),
        },
    );

    let mut state = handle.state();
    let ready = state
        .wait_for(|s| !matches!(s, ProxyState::Uninitialized | ProxyState::Initializing))
        .await
        .map(|s| *s);
    if let Ok(state) = ready
        && state != ProxyState::Ready
    {
        tracing::warn!(%state, "Worker did not start");
    }

    let proxy = CancellableProxy::new(handle.clone());
    let outcome = proxy.send_cancelable(request, None).await;
    handle.dispose().await;

    match outcome? {
        Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
        None => println!("null"),
    }
    Ok(())
}
