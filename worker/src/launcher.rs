//! Process launching seam.
//!
//! The supervisor never touches `tokio::process` directly; it goes through
//! [`ProcessLauncher`] so tests can hand it in-memory pipes.

use std::ffi::{OsStr, OsString};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Interpreters tried, in order, when none is configured.
const DEFAULT_INTERPRETERS: [&str; 2] = ["python3", "python"];

/// What to run and how.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnSpec {
    program: PathBuf,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    env: Vec<(OsString, OsString)>,
}

impl SpawnSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    #[must_use]
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    #[must_use]
    pub fn env_var(&self, key: &str) -> Option<&OsStr> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)));
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

/// A running worker as seen by the supervisor.
pub trait WorkerChild: Send + 'static {
    fn id(&self) -> Option<u32>;

    /// Ask the process to die without waiting for it.
    fn start_kill(&mut self) -> io::Result<()>;

    /// Wait for exit and return the exit code (`None` when killed by a signal).
    fn wait(&mut self) -> impl Future<Output = io::Result<Option<i32>>> + Send;
}

impl WorkerChild for Child {
    fn id(&self) -> Option<u32> {
        Child::id(self)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        Child::start_kill(self)
    }

    fn wait(&mut self) -> impl Future<Output = io::Result<Option<i32>>> + Send {
        async move { Child::wait(self).await.map(|status| status.code()) }
    }
}

/// Handles for a freshly spawned worker.
pub struct SpawnedWorker<C> {
    pub child: C,
    pub stdin: BoxedWriter,
    pub stdout: BoxedReader,
    pub stderr: Option<BoxedReader>,
}

pub trait ProcessLauncher: Send + Sync + 'static {
    type Child: WorkerChild;

    /// Start a long-lived process with piped stdin/stdout.
    fn spawn(&self, spec: &SpawnSpec) -> io::Result<SpawnedWorker<Self::Child>>;

    /// Run a process to completion and capture its stdout.
    fn exec(&self, spec: &SpawnSpec) -> impl Future<Output = io::Result<String>> + Send;

    /// Resolve the interpreter to an executable path.
    fn executable_path(&self, interpreter: Option<&Path>) -> io::Result<PathBuf>;
}

/// Production launcher over `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

impl ProcessLauncher for TokioLauncher {
    type Child = Child;

    fn spawn(&self, spec: &SpawnSpec) -> io::Result<SpawnedWorker<Child>> {
        let mut child = spec
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("no stdin from child"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("no stdout from child"))?;
        let stderr = child
            .stderr
            .take()
            .map(|pipe| Box::new(pipe) as BoxedReader);

        Ok(SpawnedWorker {
            child,
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr,
        })
    }

    async fn exec(&self, spec: &SpawnSpec) -> io::Result<String> {
        let output = spec
            .command()
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(io::Error::other(format!(
                "{} exited with {}: {}",
                spec.program.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn executable_path(&self, interpreter: Option<&Path>) -> io::Result<PathBuf> {
        if let Some(interpreter) = interpreter {
            return which::which(interpreter).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} not found: {e}", interpreter.display()),
                )
            });
        }
        DEFAULT_INTERPRETERS
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("none of {DEFAULT_INTERPRETERS:?} found in PATH"),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_spec_builder() {
        let spec = SpawnSpec::new("python3")
            .arg("completion.py")
            .arg("custom")
            .current_dir("/work")
            .env("PYTHONPATH", "/a")
            .env("PYTHONPATH", "/b");
        assert_eq!(spec.program(), Path::new("python3"));
        assert_eq!(spec.args().len(), 2);
        assert_eq!(spec.cwd(), Some(Path::new("/work")));
        assert_eq!(spec.env_var("PYTHONPATH"), Some(OsStr::new("/b")));
        assert_eq!(spec.env_var("HOME"), None);
    }

    #[test]
    fn missing_interpreter_is_not_found() {
        let err = TokioLauncher
            .executable_path(Some(Path::new("/definitely/not/a/python")))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_captures_stdout() {
        let out = TokioLauncher
            .exec(&SpawnSpec::new("sh").arg("-c").arg("echo hello"))
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exec_reports_failure_status() {
        let err = TokioLauncher
            .exec(&SpawnSpec::new("sh").arg("-c").arg("echo oops >&2; exit 3"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("oops"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_child_can_be_killed() {
        let mut worker = TokioLauncher
            .spawn(&SpawnSpec::new("sh").arg("-c").arg("sleep 30"))
            .unwrap();
        assert!(WorkerChild::id(&worker.child).is_some());
        WorkerChild::start_kill(&mut worker.child).unwrap();
        let code = WorkerChild::wait(&mut worker.child).await.unwrap();
        assert_eq!(code, None);
    }
}
