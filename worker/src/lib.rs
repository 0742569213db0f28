//! Code-intelligence worker proxy.
//!
//! Owns a long-lived analysis process and turns its line-delimited JSON
//! stream into a "submit a request, get the correlated result" interface.
//! The process is restarted on crashes and memory blowups, outstanding work
//! is bounded by backpressure eviction, and callers can cancel cooperatively.

pub mod codec;
pub mod launcher;
pub mod middleware;
pub mod search_paths;
pub mod supervisor;
pub mod table;
pub mod watchdog;

pub(crate) mod protocol;

mod cancel;
mod proxy;

#[cfg(test)]
mod test_support;

pub use cancel::CancellableProxy;
pub use launcher::{ProcessLauncher, SpawnSpec, TokioLauncher, WorkerChild};
pub use proxy::{
    Collaborators, ENV_DEBOUNCE, Proxy, ProxyError, ProxyHandle, ProxyOptions, ProxyState,
    ProxyStats,
};
pub use search_paths::{EnvironmentProvider, ProcessEnvironment, SearchPaths};
pub use watchdog::{MemorySampler, SampleError, SysinfoSampler};
