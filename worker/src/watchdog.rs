//! Resource watchdog.
//!
//! Samples the worker's resident memory on a timer and asks for a restart
//! when it grows past the configured ceiling. Sampling is skipped while the
//! worker has not answered anything new since the previous sample.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use sidekick_types::MemoryLimit;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::time::Instant;

/// Default sampling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

/// Window in which repeated sampling failures disable the watchdog.
pub const FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// Failures tolerated per window before sampling is switched off.
const MAX_WINDOW_FAILURES: u32 = 2;

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SampleError {
    #[error("process {pid} not found")]
    NotFound { pid: u32 },
    #[error("memory sampling unsupported: {0}")]
    Unsupported(String),
}

/// Source of memory readings for a process tree.
pub trait MemorySampler: Send + 'static {
    /// Resident bytes used by `pid` and its descendants.
    fn sample(&mut self, pid: u32) -> Result<u64, SampleError>;
}

/// Production sampler backed by `sysinfo`.
pub struct SysinfoSampler {
    system: System,
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoSampler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample(&mut self, pid: u32) -> Result<u64, SampleError> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let root = Pid::from_u32(pid);
        if self.system.process(root).is_none() {
            return Err(SampleError::NotFound { pid });
        }

        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (proc_pid, process) in self.system.processes() {
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*proc_pid);
            }
        }

        let mut stack = vec![root];
        let mut seen: HashSet<Pid> = HashSet::new();
        let mut total: u64 = 0;
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(process) = self.system.process(current) {
                total = total.saturating_add(process.memory());
            }
            if let Some(kids) = children.get(&current) {
                stack.extend(kids.iter().filter(|kid| !seen.contains(*kid)));
            }
        }
        Ok(total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotRunning,
    Disabled,
    NoNewResponses,
    /// Sampling failed but the failure budget is not exhausted.
    SampleFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Skip(SkipReason),
    Healthy { observed_mb: u64 },
    Restart { observed_mb: u64, limit_mb: u64 },
    /// Sampling failed too often; the watchdog is now off for good.
    Disabled,
}

#[derive(Debug)]
pub struct ResourceWatchdog {
    limit: MemoryLimit,
    tripped: bool,
    last_sampled_responses: Option<u64>,
    failures: u32,
    window_start: Instant,
}

impl ResourceWatchdog {
    #[must_use]
    pub fn new(limit: MemoryLimit, now: Instant) -> Self {
        Self {
            limit,
            tripped: false,
            last_sampled_responses: None,
            failures: 0,
            window_start: now,
        }
    }

    #[must_use]
    pub fn limit(&self) -> MemoryLimit {
        self.limit
    }

    pub fn set_limit(&mut self, limit: MemoryLimit) {
        if self.limit != limit {
            tracing::debug!(?limit, "Memory ceiling changed");
        }
        self.limit = limit;
    }

    /// Whether the failure policy has switched sampling off.
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Run one check.
    ///
    /// `responses_processed` is a monotonically increasing count of
    /// responses handled by the proxy.
    pub fn tick(
        &mut self,
        now: Instant,
        pid: Option<u32>,
        responses_processed: u64,
        sampler: &mut dyn MemorySampler,
    ) -> Verdict {
        let Some(pid) = pid else {
            return Verdict::Skip(SkipReason::NotRunning);
        };
        let Some(limit_mb) = self.limit.megabytes() else {
            return Verdict::Skip(SkipReason::Disabled);
        };
        if self.tripped {
            return Verdict::Skip(SkipReason::Disabled);
        }
        if self.last_sampled_responses == Some(responses_processed) {
            return Verdict::Skip(SkipReason::NoNewResponses);
        }
        self.last_sampled_responses = Some(responses_processed);

        match sampler.sample(pid) {
            Ok(bytes) => {
                let observed_mb = bytes / BYTES_PER_MB;
                tracing::trace!(pid, observed_mb, limit_mb, "Worker memory sampled");
                if observed_mb > limit_mb {
                    Verdict::Restart {
                        observed_mb,
                        limit_mb,
                    }
                } else {
                    Verdict::Healthy { observed_mb }
                }
            }
            Err(e) => self.record_failure(now, &e),
        }
    }

    /// Count a failed sample. The verdict on the count is only taken once
    /// the window has run its course; the counter then starts over.
    fn record_failure(&mut self, now: Instant, error: &SampleError) -> Verdict {
        self.failures += 1;
        tracing::debug!(failures = self.failures, "Worker memory sampling failed: {error}");
        if now.duration_since(self.window_start) < FAILURE_WINDOW {
            return Verdict::Skip(SkipReason::SampleFailed);
        }
        let exceeded = self.failures > MAX_WINDOW_FAILURES;
        self.failures = 0;
        self.window_start = now;
        if exceeded {
            self.tripped = true;
            tracing::warn!("Disabling worker memory checks after repeated sampling failures");
            return Verdict::Disabled;
        }
        Verdict::Skip(SkipReason::SampleFailed)
    }
}
