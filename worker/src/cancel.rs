//! Cancellation adapter with per-kind supersession.
//!
//! At most one cancelable call per request kind is in flight through a
//! [`CancellableProxy`]. A newer call of the same kind cancels the older
//! one's token; the older caller gets `Ok(None)` right away while the core
//! still consumes the worker's late answer to keep the stream in step.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use sidekick_types::{Request, RequestKind, WorkerResult};

use crate::proxy::{ProxyError, ProxyHandle};

struct InFlight {
    seq: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct Slots {
    next_seq: u64,
    by_kind: HashMap<RequestKind, InFlight>,
}

pub struct CancellableProxy {
    proxy: ProxyHandle,
    slots: Mutex<Slots>,
}

impl CancellableProxy {
    #[must_use]
    pub fn new(proxy: ProxyHandle) -> Self {
        Self {
            proxy,
            slots: Mutex::new(Slots::default()),
        }
    }

    #[must_use]
    pub fn proxy(&self) -> &ProxyHandle {
        &self.proxy
    }

    /// Submit `request`, superseding any in-flight call of the same kind.
    ///
    /// The call's token is a child of `caller` when given, so cancelling the
    /// caller's token also cancels this call.
    pub async fn send_cancelable(
        &self,
        request: Request,
        caller: Option<&CancellationToken>,
    ) -> Result<Option<WorkerResult>, ProxyError> {
        let kind = request.kind();
        let token = caller.map_or_else(CancellationToken::new, CancellationToken::child_token);
        let seq = self.claim(kind, token.clone());

        let result = tokio::select! {
            biased;
            () = token.cancelled() => Ok(None),
            result = self.proxy.submit_with_token(request, token.clone()) => result,
        };

        self.release(kind, seq);
        result
    }

    /// Submit `request` without supersession.
    ///
    /// `token` is only consulted when the answer arrives: if it was cancelled
    /// by then, the call resolves with no result.
    pub async fn send_non_cancelable(
        &self,
        request: Request,
        token: Option<CancellationToken>,
    ) -> Result<Option<WorkerResult>, ProxyError> {
        match token {
            Some(token) => self.proxy.submit_with_token(request, token).await,
            None => self.proxy.submit(request).await,
        }
    }

    /// Cancel every in-flight cancelable call.
    pub fn cancel_all(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, in_flight) in slots.by_kind.drain() {
            in_flight.token.cancel();
        }
    }

    fn claim(&self, kind: RequestKind, token: CancellationToken) -> u64 {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.next_seq += 1;
        let seq = slots.next_seq;
        if let Some(previous) = slots.by_kind.insert(kind, InFlight { seq, token }) {
            tracing::trace!(%kind, "Superseding in-flight request");
            previous.token.cancel();
        }
        seq
    }

    fn release(&self, kind: RequestKind, seq: u64) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.by_kind.get(&kind).is_some_and(|slot| slot.seq == seq) {
            slots.by_kind.remove(&kind);
        }
    }
}

impl Drop for CancellableProxy {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
