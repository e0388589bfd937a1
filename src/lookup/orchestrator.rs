//! Concurrent fetch orchestration for a single lookup.
//!
//! A lookup moves through `Pending → Dispatching → Awaiting(n) → Merging → Done`.
//! Every adapter call is gated by its rate limiter and bounded by a per-call
//! deadline that never exceeds the global one. Adapter failures become
//! diagnostics; only the aggregate outcome reaches the caller.

use futures_util::stream::{FuturesUnordered, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::Instrument;

use super::merge::merge;
use super::policy::{ExecutionMode, Plan};
use super::AggregateError;
use crate::models::{Diagnostic, Diagnostics, LookupResult, PartialRecord, Query};
use crate::sources::{RegisteredSource, SourceError, SourceErrorKind};

/// Lifecycle of one lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Pending,
    Dispatching,
    /// Adapter calls still in flight
    Awaiting(usize),
    Merging,
    Done,
}

impl fmt::Display for FetchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchState::Pending => f.write_str("PENDING"),
            FetchState::Dispatching => f.write_str("DISPATCHING"),
            FetchState::Awaiting(n) => write!(f, "AWAITING({})", n),
            FetchState::Merging => f.write_str("MERGING"),
            FetchState::Done => f.write_str("DONE"),
        }
    }
}

/// Per-lookup scratch state. Lives only for the duration of one lookup.
struct Fetch {
    state: FetchState,
    diagnostics: Diagnostics,
    partials: Vec<PartialRecord>,
    deadline_hit: bool,
}

impl Fetch {
    fn new() -> Self {
        Self {
            state: FetchState::Pending,
            diagnostics: Diagnostics::new(),
            partials: Vec::new(),
            deadline_hit: false,
        }
    }

    fn transition(&mut self, next: FetchState) {
        tracing::debug!("{} -> {}", self.state, next);
        self.state = next;
    }

    fn complete(&mut self, result: Result<PartialRecord, SourceError>, latency: Duration) {
        match result {
            Ok(partial) => {
                tracing::debug!(
                    "[{}] ok: {} fields in {:?}",
                    partial.source(),
                    partial.len(),
                    latency
                );
                self.diagnostics
                    .push(Diagnostic::success(partial.source(), partial.len(), latency));
                self.partials.push(partial);
            }
            Err(err) => {
                tracing::warn!("{} (after {:?})", err, latency);
                self.diagnostics.push(Diagnostic::failure(err, latency));
            }
        }
    }

    /// Synthetic timeout for a source the global deadline cut off
    fn cut_off(&mut self, source: &str, detail: &str, latency: Duration) {
        self.deadline_hit = true;
        let err = SourceError::new(source, SourceErrorKind::Timeout, detail);
        tracing::warn!("{}", err);
        self.diagnostics.push(Diagnostic::failure(err, latency));
    }
}

/// Run one lookup to completion under `deadline`
pub(crate) async fn run(
    query: Query,
    plan: Plan,
    deadline: Instant,
) -> Result<LookupResult, AggregateError> {
    let span = tracing::info_span!(
        "lookup",
        kind = %query.kind(),
        mode = %plan.mode,
        sources = plan.sources.len()
    );
    execute(Arc::new(query), plan, deadline).instrument(span).await
}

async fn execute(
    query: Arc<Query>,
    plan: Plan,
    deadline: Instant,
) -> Result<LookupResult, AggregateError> {
    let started = Instant::now();
    let mut fetch = Fetch::new();

    fetch.transition(FetchState::Dispatching);
    match plan.mode {
        ExecutionMode::Sequential => sequential(&mut fetch, &query, &plan.sources, deadline).await,
        ExecutionMode::Parallel => parallel(&mut fetch, &query, &plan.sources, deadline).await,
    }

    fetch.transition(FetchState::Merging);
    if Instant::now() >= deadline {
        fetch.deadline_hit = true;
    }
    let Fetch {
        diagnostics,
        partials,
        deadline_hit,
        ..
    } = fetch;
    let elapsed = started.elapsed();

    match merge(&partials) {
        Ok(record) => {
            tracing::info!(
                "Lookup for '{}' merged {} fields from {} in {:?}",
                query.key(),
                record.len(),
                record.sources().join(", "),
                elapsed
            );
            tracing::debug!("{} -> {}", FetchState::Merging, FetchState::Done);
            Ok(LookupResult {
                record,
                diagnostics,
                mode: plan.mode,
                elapsed,
            })
        }
        Err(empty) => {
            tracing::info!(
                "Lookup for '{}' found nothing in {:?}: {}",
                query.key(),
                elapsed,
                diagnostics.summary()
            );
            tracing::debug!("{} -> {}", FetchState::Merging, FetchState::Done);
            if deadline_hit {
                Err(AggregateError::DeadlineExceeded {
                    elapsed,
                    diagnostics,
                    record: empty.record,
                })
            } else {
                Err(AggregateError::NoResult {
                    diagnostics,
                    record: empty.record,
                })
            }
        }
    }
}

/// Acquire a token, then call the adapter, all within `call_deadline`
async fn invoke(
    source: RegisteredSource,
    query: Arc<Query>,
    call_deadline: Instant,
) -> (Result<PartialRecord, SourceError>, Duration) {
    let started = Instant::now();
    let name = source.name().to_string();

    let budget = call_deadline.saturating_duration_since(Instant::now());
    let result = match source.limiter.acquire(budget).await {
        Err(err) => Err(err),
        Ok(()) => {
            tracing::debug!("[{}] dispatch, budget {:?}", name, budget);
            let call = source.adapter.call(&query, call_deadline);
            match tokio::time::timeout_at(call_deadline, call).await {
                Ok(Ok(partial)) if partial.is_empty() => {
                    Err(SourceError::not_found(&name, "empty record"))
                }
                Ok(result) => result,
                Err(_) => Err(SourceError::timeout(&name)),
            }
        }
    };

    (result, started.elapsed())
}

/// Try each source in order; stop at the first success.
///
/// Each call gets `remaining / untried` of the budget so one slow source
/// cannot starve the rest.
async fn sequential(
    fetch: &mut Fetch,
    query: &Arc<Query>,
    sources: &[RegisteredSource],
    deadline: Instant,
) {
    let total = sources.len();

    for (i, source) in sources.iter().enumerate() {
        let now = Instant::now();
        let remaining = deadline.saturating_duration_since(now);
        if remaining.is_zero() {
            for skipped in &sources[i..] {
                fetch.cut_off(
                    skipped.name(),
                    "not attempted: lookup deadline exceeded",
                    Duration::ZERO,
                );
            }
            return;
        }

        let untried = u32::try_from(total - i).unwrap_or(u32::MAX);
        let call_deadline = now + remaining / untried;

        fetch.transition(FetchState::Awaiting(1));
        let (result, latency) = invoke(source.clone(), Arc::clone(query), call_deadline).await;
        fetch.transition(FetchState::Awaiting(0));

        let succeeded = result.is_ok();
        fetch.complete(result, latency);
        if succeeded {
            if i + 1 < total {
                tracing::debug!(
                    "Short-circuit after {}; {} sources not invoked",
                    source.name(),
                    total - i - 1
                );
            }
            return;
        }
    }
}

/// Call every source at once and collect results until all finish or the
/// global deadline elapses. Stragglers get a synthetic timeout and are aborted.
async fn parallel(
    fetch: &mut Fetch,
    query: &Arc<Query>,
    sources: &[RegisteredSource],
    deadline: Instant,
) {
    let started = Instant::now();
    let mut in_flight = FuturesUnordered::new();
    let mut aborts: Vec<AbortHandle> = Vec::with_capacity(sources.len());

    for (index, source) in sources.iter().enumerate() {
        let handle = tokio::spawn(invoke(source.clone(), Arc::clone(query), deadline));
        aborts.push(handle.abort_handle());
        in_flight.push(async move { (index, handle.await) });
    }

    let mut done = vec![false; sources.len()];
    let mut outstanding = sources.len();
    fetch.transition(FetchState::Awaiting(outstanding));

    let collected = tokio::time::timeout_at(deadline, async {
        while let Some((index, joined)) = in_flight.next().await {
            done[index] = true;
            outstanding -= 1;
            match joined {
                Ok((result, latency)) => fetch.complete(result, latency),
                Err(join_err) => fetch.complete(
                    Err(SourceError::unreachable(
                        sources[index].name(),
                        format!("adapter task failed: {}", join_err),
                    )),
                    started.elapsed(),
                ),
            }
            fetch.transition(FetchState::Awaiting(outstanding));
        }
    })
    .await;

    if collected.is_err() {
        let latency = started.elapsed();
        for (index, source) in sources.iter().enumerate() {
            if !done[index] {
                aborts[index].abort();
                fetch.cut_off(source.name(), "lookup deadline exceeded", latency);
            }
        }
    }
}
