//! The URL Resolver (§4.2): follows redirects for every URL lacking a
//! `ResolvedUrlRecord`, at a bounded rate, writing outcomes back exactly
//! once per URL.
//!
//! HTTP is the only suspension point in the system worth an async runtime
//! (§5), so this module, unlike the join engine, drives its worker pool
//! with `futures`/`tokio` rather than `std::thread::scope`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use coord_util_error::FmtCompact as _;
use futures::stream::{self, StreamExt};
use snafu::Snafu;
use tracing::{info, instrument, warn};

use crate::store::{DbError, Store, tables::ResolvedUrlRecord};

const LOG_TARGET: &str = "coord::resolver";

#[derive(Debug, Snafu)]
pub enum ResolverError {
    #[snafu(transparent)]
    Store { source: DbError },
}

pub type ResolverResult<T> = std::result::Result<T, ResolverError>;

/// The outcome of attempting to resolve one URL, as reported by whatever
/// HTTP client backs the `Resolve` callable (§4.2).
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Resolved(String),
    Transient,
    Permanent,
}

/// A shared token bucket: capacity 25, refill 25/s (§4.2, §5). One token is
/// acquired per URL before the resolver callable runs.
pub struct TokenBucket {
    inner: Mutex<TokenBucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            inner: Mutex::new(TokenBucketState { tokens: capacity as f64, last_refill: Instant::now() }),
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec as f64,
        }
    }

    /// Awaits until one token is available. Lock scope is kept free of
    /// `.await` so the held `std::sync::Mutex` guard never crosses a
    /// suspension point.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.inner.lock().expect("token bucket mutex poisoned");
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

/// Options for one `resolve_urls` invocation.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub n_cpus: usize,
}

/// Which markers to wipe before re-running, so previously-failed URLs get
/// retried (§4.2's explicit-clear requirement).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMarkers {
    Transient,
    All,
}

impl Store {
    /// Deletes resolver markers matching `scope`, allowing the next
    /// `resolve_urls` run to retry those URLs.
    #[instrument(skip(self))]
    pub fn clear_resolver_markers(&self, scope: ClearMarkers) -> ResolverResult<u64> {
        let urls = self.all_urls()?;
        let mut cleared = 0u64;
        for url in urls {
            if let Some(record) = self.resolved_url(&url)? {
                let should_clear = match (scope, &record) {
                    (ClearMarkers::All, _) => true,
                    (ClearMarkers::Transient, ResolvedUrlRecord::TransientFailure) => true,
                    (ClearMarkers::Transient, _) => false,
                };
                if should_clear {
                    self.delete_resolved_url(&url)?;
                    cleared += 1;
                }
            }
        }
        info!(target: LOG_TARGET, cleared, ?scope, "cleared resolver markers");
        Ok(cleared)
    }

    /// Resolves every URL lacking a record, using `resolve` as the
    /// underlying HTTP lookup (the reference CLI binds it to `reqwest` with
    /// `rustls-tls`, per §4.2/§5). Concurrency is bounded by `config.n_cpus`
    /// outstanding requests at a time, each gated by `bucket`.
    #[instrument(skip(self, resolve))]
    pub async fn resolve_urls<F, Fut>(
        &self,
        config: &ResolverConfig,
        bucket: &TokenBucket,
        resolve: F,
    ) -> ResolverResult<ResolveSummary>
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = ResolveOutcome> + Send,
    {
        let mut pending = vec![];
        for url in self.all_urls()? {
            if self.resolved_url(&url)?.is_none() {
                pending.push(url);
            }
        }

        let total = pending.len();
        info!(target: LOG_TARGET, total, "resolving pending urls");

        let summary = Mutex::new(ResolveSummary::default());
        let concurrency = config.n_cpus.max(1);

        stream::iter(pending)
            .for_each_concurrent(concurrency, |url| async {
                bucket.acquire().await;
                let outcome = resolve(url.clone()).await;
                let record = match &outcome {
                    ResolveOutcome::Resolved(canonical) => {
                        ResolvedUrlRecord::Resolved { canonical: canonical.clone() }
                    }
                    ResolveOutcome::Transient => {
                        warn!(target: LOG_TARGET, url, "transient resolve failure");
                        ResolvedUrlRecord::TransientFailure
                    }
                    ResolveOutcome::Permanent => {
                        warn!(target: LOG_TARGET, url, "permanent resolve failure");
                        ResolvedUrlRecord::PermanentFailure
                    }
                };
                if let Err(err) = self.record_resolved_url(&url, record) {
                    warn!(target: LOG_TARGET, url, err = %err.fmt_compact(), "failed to persist resolution");
                    return;
                }
                let mut summary = summary.lock().expect("summary mutex poisoned");
                match outcome {
                    ResolveOutcome::Resolved(_) => summary.resolved += 1,
                    ResolveOutcome::Transient => summary.transient_failures += 1,
                    ResolveOutcome::Permanent => summary.permanent_failures += 1,
                }
            })
            .await;

        Ok(summary.into_inner().expect("summary mutex poisoned"))
    }

    #[instrument(skip(self))]
    pub fn record_resolved_url(&self, url: &str, record: ResolvedUrlRecord) -> ResolverResult<()> {
        self.write_with(|dbtx| {
            let mut t = dbtx.open_table(&crate::store::tables::resolved_url::TABLE)?;
            // Append-only: never overwrite an existing entry (§4.2).
            if t.get(&url.to_string())?.is_none() {
                t.insert(&url.to_string(), &record)?;
            }
            Ok(())
        })
        .map_err(Into::into)
    }

    fn delete_resolved_url(&self, url: &str) -> ResolverResult<()> {
        self.write_with(|dbtx| {
            let mut t = dbtx.open_table(&crate::store::tables::resolved_url::TABLE)?;
            t.remove(&url.to_string())?;
            Ok(())
        })
        .map_err(Into::into)
    }
}

/// Tally of one `resolve_urls` run, logged by the CLI on completion.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveSummary {
    pub resolved: u64,
    pub transient_failures: u64,
    pub permanent_failures: u64,
}
