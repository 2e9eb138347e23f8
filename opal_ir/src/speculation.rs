//! The speculation log.
//!
//! Speculative optimization needs memory across compilations: once a
//! speculation has failed at runtime, no future compilation may repeat it.
//! The process-wide [`SharedSpeculationLog`] records failures (reported by
//! the deopt handler) and hands out [`SpeculationToken`]s for committed
//! speculations.
//!
//! Compilations run concurrently, so between a thread's
//! "may I speculate?" query and its commit another compilation's deopt may
//! record a failure — the commit then loses the race. The per-graph
//! [`GraphSpeculationLog`] absorbs that race: it secures the speculation at
//! query time and caches the outcome for the graph's lifetime, so
//!
//! - a positive `may_speculate` is a guarantee that `speculate` succeeds
//!   for this graph, and
//! - repeated queries are idempotent and never re-contact the shared log.
//!
//! A lost race degrades to "may not speculate" — compilation proceeds
//! non-speculatively; it is never an error.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::deopt::{DeoptReason, SpeculationToken};
use crate::node::MethodRef;

// =============================================================================
// Speculation Reason
// =============================================================================

/// What a compilation wants to speculate on: a reason kind at a specific
/// program position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpeculationReason {
    pub kind: DeoptReason,
    pub method: MethodRef,
    pub bci: u32,
}

impl SpeculationReason {
    pub fn new(kind: DeoptReason, method: MethodRef, bci: u32) -> Self {
        SpeculationReason { kind, method, bci }
    }
}

// =============================================================================
// Shared Log
// =============================================================================

/// The commit raced with a failure recorded by another thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeculationRace;

#[derive(Default)]
struct SharedLogInner {
    failed: FxHashSet<SpeculationReason>,
    committed: FxHashMap<SpeculationReason, SpeculationToken>,
    next_token: u64,
}

/// Process-wide speculation state, shared by all compilation threads.
pub struct SharedSpeculationLog {
    inner: Mutex<SharedLogInner>,
}

impl SharedSpeculationLog {
    pub fn new() -> Arc<Self> {
        Arc::new(SharedSpeculationLog {
            inner: Mutex::new(SharedLogInner {
                failed: FxHashSet::default(),
                committed: FxHashMap::default(),
                next_token: 1,
            }),
        })
    }

    /// Whether `reason` has not failed so far. The answer may be stale by
    /// the time the caller acts on it; use [`GraphSpeculationLog`] for a
    /// stable per-compilation view.
    pub fn may_speculate(&self, reason: &SpeculationReason) -> bool {
        !self.inner.lock().failed.contains(reason)
    }

    /// Commit a speculation, returning its token, or lose the race against
    /// a recorded failure.
    pub fn speculate(
        &self,
        reason: &SpeculationReason,
    ) -> Result<SpeculationToken, SpeculationRace> {
        let mut inner = self.inner.lock();
        if inner.failed.contains(reason) {
            return Err(SpeculationRace);
        }
        if let Some(&token) = inner.committed.get(reason) {
            return Ok(token);
        }
        let token = SpeculationToken::from_raw(inner.next_token);
        inner.next_token += 1;
        inner.committed.insert(*reason, token);
        Ok(token)
    }

    /// Record a runtime speculation failure (called by the deoptimization
    /// handler). All future speculation on `reason` is denied.
    pub fn record_failure(&self, reason: &SpeculationReason) {
        let mut inner = self.inner.lock();
        inner.failed.insert(*reason);
        inner.committed.remove(reason);
    }

    /// Number of distinct failed speculations.
    pub fn failure_count(&self) -> usize {
        self.inner.lock().failed.len()
    }
}

// =============================================================================
// Per-Graph Wrapper
// =============================================================================

/// Thread-confined speculation view for one graph.
///
/// Secures speculations eagerly on the first query, then answers from its
/// cache, making `may_speculate`/`speculate` race-free and idempotent for
/// the graph's lifetime.
pub struct GraphSpeculationLog {
    shared: Arc<SharedSpeculationLog>,
    cache: FxHashMap<SpeculationReason, Option<SpeculationToken>>,
}

impl GraphSpeculationLog {
    pub fn new(shared: Arc<SharedSpeculationLog>) -> Self {
        GraphSpeculationLog {
            shared,
            cache: FxHashMap::default(),
        }
    }

    /// Whether this graph may speculate on `reason`.
    ///
    /// A `true` answer commits the speculation in the shared log
    /// immediately, so a later [`Self::speculate`] for the same reason
    /// cannot fail, no matter what other threads record meanwhile.
    pub fn may_speculate(&mut self, reason: &SpeculationReason) -> bool {
        self.resolve(reason).is_some()
    }

    /// The token for a speculation this graph may perform, or `None` if
    /// speculation on `reason` is unavailable.
    pub fn speculate(&mut self, reason: &SpeculationReason) -> Option<SpeculationToken> {
        self.resolve(reason)
    }

    fn resolve(&mut self, reason: &SpeculationReason) -> Option<SpeculationToken> {
        if let Some(&cached) = self.cache.get(reason) {
            return cached;
        }
        let outcome = match self.shared.speculate(reason) {
            Ok(token) => Some(token),
            Err(SpeculationRace) => {
                log::debug!("speculation {:?} unavailable (failed or raced)", reason);
                None
            }
        };
        self.cache.insert(*reason, outcome);
        outcome
    }
}

// =============================================================================
// Tests
// =============================================================================
