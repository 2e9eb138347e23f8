//! Best-effort rewrite telemetry.
//!
//! Counters recording what the rewrite machinery did to a graph. They feed
//! compilation logs and tests; no transformation consults them, so a missed
//! increment can skew a report but never miscompile.

/// Per-graph rewrite counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    /// Nodes replaced or deleted by canonicalization.
    pub canonicalized: usize,
    /// Structural simplifications applied (merge collapse, kill merging).
    pub simplified: usize,
    /// Guards lowered to explicit branches.
    pub guards_lowered: usize,
    /// Guards whose condition folded to a constant.
    pub guards_folded: usize,
    /// Proxies removed while dismantling loop exits.
    pub proxies_removed: usize,
    /// Redundant kill begins merged into their predecessor.
    pub kills_merged: usize,
    /// Nodes deduplicated by value numbering.
    pub value_numbered: usize,
}

impl GraphStats {
    /// Fold another counter set into this one.
    pub fn absorb(&mut self, other: &GraphStats) {
        self.canonicalized += other.canonicalized;
        self.simplified += other.simplified;
        self.guards_lowered += other.guards_lowered;
        self.guards_folded += other.guards_folded;
        self.proxies_removed += other.proxies_removed;
        self.kills_merged += other.kills_merged;
        self.value_numbered += other.value_numbered;
    }

    /// Total rewrites of any kind.
    pub fn total(&self) -> usize {
        self.canonicalized
            + self.simplified
            + self.guards_lowered
            + self.guards_folded
            + self.proxies_removed
            + self.kills_merged
            + self.value_numbered
    }
}

impl std::fmt::Display for GraphStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "canon={} simplify={} guards(lowered={} folded={}) proxies={} kills={} gvn={}",
            self.canonicalized,
            self.simplified,
            self.guards_lowered,
            self.guards_folded,
            self.proxies_removed,
            self.kills_merged,
            self.value_numbered
        )
    }
}
