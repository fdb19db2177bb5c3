/// In-process tunables for a [`Round`](crate::round::Round). Constructed directly
/// by the caller — no file or environment loading lives in the core, consistent
/// with "configuration loading" being an external collaborator — but the
/// tunables themselves are first-class rather than buried as literal constants.
#[derive(Debug, Clone, Copy)]
pub struct RoundLimits {
    /// Soft cap on the number of entries the infeasible scheduling-key cache is
    /// allowed to grow to. Once reached, further inserts are silently dropped
    /// (the caller is free to `clear_infeasible_keys` to make room); this bounds
    /// memory under a pathological flood of distinct-but-all-infeasible jobs
    /// without changing the documented cache semantics for any key that did make
    /// it in.
    pub max_infeasible_cache_entries: usize,
}

impl Default for RoundLimits {
    fn default() -> Self {
        Self {
            max_infeasible_cache_entries: 10_000,
        }
    }
}
