use std::sync::atomic::{AtomicU64, Ordering};

/// Token identifying one resolution pass. Snapshot reads and spawned
/// lookups carry the token they started under; results from a stale
/// token are dropped instead of being merged into a newer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

#[derive(Debug, Default)]
pub struct GenerationCounter(AtomicU64);

impl GenerationCounter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Start a new pass, invalidating all earlier tokens.
    pub fn advance(&self) -> Generation {
        Generation(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn current(&self) -> Generation {
        Generation(self.0.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, token: Generation) -> bool {
        self.current() == token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_invalidates_older_tokens() {
        let counter = GenerationCounter::new();
        let first = counter.advance();
        assert!(counter.is_current(first));

        let second = counter.advance();
        assert!(!counter.is_current(first), "stale token still current");
        assert!(counter.is_current(second));
        assert_ne!(first, second);
    }

    #[test]
    fn unstarted_counter_matches_no_pass_token() {
        let counter = GenerationCounter::new();
        let initial = counter.current();
        let pass = counter.advance();
        assert_ne!(initial, pass);
    }
}
