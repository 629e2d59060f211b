//! Cooperative cancellation signal for long-running batch operations
//! (spec.md §5: "all public operations accept a cancellation signal; on
//! cancellation, in-flight Repository writes complete, but further provider
//! calls are skipped and the error `canceled` is returned"). Single-aggregate
//! operations (`prepare_purchase`, `confirm_transaction`, ...) get this for
//! free from Rust's native future-drop cancellation — a caller that no
//! longer wants the result simply drops the future. A reconciliation pass
//! iterating many aggregates is where an explicit signal earns its keep: it
//! lets a caller stop a long batch between items without losing the work
//! already committed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A clonable, `Send + Sync` flag a caller can set from another task to
/// cut a batch operation short between items.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncanceled_and_latches_once_set() {
        let token = CancellationToken::new();
        assert!(!token.is_canceled());
        token.cancel();
        assert!(token.is_canceled());
    }

    #[test]
    fn clones_share_the_same_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_canceled());
    }
}
