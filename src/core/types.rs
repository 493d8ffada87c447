//! Common types used across fedglm modules.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Cooperative cancellation token.
///
/// Set by an external controller, polled by the site executor at checkpoints
/// between major steps. Cancellation is cooperative and coarse-grained; a
/// running matrix operation is never interrupted mid-flight.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    triggered: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, untriggered token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.triggered.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_untriggered() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_token_cancel_visible_through_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        token.cancel();
        assert!(other.is_cancelled());
    }
}
