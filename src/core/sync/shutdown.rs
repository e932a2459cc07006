use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide stop request shared by every stage of a pipeline.
///
/// Stages read it at each blocking boundary; quit keystrokes, termination
/// signals and fatal open failures all feed the same token.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    cancelled: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown. Returns `true` if this call flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = ShutdownToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        assert!(token.cancel());
        assert!(other.is_cancelled());
        assert!(!other.cancel());
    }
}
