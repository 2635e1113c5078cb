//! Cooperative Ctrl+C handling for batch loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set once Ctrl+C is pressed. Batch loops check it between items, so the
/// in-flight item always completes.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for Ctrl+C on the current tokio runtime
    pub fn install() -> Self {
        let flag = Self::new();
        let listener = flag.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("Ctrl+C received");
                listener.trigger();
            }
        });
        flag
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear before starting a new batch
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let flag = InterruptFlag::new();
        let other = flag.clone();
        assert!(!flag.is_set());

        other.trigger();
        assert!(flag.is_set());

        flag.reset();
        assert!(!other.is_set());
    }
}
