use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide cooperative cancellation flag.
///
/// Workers observe it between dequeues; the failing worker sets it and the
/// spin loop tears the pipeline down. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_shared() {
        let a = CancelToken::new();
        let b = a.clone();
        assert!(!b.is_canceled());
        a.cancel();
        assert!(b.is_canceled());
    }
}
