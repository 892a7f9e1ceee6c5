use std::sync::atomic::{AtomicU64, Ordering};

/// Source of monotonically increasing completion ids for backends that do not
/// return their own.
#[derive(Debug)]
pub struct SyntheticIds {
    next: AtomicU64,
}

impl Default for SyntheticIds {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticIds {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    pub fn next_chat_id(&self) -> String {
        format!("chatcmpl-{}", self.next.fetch_add(1, Ordering::Relaxed))
    }
}
