//! Process-wide readiness signal.
//!
//! # Responsibilities
//! - Report "not ready" until the entire startup chain has completed
//! - Flip to ready exactly once, as the chain's final action
//!
//! # Design Decisions
//! - Owned state object handed to the one writer (the bootstrap chain)
//!   and to readers (the web tiers), not ambient global state
//! - Monotonic: there is no way to unset it short of a process restart

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared readiness flag. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct ReadyFlag {
    ready: Arc<AtomicBool>,
}

impl ReadyFlag {
    /// A new, not-ready flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the process ready. Returns whether this call performed the
    /// transition; repeat calls are harmless no-ops.
    pub fn set_ready(&self) -> bool {
        let flipped = !self.ready.swap(true, Ordering::SeqCst);
        if !flipped {
            tracing::warn!("Readiness flag was already set");
        }
        flipped
    }

    /// Whether the startup chain has completed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_ready() {
        assert!(!ReadyFlag::new().is_ready());
    }

    #[test]
    fn set_is_monotonic_and_reported_once() {
        let flag = ReadyFlag::new();
        assert!(flag.set_ready());
        assert!(flag.is_ready());
        // Second set does not transition again.
        assert!(!flag.set_ready());
        assert!(flag.is_ready());
    }

    #[test]
    fn clones_share_state() {
        let flag = ReadyFlag::new();
        let observer = flag.clone();
        flag.set_ready();
        assert!(observer.is_ready());
    }
}
