// SPDX-License-Identifier: GPL-3.0-only

//! Teardown guard
//!
//! Exactly one caller wins the right to run the release sequence; everyone
//! else sees it already claimed and returns. The flag stays set until a fresh
//! open resets it.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct ResourceLifecycle {
    torn_down: AtomicBool,
}

impl ResourceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim teardown; `true` only for the single winning caller
    pub fn begin_teardown(&self) -> bool {
        self.torn_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Re-arm for a fresh open
    pub fn reset(&self) {
        self.torn_down.store(false, Ordering::Release);
    }
}
