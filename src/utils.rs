// SPDX-License-Identifier: GPL-3.0-only

//! Small shared helpers

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the data if a previous holder panicked
///
/// Callback tasks are isolated with `catch_unwind`, so a panic inside one must
/// not wedge every later callback behind a poisoned lock.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
