// SPDX-License-Identifier: GPL-3.0-only

//! Single-thread execution contexts
//!
//! The hardware service delivers every callback on a context supplied by the
//! caller. A context is one named thread draining a task queue in order, so
//! callbacks posted to the same context never run concurrently.

use crate::utils::lock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Handle to a single-thread execution context
///
/// Cheap to clone; all clones refer to the same thread. The thread exits once
/// [`quit_safely`](Self::quit_safely) is called (after draining the tasks
/// already queued) or once every handle is dropped.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl ExecutionContext {
    /// Spawn a new context thread with the given name
    pub fn start(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let thread_name = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(context = %thread_name, "Execution context started");
                while let Ok(task) = receiver.recv() {
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!(context = %thread_name, "Task panicked on execution context");
                    }
                }
                debug!(context = %thread_name, "Execution context exiting");
            })?;

        let thread_id = handle.thread().id();

        Ok(Self {
            inner: Arc::new(ContextInner {
                name: name.to_string(),
                sender: Mutex::new(Some(sender)),
                thread: Mutex::new(Some(handle)),
                thread_id,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue a task on the context
    ///
    /// Once the context has quit, the task runs inline on the calling thread
    /// instead, so a late callback can still release what it carries.
    pub fn execute<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task: Task = Box::new(task);
        let rejected = {
            let sender = lock(&self.inner.sender);
            match sender.as_ref() {
                Some(sender) => sender.send(task).err().map(|e| e.0),
                None => Some(task),
            }
        };

        if let Some(task) = rejected {
            debug!(context = %self.inner.name, "Context has quit, running task inline");
            task();
        }
    }

    /// Whether the calling thread is this context's thread
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Whether the context thread is still alive
    pub fn is_running(&self) -> bool {
        lock(&self.inner.thread)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Whether the context still accepts tasks
    pub fn is_accepting(&self) -> bool {
        lock(&self.inner.sender).is_some()
    }

    /// Stop accepting tasks; the thread exits after draining its queue
    pub fn quit_safely(&self) {
        if lock(&self.inner.sender).take().is_some() {
            debug!(context = %self.inner.name, "Execution context quitting");
        }
    }

    /// Wait for the thread to exit, at most `timeout`
    ///
    /// Returns `false` on timeout, or when called from the context itself.
    pub fn join(&self, timeout: Duration) -> bool {
        if self.is_current() {
            debug!(context = %self.inner.name, "Skipping join from the context's own thread");
            return false;
        }

        let Some(handle) = lock(&self.inner.thread).take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(context = %self.inner.name, ?timeout, "Execution context did not exit in time");
                *lock(&self.inner.thread) = Some(handle);
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }

        if handle.join().is_err() {
            error!(context = %self.inner.name, "Execution context thread panicked");
        }
        true
    }

    /// Wait until every task queued before this call has run
    pub fn flush(&self, timeout: Duration) -> bool {
        if self.is_current() {
            return false;
        }
        let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);
        self.execute(move || {
            let _ = done_tx.send(());
        });
        done_rx.recv_timeout(timeout).is_ok()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("name", &self.inner.name)
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

/// Quits the wrapped context when dropped, on every exit path including unwinding
pub struct ContextGuard {
    context: ExecutionContext,
}

impl ContextGuard {
    pub fn new(context: ExecutionContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.context.quit_safely();
    }
}
