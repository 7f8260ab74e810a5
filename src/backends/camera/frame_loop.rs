// SPDX-License-Identifier: GPL-3.0-only
//! Paced frame loops for repeating requests
//!
//! A repeating request keeps producing frames until it is replaced or
//! stopped. Backends without real sensor timing drive that with a
//! [`FrameLoop`]: one thread calling a tick closure at a fixed frame interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Action returned by the tick closure to control the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Produce another frame after the next interval
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Frame interval for a target frame rate; zero fps falls back to 30
pub fn frame_interval(fps: u32) -> Duration {
    let fps = if fps == 0 { 30 } else { fps };
    Duration::from_nanos(1_000_000_000 / fps as u64)
}

/// A frame loop running on its own thread
///
/// Dropping the loop stops it and waits for the thread to finish.
pub struct FrameLoop {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    name: String,
}

impl FrameLoop {
    /// Start calling `tick` every `interval` until it returns
    /// [`LoopAction::Stop`] or [`stop`](Self::stop) is called
    pub fn start<F>(name: &str, interval: Duration, mut tick: F) -> std::io::Result<Self>
    where
        F: FnMut(u64) -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let frames = Arc::new(AtomicU64::new(0));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_frames = Arc::clone(&frames);
        let thread_name = name.to_string();

        debug!(name = %name, ?interval, "Starting frame loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut next_frame = Instant::now();
                loop {
                    if thread_stop.load(Ordering::SeqCst) {
                        debug!(name = %thread_name, "Stop signal received");
                        break;
                    }

                    let index = thread_frames.fetch_add(1, Ordering::SeqCst);
                    if tick(index) == LoopAction::Stop {
                        debug!(name = %thread_name, "Frame loop requested stop");
                        break;
                    }

                    next_frame += interval;
                    let now = Instant::now();
                    if next_frame > now {
                        thread::sleep(next_frame - now);
                    } else {
                        // Fell behind; drop the backlog instead of bursting
                        next_frame = now;
                    }
                }
                debug!(name = %thread_name, "Frame loop exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            frames,
            name: name.to_string(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Number of ticks issued so far
    pub fn frame_count(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Stopped from inside a tick; the thread exits on its own
                return;
            }
            if handle.join().is_err() {
                warn!(name = %self.name, "Frame loop thread panicked");
            }
        }
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}
