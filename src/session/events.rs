// SPDX-License-Identifier: GPL-3.0-only

//! Upward notifications
//!
//! The controller reports picture results and asynchronous failures on an
//! unbounded channel. Each notification is sent once; after the listener is
//! cleared nothing more is delivered.

use crate::errors::CameraError;
use crate::storage::AssetRef;
use crate::utils::lock;
use futures::channel::mpsc;
use std::sync::Mutex;
use tracing::debug;

/// One-shot notification from the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraEvent {
    PictureTaken(AssetRef),
    Error(CameraError),
}

/// Receiving end handed to the orchestration layer
pub type EventReceiver = mpsc::UnboundedReceiver<CameraEvent>;

/// Sending end owned by the controller
pub(crate) struct EventSender {
    sender: Mutex<Option<mpsc::UnboundedSender<CameraEvent>>>,
}

impl EventSender {
    pub(crate) fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    pub(crate) fn emit(&self, event: CameraEvent) {
        let sender = lock(&self.sender);
        match sender.as_ref() {
            Some(tx) => {
                if tx.unbounded_send(event).is_err() {
                    debug!("Event receiver dropped");
                }
            }
            None => debug!(?event, "Listener cleared, dropping event"),
        }
    }

    pub(crate) fn clear(&self) {
        lock(&self.sender).take();
    }
}
