// SPDX-License-Identifier: GPL-3.0-only

//! Still capture
//!
//! A still capture pauses the repeating preview, submits one still request and
//! restores the preview once the capture completes. Its completion callback
//! runs on a short-lived context of its own that is quit when the callback
//! ends, on every path.
//!
//! The JPEG bytes arrive separately, through the still-image sink's listener.

use super::{CameraEvent, Core, SessionController, SessionIntent};
use crate::backends::camera::context::ContextGuard;
use crate::backends::camera::{CaptureCallback, CaptureEvent, CaptureRequest, ExecutionContext, SessionHandle};
use crate::constants::timing;
use crate::errors::{CameraError, CameraResult};
use crate::utils::lock;
use std::sync::Arc;
use tracing::{debug, info};

impl SessionController {
    /// Capture one still image
    ///
    /// Needs an active preview session with both preview and still targets,
    /// otherwise returns [`CameraError::NotReady`] without touching the
    /// hardware. The picture is reported as [`CameraEvent::PictureTaken`].
    pub fn take_picture(&self) -> CameraResult<()> {
        self.core.take_picture()
    }
}

impl Core {
    fn take_picture(self: &Arc<Self>) -> CameraResult<()> {
        if self.lifecycle.is_torn_down() {
            return Err(CameraError::NotReady);
        }

        let (session, still_request, preview_request) = {
            let inner = lock(&self.inner);
            let session = inner.phase.session().cloned().ok_or(CameraError::NotReady)?;
            if inner.phase.plan().map(|plan| plan.intent) != Some(SessionIntent::Preview) {
                return Err(CameraError::NotReady);
            }
            let still_request = inner.targets.still_request().ok_or(CameraError::NotReady)?;
            let preview_request = inner.targets.preview_request().ok_or(CameraError::NotReady)?;
            (session, still_request, preview_request)
        };

        let context = ExecutionContext::start(timing::CAPTURE_CONTEXT)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to start capture context: {e}")))?;
        let guard = ContextGuard::new(context.clone());

        // The session may already be winding down
        if let Err(e) = session.stop_repeating() {
            debug!(error = %e, "Ignoring stop_repeating failure before capture");
        }

        let weak = Arc::downgrade(self);
        let capture_session = Arc::clone(&session);
        let callback: CaptureCallback = Box::new(move |event| {
            let _guard = guard;
            if let Some(core) = weak.upgrade() {
                core.on_capture_event(event, &capture_session, &preview_request);
            }
        });

        info!(session = session.id(), "Capturing still image");
        session
            .capture(&still_request, callback, &context)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    fn on_capture_event(&self, event: CaptureEvent, session: &SessionHandle, preview_request: &CaptureRequest) {
        match event {
            CaptureEvent::Completed => {
                debug!(session = session.id(), "Still capture completed");
                if self.lifecycle.is_torn_down() || !self.is_current_session(session) {
                    debug!("Session gone, not restarting preview");
                    return;
                }
                if let Err(e) = session.set_repeating_request(preview_request) {
                    if !self.is_current_session(session) {
                        debug!(session = session.id(), error = %e, "Session superseded during preview restart");
                        return;
                    }
                    self.report(CameraError::PreviewRestartFailed(e.to_string()));
                }
            }
            CaptureEvent::Failed(reason) => {
                self.report(CameraError::CaptureFailed(format!("{reason:?}")));
            }
        }
    }

    /// Hand drained JPEG bytes to storage
    pub(super) fn on_still_image(&self, bytes: Vec<u8>) {
        if self.lifecycle.is_torn_down() {
            debug!(bytes = bytes.len(), "Dropping still image after teardown");
            return;
        }
        match self.store.persist_image(&bytes) {
            Ok(asset) => {
                if self.lifecycle.is_torn_down() {
                    return;
                }
                info!(path = %asset, "Picture taken");
                self.events.emit(CameraEvent::PictureTaken(asset));
            }
            Err(e) => self.report(e.into()),
        }
    }
}
