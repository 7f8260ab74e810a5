// SPDX-License-Identifier: GPL-3.0-only

//! Stream target set
//!
//! Tracks the sinks a session may bind (preview surface, still-image reader,
//! encoder input) and derives the target lists and requests for each kind of
//! session. The set only references targets; their owners keep them alive.

use crate::backends::camera::{
    AfMode, CaptureRequest, ControlMode, FpsRange, RequestTemplate, SessionType, StreamTarget,
};

/// What a configured session is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIntent {
    /// Preview plus still capture
    Preview,
    /// Preview plus encoder input
    Recording,
}

/// Everything needed to configure one session and start it streaming
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    pub intent: SessionIntent,
    pub session_type: SessionType,
    pub targets: Vec<StreamTarget>,
    /// Repeating request committed once the session is configured
    pub request: CaptureRequest,
}

#[derive(Debug, Clone, Default)]
pub struct TargetSet {
    preview: Option<StreamTarget>,
    still: Option<StreamTarget>,
    encoder: Option<StreamTarget>,
}

impl TargetSet {
    pub fn preview(&self) -> Option<&StreamTarget> {
        self.preview.as_ref()
    }

    pub fn still(&self) -> Option<&StreamTarget> {
        self.still.as_ref()
    }

    pub fn encoder(&self) -> Option<&StreamTarget> {
        self.encoder.as_ref()
    }

    /// Replace the preview target, returning the previous one
    pub fn set_preview(&mut self, target: Option<StreamTarget>) -> Option<StreamTarget> {
        std::mem::replace(&mut self.preview, target)
    }

    pub fn set_still(&mut self, target: Option<StreamTarget>) -> Option<StreamTarget> {
        std::mem::replace(&mut self.still, target)
    }

    pub fn set_encoder(&mut self, target: Option<StreamTarget>) -> Option<StreamTarget> {
        std::mem::replace(&mut self.encoder, target)
    }

    /// Steady-state request: preview target only, auto control mode
    pub fn preview_request(&self) -> Option<CaptureRequest> {
        let preview = self.preview.as_ref()?;
        Some(
            CaptureRequest::builder(RequestTemplate::Preview)
                .add_target(preview)
                .control_mode(ControlMode::Auto)
                .build(),
        )
    }

    /// One-shot still request on the still-image sink
    pub fn still_request(&self) -> Option<CaptureRequest> {
        let still = self.still.as_ref()?;
        Some(
            CaptureRequest::builder(RequestTemplate::StillCapture)
                .add_target(still)
                .control_mode(ControlMode::Auto)
                .af_mode(AfMode::ContinuousPicture)
                .build(),
        )
    }

    /// Plan binding preview and still sink; needs both
    pub fn preview_plan(&self) -> Option<SessionPlan> {
        let preview = self.preview.clone()?;
        let still = self.still.clone()?;
        Some(SessionPlan {
            intent: SessionIntent::Preview,
            session_type: SessionType::Regular,
            targets: vec![preview, still],
            request: self.preview_request()?,
        })
    }

    /// Plan binding preview and encoder input; needs both
    pub fn recording_plan(&self, session_type: SessionType, fps_range: Option<FpsRange>) -> Option<SessionPlan> {
        let preview = self.preview.clone()?;
        let encoder = self.encoder.clone()?;

        let mut builder = CaptureRequest::builder(RequestTemplate::Record)
            .add_target(&preview)
            .add_target(&encoder);
        if let Some(range) = fps_range {
            builder = builder.target_fps_range(range);
        }

        Some(SessionPlan {
            intent: SessionIntent::Recording,
            session_type,
            targets: vec![preview, encoder],
            request: builder.build(),
        })
    }
}
