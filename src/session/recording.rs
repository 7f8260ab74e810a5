// SPDX-License-Identifier: GPL-3.0-only

//! Recording sessions and slow-motion frame-rate negotiation

use super::{Core, SessionController};
use crate::backends::camera::{
    AudioCodec, Capability, Characteristics, EncoderConfig, FpsRange, HardwareService, OutputFormat, SessionType,
    Size, StreamTarget, VideoCodec, VideoEncoder,
};
use crate::config::Config;
use crate::errors::{CameraError, CameraResult};
use crate::storage::AssetRef;
use crate::utils::lock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl SessionController {
    /// Record at the configured frame rate on a regular session
    ///
    /// The encoder is prepared before any session work; encoding starts once
    /// the preview+encoder session is streaming.
    pub fn start_record(&self, size: Size) -> CameraResult<()> {
        self.core.start_recording(RecordingMode::Normal, size)
    }

    /// Record at the negotiated high-speed rate on a constrained high-speed session
    pub fn start_slow_motion_record(&self, size: Size) -> CameraResult<()> {
        self.core.start_recording(RecordingMode::SlowMotion, size)
    }

    /// Finish a normal recording and return to the preview session
    pub fn stop_record(&self) -> CameraResult<AssetRef> {
        self.core.stop_recording(RecordingMode::Normal)
    }

    /// Finish a slow-motion recording
    ///
    /// The high-speed session is left as it is; call
    /// [`create_session`](Self::create_session) to return to preview.
    pub fn stop_slow_motion_record(&self) -> CameraResult<AssetRef> {
        self.core.stop_recording(RecordingMode::SlowMotion)
    }

    /// Phase of the current recording, if any
    pub fn recording_phase(&self) -> Option<RecordingPhase> {
        lock(&self.core.inner).recording.as_ref().map(RecordingSession::phase)
    }
}

impl Core {
    fn start_recording(self: &Arc<Self>, mode: RecordingMode, size: Size) -> CameraResult<()> {
        let device_id = {
            let inner = lock(&self.inner);
            if inner.recording.is_some() {
                return Err(CameraError::RecordingInProgress);
            }
            if self.lifecycle.is_torn_down() || inner.phase.device().is_none() || inner.targets.preview().is_none() {
                return Err(CameraError::NotReady);
            }
            inner.device_id.clone().ok_or(CameraError::NotReady)?
        };

        let (frame_rate, fps_range, session_type) = match mode {
            RecordingMode::Normal => (self.config.record_frame_rate, None, SessionType::Regular),
            RecordingMode::SlowMotion => {
                let characteristics = self
                    .hardware
                    .characteristics(&device_id)
                    .map_err(|e| CameraError::CapabilityUnsupported(e.to_string()))?;
                let range = negotiate_slow_motion_fps(&characteristics, size)?;
                info!(device = %device_id, fps = range.upper, "Negotiated slow motion frame rate");
                (range.upper, Some(range), SessionType::ConstrainedHighSpeed)
            }
        };

        let output_path = self.store.allocate_video_file()?;
        let config = encoder_config(&self.config, output_path, size, frame_rate);
        let recording = RecordingSession::prepare(self.hardware.as_ref(), config, mode)?;

        let plan = {
            let mut inner = lock(&self.inner);
            if inner.recording.is_some() {
                return Err(CameraError::RecordingInProgress);
            }
            inner.targets.set_encoder(Some(recording.input_target()));
            match inner.targets.recording_plan(session_type, fps_range) {
                Some(plan) => {
                    inner.recording = Some(recording);
                    plan
                }
                None => {
                    inner.targets.set_encoder(None);
                    return Err(CameraError::NotReady);
                }
            }
        };

        self.request_configuration(plan);
        Ok(())
    }

    fn stop_recording(self: &Arc<Self>, mode: RecordingMode) -> CameraResult<AssetRef> {
        let recording = {
            let mut inner = lock(&self.inner);
            let Some(recording) = inner.recording.take_if(|recording| recording.mode() == mode) else {
                return Err(CameraError::NotRecording);
            };
            inner.targets.set_encoder(None);
            recording
        };

        info!(mode = ?mode, path = %recording.output_path().display(), "Stopping recording");
        let finished = recording.finish();

        if mode == RecordingMode::Normal {
            if let Err(e) = self.create_preview_session() {
                debug!(error = %e, "Preview session not restored after recording");
            }
        }

        let path = finished?;
        Ok(self.store.persist_video(&path)?)
    }
}

/// Normal recording at the configured rate, or slow motion at the negotiated one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingMode {
    Normal,
    SlowMotion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingPhase {
    Idle,
    Prepared,
    Encoding,
    Stopped,
}

/// Pick the slow-motion frame rate for `size`
///
/// Only fixed ranges are eligible; the highest one wins. Pure: every failure
/// is a [`CameraError::CapabilityUnsupported`].
pub fn negotiate_slow_motion_fps(characteristics: &Characteristics, size: Size) -> CameraResult<FpsRange> {
    if !characteristics.has_capability(Capability::ConstrainedHighSpeedVideo) {
        return Err(CameraError::CapabilityUnsupported(
            "high speed video is not supported".to_string(),
        ));
    }

    let map = characteristics.stream_configuration.as_ref().ok_or_else(|| {
        CameraError::CapabilityUnsupported("no stream configuration map".to_string())
    })?;

    let sizes = map.high_speed_video_sizes();
    if !sizes.contains(&size) {
        let available: Vec<String> = sizes.iter().map(Size::to_string).collect();
        return Err(CameraError::CapabilityUnsupported(format!(
            "{size} not in high speed sizes [{}]",
            available.join(", ")
        )));
    }

    let ranges = map.high_speed_video_fps_ranges_for(size);
    if ranges.is_empty() {
        return Err(CameraError::CapabilityUnsupported(format!("no fps ranges for {size}")));
    }

    ranges
        .iter()
        .filter(|range| range.is_fixed())
        .max_by_key(|range| range.upper)
        .copied()
        .ok_or_else(|| CameraError::CapabilityUnsupported(format!("no fixed fps range for {size}")))
}

/// Encoder settings for one recording
pub fn encoder_config(config: &Config, output_path: PathBuf, size: Size, frame_rate: u32) -> EncoderConfig {
    EncoderConfig {
        output_path,
        output_format: OutputFormat::Mpeg4,
        video_codec: VideoCodec::H264,
        audio_codec: Some(AudioCodec::Aac),
        bitrate: config.record_bitrate,
        frame_rate,
        size,
        orientation_hint: config.orientation_hint,
    }
}

/// One recording: its encoder, output file and phase
pub struct RecordingSession {
    mode: RecordingMode,
    phase: RecordingPhase,
    frame_rate: u32,
    output_path: PathBuf,
    encoder: Box<dyn VideoEncoder>,
}

impl RecordingSession {
    /// Create and prepare the encoder
    pub fn prepare(hardware: &dyn HardwareService, config: EncoderConfig, mode: RecordingMode) -> CameraResult<Self> {
        let encoder = hardware
            .prepare_encoder(&config)
            .map_err(|e| CameraError::RecorderPrepareFailed(e.to_string()))?;

        info!(
            mode = ?mode,
            size = %config.size,
            fps = config.frame_rate,
            path = %config.output_path.display(),
            "Recorder prepared"
        );

        Ok(Self {
            mode,
            phase: RecordingPhase::Prepared,
            frame_rate: config.frame_rate,
            output_path: config.output_path,
            encoder,
        })
    }

    pub fn mode(&self) -> RecordingMode {
        self.mode
    }

    pub fn phase(&self) -> RecordingPhase {
        self.phase
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn input_target(&self) -> StreamTarget {
        self.encoder.input_target()
    }

    /// Start encoding; only valid once, from Prepared
    pub fn start(&mut self) -> CameraResult<()> {
        if self.phase != RecordingPhase::Prepared {
            return Err(CameraError::RecorderStartFailed(format!(
                "encoder is {:?}",
                self.phase
            )));
        }
        self.encoder
            .start()
            .map_err(|e| CameraError::RecorderStartFailed(e.to_string()))?;
        self.phase = RecordingPhase::Encoding;
        debug!(path = %self.output_path.display(), "Encoding started");
        Ok(())
    }

    /// Stop, reset and release the encoder, returning the output file
    ///
    /// The encoder is released even when stopping fails.
    pub fn finish(mut self) -> CameraResult<PathBuf> {
        let stopped = if self.phase == RecordingPhase::Encoding {
            self.encoder
                .stop()
                .map_err(|e| CameraError::RecorderStopFailed(e.to_string()))
        } else {
            Err(CameraError::RecorderStopFailed("encoder never started".to_string()))
        };
        self.release();
        stopped?;
        Ok(std::mem::take(&mut self.output_path))
    }

    /// Release without finalizing (teardown path)
    pub fn abandon(mut self) {
        if self.phase == RecordingPhase::Encoding {
            if let Err(e) = self.encoder.stop() {
                debug!(error = %e, "Encoder stop failed during teardown");
            }
        }
        self.release();
    }

    fn release(&mut self) {
        if self.phase == RecordingPhase::Stopped {
            return;
        }
        self.encoder.reset();
        self.encoder.release();
        self.phase = RecordingPhase::Stopped;
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        if self.phase != RecordingPhase::Stopped {
            warn!(path = %self.output_path.display(), "Recording dropped without being finished");
            self.release();
        }
    }
}
