// SPDX-License-Identifier: GPL-3.0-only

//! Virtual video encoder
//!
//! Frames queued on the input surface while encoding are appended to the
//! output file: a one-line JSON header followed by length-prefixed frames.
//! Frames arriving before `start` or after `stop` are dropped, as a real
//! encoder input would drop them.

use crate::backends::camera::{
    BackendError, BackendResult, EncoderConfig, StreamFormat, StreamTarget, Surface, TargetKind, VideoEncoder,
};
use crate::utils::lock;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Magic prefix of the container written by [`VirtualEncoder`]
pub const CONTAINER_MAGIC: &[u8; 4] = b"VCAM";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderState {
    Prepared,
    Encoding,
    Stopped,
    Idle,
    Released,
}

#[derive(Serialize)]
struct ContainerHeader<'a> {
    format: String,
    video_codec: String,
    audio_codec: Option<String>,
    width: u32,
    height: u32,
    frame_rate: u32,
    bitrate: u32,
    orientation_hint: u32,
    path: &'a str,
}

/// Input surface shared between the encoder and the capture session
struct EncoderSurface {
    sink: Mutex<SurfaceState>,
}

struct SurfaceState {
    writer: Option<BufWriter<File>>,
    accepting: bool,
    frames: u64,
    failed: Option<String>,
}

impl Surface for EncoderSurface {
    fn queue_buffer(&self, buffer: Vec<u8>) {
        let mut state = lock(&self.sink);
        if !state.accepting || state.failed.is_some() {
            return;
        }
        let Some(writer) = state.writer.as_mut() else {
            return;
        };
        let written = writer
            .write_all(&(buffer.len() as u32).to_le_bytes())
            .and_then(|()| writer.write_all(&buffer));
        match written {
            Ok(()) => state.frames += 1,
            Err(e) => {
                warn!(error = %e, "Encoder write failed");
                state.failed = Some(e.to_string());
            }
        }
    }
}

/// Encoder writing received frames into a plain container file
pub struct VirtualEncoder {
    config: EncoderConfig,
    state: EncoderState,
    surface: Arc<EncoderSurface>,
    target: StreamTarget,
}

impl VirtualEncoder {
    /// Create the output file and write the header
    pub fn prepare(config: &EncoderConfig) -> BackendResult<Self> {
        if config.frame_rate == 0 || config.size.area() == 0 {
            return Err(BackendError::Encoder(format!(
                "invalid encoder parameters: {} at {} fps",
                config.size, config.frame_rate
            )));
        }

        let file = File::create(&config.output_path)
            .map_err(|e| BackendError::Encoder(format!("{}: {e}", config.output_path.display())))?;
        let mut writer = BufWriter::new(file);

        let path = config.output_path.to_string_lossy();
        let header = ContainerHeader {
            format: format!("{:?}", config.output_format),
            video_codec: format!("{:?}", config.video_codec),
            audio_codec: config.audio_codec.map(|codec| format!("{codec:?}")),
            width: config.size.width,
            height: config.size.height,
            frame_rate: config.frame_rate,
            bitrate: config.bitrate,
            orientation_hint: config.orientation_hint,
            path: &path,
        };
        let header = serde_json::to_vec(&header).map_err(|e| BackendError::Encoder(e.to_string()))?;
        writer
            .write_all(CONTAINER_MAGIC)
            .and_then(|()| writer.write_all(&header))
            .and_then(|()| writer.write_all(b"\n"))
            .map_err(|e| BackendError::Encoder(e.to_string()))?;

        let surface = Arc::new(EncoderSurface {
            sink: Mutex::new(SurfaceState {
                writer: Some(writer),
                accepting: false,
                frames: 0,
                failed: None,
            }),
        });
        let target = StreamTarget::new(
            TargetKind::Encoder,
            config.size,
            StreamFormat::Private,
            Arc::clone(&surface) as Arc<dyn Surface>,
        );

        debug!(path = %config.output_path.display(), size = %config.size, "Virtual encoder prepared");
        Ok(Self {
            config: config.clone(),
            state: EncoderState::Prepared,
            surface,
            target,
        })
    }

    /// Frames written so far
    pub fn frame_count(&self) -> u64 {
        lock(&self.surface.sink).frames
    }

    fn close_writer(&self) -> BackendResult<()> {
        let mut sink = lock(&self.surface.sink);
        sink.accepting = false;
        match sink.writer.take() {
            Some(mut writer) => writer.flush().map_err(|e| BackendError::Encoder(e.to_string())),
            None => Ok(()),
        }
    }
}

impl VideoEncoder for VirtualEncoder {
    fn input_target(&self) -> StreamTarget {
        self.target.clone()
    }

    fn start(&mut self) -> BackendResult<()> {
        if self.state != EncoderState::Prepared {
            return Err(BackendError::Encoder(format!("start called in state {:?}", self.state)));
        }
        lock(&self.surface.sink).accepting = true;
        self.state = EncoderState::Encoding;
        info!(path = %self.config.output_path.display(), "Virtual encoder started");
        Ok(())
    }

    fn stop(&mut self) -> BackendResult<()> {
        if self.state != EncoderState::Encoding {
            return Err(BackendError::Encoder(format!("stop called in state {:?}", self.state)));
        }
        self.state = EncoderState::Stopped;

        if let Some(message) = lock(&self.surface.sink).failed.clone() {
            let _ = self.close_writer();
            return Err(BackendError::Encoder(message));
        }
        self.close_writer()?;
        info!(
            path = %self.config.output_path.display(),
            frames = self.frame_count(),
            "Virtual encoder stopped"
        );
        Ok(())
    }

    fn reset(&mut self) {
        if self.state == EncoderState::Released {
            return;
        }
        if let Err(e) = self.close_writer() {
            debug!(error = %e, "Flush failed during encoder reset");
        }
        self.state = EncoderState::Idle;
    }

    fn release(&mut self) {
        if self.state == EncoderState::Released {
            return;
        }
        if let Err(e) = self.close_writer() {
            debug!(error = %e, "Flush failed during encoder release");
        }
        self.state = EncoderState::Released;
    }
}

impl Drop for VirtualEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::{AudioCodec, OutputFormat, Size, VideoCodec};

    fn config(path: std::path::PathBuf) -> EncoderConfig {
        EncoderConfig {
            output_path: path,
            output_format: OutputFormat::Mpeg4,
            video_codec: VideoCodec::H264,
            audio_codec: Some(AudioCodec::Aac),
            bitrate: 10_000_000,
            frame_rate: 30,
            size: Size::new(640, 480),
            orientation_hint: 90,
        }
    }

    #[test]
    fn test_only_frames_while_encoding_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let mut encoder = VirtualEncoder::prepare(&config(path.clone())).unwrap();
        let surface = Arc::clone(encoder.input_target().surface());

        surface.queue_buffer(vec![1; 8]);
        encoder.start().unwrap();
        surface.queue_buffer(vec![2; 8]);
        surface.queue_buffer(vec![3; 8]);
        encoder.stop().unwrap();
        surface.queue_buffer(vec![4; 8]);

        assert_eq!(encoder.frame_count(), 2);
        encoder.reset();
        encoder.release();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(CONTAINER_MAGIC));
        let header_end = bytes.iter().position(|&b| b == b'\n').unwrap();
        let header: serde_json::Value = serde_json::from_slice(&bytes[4..header_end]).unwrap();
        assert_eq!(header["frame_rate"], 30);
        assert_eq!(bytes.len() - header_end - 1, 2 * (4 + 8));
    }

    #[test]
    fn test_invalid_state_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = VirtualEncoder::prepare(&config(dir.path().join("out.mp4"))).unwrap();

        assert!(encoder.stop().is_err());
        encoder.start().unwrap();
        assert!(encoder.start().is_err());
        encoder.stop().unwrap();
        encoder.reset();
        assert!(encoder.start().is_err());
    }

    #[test]
    fn test_prepare_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = VirtualEncoder::prepare(&config(dir.path().join("missing").join("out.mp4")));
        assert!(matches!(result, Err(BackendError::Encoder(_))));
    }
}
