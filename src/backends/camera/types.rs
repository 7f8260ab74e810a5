// SPDX-License-Identifier: GPL-3.0-only
// Shared types for the hardware service contract

//! Shared types for camera backends
//!
//! Everything the controller exchanges with a hardware service lives here:
//! device characteristics snapshots, stream targets, capture request
//! descriptors, session configurations and the callback events.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a device as enumerated by the hardware service
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Pixel dimensions of a stream or sensor mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Physical sensor dimensions in millimetres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeF {
    pub width: f32,
    pub height: f32,
}

/// Frame-rate range in frames per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FpsRange {
    pub lower: u32,
    pub upper: u32,
}

impl FpsRange {
    pub const fn new(lower: u32, upper: u32) -> Self {
        Self { lower, upper }
    }

    /// A fixed range denotes a constant frame rate (lower == upper)
    pub fn is_fixed(&self) -> bool {
        self.lower == self.upper
    }
}

impl std::fmt::Display for FpsRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

/// Inclusive value range reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange<T> {
    pub lower: T,
    pub upper: T,
}

impl<T> ValueRange<T> {
    pub const fn new(lower: T, upper: T) -> Self {
        Self { lower, upper }
    }
}

/// Rational number (used for the AE compensation step)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub numerator: i32,
    pub denominator: i32,
}

impl Rational {
    pub fn as_f32(&self) -> f32 {
        if self.denominator == 0 {
            0.0
        } else {
            self.numerator as f32 / self.denominator as f32
        }
    }
}

/// Direction the lens faces relative to the device screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LensFacing {
    Front,
    Back,
    External,
}

/// Optional device capabilities advertised in the characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    BackwardCompatible,
    ManualSensor,
    Raw,
    LogicalMultiCamera,
    ConstrainedHighSpeedVideo,
}

/// Minimum frame duration for one output size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDuration {
    pub size: Size,
    /// Nanoseconds; zero or negative means unknown
    pub duration_ns: i64,
}

/// High-speed video sizes with their supported fps ranges
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighSpeedVideoConfiguration {
    pub size: Size,
    pub fps_ranges: Vec<FpsRange>,
}

/// Output stream configuration map of a device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfigurationMap {
    /// JPEG output sizes
    pub output_sizes: Vec<Size>,
    pub min_frame_durations: Vec<FrameDuration>,
    pub high_speed_video: Vec<HighSpeedVideoConfiguration>,
}

impl StreamConfigurationMap {
    pub fn output_sizes(&self) -> &[Size] {
        &self.output_sizes
    }

    /// Minimum frame duration in nanoseconds for the given output size
    pub fn output_min_frame_duration(&self, size: Size) -> Option<i64> {
        self.min_frame_durations
            .iter()
            .find(|d| d.size == size)
            .map(|d| d.duration_ns)
    }

    pub fn high_speed_video_sizes(&self) -> Vec<Size> {
        self.high_speed_video.iter().map(|c| c.size).collect()
    }

    pub fn high_speed_video_fps_ranges_for(&self, size: Size) -> &[FpsRange] {
        self.high_speed_video
            .iter()
            .find(|c| c.size == size)
            .map(|c| c.fps_ranges.as_slice())
            .unwrap_or(&[])
    }
}

/// Static characteristics snapshot of one device
///
/// Every field is optional: a hardware service may omit any key it cannot read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Characteristics {
    pub lens_facing: Option<LensFacing>,
    pub capabilities: Option<Vec<Capability>>,
    pub physical_camera_ids: BTreeSet<DeviceId>,
    pub max_output_streams: Option<i32>,
    pub stream_configuration: Option<StreamConfigurationMap>,
    pub focal_lengths: Option<Vec<f32>>,
    pub ae_target_fps_ranges: Option<Vec<FpsRange>>,
    pub awb_modes: Option<Vec<i32>>,
    pub exposure_time_range: Option<ValueRange<i64>>,
    pub sensitivity_range: Option<ValueRange<i32>>,
    pub ae_compensation_range: Option<ValueRange<i32>>,
    pub ae_compensation_step: Option<Rational>,
    pub max_digital_zoom: Option<f32>,
    pub sensor_physical_size: Option<SizeF>,
}

impl Characteristics {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities
            .as_ref()
            .is_some_and(|caps| caps.contains(&capability))
    }
}

/// Role of an output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Preview,
    StillImage,
    Encoder,
}

/// Buffer format negotiated for a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamFormat {
    /// Implementation-defined format (display and encoder surfaces)
    Private,
    Jpeg,
    Yuv420,
}

/// Consumer end of an output stream.
///
/// The hardware writes every finished buffer for this stream into it.
pub trait Surface: Send + Sync {
    fn queue_buffer(&self, buffer: Vec<u8>);
}

/// Identity of a stream target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(u64);

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

impl TargetId {
    fn next() -> Self {
        Self(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A sink identity plus its negotiated size and format
///
/// Cloning shares the same surface; equality is identity.
#[derive(Clone)]
pub struct StreamTarget {
    id: TargetId,
    kind: TargetKind,
    size: Size,
    format: StreamFormat,
    surface: Arc<dyn Surface>,
}

impl StreamTarget {
    pub fn new(kind: TargetKind, size: Size, format: StreamFormat, surface: Arc<dyn Surface>) -> Self {
        Self {
            id: TargetId::next(),
            kind,
            size,
            format,
            surface,
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn surface(&self) -> &Arc<dyn Surface> {
        &self.surface
    }
}

impl PartialEq for StreamTarget {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for StreamTarget {}

impl std::fmt::Debug for StreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTarget")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("format", &self.format)
            .finish()
    }
}

/// Request shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
    StillCapture,
    Record,
}

/// 3A control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Off,
    Auto,
}

/// Autofocus mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfMode {
    Off,
    Auto,
    ContinuousVideo,
    ContinuousPicture,
}

/// Immutable capture request descriptor
///
/// Built fresh for each session configuration or still capture through
/// [`CaptureRequest::builder`]; there is no way to mutate it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    template: RequestTemplate,
    targets: Vec<StreamTarget>,
    control_mode: Option<ControlMode>,
    af_mode: Option<AfMode>,
    target_fps_range: Option<FpsRange>,
}

impl CaptureRequest {
    pub fn builder(template: RequestTemplate) -> CaptureRequestBuilder {
        CaptureRequestBuilder {
            request: CaptureRequest {
                template,
                targets: Vec::new(),
                control_mode: None,
                af_mode: None,
                target_fps_range: None,
            },
        }
    }

    pub fn template(&self) -> RequestTemplate {
        self.template
    }

    pub fn targets(&self) -> &[StreamTarget] {
        &self.targets
    }

    pub fn control_mode(&self) -> Option<ControlMode> {
        self.control_mode
    }

    pub fn af_mode(&self) -> Option<AfMode> {
        self.af_mode
    }

    pub fn target_fps_range(&self) -> Option<FpsRange> {
        self.target_fps_range
    }
}

/// Builder for [`CaptureRequest`]
#[derive(Debug)]
pub struct CaptureRequestBuilder {
    request: CaptureRequest,
}

impl CaptureRequestBuilder {
    pub fn add_target(mut self, target: &StreamTarget) -> Self {
        if !self.request.targets.contains(target) {
            self.request.targets.push(target.clone());
        }
        self
    }

    pub fn control_mode(mut self, mode: ControlMode) -> Self {
        self.request.control_mode = Some(mode);
        self
    }

    pub fn af_mode(mut self, mode: AfMode) -> Self {
        self.request.af_mode = Some(mode);
        self
    }

    pub fn target_fps_range(mut self, range: FpsRange) -> Self {
        self.request.target_fps_range = Some(range);
        self
    }

    pub fn build(self) -> CaptureRequest {
        self.request
    }
}

/// Session type requested from the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionType {
    #[default]
    Regular,
    ConstrainedHighSpeed,
}

/// One output of an explicit session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct OutputConfiguration {
    pub target: StreamTarget,
}

impl OutputConfiguration {
    pub fn new(target: StreamTarget) -> Self {
        Self { target }
    }
}

/// Explicit session configuration (output configurations + session type)
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfiguration {
    pub session_type: SessionType,
    pub outputs: Vec<OutputConfiguration>,
}

impl SessionConfiguration {
    pub fn targets(&self) -> Vec<StreamTarget> {
        self.outputs.iter().map(|o| o.target.clone()).collect()
    }
}

/// Device lifecycle notifications
pub enum DeviceEvent {
    Opened(super::DeviceHandle),
    Disconnected,
    Error(i32),
}

impl std::fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceEvent::Opened(device) => write!(f, "Opened({})", device.id()),
            DeviceEvent::Disconnected => write!(f, "Disconnected"),
            DeviceEvent::Error(code) => write!(f, "Error({})", code),
        }
    }
}

/// Session configuration outcome
pub enum SessionEvent {
    Configured(super::SessionHandle),
    ConfigureFailed,
}

/// Why a capture failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFailureReason {
    Error,
    Flushed,
}

/// Still capture outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    Completed,
    Failed(CaptureFailureReason),
}

/// Device callback; receives every lifecycle notification for one open call
pub type DeviceCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Session callback; invoked exactly once per configuration request
pub type SessionCallback = Box<dyn FnOnce(SessionEvent) + Send>;

/// Capture callback; invoked exactly once per capture request
pub type CaptureCallback = Box<dyn FnOnce(CaptureEvent) + Send>;

/// Video codec used by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Hevc,
}

/// Audio codec used by the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
}

/// Container format of the encoder output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Mpeg4,
}

/// Fixed encoder configuration for one recording
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub output_path: std::path::PathBuf,
    pub output_format: OutputFormat,
    pub video_codec: VideoCodec,
    pub audio_codec: Option<AudioCodec>,
    pub bitrate: u32,
    pub frame_rate: u32,
    pub size: Size,
    pub orientation_hint: u32,
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for hardware service operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Unknown device id
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    /// Device is already opened by another client
    #[error("Device in use: {0}")]
    DeviceInUse(String),
    /// Operation on a closed device or session
    #[error("Resource closed: {0}")]
    Closed(String),
    /// Operation not valid for this session type
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// Encoder could not be prepared or driven
    #[error("Encoder error: {0}")]
    Encoder(String),
    /// General I/O error
    #[error("I/O error: {0}")]
    Io(String),
    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}
