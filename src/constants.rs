// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use crate::backends::camera::Size;
use std::time::Duration;

/// Application identity and on-disk layout
pub mod app_info {
    /// Directory name under the platform config/data dirs
    pub const APP_DIR: &str = "camera-control";

    /// Configuration file name inside the config dir
    pub const CONFIG_FILE: &str = "config.json";

    /// Sub-directory of the photos/videos dirs that receives our media
    pub const MEDIA_SUBDIR: &str = "Camera";

    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

/// Still capture defaults
pub mod still {
    use super::Size;

    /// Fallback still size when the requested one is not advertised
    pub const DEFAULT_RESOLUTION: Size = Size::new(1920, 1080);

    /// Images the still sink may hold at once
    pub const MAX_IMAGES: usize = 2;

    /// File name prefix and suffix for persisted photos
    pub const FILE_PREFIX: &str = "JPEG_";
    pub const FILE_SUFFIX: &str = "_camera.jpg";

    /// chrono format for the photo timestamp
    pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

    /// JPEG quality used by the virtual camera renderer
    pub const JPEG_QUALITY: u8 = 90;
}

/// Recording defaults
pub mod recording {
    /// Frame rate for normal recording
    pub const FRAME_RATE: u32 = 120;

    /// Encoder bitrate in bits per second (10 Mb/s)
    pub const BITRATE: u32 = 10_000_000;

    /// Orientation hint in degrees
    pub const ORIENTATION_HINT: u32 = 90;

    /// Extension of allocated video files
    pub const VIDEO_EXTENSION: &str = "mp4";
}

/// Capability probe sentinels and defaults
pub mod probe {
    /// Max output stream count when the characteristic is missing
    pub const MISSING_STREAM_COUNT: i32 = -1;

    /// Field of view when sensor size or focal length is missing
    pub const MISSING_FOV: f64 = -1.0;

    /// Frame rate assumed when the minimum frame duration is unreadable
    pub const FALLBACK_MAX_FPS: u32 = 30;

    /// EV range reported when the device exposes no compensation range
    pub const DEFAULT_EV_RANGE: (f32, f32) = (-1.0, 1.0);

    /// Zoom ceiling when the device reports none
    pub const MISSING_ZOOM: f32 = -1.0;
}

/// Thread and timeout settings
pub mod timing {
    use super::Duration;

    /// Name of the controller's callback context
    pub const CONTROLLER_CONTEXT: &str = "CameraBackground";

    /// Name of the per-capture callback context
    pub const CAPTURE_CONTEXT: &str = "CameraPicture";

    /// Join timeout for the controller context on teardown
    pub const CONTEXT_JOIN_TIMEOUT: Duration = Duration::from_millis(1000);

    /// Frame rate of the virtual preview pump
    pub const VIRTUAL_PREVIEW_FPS: u32 = 30;
}
