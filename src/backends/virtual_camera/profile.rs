// SPDX-License-Identifier: GPL-3.0-only

//! Device profiles for the virtual camera
//!
//! A profile describes what the simulated hardware advertises: its devices
//! with their characteristics, concurrency groups and service flags. The
//! built-in profile has a rear camera with high-speed video and a front
//! camera; others can be loaded from JSON.

use crate::backends::camera::{
    BackendError, BackendResult, Capability, Characteristics, DeviceId, FpsRange, FrameDuration,
    HighSpeedVideoConfiguration, LensFacing, Rational, Size, SizeF, StreamConfigurationMap, ValueRange,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

/// One simulated device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub id: DeviceId,
    #[serde(default)]
    pub characteristics: Characteristics,
}

/// Everything the simulated service advertises
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareProfile {
    pub permission_granted: bool,
    pub supports_session_configuration: bool,
    pub devices: Vec<DeviceProfile>,
    pub concurrent_device_ids: Vec<BTreeSet<DeviceId>>,
}

impl Default for HardwareProfile {
    fn default() -> Self {
        Self::builtin()
    }
}

impl HardwareProfile {
    /// Rear camera "0" with high-speed video, front camera "1"
    pub fn builtin() -> Self {
        let rear = DeviceId::from("0");
        let front = DeviceId::from("1");
        Self {
            permission_granted: true,
            supports_session_configuration: true,
            devices: vec![
                DeviceProfile {
                    id: rear.clone(),
                    characteristics: rear_camera(),
                },
                DeviceProfile {
                    id: front.clone(),
                    characteristics: front_camera(),
                },
            ],
            concurrent_device_ids: vec![BTreeSet::from([rear, front])],
        }
    }

    pub fn load(path: &Path) -> BackendResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BackendError::Io(format!("{}: {e}", path.display())))?;
        let profile: Self = serde_json::from_str(&text)
            .map_err(|e| BackendError::Other(format!("invalid profile {}: {e}", path.display())))?;
        info!(path = %path.display(), devices = profile.devices.len(), "Loaded hardware profile");
        Ok(profile)
    }

    pub fn device(&self, id: &DeviceId) -> Option<&DeviceProfile> {
        self.devices.iter().find(|device| &device.id == id)
    }
}

fn durations(sizes: &[Size], duration_ns: i64) -> Vec<FrameDuration> {
    sizes
        .iter()
        .map(|&size| FrameDuration { size, duration_ns })
        .collect()
}

fn rear_camera() -> Characteristics {
    let sizes = vec![
        Size::new(4000, 3000),
        Size::new(1920, 1080),
        Size::new(1280, 720),
        Size::new(640, 480),
    ];
    let mut min_frame_durations = durations(&sizes[1..], 16_666_666);
    min_frame_durations.push(FrameDuration {
        size: sizes[0],
        duration_ns: 33_333_333,
    });

    Characteristics {
        lens_facing: Some(LensFacing::Back),
        capabilities: Some(vec![
            Capability::BackwardCompatible,
            Capability::ManualSensor,
            Capability::ConstrainedHighSpeedVideo,
        ]),
        max_output_streams: Some(3),
        stream_configuration: Some(StreamConfigurationMap {
            output_sizes: sizes,
            min_frame_durations,
            high_speed_video: vec![
                HighSpeedVideoConfiguration {
                    size: Size::new(1920, 1080),
                    fps_ranges: vec![FpsRange::new(120, 120), FpsRange::new(30, 120)],
                },
                HighSpeedVideoConfiguration {
                    size: Size::new(1280, 720),
                    fps_ranges: vec![
                        FpsRange::new(120, 120),
                        FpsRange::new(240, 240),
                        FpsRange::new(30, 240),
                    ],
                },
            ],
        }),
        focal_lengths: Some(vec![4.38]),
        ae_target_fps_ranges: Some(vec![
            FpsRange::new(15, 30),
            FpsRange::new(30, 30),
            FpsRange::new(60, 60),
        ]),
        awb_modes: Some((0..=8).collect()),
        exposure_time_range: Some(ValueRange::new(100_000, 400_000_000)),
        sensitivity_range: Some(ValueRange::new(50, 3200)),
        ae_compensation_range: Some(ValueRange::new(-12, 12)),
        ae_compensation_step: Some(Rational {
            numerator: 1,
            denominator: 6,
        }),
        max_digital_zoom: Some(8.0),
        sensor_physical_size: Some(SizeF {
            width: 6.4,
            height: 4.8,
        }),
        ..Default::default()
    }
}

fn front_camera() -> Characteristics {
    let sizes = vec![Size::new(1920, 1080), Size::new(1280, 720), Size::new(640, 480)];
    Characteristics {
        lens_facing: Some(LensFacing::Front),
        capabilities: Some(vec![Capability::BackwardCompatible]),
        max_output_streams: Some(2),
        stream_configuration: Some(StreamConfigurationMap {
            min_frame_durations: durations(&sizes, 33_333_333),
            output_sizes: sizes,
            high_speed_video: Vec::new(),
        }),
        focal_lengths: Some(vec![2.2]),
        ae_target_fps_ranges: Some(vec![FpsRange::new(15, 30), FpsRange::new(30, 30)]),
        awb_modes: Some(vec![1]),
        max_digital_zoom: Some(4.0),
        sensor_physical_size: Some(SizeF {
            width: 3.6,
            height: 2.7,
        }),
        ..Default::default()
    }
}
