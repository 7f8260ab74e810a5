// SPDX-License-Identifier: GPL-3.0-only

//! Read-only capability probe
//!
//! Turns each device's characteristics snapshot into a [`CameraInfo`]
//! descriptor. Missing characteristics map to sentinels; they never fail the
//! whole query.

use crate::backends::camera::{
    Capability, Characteristics, DeviceId, FpsRange, HardwareService, Size, StreamConfigurationMap, ValueRange,
};
use crate::constants::probe;
use crate::errors::CameraResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Named auto white balance modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AwbMode {
    Auto,
    Incandescent,
    Fluorescent,
    WarmFluorescent,
    Daylight,
    CloudyDaylight,
    Twilight,
    Shade,
}

impl AwbMode {
    /// Map a hardware mode code; `None` for codes without a name (e.g. off)
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(AwbMode::Auto),
            2 => Some(AwbMode::Incandescent),
            3 => Some(AwbMode::Fluorescent),
            4 => Some(AwbMode::WarmFluorescent),
            5 => Some(AwbMode::Daylight),
            6 => Some(AwbMode::CloudyDaylight),
            7 => Some(AwbMode::Twilight),
            8 => Some(AwbMode::Shade),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AwbMode::Auto => 1,
            AwbMode::Incandescent => 2,
            AwbMode::Fluorescent => 3,
            AwbMode::WarmFluorescent => 4,
            AwbMode::Daylight => 5,
            AwbMode::CloudyDaylight => 6,
            AwbMode::Twilight => 7,
            AwbMode::Shade => 8,
        }
    }
}

/// Fixed frame rates usable at one output size
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionFps {
    pub size: Size,
    pub fps: Vec<u32>,
}

/// Capability snapshot of one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub id: DeviceId,
    /// Device groups that can stream concurrently (same for every entry)
    pub concurrent_device_ids: Vec<BTreeSet<DeviceId>>,
    /// `-1` when the device does not report it
    pub max_streams: i32,
    pub is_logical_camera: bool,
    pub physical_camera_ids: BTreeSet<DeviceId>,
    /// Focal lengths in millimetres
    pub focal_lengths: Vec<f32>,
    pub resolutions: Vec<Size>,
    pub fps_ranges: Vec<FpsRange>,
    pub resolution_fps: Vec<ResolutionFps>,
    pub awb_modes: Vec<AwbMode>,
    /// Exposure time range in nanoseconds, absent without manual exposure
    pub exposure_time_range: Option<ValueRange<i64>>,
    pub iso_range: Option<ValueRange<i32>>,
    /// EV compensation range in stops
    pub ev_range: ValueRange<f32>,
    /// `-1` when the device does not report it
    pub max_digital_zoom: f32,
    /// Radians; `-1` when sensor size or focal length is missing
    pub horizontal_fov: f64,
    /// Radians; `-1` when sensor size or focal length is missing
    pub vertical_fov: f64,
}

/// Describe every enumerated device
pub fn describe_all_devices(service: &dyn HardwareService) -> CameraResult<Vec<CameraInfo>> {
    let concurrent = service.concurrent_device_ids().unwrap_or_else(|e| {
        warn!(error = %e, "Concurrent device groups unavailable");
        Vec::new()
    });

    let ids = service.device_ids()?;
    let infos = ids
        .into_iter()
        .map(|id| {
            let characteristics = service.characteristics(&id).unwrap_or_else(|e| {
                warn!(device = %id, error = %e, "Characteristics unreadable, reporting sentinels");
                Characteristics::default()
            });
            describe_device(id, &characteristics, &concurrent)
        })
        .collect();

    Ok(infos)
}

/// Build one descriptor from a characteristics snapshot
pub fn describe_device(
    id: DeviceId,
    characteristics: &Characteristics,
    concurrent: &[BTreeSet<DeviceId>],
) -> CameraInfo {
    debug!(device = %id, "Describing device");

    let fps_ranges = characteristics.ae_target_fps_ranges.clone().unwrap_or_default();
    let resolutions: Vec<Size> = characteristics
        .stream_configuration
        .as_ref()
        .map(|map| map.output_sizes().to_vec())
        .unwrap_or_default();

    let resolution_fps = match characteristics.stream_configuration.as_ref() {
        Some(map) => resolutions
            .iter()
            .map(|&size| ResolutionFps {
                size,
                fps: fixed_fps_for_size(map, size, &fps_ranges),
            })
            .collect(),
        None => Vec::new(),
    };

    let awb_modes = characteristics
        .awb_modes
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|&code| AwbMode::from_code(code))
        .collect();

    let focal_lengths = characteristics.focal_lengths.clone().unwrap_or_default();
    let (horizontal_fov, vertical_fov) = field_of_view(characteristics);

    CameraInfo {
        id,
        concurrent_device_ids: concurrent.to_vec(),
        max_streams: characteristics
            .max_output_streams
            .unwrap_or(probe::MISSING_STREAM_COUNT),
        is_logical_camera: characteristics.has_capability(Capability::LogicalMultiCamera),
        physical_camera_ids: characteristics.physical_camera_ids.clone(),
        focal_lengths,
        resolutions,
        fps_ranges,
        resolution_fps,
        awb_modes,
        exposure_time_range: characteristics.exposure_time_range,
        iso_range: characteristics.sensitivity_range,
        ev_range: ev_range(characteristics),
        max_digital_zoom: characteristics
            .max_digital_zoom
            .unwrap_or(probe::MISSING_ZOOM),
        horizontal_fov,
        vertical_fov,
    }
}

/// Highest frame rate implied by the minimum frame duration at `size`
pub fn max_fps_for_size(map: &StreamConfigurationMap, size: Size) -> u32 {
    match map.output_min_frame_duration(size) {
        Some(duration) if duration > 0 => (1_000_000_000 / duration).min(u32::MAX as i64) as u32,
        _ => probe::FALLBACK_MAX_FPS,
    }
}

/// Fixed ranges whose rate the size can sustain
fn fixed_fps_for_size(map: &StreamConfigurationMap, size: Size, ranges: &[FpsRange]) -> Vec<u32> {
    let max_fps = max_fps_for_size(map, size);
    ranges
        .iter()
        .filter(|range| range.upper <= max_fps && range.is_fixed())
        .map(|range| range.lower)
        .collect()
}

fn ev_range(characteristics: &Characteristics) -> ValueRange<f32> {
    match (characteristics.ae_compensation_range, characteristics.ae_compensation_step) {
        (Some(range), Some(step)) => {
            let step = step.as_f32();
            ValueRange::new(range.lower as f32 * step, range.upper as f32 * step)
        }
        _ => {
            let (lower, upper) = probe::DEFAULT_EV_RANGE;
            ValueRange::new(lower, upper)
        }
    }
}

/// `2·atan(dimension / (2·focal))` using the first focal length
fn field_of_view(characteristics: &Characteristics) -> (f64, f64) {
    let focal = characteristics
        .focal_lengths
        .as_ref()
        .and_then(|lengths| lengths.first().copied());

    match (characteristics.sensor_physical_size, focal) {
        (Some(sensor), Some(focal)) if focal > 0.0 => {
            let focal = focal as f64;
            let fov = |dimension: f32| 2.0 * (dimension as f64 / (2.0 * focal)).atan();
            (fov(sensor.width), fov(sensor.height))
        }
        _ => (probe::MISSING_FOV, probe::MISSING_FOV),
    }
}
