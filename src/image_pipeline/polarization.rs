//! Polarization decoding for micro-polarizer sensors.
//!
//! Every 2x2 super-pixel samples the four polarizer orientations
//! 0°, 45°, 90° and 135°; their placement is given by the frame's
//! [`PolarPhase`](crate::image_pipeline::raw::PolarPhase).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::image_pipeline::common::error::{AcquisitionError, Result};
use crate::image_pipeline::raw::{RawFrame, SensorType};

/// Which image to derive from a polarized frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolarImageType {
    RawMosaic,
    #[default]
    Intensity,
    Azimuth,
    DegreeOfLinearPolarization,
    QuadView,
}

/// Decoded single-channel 16-bit image.
#[derive(Debug, Clone)]
pub struct PolarImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u16>,
    pub bits_per_sample: u32,
}

/// Intensities of one super-pixel indexed by angle / 45.
type SuperPixel = [f64; 4];

fn super_pixel(frame: &RawFrame<'_>, bx: usize, by: usize) -> SuperPixel {
    let mut px = [0.0; 4];
    for dy in 0..2 {
        for dx in 0..2 {
            let angle = frame.polar_phase.angle_at(dx, dy);
            px[(angle / 45) as usize] = f64::from(frame.sample((bx + dx) as isize, (by + dy) as isize));
        }
    }
    px
}

fn scale_unit(value: f64) -> u16 {
    (value.clamp(0.0, 1.0) * f64::from(u16::MAX)).round() as u16
}

pub fn azimuth_degrees(px: &SuperPixel) -> f64 {
    let s1 = px[0] - px[2];
    let s2 = px[1] - px[3];
    let degrees = (0.5 * s2.atan2(s1)).to_degrees();
    if degrees < 0.0 { degrees + 180.0 } else { degrees }
}

pub fn degree_of_linear_polarization(px: &SuperPixel) -> f64 {
    let s0 = px.iter().sum::<f64>() / 2.0;
    if s0 <= 0.0 {
        return 0.0;
    }
    let s1 = px[0] - px[2];
    let s2 = px[1] - px[3];
    (s1.hypot(s2) / s0).clamp(0.0, 1.0)
}

pub fn check_polar_input(frame: &RawFrame<'_>) -> Result<()> {
    if frame.sensor_type != SensorType::Polarized {
        return Err(AcquisitionError::UnsupportedPixelFormat(format!(
            "{:?} frame cannot be polarization-decoded",
            frame.sensor_type
        )));
    }
    if frame.bits_per_sample == 0 || frame.bits_per_sample > frame.samples.container_bits() {
        return Err(AcquisitionError::UnsupportedPixelFormat(format!(
            "{} bits per sample in a {}-bit container",
            frame.bits_per_sample,
            frame.samples.container_bits()
        )));
    }
    if frame.width % 2 != 0 || frame.height % 2 != 0 {
        return Err(AcquisitionError::InvalidGeometry(format!(
            "polarized frame {}x{} must have even dimensions",
            frame.width, frame.height
        )));
    }
    if frame.samples.len() < frame.pixel_count() {
        return Err(AcquisitionError::InvalidGeometry(format!(
            "{}x{} frame carries only {} samples",
            frame.width,
            frame.height,
            frame.samples.len()
        )));
    }
    Ok(())
}

pub fn decode(frame: &RawFrame<'_>, image_type: PolarImageType) -> Result<PolarImage> {
    check_polar_input(frame)?;
    let width = frame.width;
    let height = frame.height;
    debug!("Decoding {:?} from {}x{} polarized frame", image_type, width, height);

    let mut data = vec![0u16; width * height];

    if image_type == PolarImageType::RawMosaic {
        for (i, out) in data.iter_mut().enumerate() {
            *out = frame.samples.get(i).unwrap_or(0);
        }
        return Ok(PolarImage {
            width,
            height,
            data,
            bits_per_sample: frame.bits_per_sample,
        });
    }

    let (half_w, half_h) = (width / 2, height / 2);
    let upscale = 16 - frame.bits_per_sample;

    for sy in 0..half_h {
        for sx in 0..half_w {
            let (bx, by) = (sx * 2, sy * 2);
            let px = super_pixel(frame, bx, by);

            if image_type == PolarImageType::QuadView {
                for (k, &intensity) in px.iter().enumerate() {
                    let (tx, ty) = (k % 2, k / 2);
                    data[(ty * half_h + sy) * width + tx * half_w + sx] = intensity as u16;
                }
                continue;
            }

            let value = match image_type {
                PolarImageType::Intensity => {
                    let mean = (px.iter().sum::<f64>() / 4.0) as u32;
                    (mean << upscale).min(u32::from(u16::MAX)) as u16
                }
                PolarImageType::Azimuth => scale_unit(azimuth_degrees(&px) / 180.0),
                PolarImageType::DegreeOfLinearPolarization => scale_unit(degree_of_linear_polarization(&px)),
                PolarImageType::RawMosaic | PolarImageType::QuadView => unreachable!(),
            };

            for dy in 0..2 {
                for dx in 0..2 {
                    data[(by + dy) * width + bx + dx] = value;
                }
            }
        }
    }

    let bits_per_sample = if image_type == PolarImageType::QuadView {
        frame.bits_per_sample
    } else {
        16
    };

    Ok(PolarImage {
        width,
        height,
        data,
        bits_per_sample,
    })
}
