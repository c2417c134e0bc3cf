use tracing::debug;

use crate::image_pipeline::debayer::RgbImageData;
use crate::image_pipeline::raw::{Channel, RawFrame};

/// Smooth-hue debayer.
///
/// Green is interpolated first from the horizontal/vertical neighbors that
/// fall inside the frame (4 in the interior, 3 along an edge, 2 in a corner).
/// Red and blue are then reconstructed from the ratio of each same-color
/// neighbor to its green value, scaled by the green value at the target:
///
/// `C = G_target / n * sum(C_neighbor / G_neighbor)`
///
/// with `n = 2` for horizontal/vertical pairs and `n = 4` for the diagonal
/// quad. Neighbor greens of 0 are clamped to 1, so near-black neighborhoods
/// are smoothed rather than flagged. Taps outside the frame contribute 0.
pub struct SmoothHueDebayer;

impl SmoothHueDebayer {
    pub fn process(&self, frame: &RawFrame<'_>) -> RgbImageData {
        let width = frame.width;
        let height = frame.height;
        debug!("Smooth-hue debayer for {}x{} ({:?})", width, height, frame.bayer_phase);

        let green = interpolate_green(frame, average_green);
        reconstruct(frame, &green)
    }
}

/// Fills the green plane, estimating non-green sites with `estimate`.
pub(super) fn interpolate_green(frame: &RawFrame<'_>, estimate: fn(&RawFrame<'_>, usize, usize) -> u16) -> Vec<u16> {
    let width = frame.width;
    let mut green = vec![0u16; width * frame.height];

    for y in 0..frame.height {
        for x in 0..width {
            green[y * width + x] = if frame.bayer_phase.channel_at(x, y) == Channel::Green {
                frame.sample(x as isize, y as isize)
            } else {
                estimate(frame, x, y)
            };
        }
    }

    green
}

/// Mean of the horizontal/vertical neighbors inside the frame.
pub(super) fn average_green(frame: &RawFrame<'_>, x: usize, y: usize) -> u16 {
    let (xi, yi) = (x as isize, y as isize);
    let mut sum = 0.0f64;
    let mut taps = 0u32;
    for (nx, ny) in [(xi - 1, yi), (xi + 1, yi), (xi, yi - 1), (xi, yi + 1)] {
        if nx >= 0 && ny >= 0 && (nx as usize) < frame.width && (ny as usize) < frame.height {
            sum += f64::from(frame.sample(nx, ny));
            taps += 1;
        }
    }
    if taps == 0 { 0 } else { (sum / f64::from(taps)) as u16 }
}

/// Red and blue by green-ratio smoothing over a complete green plane.
pub(super) fn reconstruct(frame: &RawFrame<'_>, green: &[u16]) -> RgbImageData {
    let width = frame.width;
    let mut rgb = RgbImageData::new(width, frame.height, frame.bits_per_sample);

    for y in 0..frame.height {
        for x in 0..width {
            let i = (y * width + x) * 3;
            rgb.data[i] = chroma_at(frame, green, Channel::Red, x, y);
            rgb.data[i + 1] = green[y * width + x];
            rgb.data[i + 2] = chroma_at(frame, green, Channel::Blue, x, y);
        }
    }

    rgb
}

fn green_at(green: &[u16], width: usize, height: usize, x: isize, y: isize) -> f64 {
    if x < 0 || y < 0 || x as usize >= width || y as usize >= height {
        return 0.0;
    }
    f64::from(green[y as usize * width + x as usize])
}

fn chroma_at(frame: &RawFrame<'_>, green: &[u16], channel: Channel, x: usize, y: usize) -> u16 {
    let phase = frame.bayer_phase;
    if phase.channel_at(x, y) == channel {
        return frame.sample(x as isize, y as isize);
    }

    let (cx, cy) = match channel {
        Channel::Red => phase.red_offset(),
        Channel::Blue => phase.blue_offset(),
        Channel::Green => return green[y * frame.width + x],
    };
    let (xi, yi) = (x as isize, y as isize);
    let odd_column = (x % 2) != cx;
    let odd_row = (y % 2) != cy;

    let taps: &[(isize, isize)] = match (odd_column, odd_row) {
        (true, false) => &[(-1, 0), (1, 0)],
        (false, true) => &[(0, -1), (0, 1)],
        _ => &[(-1, -1), (1, -1), (-1, 1), (1, 1)],
    };

    let ratio_sum: f64 = taps
        .iter()
        .map(|&(dx, dy)| {
            let (nx, ny) = (xi + dx, yi + dy);
            let c = f64::from(frame.sample(nx, ny));
            let g = green_at(green, frame.width, frame.height, nx, ny).max(1.0);
            c / g
        })
        .sum();

    let target = f64::from(green[y * frame.width + x]);
    (target / taps.len() as f64 * ratio_sum) as u16
}
