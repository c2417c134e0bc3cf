use tracing::debug;

use crate::image_pipeline::debayer::RgbImageData;
use crate::image_pipeline::debayer::smooth_hue::{average_green, interpolate_green, reconstruct};
use crate::image_pipeline::raw::RawFrame;

/// Edge-detecting variant of the smooth-hue debayer.
///
/// At each red or blue site the four directions are scored by their
/// gradient, `2 * |C_far - C| + |G_near - G_opposite|` along the direction's
/// axis. When one direction scores strictly lowest, green is extrapolated
/// along it:
///
/// `G = (3 * G_near + C + G_opposite - C_far) / 4`
///
/// Ties, and sites closer than two pixels to the border, fall back to the
/// plain neighbor average. Red and blue are then reconstructed exactly as in
/// [`SmoothHueDebayer`](super::SmoothHueDebayer).
pub struct AdaptiveSmoothHueDebayer;

impl AdaptiveSmoothHueDebayer {
    pub fn process(&self, frame: &RawFrame<'_>) -> RgbImageData {
        debug!(
            "Adaptive smooth-hue debayer for {}x{} ({:?})",
            frame.width, frame.height, frame.bayer_phase
        );

        let green = interpolate_green(frame, directional_green);
        reconstruct(frame, &green)
    }
}

fn directional_green(frame: &RawFrame<'_>, x: usize, y: usize) -> u16 {
    if x < 2 || y < 2 || x + 2 >= frame.width || y + 2 >= frame.height {
        return average_green(frame, x, y);
    }

    let (xi, yi) = (x as isize, y as isize);
    let at = |dx: isize, dy: isize| f64::from(frame.sample(xi + dx, yi + dy));
    let center = at(0, 0);
    let vertical = (at(0, -1) - at(0, 1)).abs();
    let horizontal = (at(-1, 0) - at(1, 0)).abs();

    // (score, near green, opposite green, far same-color sample)
    let directions = [
        ((at(0, -2) - center).abs() * 2.0 + vertical, at(0, -1), at(0, 1), at(0, -2)),
        ((at(0, 2) - center).abs() * 2.0 + vertical, at(0, 1), at(0, -1), at(0, 2)),
        ((at(2, 0) - center).abs() * 2.0 + horizontal, at(1, 0), at(-1, 0), at(2, 0)),
        ((at(-2, 0) - center).abs() * 2.0 + horizontal, at(-1, 0), at(1, 0), at(-2, 0)),
    ];

    let best = directions.iter().enumerate().find(|(i, candidate)| {
        directions
            .iter()
            .enumerate()
            .all(|(j, other)| *i == j || candidate.0 < other.0)
    });

    match best {
        Some((_, &(_, near, opposite, far))) => {
            ((near * 3.0 + center + opposite - far) / 4.0).clamp(0.0, f64::from(u16::MAX)) as u16
        }
        None => average_green(frame, x, y),
    }
}
