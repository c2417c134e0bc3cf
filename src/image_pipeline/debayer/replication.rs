use tracing::debug;

use crate::image_pipeline::debayer::RgbImageData;
use crate::image_pipeline::raw::RawFrame;

/// Nearest-neighbor debayer: every pixel of a 2x2 block takes the block's red
/// and blue samples and the green sample of its own row.
pub struct ReplicationDebayer;

impl ReplicationDebayer {
    pub fn process(&self, frame: &RawFrame<'_>) -> RgbImageData {
        let width = frame.width;
        let height = frame.height;
        debug!("Replication debayer for {}x{} ({:?})", width, height, frame.bayer_phase);

        let mut rgb = RgbImageData::new(width, height, frame.bits_per_sample);
        let (rx, ry) = frame.bayer_phase.red_offset();
        let (bxo, byo) = frame.bayer_phase.blue_offset();

        for by in (0..height).step_by(2) {
            for bx in (0..width).step_by(2) {
                let red = frame.sample((bx + rx) as isize, (by + ry) as isize);
                let blue = frame.sample((bx + bxo) as isize, (by + byo) as isize);

                for dy in 0..2 {
                    let y = by + dy;
                    if y >= height {
                        break;
                    }
                    // each row holds one green next to its red or blue sample
                    let gx = if dy == ry { 1 - rx } else { rx };
                    let green = frame.sample((bx + gx) as isize, y as isize);

                    for dx in 0..2 {
                        let x = bx + dx;
                        if x >= width {
                            break;
                        }
                        let i = (y * width + x) * 3;
                        rgb.data[i] = red;
                        rgb.data[i + 1] = green;
                        rgb.data[i + 2] = blue;
                    }
                }
            }
        }

        rgb
    }
}
