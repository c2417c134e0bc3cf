use std::io::Cursor;

use bayer::{BayerDepth, CFA, Demosaic, RasterDepth, RasterMut};
use tracing::debug;

use crate::image_pipeline::common::error::{AcquisitionError, Result};
use crate::image_pipeline::debayer::RgbImageData;
use crate::image_pipeline::raw::{BayerPhase, RawFrame, RawSamples};

/// Bilinear debayer backed by the `bayer` crate.
pub struct CpuDebayer;

fn cfa_for(phase: BayerPhase) -> CFA {
    match phase {
        BayerPhase::Rggb => CFA::RGGB,
        BayerPhase::Bggr => CFA::BGGR,
        BayerPhase::Grbg => CFA::GRBG,
        BayerPhase::Gbrg => CFA::GBRG,
    }
}

impl CpuDebayer {
    pub fn process(&self, frame: &RawFrame<'_>) -> Result<RgbImageData> {
        let width = frame.width;
        let height = frame.height;

        let samples = match frame.samples {
            RawSamples::U16(data) => data,
            RawSamples::U8(_) => {
                return Err(AcquisitionError::UnsupportedPixelFormat(
                    "bilinear debayer requires 16-bit samples".to_string(),
                ));
            }
        };

        // bayer crate reads a little-endian byte stream
        let bayer_bytes: Vec<u8> = samples
            .iter()
            .take(width * height)
            .flat_map(|&val| val.to_le_bytes())
            .collect();

        let output_buf_size = width * height * 3 * 2;
        let mut output_buf = vec![0u8; output_buf_size];
        let mut cursor = Cursor::new(&bayer_bytes[..]);

        debug!(
            "Running demosaic with CFA={:?}, algo=Linear, input bytes: {}, output buffer: {}",
            frame.bayer_phase,
            bayer_bytes.len(),
            output_buf_size
        );

        {
            let mut output_raster = RasterMut::new(width, height, RasterDepth::Depth16, &mut output_buf);

            bayer::run_demosaic(
                &mut cursor,
                BayerDepth::Depth16LE,
                cfa_for(frame.bayer_phase),
                Demosaic::Linear,
                &mut output_raster,
            )
            .map_err(|e| AcquisitionError::Demosaic(format!("{:?}", e)))?;
        }

        // the raster holds host-order u16 samples
        let data: Vec<u16> = output_buf
            .chunks_exact(2)
            .map(|b| u16::from_ne_bytes([b[0], b[1]]))
            .collect();

        Ok(RgbImageData {
            width,
            height,
            data,
            bits_per_sample: frame.bits_per_sample,
        })
    }
}
