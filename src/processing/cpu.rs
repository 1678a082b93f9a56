use rayon::prelude::*;

use crate::color::Processor;
use crate::processing::buffer::{Element, ElementFormat, PixelBuffer, PixelData, PixelError};

/// A processor specialised for one element format, applied in place.
///
/// The first three channels are treated as RGB; any further channels
/// (alpha included) pass through untouched.
#[derive(Clone, Debug)]
pub struct CpuProcessor {
    processor: Processor,
    format: ElementFormat,
}

impl CpuProcessor {
    pub fn new(processor: &Processor, format: ElementFormat) -> Self {
        Self {
            processor: processor.optimize(),
            format,
        }
    }

    pub fn apply(&self, buffer: &mut PixelBuffer) -> Result<(), PixelError> {
        if buffer.format() != self.format {
            return Err(PixelError::FormatMismatch {
                src: buffer.format(),
                dst: self.format,
            });
        }
        if self.processor.is_noop() || buffer.width() == 0 || buffer.height() == 0 {
            return Ok(());
        }
        let channels = buffer.channels();
        if channels < 3 {
            return Err(PixelError::UnsupportedChannelCount(channels));
        }
        let row_len = buffer.width() * channels;
        match buffer.data_mut() {
            PixelData::U8(v) => apply_rows(v, row_len, channels, &self.processor),
            PixelData::U16(v) => apply_rows(v, row_len, channels, &self.processor),
            PixelData::F16(v) => apply_rows(v, row_len, channels, &self.processor),
            PixelData::F32(v) => apply_rows(v, row_len, channels, &self.processor),
        }
        Ok(())
    }
}

fn apply_rows<T: Element>(
    samples: &mut [T],
    row_len: usize,
    channels: usize,
    processor: &Processor,
) {
    samples.par_chunks_mut(row_len).for_each(|row| {
        for px in row.chunks_exact_mut(channels) {
            let out = processor.apply_rgb([px[0].to_f32(), px[1].to_f32(), px[2].to_f32()]);
            px[0] = T::from_f32(out[0]);
            px[1] = T::from_f32(out[1]);
            px[2] = T::from_f32(out[2]);
        }
    });
}
