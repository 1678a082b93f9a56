use std::str::FromStr;

use super::buffer::{ImageRegion, PixelBuffer, PixelData, PixelError, Rect};

/// Ordered channel indices requested with `--ch`. Empty means "all channels".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelList(Vec<usize>);

impl ChannelList {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Expands an empty list to `0..channels` and checks every index.
    pub fn resolve(&self, channels: usize) -> Result<Vec<usize>, PixelError> {
        if self.0.is_empty() {
            return Ok((0..channels).collect());
        }
        if let Some(&bad) = self.0.iter().find(|&&c| c >= channels) {
            return Err(PixelError::InvalidChannelList {
                list: self.to_string(),
                reason: format!("channel {} does not exist in a {}-channel image", bad, channels),
            });
        }
        Ok(self.0.clone())
    }
}

impl std::fmt::Display for ChannelList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

impl FromStr for ChannelList {
    type Err = PixelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        raw.split(',')
            .map(|part| {
                part.trim()
                    .parse::<usize>()
                    .map_err(|_| PixelError::InvalidChannelList {
                        list: raw.to_string(),
                        reason: "should be comma-separated non-negative integers".to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

/// Where the source data window lands inside the destination rectangle.
#[derive(Clone, Copy, Debug)]
struct Placement {
    src_width: usize,
    src_height: usize,
    src_channels: usize,
    dst_width: usize,
    dst_height: usize,
    offset_x: i64,
    offset_y: i64,
}

impl Placement {
    fn new(src: &PixelBuffer, data: Rect, dst: Rect) -> Self {
        Self {
            src_width: src.width(),
            src_height: src.height(),
            src_channels: src.channels(),
            dst_width: dst.width,
            dst_height: dst.height,
            offset_x: data.x as i64 - dst.x as i64,
            offset_y: data.y as i64 - dst.y as i64,
        }
    }

    /// Source columns whose destination column is in bounds.
    fn columns(&self) -> std::ops::Range<usize> {
        let start = (-self.offset_x).max(0) as usize;
        let end = (self.dst_width as i64 - self.offset_x).clamp(0, self.src_width as i64) as usize;
        start.min(end)..end
    }
}

fn copy_region<T: Copy>(src: &[T], dst: &mut [T], placement: &Placement, keep: &[usize]) {
    let columns = placement.columns();
    let dst_channels = keep.len();
    for y in 0..placement.src_height {
        let dy = y as i64 + placement.offset_y;
        if dy < 0 || dy >= placement.dst_height as i64 {
            continue;
        }
        let dy = dy as usize;
        for x in columns.clone() {
            let dx = (x as i64 + placement.offset_x) as usize;
            let src_base = (y * placement.src_width + x) * placement.src_channels;
            let dst_base = (dy * placement.dst_width + dx) * dst_channels;
            for (k, &channel) in keep.iter().enumerate() {
                dst[dst_base + k] = src[src_base + channel];
            }
        }
    }
}

/// Copies the requested channels of `src` (stored at `data`) into `dst`
/// (covering `dst_rect`). Destination samples without a source pixel are
/// left as they are.
pub fn copy_into(
    src: &PixelBuffer,
    data: Rect,
    dst: &mut PixelBuffer,
    dst_rect: Rect,
    keep: &[usize],
) -> Result<(), PixelError> {
    if src.format() != dst.format() {
        return Err(PixelError::FormatMismatch {
            src: src.format(),
            dst: dst.format(),
        });
    }
    if dst.width() != dst_rect.width
        || dst.height() != dst_rect.height
        || dst.channels() != keep.len()
    {
        return Err(PixelError::SizeMismatch {
            width: dst_rect.width,
            height: dst_rect.height,
            channels: keep.len(),
            actual: dst.data().len(),
        });
    }
    if let Some(&bad) = keep.iter().find(|&&c| c >= src.channels()) {
        return Err(PixelError::InvalidChannelList {
            list: ChannelList::new(keep.to_vec()).to_string(),
            reason: format!(
                "channel {} does not exist in a {}-channel image",
                bad,
                src.channels()
            ),
        });
    }

    let placement = Placement::new(src, data, dst_rect);
    match (src.data(), dst.data_mut()) {
        (PixelData::U8(s), PixelData::U8(d)) => copy_region(s, d, &placement, keep),
        (PixelData::U16(s), PixelData::U16(d)) => copy_region(s, d, &placement, keep),
        (PixelData::F16(s), PixelData::F16(d)) => copy_region(s, d, &placement, keep),
        (PixelData::F32(s), PixelData::F32(d)) => copy_region(s, d, &placement, keep),
        (s, d) => {
            return Err(PixelError::FormatMismatch {
                src: s.format(),
                dst: d.format(),
            });
        }
    }
    Ok(())
}

/// Selects channels and optionally crops/pads to the full window.
///
/// Returns the source untouched when neither the channel list nor the crop
/// changes the geometry; otherwise a new zero-initialised buffer is filled.
pub fn crop_and_select(
    src: PixelBuffer,
    region: &ImageRegion,
    keep: &ChannelList,
    crop_to_full: bool,
) -> Result<(PixelBuffer, ImageRegion), PixelError> {
    let indices = keep.resolve(src.channels())?;
    let identity_channels = indices.iter().copied().eq(0..src.channels());
    let dst_rect = if crop_to_full { region.full } else { region.data };

    if identity_channels && dst_rect == region.data {
        return Ok((src, *region));
    }

    let mut dst = PixelBuffer::zeroed(dst_rect.width, dst_rect.height, indices.len(), src.format());
    copy_into(&src, region.data, &mut dst, dst_rect, &indices)?;
    tracing::debug!(
        width = dst_rect.width,
        height = dst_rect.height,
        channels = indices.len(),
        "re-indexed image buffer"
    );
    let new_region = ImageRegion {
        data: dst_rect,
        full: region.full,
    };
    Ok((dst, new_region))
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::{ChannelList, copy_into, crop_and_select};
    use crate::processing::buffer::{
        ElementFormat, ImageRegion, PixelBuffer, PixelData, PixelError, Rect,
    };

    fn ramp(width: usize, height: usize, channels: usize, format: ElementFormat) -> PixelBuffer {
        let len = width * height * channels;
        let data = match format {
            ElementFormat::U8 => PixelData::U8((0..len).map(|i| (i % 251) as u8 + 1).collect()),
            ElementFormat::U16 => PixelData::U16((0..len).map(|i| i as u16 * 7 + 1).collect()),
            ElementFormat::F16 => {
                PixelData::F16((0..len).map(|i| f16::from_f32(i as f32 + 1.0)).collect())
            }
            ElementFormat::F32 => PixelData::F32((0..len).map(|i| i as f32 * 0.5 + 1.0).collect()),
        };
        PixelBuffer::new(width, height, channels, data).unwrap()
    }

    const FORMATS: [ElementFormat; 4] = [
        ElementFormat::U8,
        ElementFormat::U16,
        ElementFormat::F16,
        ElementFormat::F32,
    ];

    #[test]
    fn parses_comma_separated_indices() {
        let list: ChannelList = "2, 0,1".parse().unwrap();
        assert_eq!(list, ChannelList::new(vec![2, 0, 1]));
        assert!("".parse::<ChannelList>().unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_lists() {
        for raw in ["a,b", "1,,2", "-1", "1;2"] {
            let err = raw.parse::<ChannelList>().unwrap_err();
            assert!(matches!(err, PixelError::InvalidChannelList { .. }), "{raw}");
        }
    }

    #[test]
    fn rejects_out_of_range_channel() {
        let src = ramp(2, 2, 3, ElementFormat::U8);
        let region = ImageRegion::uncropped(2, 2);
        let err = crop_and_select(src, &region, &ChannelList::new(vec![0, 3]), false).unwrap_err();
        assert!(matches!(err, PixelError::InvalidChannelList { .. }));
    }

    #[test]
    fn identity_selection_passes_buffer_through_for_all_formats() {
        for format in FORMATS {
            for (w, h, c) in [(1, 1, 1), (3, 2, 3), (4, 5, 4)] {
                let src = ramp(w, h, c, format);
                let expected = src.as_bytes().to_vec();
                let region = ImageRegion::uncropped(w, h);
                for keep in [ChannelList::default(), ChannelList::new((0..c).collect())] {
                    let (out, out_region) =
                        crop_and_select(src.clone(), &region, &keep, false).unwrap();
                    assert_eq!(out.as_bytes(), expected.as_slice());
                    assert_eq!(out_region, region);
                }
            }
        }
    }

    #[test]
    fn subset_selection_reindexes_every_format() {
        let keep = [2usize, 0];
        for format in FORMATS {
            let src = ramp(3, 2, 4, format);
            let region = ImageRegion::uncropped(3, 2);
            let (out, _) =
                crop_and_select(src.clone(), &region, &ChannelList::new(keep.to_vec()), false)
                    .unwrap();
            assert_eq!(out.channels(), keep.len());
            assert_eq!(out.format(), format);
            let size = format.size_bytes();
            for y in 0..2 {
                for x in 0..3 {
                    for (k, &c) in keep.iter().enumerate() {
                        let s = src.index(x, y, c) * size;
                        let d = out.index(x, y, k) * size;
                        assert_eq!(
                            &out.as_bytes()[d..d + size],
                            &src.as_bytes()[s..s + size],
                            "{format} at ({x},{y},{k})"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn reordering_all_channels_is_not_a_passthrough() {
        let src = ramp(1, 1, 3, ElementFormat::U8);
        let region = ImageRegion::uncropped(1, 1);
        let (out, _) =
            crop_and_select(src, &region, &ChannelList::new(vec![2, 1, 0]), false).unwrap();
        assert_eq!(out.data(), &PixelData::U8(vec![3, 2, 1]));
    }

    #[test]
    fn crop_to_larger_full_window_pads_with_zero() {
        let src = ramp(2, 2, 1, ElementFormat::F32);
        let region = ImageRegion {
            data: Rect::new(1, 1, 2, 2),
            full: Rect::new(0, 0, 4, 3),
        };
        let (out, out_region) =
            crop_and_select(src, &region, &ChannelList::default(), true).unwrap();
        assert_eq!((out.width(), out.height(), out.channels()), (4, 3, 1));
        assert_eq!(out_region.data, region.full);
        #[rustfmt::skip]
        let expected = vec![
            0.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 1.5, 0.0,
            0.0, 2.0, 2.5, 0.0,
        ];
        assert_eq!(out.as_f32().unwrap(), expected.as_slice());
    }

    #[test]
    fn crop_to_smaller_full_window_drops_outside_pixels() {
        let src = ramp(3, 3, 1, ElementFormat::U8);
        let region = ImageRegion {
            data: Rect::new(0, 0, 3, 3),
            full: Rect::new(1, 1, 2, 1),
        };
        let (out, _) = crop_and_select(src, &region, &ChannelList::default(), true).unwrap();
        assert_eq!((out.width(), out.height()), (2, 1));
        // source samples are 1..=9 row-major; row 1, columns 1..3
        assert_eq!(out.data(), &PixelData::U8(vec![5, 6]));
    }

    #[test]
    fn crop_with_matching_windows_passes_through() {
        let src = ramp(2, 2, 3, ElementFormat::U16);
        let region = ImageRegion::uncropped(2, 2);
        let (out, _) =
            crop_and_select(src.clone(), &region, &ChannelList::default(), true).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn copy_into_rejects_mixed_formats() {
        let src = ramp(1, 1, 3, ElementFormat::U8);
        let mut dst = PixelBuffer::zeroed(1, 1, 3, ElementFormat::F32);
        let rect = Rect::at_origin(1, 1);
        let err = copy_into(&src, rect, &mut dst, rect, &[0, 1, 2]).unwrap_err();
        assert!(matches!(
            err,
            PixelError::FormatMismatch {
                src: ElementFormat::U8,
                dst: ElementFormat::F32
            }
        ));
    }
}
